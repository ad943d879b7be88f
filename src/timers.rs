// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Protocol timer plumbing.
//!
//! State machines never sleep; they record deadlines and hand
//! [`TimerUpdate`]s to the [`TimerWheel`], which sleeps until the
//! earliest deadline and feeds expirations back through a channel.
//! Expirations are delivered in non-decreasing deadline order; ties
//! are broken by the ordering of [`TimerKind`] so a run is
//! deterministic.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::logging::{Facility, Logger};
use crate::{log_debug, log_info};

/// Converts a protocol interval in 0.1 s units to a [`Duration`].
pub fn csec_duration(csec: u32) -> Duration {
    Duration::from_millis(u64::from(csec) * 100)
}

/// The kinds of one-shot callbacks the two state machines schedule.
///
/// A kind doubles as the timer's identity: scheduling with
/// `replace_existing` cancels any pending timer of the same kind, and
/// cancellation is by kind. Kinds that may have several instances in
/// flight (`StateChange`, `GroupQuery`) carry the id of their
/// [`EventSchedule`](crate::schedule::EventSchedule) entry instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Member: pending response to a general query
    GeneralResponse,
    /// Member: pending response to a group-specific query
    GroupResponse { group: Ipv4Addr },
    /// Member: scheduled state-change report retransmission
    StateChange { id: u64 },
    /// Router: next periodic (or startup) general query
    GeneralQuery,
    /// Router: scheduled group-specific query retransmission
    GroupQuery { id: u64 },
    /// Router: the other querier's presence has timed out
    OtherQuerierGone,
    /// Router: a source record's timer ran out
    SourceExpiry { group: Ipv4Addr, source: Ipv4Addr },
    /// Router: a group record's timer ran out
    GroupExpiry { group: Ipv4Addr },
}

/// Request to schedule a timer
#[derive(Debug, Clone)]
pub struct TimerRequest {
    /// Kind (and identity) of the timer
    pub kind: TimerKind,
    /// When the timer should fire
    pub fire_at: Instant,
    /// Whether this cancels any existing timer of the same kind
    pub replace_existing: bool,
}

/// A scheduling instruction handed from a state machine to the wheel.
#[derive(Debug, Clone)]
pub enum TimerUpdate {
    Schedule(TimerRequest),
    Cancel(TimerKind),
}

impl TimerUpdate {
    /// Schedule `kind` at `fire_at`, replacing any pending timer of
    /// the same kind.
    pub fn replace(kind: TimerKind, fire_at: Instant) -> Self {
        TimerUpdate::Schedule(TimerRequest {
            kind,
            fire_at,
            replace_existing: true,
        })
    }

    /// Schedule `kind` at `fire_at` alongside whatever else is pending.
    pub fn once(kind: TimerKind, fire_at: Instant) -> Self {
        TimerUpdate::Schedule(TimerRequest {
            kind,
            fire_at,
            replace_existing: false,
        })
    }
}

/// A scheduled timer with its fire time and kind
#[derive(Debug, Clone)]
struct ScheduledTimer {
    fire_at: Instant,
    kind: TimerKind,
}

impl PartialEq for ScheduledTimer {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.kind == other.kind
    }
}

impl Eq for ScheduledTimer {}

impl PartialOrd for ScheduledTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTimer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then_with(|| self.kind.cmp(&other.kind))
    }
}

/// Timer wheel driving both state machines.
///
/// Holds pending timers in a min-heap and sleeps until the earliest
/// deadline, waking early when a new update arrives. Expired kinds
/// are sent to the dispatch loop; a kind fires at most once per
/// scheduling.
pub struct TimerWheel {
    /// Pending timers ordered by fire time
    timers: BinaryHeap<std::cmp::Reverse<ScheduledTimer>>,
    /// Channel to receive schedule/cancel requests
    update_rx: mpsc::Receiver<TimerUpdate>,
    /// Channel to deliver expirations
    expiry_tx: mpsc::Sender<TimerKind>,
    /// Logger
    logger: Logger,
}

impl TimerWheel {
    pub fn new(
        update_rx: mpsc::Receiver<TimerUpdate>,
        expiry_tx: mpsc::Sender<TimerKind>,
        logger: Logger,
    ) -> Self {
        Self {
            timers: BinaryHeap::new(),
            update_rx,
            expiry_tx,
            logger,
        }
    }

    fn apply(&mut self, update: TimerUpdate) {
        match update {
            TimerUpdate::Schedule(request) => {
                if request.replace_existing {
                    self.remove_kind(&request.kind);
                }
                self.timers.push(std::cmp::Reverse(ScheduledTimer {
                    fire_at: request.fire_at,
                    kind: request.kind,
                }));
                log_debug!(
                    self.logger,
                    Facility::Timer,
                    &format!("scheduled {:?}, {} pending", request.kind, self.timers.len())
                );
            }
            TimerUpdate::Cancel(kind) => {
                self.remove_kind(&kind);
                log_debug!(
                    self.logger,
                    Facility::Timer,
                    &format!("cancelled {:?}, {} pending", kind, self.timers.len())
                );
            }
        }
    }

    fn remove_kind(&mut self, kind: &TimerKind) {
        self.timers = self.timers.drain().filter(|t| t.0.kind != *kind).collect();
    }

    /// Run the timer loop until both channels close.
    pub async fn run(mut self) {
        log_info!(self.logger, Facility::Timer, "timer wheel started");

        loop {
            let sleep_duration = if let Some(std::cmp::Reverse(next)) = self.timers.peek() {
                let now = Instant::now();
                if next.fire_at <= now {
                    Duration::ZERO
                } else {
                    next.fire_at - now
                }
            } else {
                // Nothing pending; sleep until a new request arrives.
                Duration::from_secs(3600)
            };

            tokio::select! {
                _ = sleep(sleep_duration) => {
                    let now = Instant::now();
                    while let Some(std::cmp::Reverse(timer)) = self.timers.peek() {
                        if timer.fire_at <= now {
                            let timer = self.timers.pop().unwrap().0;
                            log_debug!(
                                self.logger,
                                Facility::Timer,
                                &format!("expired {:?}", timer.kind)
                            );
                            if self.expiry_tx.send(timer.kind).await.is_err() {
                                log_info!(
                                    self.logger,
                                    Facility::Timer,
                                    "expiry channel closed, timer wheel exiting"
                                );
                                return;
                            }
                        } else {
                            break;
                        }
                    }
                }

                update = self.update_rx.recv() => {
                    match update {
                        Some(update) => self.apply(update),
                        None => {
                            log_info!(
                                self.logger,
                                Facility::Timer,
                                "update channel closed, timer wheel exiting"
                            );
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csec_duration() {
        assert_eq!(csec_duration(0), Duration::ZERO);
        assert_eq!(csec_duration(10), Duration::from_secs(1));
        assert_eq!(csec_duration(2600), Duration::from_secs(260));
    }

    #[test]
    fn test_timer_kind_identity() {
        let a = TimerKind::GroupResponse {
            group: "239.1.1.1".parse().unwrap(),
        };
        let b = TimerKind::GroupResponse {
            group: "239.1.1.1".parse().unwrap(),
        };
        let c = TimerKind::GroupResponse {
            group: "239.1.1.2".parse().unwrap(),
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(TimerKind::GeneralResponse, TimerKind::GeneralQuery);
    }

    #[test]
    fn test_scheduled_timer_ordering() {
        let now = Instant::now();
        let early = ScheduledTimer {
            fire_at: now,
            kind: TimerKind::GeneralQuery,
        };
        let late = ScheduledTimer {
            fire_at: now + Duration::from_secs(1),
            kind: TimerKind::GeneralQuery,
        };
        assert!(early < late);

        // Equal deadlines fall back to the kind ordering.
        let a = ScheduledTimer {
            fire_at: now,
            kind: TimerKind::GeneralResponse,
        };
        let b = ScheduledTimer {
            fire_at: now,
            kind: TimerKind::GeneralQuery,
        };
        assert_ne!(a.cmp(&b), Ordering::Equal);
    }

    #[tokio::test]
    async fn test_wheel_fires_in_deadline_order() {
        let (update_tx, update_rx) = mpsc::channel(16);
        let (expiry_tx, mut expiry_rx) = mpsc::channel(16);
        tokio::spawn(TimerWheel::new(update_rx, expiry_tx, Logger::null()).run());

        let now = Instant::now();
        let group: Ipv4Addr = "239.9.9.9".parse().unwrap();
        update_tx
            .send(TimerUpdate::once(
                TimerKind::GroupExpiry { group },
                now + Duration::from_millis(120),
            ))
            .await
            .unwrap();
        update_tx
            .send(TimerUpdate::once(
                TimerKind::GeneralQuery,
                now + Duration::from_millis(40),
            ))
            .await
            .unwrap();

        assert_eq!(expiry_rx.recv().await, Some(TimerKind::GeneralQuery));
        assert_eq!(expiry_rx.recv().await, Some(TimerKind::GroupExpiry { group }));
    }

    #[tokio::test]
    async fn test_wheel_replace_and_cancel() {
        let (update_tx, update_rx) = mpsc::channel(16);
        let (expiry_tx, mut expiry_rx) = mpsc::channel(16);
        tokio::spawn(TimerWheel::new(update_rx, expiry_tx, Logger::null()).run());

        let now = Instant::now();
        update_tx
            .send(TimerUpdate::replace(
                TimerKind::GeneralQuery,
                now + Duration::from_millis(40),
            ))
            .await
            .unwrap();
        // Replacing pushes the deadline out; the original must not fire.
        update_tx
            .send(TimerUpdate::replace(
                TimerKind::GeneralQuery,
                now + Duration::from_millis(150),
            ))
            .await
            .unwrap();
        update_tx
            .send(TimerUpdate::once(
                TimerKind::GeneralResponse,
                now + Duration::from_millis(80),
            ))
            .await
            .unwrap();
        update_tx
            .send(TimerUpdate::Cancel(TimerKind::GeneralResponse))
            .await
            .unwrap();

        // Only the replaced general query fires, after its new deadline.
        assert_eq!(expiry_rx.recv().await, Some(TimerKind::GeneralQuery));
        assert!(Instant::now() >= now + Duration::from_millis(150));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(expiry_rx.try_recv().is_err());
    }
}
