// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Group-member state machine (RFC 3376 §5, host behavior)
//!
//! Tracks this host's reception state per multicast group and speaks
//! the host side of IGMPv3:
//!
//! - local joins/leaves emit state-change reports, retransmitted
//!   `robustness_variable` times with random gaps,
//! - received queries schedule a delayed current-state response
//!   (general or per-group), with the RFC's suppression rules,
//! - received IP traffic is classified against the filter.
//!
//! All emitted reports go to 224.0.0.22.
//!
//! The machine is sans-IO: every handler takes `now` and returns a
//! [`HandlerOutput`] of timer updates and packets.

pub mod filter;

pub use filter::{FilterMode, FilterRecord, MemberFilter};

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::time::Instant;

use crate::actions::{Forward, HandlerOutput};
use crate::logging::{Facility, Logger};
use crate::message::{GroupRecord, MembershipQuery, MembershipReport, ALL_REPORTERS, CHANGE_TO_INCLUDE, MODE_IS_INCLUDE};
use crate::random::RandomSource;
use crate::schedule::EventSchedule;
use crate::timers::{csec_duration, TimerKind, TimerRequest, TimerUpdate};
use crate::{log_debug, log_info};

/// Default number of state-change retransmissions.
pub const DEFAULT_ROBUSTNESS_VARIABLE: u8 = 2;

/// Default unsolicited report interval, in 0.1 s units (1 second).
pub const DEFAULT_UNSOLICITED_REPORT_INTERVAL: u32 = 10;

/// Tunables of the group-member state machine.
#[derive(Debug, Clone)]
pub struct MemberConfig {
    /// Number of times a state change is transmitted.
    pub robustness_variable: u8,
    /// Bound on the gaps between unsolicited state-change
    /// retransmissions, in 0.1 s units.
    pub unsolicited_report_interval: u32,
}

impl Default for MemberConfig {
    fn default() -> Self {
        Self {
            robustness_variable: DEFAULT_ROBUSTNESS_VARIABLE,
            unsolicited_report_interval: DEFAULT_UNSOLICITED_REPORT_INTERVAL,
        }
    }
}

/// The host-side IGMPv3 state machine.
pub struct GroupMember {
    config: MemberConfig,
    filter: MemberFilter,
    random: Box<dyn RandomSource>,
    logger: Logger,
    /// Deadline of the pending general-query response, if any.
    general_response_at: Option<Instant>,
    /// Deadlines of pending group-specific responses.
    group_responses: BTreeMap<Ipv4Addr, Instant>,
    /// Pending state-change report transmissions.
    state_changes: EventSchedule<()>,
    /// Remaining transmissions per group with a pending state change.
    state_change_counts: BTreeMap<Ipv4Addr, u8>,
}

impl GroupMember {
    pub fn new(config: MemberConfig, random: Box<dyn RandomSource>, logger: Logger) -> Self {
        Self {
            config,
            filter: MemberFilter::new(),
            random,
            logger,
            general_response_at: None,
            group_responses: BTreeMap::new(),
            state_changes: EventSchedule::new(),
            state_change_counts: BTreeMap::new(),
        }
    }

    /// Joins a multicast group (listen in Exclude mode with no sources).
    pub fn join(&mut self, group: Ipv4Addr, now: Instant) -> HandlerOutput {
        log_info!(
            self.logger,
            Facility::Member,
            &format!("join {}", group)
        );
        self.listen(group, FilterMode::Exclude, BTreeSet::new(), now)
    }

    /// Leaves a multicast group (listen in Include mode with no sources).
    pub fn leave(&mut self, group: Ipv4Addr, now: Instant) -> HandlerOutput {
        log_info!(
            self.logger,
            Facility::Member,
            &format!("leave {}", group)
        );
        self.listen(group, FilterMode::Include, BTreeSet::new(), now)
    }

    /// Applies a listen request and kicks off the state-change report
    /// sequence: one report now, `robustness_variable - 1` more at
    /// random cumulative offsets within the unsolicited report
    /// interval.
    pub fn listen(
        &mut self,
        group: Ipv4Addr,
        filter_mode: FilterMode,
        source_addresses: BTreeSet<Ipv4Addr>,
        now: Instant,
    ) -> HandlerOutput {
        let mut output = HandlerOutput::new();
        if group == crate::message::ALL_SYSTEMS {
            // Permanently listened to; nothing to report.
            return output;
        }

        let changed = self.filter.listen(group, filter_mode, source_addresses);
        log_debug!(
            self.logger,
            Facility::Member,
            &format!("listen {}: filter changed = {}", group, changed)
        );

        self.state_change_counts
            .insert(group, self.config.robustness_variable);

        // A new change supersedes whatever retransmissions were
        // pending; their counters above keep the per-group tally.
        for id in self.state_changes.clear() {
            output.cancel_timer(TimerKind::StateChange { id });
        }

        // First transmission happens immediately.
        let report = self.pop_state_changed_report();
        if !report.is_empty() {
            self.emit_report(&mut output, report);
        }

        // Remaining transmissions at cumulative random offsets, so
        // they stay ordered and inside the unsolicited interval each.
        let gap_bound = self.config.unsolicited_report_interval.saturating_sub(1).max(1);
        let mut offset_csec = 0;
        for _ in 1..self.config.robustness_variable {
            offset_csec += self.random.uniform(1, gap_bound);
            let id = self.state_changes.schedule(());
            output.push_timer(TimerUpdate::Schedule(TimerRequest {
                kind: TimerKind::StateChange { id },
                fire_at: now + csec_duration(offset_csec),
                replace_existing: false,
            }));
        }

        output
    }

    /// Reacts to a received membership query (RFC 3376 §5.2).
    ///
    /// The response is delayed by a random amount bounded by the
    /// query's max resp time. A pending general response that is due
    /// no later than the new delay absorbs the query entirely.
    pub fn handle_query(&mut self, query: &MembershipQuery, now: Instant) -> HandlerOutput {
        let mut output = HandlerOutput::new();

        let bound = query.max_resp_time.saturating_sub(1).max(1);
        let delay = self.random.uniform(1, bound);
        let fire_at = now + csec_duration(delay);

        if let Some(pending) = self.general_response_at {
            if pending <= fire_at {
                log_debug!(
                    self.logger,
                    Facility::Member,
                    "query absorbed by pending general response"
                );
                return output;
            }
        }

        if query.is_general_query() {
            self.general_response_at = Some(fire_at);
            output.push_timer(TimerUpdate::replace(TimerKind::GeneralResponse, fire_at));
            return output;
        }

        let group = query.group_address;
        if let Some(&pending) = self.group_responses.get(&group) {
            if pending <= fire_at {
                return output;
            }
        }
        // Source-list merging for pending responses is not tracked;
        // only queries without sources (re)arm the group timer.
        if query.source_addresses.is_empty() {
            self.group_responses.insert(group, fire_at);
            output.push_timer(TimerUpdate::replace(
                TimerKind::GroupResponse { group },
                fire_at,
            ));
        }

        output
    }

    /// Reacts to an expired timer owned by this machine.
    pub fn handle_timer(&mut self, kind: TimerKind, now: Instant) -> HandlerOutput {
        let _ = now;
        let mut output = HandlerOutput::new();
        match kind {
            TimerKind::GeneralResponse => {
                self.general_response_at = None;
                let report = self.current_state_report();
                if !report.is_empty() {
                    self.emit_report(&mut output, report);
                }
            }
            TimerKind::GroupResponse { group } => {
                self.group_responses.remove(&group);
                let record = match self.filter.get(group) {
                    Some(record) => GroupRecord::new(
                        record.filter_mode.record_type(false),
                        group,
                        record.source_addresses.iter().copied().collect(),
                    ),
                    // The group was left while the response was
                    // pending; answer with an empty include record.
                    None => GroupRecord::new(MODE_IS_INCLUDE, group, Vec::new()),
                };
                self.emit_report(
                    &mut output,
                    MembershipReport {
                        group_records: vec![record],
                    },
                );
            }
            TimerKind::StateChange { id } => {
                if self.state_changes.fire(id).is_some() {
                    let report = self.pop_state_changed_report();
                    if !report.is_empty() {
                        self.emit_report(&mut output, report);
                    }
                }
            }
            other => {
                log_debug!(
                    self.logger,
                    Facility::Member,
                    &format!("ignoring foreign timer {:?}", other)
                );
            }
        }
        output
    }

    /// Classifies a received IP packet against the reception filter.
    pub fn classify_ip(&self, destination: Ipv4Addr, source: Ipv4Addr) -> Forward {
        if self.filter.is_listening_to(destination, source) {
            Forward::Deliver
        } else {
            Forward::Reject
        }
    }

    /// The reception filter (for status reporting and tests).
    pub fn filter(&self) -> &MemberFilter {
        &self.filter
    }

    /// Builds the next state-change report: one change record per
    /// group with transmissions remaining, decrementing as it goes.
    fn pop_state_changed_report(&mut self) -> MembershipReport {
        let mut group_records = Vec::new();
        let mut finished = Vec::new();

        for (&group, count) in self.state_change_counts.iter_mut() {
            if *count == 0 {
                finished.push(group);
                continue;
            }
            let record = match self.filter.get(group) {
                Some(record) => GroupRecord::new(
                    record.filter_mode.record_type(true),
                    group,
                    record.source_addresses.iter().copied().collect(),
                ),
                // No record stored: the group was left.
                None => GroupRecord::new(CHANGE_TO_INCLUDE, group, Vec::new()),
            };
            group_records.push(record);
            *count -= 1;
            if *count == 0 {
                finished.push(group);
            }
        }
        for group in finished {
            self.state_change_counts.remove(&group);
        }

        MembershipReport { group_records }
    }

    /// Builds a current-state report covering every filter record.
    fn current_state_report(&self) -> MembershipReport {
        let group_records = self
            .filter
            .iter()
            .map(|(&group, record)| {
                GroupRecord::new(
                    record.filter_mode.record_type(false),
                    group,
                    record.source_addresses.iter().copied().collect(),
                )
            })
            .collect();
        MembershipReport { group_records }
    }

    fn emit_report(&self, output: &mut HandlerOutput, report: MembershipReport) {
        log_debug!(
            self.logger,
            Facility::Member,
            &format!("emitting report with {} record(s)", report.group_records.len())
        );
        output.transmit(ALL_REPORTERS, report.to_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{self, Message, CHANGE_TO_EXCLUDE};
    use crate::random::ScriptedRandom;

    fn addr(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn member_with_script(script: &[u32]) -> GroupMember {
        GroupMember::new(
            MemberConfig::default(),
            Box::new(ScriptedRandom::new(script)),
            Logger::null(),
        )
    }

    fn parse_report(payload: &[u8]) -> MembershipReport {
        match message::parse(payload).unwrap() {
            Message::Report(report) => report,
            other => panic!("expected report, got {:?}", other),
        }
    }

    #[test]
    fn test_join_emits_change_to_exclude_immediately() {
        let mut member = member_with_script(&[5]);
        let now = Instant::now();
        let output = member.join(addr("239.1.1.1"), now);

        assert_eq!(output.packets.len(), 1);
        assert_eq!(output.packets[0].destination, ALL_REPORTERS);
        let report = parse_report(&output.packets[0].payload);
        assert_eq!(report.group_records.len(), 1);
        assert_eq!(report.group_records[0].record_type, CHANGE_TO_EXCLUDE);
        assert_eq!(report.group_records[0].multicast_address, addr("239.1.1.1"));
        assert!(report.group_records[0].source_addresses.is_empty());

        // One retransmission scheduled (robustness 2).
        let scheduled: Vec<_> = output
            .timers
            .iter()
            .filter(|t| matches!(t, TimerUpdate::Schedule(_)))
            .collect();
        assert_eq!(scheduled.len(), 1);
    }

    #[test]
    fn test_state_change_retransmission_then_stops() {
        let mut member = member_with_script(&[5, 1, 1]);
        let now = Instant::now();
        let output = member.join(addr("239.1.1.1"), now);

        let TimerUpdate::Schedule(request) = &output.timers[0] else {
            panic!("expected schedule");
        };
        let id = match request.kind {
            TimerKind::StateChange { id } => id,
            other => panic!("expected state change, got {:?}", other),
        };

        // Firing the retransmission emits the second (and last) report.
        let output = member.handle_timer(TimerKind::StateChange { id }, request.fire_at);
        assert_eq!(output.packets.len(), 1);
        let report = parse_report(&output.packets[0].payload);
        assert_eq!(report.group_records[0].record_type, CHANGE_TO_EXCLUDE);

        // Count exhausted: a further stray expiry emits nothing.
        let output = member.handle_timer(TimerKind::StateChange { id: id + 1 }, request.fire_at);
        assert!(output.packets.is_empty());
    }

    #[test]
    fn test_new_listen_supersedes_pending_retransmissions() {
        let mut member = member_with_script(&[5, 5]);
        let now = Instant::now();
        let first = member.join(addr("239.1.1.1"), now);
        let TimerUpdate::Schedule(pending) = &first.timers[0] else {
            panic!("expected schedule");
        };
        let pending_kind = pending.kind;

        let second = member.leave(addr("239.1.1.1"), now);
        assert!(second
            .timers
            .iter()
            .any(|t| matches!(t, TimerUpdate::Cancel(kind) if *kind == pending_kind)));

        // The superseded timer no longer produces a report.
        let output = member.handle_timer(pending_kind, now);
        assert!(output.packets.is_empty());
    }

    #[test]
    fn test_general_query_schedules_single_response() {
        let mut member = member_with_script(&[5, 5, 3]);
        let now = Instant::now();
        member.join(addr("239.1.1.1"), now);

        let query = MembershipQuery::general(100, 2, 1216);
        let output = member.handle_query(&query, now);
        assert!(output.packets.is_empty());
        assert!(output
            .timers
            .iter()
            .any(|t| matches!(t, TimerUpdate::Schedule(r) if r.kind == TimerKind::GeneralResponse)));

        let output = member.handle_timer(TimerKind::GeneralResponse, now);
        assert_eq!(output.packets.len(), 1);
        let report = parse_report(&output.packets[0].payload);
        assert_eq!(report.group_records.len(), 1);
        assert_eq!(report.group_records[0].record_type, message::MODE_IS_EXCLUDE);
    }

    #[test]
    fn test_query_absorbed_by_sooner_general_response() {
        // First draw schedules at +3 csec, second would land at +5.
        let mut member = member_with_script(&[3, 5]);
        let now = Instant::now();

        let query = MembershipQuery::general(100, 2, 1216);
        let first = member.handle_query(&query, now);
        assert_eq!(first.timers.len(), 1);

        let second = member.handle_query(&query, now);
        assert!(second.is_empty());
    }

    #[test]
    fn test_group_query_not_rescheduled_when_sooner_pending() {
        let group = addr("239.1.1.1");
        // Group response first at +2; second query draws +7 and must not reschedule.
        let mut member = member_with_script(&[2, 7]);
        let now = Instant::now();

        let query = MembershipQuery::group_specific(group, 10, 2, 1216, false);
        let first = member.handle_query(&query, now);
        assert_eq!(first.timers.len(), 1);

        let second = member.handle_query(&query, now);
        assert!(second.is_empty());
    }

    #[test]
    fn test_group_query_with_sources_does_not_schedule() {
        let group = addr("239.1.1.1");
        let mut member = member_with_script(&[5]);
        let now = Instant::now();

        let mut query = MembershipQuery::group_specific(group, 10, 2, 1216, false);
        query.source_addresses = vec![addr("10.0.0.1")];
        let output = member.handle_query(&query, now);
        assert!(output.is_empty());
    }

    #[test]
    fn test_group_response_for_absent_record_is_empty_include() {
        let group = addr("239.1.1.1");
        let mut member = member_with_script(&[5]);
        let now = Instant::now();

        let query = MembershipQuery::group_specific(group, 10, 2, 1216, false);
        member.handle_query(&query, now);
        let output = member.handle_timer(TimerKind::GroupResponse { group }, now);

        assert_eq!(output.packets.len(), 1);
        let report = parse_report(&output.packets[0].payload);
        assert_eq!(report.group_records.len(), 1);
        assert_eq!(report.group_records[0].record_type, MODE_IS_INCLUDE);
        assert!(report.group_records[0].source_addresses.is_empty());
    }

    #[test]
    fn test_general_response_with_empty_filter_is_suppressed() {
        let mut member = member_with_script(&[5]);
        let now = Instant::now();

        member.handle_query(&MembershipQuery::general(100, 2, 1216), now);
        let output = member.handle_timer(TimerKind::GeneralResponse, now);
        assert!(output.packets.is_empty());
    }

    #[test]
    fn test_classify_ip() {
        let mut member = member_with_script(&[5]);
        let now = Instant::now();
        member.join(addr("239.1.1.1"), now);

        assert_eq!(
            member.classify_ip(addr("239.1.1.1"), addr("10.0.0.1")),
            Forward::Deliver
        );
        assert_eq!(
            member.classify_ip(addr("239.9.9.9"), addr("10.0.0.1")),
            Forward::Reject
        );
        assert_eq!(
            member.classify_ip(message::ALL_SYSTEMS, addr("10.0.0.1")),
            Forward::Deliver
        );
    }

    #[test]
    fn test_join_all_systems_is_silent() {
        let mut member = member_with_script(&[5]);
        let output = member.join(message::ALL_SYSTEMS, Instant::now());
        assert!(output.is_empty());
        assert!(member.filter().is_empty());
    }
}
