// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Router/querier state machine (RFC 3376 §6)
//!
//! Drives the querier side of IGMPv3 on one interface:
//!
//! - a startup burst of general queries, then periodic ones,
//! - membership reports feed the router filter's §6.4 table,
//! - a group losing its last Exclude member triggers a burst of
//!   group-specific queries with the group timer lowered to LMQT,
//! - querier election: the numerically lowest address on the link
//!   queries, everyone else holds an other-querier-present timer.
//!
//! General and group-specific queries are both sent to 224.0.0.1.

pub mod filter;
pub mod variables;

pub use filter::{RouterFilter, RouterRecord};
pub use variables::RouterVariables;

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Instant;

use crate::actions::{Forward, HandlerOutput};
use crate::logging::{Facility, Logger};
use crate::member::filter::FilterMode;
use crate::message::{
    MembershipQuery, MembershipReport, ALL_SYSTEMS, CHANGE_TO_EXCLUDE, CHANGE_TO_INCLUDE,
    MODE_IS_EXCLUDE, MODE_IS_INCLUDE,
};
use crate::schedule::EventSchedule;
use crate::timers::{csec_duration, TimerKind, TimerRequest, TimerUpdate};
use crate::{log_debug, log_notice, log_warning};

/// The querier state machine for one interface.
pub struct Router {
    /// Our address on the attached network, used for querier election.
    address: Ipv4Addr,
    filter: RouterFilter,
    logger: Logger,
    /// Pending group-specific query retransmissions.
    query_schedule: EventSchedule<Ipv4Addr>,
    /// Deadline of the next general query, while we are querier.
    general_query_at: Option<Instant>,
    /// General queries left in the startup burst.
    startup_queries_remaining: u32,
    /// Set while a lower-address querier is active on the link.
    other_querier_present: bool,
}

impl Router {
    pub fn new(address: Ipv4Addr, vars: RouterVariables, logger: Logger) -> Self {
        Self {
            address,
            filter: RouterFilter::new(vars),
            logger,
            query_schedule: EventSchedule::new(),
            general_query_at: None,
            startup_queries_remaining: 0,
            other_querier_present: false,
        }
    }

    /// Starts (or restarts) the querier role: arms the startup burst
    /// and schedules the first general query one startup interval out.
    pub fn configure(&mut self, now: Instant) -> HandlerOutput {
        let mut output = HandlerOutput::new();
        let vars = self.filter.variables();
        self.startup_queries_remaining = vars.startup_query_count();
        let fire_at = now + csec_duration(vars.startup_query_interval());
        self.general_query_at = Some(fire_at);
        output.push_timer(TimerUpdate::replace(TimerKind::GeneralQuery, fire_at));
        output
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn filter(&self) -> &RouterFilter {
        &self.filter
    }

    pub fn is_other_querier_present(&self) -> bool {
        self.other_querier_present
    }

    /// Processes a received v3 membership report, one group record at
    /// a time. Records with an unknown type are skipped; the rest of
    /// the report is still applied.
    pub fn handle_report(&mut self, report: &MembershipReport, now: Instant) -> HandlerOutput {
        let mut output = HandlerOutput::new();

        for record in &report.group_records {
            let mode = match record.record_type {
                MODE_IS_INCLUDE | CHANGE_TO_INCLUDE => FilterMode::Include,
                MODE_IS_EXCLUDE | CHANGE_TO_EXCLUDE => FilterMode::Exclude,
                other => {
                    log_warning!(
                        self.logger,
                        Facility::Router,
                        &format!(
                            "ignoring group record with unknown type {} for {}",
                            other, record.multicast_address
                        )
                    );
                    continue;
                }
            };

            let group = record.multicast_address;
            let was_exclude = self
                .filter
                .record(group)
                .map(|r| r.filter_mode == FilterMode::Exclude)
                .unwrap_or(false);

            let sources: BTreeSet<Ipv4Addr> = record.source_addresses.iter().copied().collect();
            let timers = self
                .filter
                .receive_current_state_record(group, mode, &sources, now);
            output.timers.extend(timers);
            log_debug!(
                self.logger,
                Facility::Router,
                &format!("{} record for {} applied", record.type_name(), group)
            );

            // A host abandoning an Exclude membership: check whether
            // anyone else still wants the group.
            if was_exclude && record.record_type == CHANGE_TO_INCLUDE {
                if self.other_querier_present {
                    continue;
                }
                output.timers.extend(self.filter.lower_group_timer(group, now));

                let query = self.build_group_query(group, now);
                output.transmit(ALL_SYSTEMS, query.to_bytes());

                let vars = self.filter.variables();
                let interval = vars.last_member_query_interval();
                for i in 1..vars.last_member_query_count() {
                    let id = self.query_schedule.schedule(group);
                    output.push_timer(TimerUpdate::Schedule(TimerRequest {
                        kind: TimerKind::GroupQuery { id },
                        fire_at: now + csec_duration(interval * i),
                        replace_existing: false,
                    }));
                }
            }
        }

        output
    }

    /// Processes a received membership query: host-side group timer
    /// update, querier election, QRV adoption (RFC 3376 §6.6).
    pub fn handle_query(
        &mut self,
        query: &MembershipQuery,
        source: Ipv4Addr,
        now: Instant,
    ) -> HandlerOutput {
        let mut output = HandlerOutput::new();

        if !query.is_general_query() && !query.suppress_router_side_processing {
            output
                .timers
                .extend(self.filter.lower_group_timer(query.group_address, now));
        }

        // Election: the numerically lower address (network byte
        // order) is the querier. Our own address echoing back is
        // treated like any other non-lower sender.
        if u32::from(self.address) >= u32::from(source) {
            log_notice!(
                self.logger,
                Facility::Router,
                &format!("querier election lost to {}", source)
            );
            self.other_querier_present = true;
            self.general_query_at = None;
            output.cancel_timer(TimerKind::GeneralQuery);
            for id in self.query_schedule.clear() {
                output.cancel_timer(TimerKind::GroupQuery { id });
            }
            let fire_at = now
                + csec_duration(self.filter.variables().other_querier_present_interval());
            output.push_timer(TimerUpdate::replace(TimerKind::OtherQuerierGone, fire_at));
        }

        if query.robustness_variable != 0 {
            self.filter
                .variables_mut()
                .adopt_qrv(query.robustness_variable);
            log_debug!(
                self.logger,
                Facility::Router,
                &format!("adopted QRV {}", query.robustness_variable)
            );
        }

        output
    }

    /// Reacts to an expired timer owned by this machine.
    pub fn handle_timer(&mut self, kind: TimerKind, now: Instant) -> HandlerOutput {
        let mut output = HandlerOutput::new();
        match kind {
            TimerKind::GeneralQuery => {
                if self.other_querier_present {
                    // The timer is unscheduled on election loss; a
                    // stale expiry must not transmit.
                    return output;
                }
                let query = self.build_general_query();
                output.transmit(ALL_SYSTEMS, query.to_bytes());

                let vars = self.filter.variables();
                let interval = if self.startup_queries_remaining > 0 {
                    self.startup_queries_remaining -= 1;
                    vars.startup_query_interval()
                } else {
                    vars.query_interval()
                };
                let fire_at = now + csec_duration(interval);
                self.general_query_at = Some(fire_at);
                output.push_timer(TimerUpdate::replace(TimerKind::GeneralQuery, fire_at));
            }
            TimerKind::GroupQuery { id } => {
                if let Some(group) = self.query_schedule.fire(id) {
                    let query = self.build_group_query(group, now);
                    output.transmit(ALL_SYSTEMS, query.to_bytes());
                }
            }
            TimerKind::OtherQuerierGone => {
                log_notice!(
                    self.logger,
                    Facility::Router,
                    "other querier timed out, resuming querier role"
                );
                self.other_querier_present = false;
                output.merge(self.configure(now));
            }
            TimerKind::SourceExpiry { group, source } => {
                self.filter.handle_source_expiry(group, source, now);
            }
            TimerKind::GroupExpiry { group } => {
                self.filter.handle_group_expiry(group, now);
            }
            other => {
                log_debug!(
                    self.logger,
                    Facility::Router,
                    &format!("ignoring foreign timer {:?}", other)
                );
            }
        }
        output
    }

    /// Classifies a received IP packet against the router filter.
    pub fn classify_ip(&self, destination: Ipv4Addr, source: Ipv4Addr) -> Forward {
        if self.filter.is_listening_to(destination, source) {
            Forward::Deliver
        } else {
            Forward::Reject
        }
    }

    fn build_general_query(&self) -> MembershipQuery {
        let vars = self.filter.variables();
        MembershipQuery::general(
            vars.query_response_interval(),
            vars.qrv(),
            vars.query_interval(),
        )
    }

    /// Builds a group-specific query. The S flag is set when the
    /// group timer is running with more than LMQT left, telling other
    /// routers not to lower their own timers.
    fn build_group_query(&self, group: Ipv4Addr, now: Instant) -> MembershipQuery {
        let vars = self.filter.variables();
        let lmqt = csec_duration(vars.last_member_query_time());
        let suppress = self
            .filter
            .group_timer_remaining(group, now)
            .map(|remaining| remaining > lmqt)
            .unwrap_or(false);
        MembershipQuery::group_specific(
            group,
            vars.last_member_query_interval(),
            vars.qrv(),
            vars.query_interval(),
            suppress,
        )
    }
}
