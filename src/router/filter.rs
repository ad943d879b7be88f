// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Router-side reception state (RFC 3376 §6.4).
//!
//! For every multicast group the router keeps a filter mode, a group
//! timer, a set of source records with live timers, and — in Exclude
//! mode — the set of sources to block. Current-state records from
//! hosts drive the §6.4 state table:
//!
//! ```text
//! Router State   Report Rec'd  New Router State    Actions
//! ------------   ------------  ----------------    -------
//! INCLUDE (A)    IS_IN (B)     INCLUDE (A+B)       (B)=GMI
//! INCLUDE (A)    IS_EX (B)     EXCLUDE (A*B,B-A)   (B-A)=0; Delete (A-B);
//!                                                  Group Timer=GMI
//! EXCLUDE (X,Y)  IS_IN (A)     EXCLUDE (X+A,Y-A)   (A)=GMI
//! EXCLUDE (X,Y)  IS_EX (A)     EXCLUDE (A-Y,Y*A)   (A-X-Y)=GMI;
//!                                                  Delete (X-A); Delete (Y-A);
//!                                                  Group Timer=GMI
//! ```
//!
//! Timers are realized as recorded deadlines plus requests to the
//! timer wheel; the deadline stored here is authoritative, so a stale
//! wheel expiry (raced by a refresh) is detected and dropped.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::member::filter::FilterMode;
use crate::message::{ALL_REPORTERS, ALL_SYSTEMS};
use crate::timers::{csec_duration, TimerKind, TimerUpdate};

use super::variables::RouterVariables;

/// Per-group state in the router filter.
#[derive(Debug)]
pub struct RouterRecord {
    /// Current filter mode for the group.
    pub filter_mode: FilterMode,
    /// Deadline of the group timer (Exclude mode only).
    pub group_timer: Option<Instant>,
    /// Source records with their timer deadlines. In Include mode
    /// these are the sources to forward; in Exclude mode the set X of
    /// sources that must still be forwarded.
    source_records: BTreeMap<Ipv4Addr, Instant>,
    /// The set Y of sources to block. Empty unless mode is Exclude.
    excluded_addresses: BTreeSet<Ipv4Addr>,
}

impl RouterRecord {
    fn new(filter_mode: FilterMode) -> Self {
        Self {
            filter_mode,
            group_timer: None,
            source_records: BTreeMap::new(),
            excluded_addresses: BTreeSet::new(),
        }
    }

    /// Addresses of all live source records.
    pub fn source_addresses(&self) -> BTreeSet<Ipv4Addr> {
        self.source_records.keys().copied().collect()
    }

    /// The blocked set Y.
    pub fn excluded_addresses(&self) -> &BTreeSet<Ipv4Addr> {
        &self.excluded_addresses
    }

    /// Deadline of one source record's timer.
    pub fn source_deadline(&self, source: Ipv4Addr) -> Option<Instant> {
        self.source_records.get(&source).copied()
    }

    /// A record is inert once nothing in it can affect forwarding:
    /// Include mode with no sources left (and, by invariant, an empty
    /// excluded set).
    fn is_inert(&self) -> bool {
        self.filter_mode == FilterMode::Include
            && self.source_records.is_empty()
            && self.excluded_addresses.is_empty()
    }
}

/// The router's view of which (group, source) pairs to forward.
pub struct RouterFilter {
    vars: RouterVariables,
    records: BTreeMap<Ipv4Addr, RouterRecord>,
}

impl RouterFilter {
    pub fn new(vars: RouterVariables) -> Self {
        Self {
            vars,
            records: BTreeMap::new(),
        }
    }

    pub fn variables(&self) -> &RouterVariables {
        &self.vars
    }

    pub fn variables_mut(&mut self) -> &mut RouterVariables {
        &mut self.vars
    }

    /// The record for a group, if any.
    pub fn record(&self, group: Ipv4Addr) -> Option<&RouterRecord> {
        self.records.get(&group)
    }

    /// Groups with records, in address order.
    pub fn groups(&self) -> impl Iterator<Item = &Ipv4Addr> {
        self.records.keys()
    }

    /// Applies one current-state record per the §6.4 table. Returns
    /// the timer updates the transition requires.
    pub fn receive_current_state_record(
        &mut self,
        group: Ipv4Addr,
        report_mode: FilterMode,
        report_sources: &BTreeSet<Ipv4Addr>,
        now: Instant,
    ) -> Vec<TimerUpdate> {
        let gmi_deadline = now + csec_duration(self.vars.group_membership_interval());
        let mut timers = Vec::new();

        let record = self
            .records
            .entry(group)
            .or_insert_with(|| RouterRecord::new(FilterMode::Include));

        match (record.filter_mode, report_mode) {
            (FilterMode::Include, FilterMode::Include) => {
                // INCLUDE (A) + IS_IN (B) -> INCLUDE (A+B), (B)=GMI
                for &source in report_sources {
                    record.source_records.insert(source, gmi_deadline);
                    timers.push(TimerUpdate::replace(
                        TimerKind::SourceExpiry { group, source },
                        gmi_deadline,
                    ));
                }
            }
            (FilterMode::Include, FilterMode::Exclude) => {
                // INCLUDE (A) + IS_EX (B) -> EXCLUDE (A*B, B-A)
                // (B-A) start at zero and are blocked right away;
                // A*B keep their running timers.
                record.filter_mode = FilterMode::Exclude;
                let existing = record.source_addresses();
                record.excluded_addresses =
                    report_sources.difference(&existing).copied().collect();
                for source in existing.difference(report_sources) {
                    record.source_records.remove(source);
                    timers.push(TimerUpdate::Cancel(TimerKind::SourceExpiry {
                        group,
                        source: *source,
                    }));
                }
                record.group_timer = Some(gmi_deadline);
                timers.push(TimerUpdate::replace(
                    TimerKind::GroupExpiry { group },
                    gmi_deadline,
                ));
            }
            (FilterMode::Exclude, FilterMode::Include) => {
                // EXCLUDE (X,Y) + IS_IN (A) -> EXCLUDE (X+A, Y-A), (A)=GMI
                for &source in report_sources {
                    record.excluded_addresses.remove(&source);
                    record.source_records.insert(source, gmi_deadline);
                    timers.push(TimerUpdate::replace(
                        TimerKind::SourceExpiry { group, source },
                        gmi_deadline,
                    ));
                }
            }
            (FilterMode::Exclude, FilterMode::Exclude) => {
                // EXCLUDE (X,Y) + IS_EX (A) -> EXCLUDE (A-Y, Y*A)
                let previous = record.source_addresses(); // X
                let blocked = record.excluded_addresses.clone(); // Y

                // Delete X-A.
                for source in previous.difference(report_sources) {
                    record.source_records.remove(source);
                    timers.push(TimerUpdate::Cancel(TimerKind::SourceExpiry {
                        group,
                        source: *source,
                    }));
                }
                // Drop the blocked part of what survived, leaving X*A-Y.
                for source in &blocked {
                    if record.source_records.remove(source).is_some() {
                        timers.push(TimerUpdate::Cancel(TimerKind::SourceExpiry {
                            group,
                            source: *source,
                        }));
                    }
                }
                // Add A-X-Y at GMI.
                for &source in report_sources {
                    if !previous.contains(&source) && !blocked.contains(&source) {
                        record.source_records.insert(source, gmi_deadline);
                        timers.push(TimerUpdate::replace(
                            TimerKind::SourceExpiry { group, source },
                            gmi_deadline,
                        ));
                    }
                }
                // Y := Y*A.
                record.excluded_addresses =
                    blocked.intersection(report_sources).copied().collect();
                record.group_timer = Some(gmi_deadline);
                timers.push(TimerUpdate::replace(
                    TimerKind::GroupExpiry { group },
                    gmi_deadline,
                ));
            }
        }

        timers
    }

    /// A source record's timer ran out: the source stops being
    /// forwarded. In Exclude mode it moves to the blocked set.
    pub fn handle_source_expiry(&mut self, group: Ipv4Addr, source: Ipv4Addr, now: Instant) {
        let Some(record) = self.records.get_mut(&group) else {
            return;
        };
        match record.source_records.get(&source) {
            Some(&deadline) if deadline <= now => {}
            // Refreshed since the wheel fired; stale expiry.
            _ => return,
        }

        record.source_records.remove(&source);
        if record.filter_mode == FilterMode::Exclude {
            record.excluded_addresses.insert(source);
        } else if record.is_inert() {
            self.records.remove(&group);
        }
    }

    /// The group timer ran out: an Exclude record falls back to
    /// Include over its surviving source records.
    pub fn handle_group_expiry(&mut self, group: Ipv4Addr, now: Instant) {
        let Some(record) = self.records.get_mut(&group) else {
            return;
        };
        match record.group_timer {
            Some(deadline) if deadline <= now => {}
            _ => return,
        }

        record.group_timer = None;
        if record.filter_mode == FilterMode::Exclude {
            record.filter_mode = FilterMode::Include;
            record.excluded_addresses.clear();
        }
        if record.is_inert() {
            self.records.remove(&group);
        }
    }

    /// Sets the group timer to the Last Member Query Time. Only
    /// meaningful for Exclude records (Include records have no group
    /// timer).
    pub fn lower_group_timer(&mut self, group: Ipv4Addr, now: Instant) -> Vec<TimerUpdate> {
        let lmqt = csec_duration(self.vars.last_member_query_time());
        let Some(record) = self.records.get_mut(&group) else {
            return Vec::new();
        };
        if record.filter_mode != FilterMode::Exclude {
            return Vec::new();
        }
        let deadline = now + lmqt;
        record.group_timer = Some(deadline);
        vec![TimerUpdate::replace(
            TimerKind::GroupExpiry { group },
            deadline,
        )]
    }

    /// Remaining time on the group timer, if it is running.
    pub fn group_timer_remaining(&self, group: Ipv4Addr, now: Instant) -> Option<Duration> {
        let deadline = self.records.get(&group)?.group_timer?;
        Some(deadline.saturating_duration_since(now))
    }

    /// Whether traffic from `source` to `group` should be forwarded.
    pub fn is_listening_to(&self, group: Ipv4Addr, source: Ipv4Addr) -> bool {
        if group == ALL_SYSTEMS || group == ALL_REPORTERS {
            // Both well-known groups are permanently received on
            // every IGMP router.
            return true;
        }

        let Some(record) = self.records.get(&group) else {
            return false;
        };

        if record.filter_mode == FilterMode::Exclude {
            !record.excluded_addresses.contains(&source)
        } else {
            record.source_records.contains_key(&source)
        }
    }
}
