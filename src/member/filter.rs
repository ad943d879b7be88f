// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Host-side multicast reception state (RFC 3376 §3, §6.2.1).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use crate::message::{
    ALL_SYSTEMS, CHANGE_TO_EXCLUDE, CHANGE_TO_INCLUDE, MODE_IS_EXCLUDE, MODE_IS_INCLUDE,
};

/// Interpretation of the source list in a filter record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Reception is requested *only* from the listed sources.
    Include,
    /// Reception is requested from every source *except* the listed ones.
    Exclude,
}

impl FilterMode {
    /// The v3 group record type that reports this mode, either as a
    /// current-state record or as a filter-mode-change record.
    pub fn record_type(self, is_change: bool) -> u8 {
        match (self, is_change) {
            (FilterMode::Include, false) => MODE_IS_INCLUDE,
            (FilterMode::Exclude, false) => MODE_IS_EXCLUDE,
            (FilterMode::Include, true) => CHANGE_TO_INCLUDE,
            (FilterMode::Exclude, true) => CHANGE_TO_EXCLUDE,
        }
    }
}

/// A per-group filter record: a mode and a set of source addresses.
///
/// `(Include, ∅)` is never stored; it is the same thing as having no
/// record at all, and [`MemberFilter::listen`] deletes instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRecord {
    pub filter_mode: FilterMode,
    pub source_addresses: BTreeSet<Ipv4Addr>,
}

impl FilterRecord {
    /// A plain join: listen to everything sent to the group.
    pub fn join() -> Self {
        Self {
            filter_mode: FilterMode::Exclude,
            source_addresses: BTreeSet::new(),
        }
    }

    /// A plain leave: stop listening to the group entirely.
    pub fn leave() -> Self {
        Self {
            filter_mode: FilterMode::Include,
            source_addresses: BTreeSet::new(),
        }
    }
}

/// Reception state for all groups a host listens to.
#[derive(Debug, Default)]
pub struct MemberFilter {
    records: BTreeMap<Ipv4Addr, FilterRecord>,
}

impl MemberFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a listen request for a group.
    ///
    /// Include with an empty source list deletes the record (a leave);
    /// anything else upserts. The boolean result reports whether the
    /// stored state actually changed — source sets compare as sets,
    /// so reordering the same sources is not a change.
    ///
    /// The all-systems group is special-cased: it is permanently
    /// listened to, no record is ever stored for it.
    pub fn listen(
        &mut self,
        multicast_address: Ipv4Addr,
        filter_mode: FilterMode,
        source_addresses: BTreeSet<Ipv4Addr>,
    ) -> bool {
        if multicast_address == ALL_SYSTEMS {
            return false;
        }

        if filter_mode == FilterMode::Include && source_addresses.is_empty() {
            return self.records.remove(&multicast_address).is_some();
        }

        match self.records.get_mut(&multicast_address) {
            Some(record)
                if record.filter_mode == filter_mode
                    && record.source_addresses == source_addresses =>
            {
                false
            }
            Some(record) => {
                record.filter_mode = filter_mode;
                record.source_addresses = source_addresses;
                true
            }
            None => {
                self.records.insert(
                    multicast_address,
                    FilterRecord {
                        filter_mode,
                        source_addresses,
                    },
                );
                true
            }
        }
    }

    /// Joins the multicast group with the given multicast address.
    pub fn join(&mut self, multicast_address: Ipv4Addr) -> bool {
        self.listen(multicast_address, FilterMode::Exclude, BTreeSet::new())
    }

    /// Leaves the multicast group with the given multicast address.
    pub fn leave(&mut self, multicast_address: Ipv4Addr) -> bool {
        self.listen(multicast_address, FilterMode::Include, BTreeSet::new())
    }

    /// Whether packets from `source_address` to `multicast_address`
    /// should be delivered to this host.
    pub fn is_listening_to(&self, multicast_address: Ipv4Addr, source_address: Ipv4Addr) -> bool {
        if multicast_address == ALL_SYSTEMS {
            // Reception of the all-systems group, from all sources, is
            // permanently enabled and never reported.
            return true;
        }

        let Some(record) = self.records.get(&multicast_address) else {
            return false;
        };

        let is_excluding = record.filter_mode == FilterMode::Exclude;
        is_excluding != record.source_addresses.contains(&source_address)
    }

    /// The record for a group, if one is stored.
    pub fn get(&self, multicast_address: Ipv4Addr) -> Option<&FilterRecord> {
        self.records.get(&multicast_address)
    }

    /// Iterates records in network-byte-order of the group address.
    pub fn iter(&self) -> impl Iterator<Item = (&Ipv4Addr, &FilterRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn set(addrs: &[&str]) -> BTreeSet<Ipv4Addr> {
        addrs.iter().map(|s| addr(s)).collect()
    }

    #[test]
    fn test_join_then_leave_leaves_no_record() {
        let mut filter = MemberFilter::new();
        assert!(filter.join(addr("239.1.1.1")));
        assert_eq!(filter.len(), 1);
        assert!(filter.leave(addr("239.1.1.1")));
        assert!(filter.is_empty());
    }

    #[test]
    fn test_leave_without_record_is_ignored() {
        let mut filter = MemberFilter::new();
        assert!(!filter.leave(addr("239.1.1.1")));
        assert!(filter.is_empty());
    }

    #[test]
    fn test_include_empty_never_stored() {
        let mut filter = MemberFilter::new();
        filter.listen(addr("239.1.1.1"), FilterMode::Include, BTreeSet::new());
        assert!(filter.get(addr("239.1.1.1")).is_none());
    }

    #[test]
    fn test_listen_reports_changes() {
        let mut filter = MemberFilter::new();
        let group = addr("239.1.1.1");

        assert!(filter.listen(group, FilterMode::Include, set(&["10.0.0.1"])));
        // Same mode, same set: no change.
        assert!(!filter.listen(group, FilterMode::Include, set(&["10.0.0.1"])));
        // Mode flip is a change.
        assert!(filter.listen(group, FilterMode::Exclude, set(&["10.0.0.1"])));
        // Different source set is a change.
        assert!(filter.listen(group, FilterMode::Exclude, set(&["10.0.0.1", "10.0.0.2"])));
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut filter = MemberFilter::new();
        assert!(filter.join(addr("239.1.1.1")));
        assert!(!filter.join(addr("239.1.1.1")));
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_include_semantics() {
        let mut filter = MemberFilter::new();
        let group = addr("232.1.1.1");
        filter.listen(group, FilterMode::Include, set(&["10.0.0.1"]));

        assert!(filter.is_listening_to(group, addr("10.0.0.1")));
        assert!(!filter.is_listening_to(group, addr("10.0.0.2")));
    }

    #[test]
    fn test_exclude_semantics() {
        let mut filter = MemberFilter::new();
        let group = addr("239.1.1.1");
        filter.listen(group, FilterMode::Exclude, set(&["10.0.0.1"]));

        assert!(!filter.is_listening_to(group, addr("10.0.0.1")));
        assert!(filter.is_listening_to(group, addr("10.0.0.2")));
    }

    #[test]
    fn test_no_record_means_not_listening() {
        let filter = MemberFilter::new();
        assert!(!filter.is_listening_to(addr("239.1.1.1"), addr("10.0.0.1")));
    }

    #[test]
    fn test_all_systems_always_listened() {
        let mut filter = MemberFilter::new();
        assert!(filter.is_listening_to(ALL_SYSTEMS, addr("10.0.0.1")));

        // Neither joining nor leaving stores or breaks anything.
        assert!(!filter.join(ALL_SYSTEMS));
        assert!(filter.get(ALL_SYSTEMS).is_none());
        assert!(!filter.leave(ALL_SYSTEMS));
        assert!(filter.is_listening_to(ALL_SYSTEMS, addr("10.0.0.1")));
    }

    #[test]
    fn test_record_type_mapping() {
        assert_eq!(FilterMode::Include.record_type(false), MODE_IS_INCLUDE);
        assert_eq!(FilterMode::Exclude.record_type(false), MODE_IS_EXCLUDE);
        assert_eq!(FilterMode::Include.record_type(true), CHANGE_TO_INCLUDE);
        assert_eq!(FilterMode::Exclude.record_type(true), CHANGE_TO_EXCLUDE);
    }
}
