// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Version 3 membership report parsing and serialization.

use std::net::Ipv4Addr;

use super::{
    checksum, read_ipv4, require_len, MessageError, GROUP_RECORD_HEADER_LEN, REPORT_HEADER_LEN,
    V3_MEMBERSHIP_REPORT_TYPE,
};

// Group record types (RFC 3376 §4.2.12)
pub const MODE_IS_INCLUDE: u8 = 1;
pub const MODE_IS_EXCLUDE: u8 = 2;
pub const CHANGE_TO_INCLUDE: u8 = 3;
pub const CHANGE_TO_EXCLUDE: u8 = 4;

/// A group record inside a v3 membership report.
///
/// Auxiliary data is skipped on read and never written, so
/// `aux_data_length` is always zero on emitted records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    /// One of the `MODE_IS_*` / `CHANGE_TO_*` constants, or an
    /// unrecognized value carried through from the wire.
    pub record_type: u8,

    /// The multicast address the record describes.
    pub multicast_address: Ipv4Addr,

    /// The record's source list.
    pub source_addresses: Vec<Ipv4Addr>,
}

impl GroupRecord {
    pub fn new(record_type: u8, multicast_address: Ipv4Addr, source_addresses: Vec<Ipv4Addr>) -> Self {
        Self {
            record_type,
            multicast_address,
            source_addresses,
        }
    }

    /// Current-state records report existing state; everything else
    /// (including unknown types) is treated as a change.
    pub fn is_change(&self) -> bool {
        !matches!(self.record_type, MODE_IS_INCLUDE | MODE_IS_EXCLUDE)
    }

    /// Human-readable name of the record type, for log lines.
    pub fn type_name(&self) -> &'static str {
        match self.record_type {
            MODE_IS_INCLUDE => "mode-is-include",
            MODE_IS_EXCLUDE => "mode-is-exclude",
            CHANGE_TO_INCLUDE => "change-to-include",
            CHANGE_TO_EXCLUDE => "change-to-exclude",
            _ => "unknown",
        }
    }

    /// Serialized size in bytes.
    pub fn wire_len(&self) -> usize {
        GROUP_RECORD_HEADER_LEN + 4 * self.source_addresses.len()
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.record_type);
        buf.push(0); // aux data length
        buf.extend_from_slice(&(self.source_addresses.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.multicast_address.octets());
        for addr in &self.source_addresses {
            buf.extend_from_slice(&addr.octets());
        }
    }

    /// Reads one record starting at `data[0]`, returning the record
    /// and the number of bytes consumed (including auxiliary data).
    fn read(data: &[u8]) -> Result<(Self, usize), MessageError> {
        require_len(data, GROUP_RECORD_HEADER_LEN)?;
        let record_type = data[0];
        let aux_data_len = data[1] as usize;
        let number_of_sources = u16::from_be_bytes([data[2], data[3]]) as usize;
        let multicast_address = read_ipv4(&data[4..8]);

        let total = GROUP_RECORD_HEADER_LEN + 4 * number_of_sources + 4 * aux_data_len;
        require_len(data, total)?;

        let mut source_addresses = Vec::with_capacity(number_of_sources);
        for i in 0..number_of_sources {
            let offset = GROUP_RECORD_HEADER_LEN + 4 * i;
            source_addresses.push(read_ipv4(&data[offset..offset + 4]));
        }

        Ok((
            Self {
                record_type,
                multicast_address,
                source_addresses,
            },
            total,
        ))
    }
}

/// A parsed IGMP version 3 membership report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MembershipReport {
    pub group_records: Vec<GroupRecord>,
}

impl MembershipReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.group_records.is_empty()
    }

    /// Serialized size in bytes.
    pub fn wire_len(&self) -> usize {
        REPORT_HEADER_LEN + self.group_records.iter().map(GroupRecord::wire_len).sum::<usize>()
    }

    /// Serializes the report, including a valid checksum. Reserved
    /// fields are written as zero.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.push(V3_MEMBERSHIP_REPORT_TYPE);
        buf.push(0); // reserved
        buf.extend_from_slice(&[0, 0]); // checksum
        buf.extend_from_slice(&[0, 0]); // reserved
        buf.extend_from_slice(&(self.group_records.len() as u16).to_be_bytes());
        for record in &self.group_records {
            record.write_to(&mut buf);
        }
        checksum::update(&mut buf);
        buf
    }

    /// Parses a v3 membership report. Reserved fields are ignored and
    /// the checksum is not enforced here.
    pub fn parse(data: &[u8]) -> Result<Self, MessageError> {
        require_len(data, REPORT_HEADER_LEN)?;
        if data[0] != V3_MEMBERSHIP_REPORT_TYPE {
            return Err(MessageError::UnknownType(data[0]));
        }

        let number_of_records = u16::from_be_bytes([data[6], data[7]]) as usize;
        let mut group_records = Vec::with_capacity(number_of_records);
        let mut offset = REPORT_HEADER_LEN;
        for _ in 0..number_of_records {
            let (record, consumed) = GroupRecord::read(&data[offset..])?;
            group_records.push(record);
            offset += consumed;
        }

        Ok(Self { group_records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> MembershipReport {
        MembershipReport {
            group_records: vec![
                GroupRecord::new(CHANGE_TO_EXCLUDE, "239.1.1.1".parse().unwrap(), vec![]),
                GroupRecord::new(
                    MODE_IS_INCLUDE,
                    "239.2.2.2".parse().unwrap(),
                    vec!["10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()],
                ),
            ],
        }
    }

    #[test]
    fn test_report_roundtrip() {
        let report = sample_report();
        let bytes = report.to_bytes();
        assert_eq!(bytes.len(), report.wire_len());
        assert_eq!(bytes.len(), 8 + 8 + 8 + 8);
        let parsed = MembershipReport::parse(&bytes).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_empty_report_roundtrip() {
        let report = MembershipReport::new();
        assert!(report.is_empty());
        let parsed = MembershipReport::parse(&report.to_bytes()).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_serialized_report_has_valid_checksum() {
        assert!(checksum::verify(&sample_report().to_bytes()));
    }

    #[test]
    fn test_aux_data_is_skipped() {
        // One record with 1 source and 2 words of auxiliary data,
        // followed by a second record that must still parse.
        let mut bytes = vec![0x22, 0, 0, 0, 0, 0, 0, 2];
        bytes.extend_from_slice(&[MODE_IS_EXCLUDE, 2, 0, 1]);
        bytes.extend_from_slice(&[239, 0, 0, 1]);
        bytes.extend_from_slice(&[10, 0, 0, 9]);
        bytes.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0xDE, 0xAD, 0xBE, 0xEF]);
        bytes.extend_from_slice(&[CHANGE_TO_INCLUDE, 0, 0, 0]);
        bytes.extend_from_slice(&[239, 0, 0, 2]);

        let parsed = MembershipReport::parse(&bytes).unwrap();
        assert_eq!(parsed.group_records.len(), 2);
        assert_eq!(parsed.group_records[0].record_type, MODE_IS_EXCLUDE);
        assert_eq!(
            parsed.group_records[0].source_addresses,
            vec!["10.0.0.9".parse::<Ipv4Addr>().unwrap()]
        );
        assert_eq!(
            parsed.group_records[1].multicast_address,
            "239.0.0.2".parse::<Ipv4Addr>().unwrap()
        );
    }

    #[test]
    fn test_unknown_record_type_survives_parse() {
        let report = MembershipReport {
            group_records: vec![GroupRecord::new(9, "239.3.3.3".parse().unwrap(), vec![])],
        };
        let parsed = MembershipReport::parse(&report.to_bytes()).unwrap();
        assert_eq!(parsed.group_records[0].record_type, 9);
        assert_eq!(parsed.group_records[0].type_name(), "unknown");
        assert!(parsed.group_records[0].is_change());
    }

    #[test]
    fn test_truncated_record_list() {
        let mut bytes = sample_report().to_bytes();
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(
            MembershipReport::parse(&bytes),
            Err(MessageError::Truncated { .. })
        ));
    }

    #[test]
    fn test_record_count_beyond_buffer() {
        let mut bytes = MembershipReport::new().to_bytes();
        bytes[7] = 3; // claim three records, provide none
        assert!(matches!(
            MembershipReport::parse(&bytes),
            Err(MessageError::Truncated { .. })
        ));
    }

    #[test]
    fn test_is_change() {
        assert!(!GroupRecord::new(MODE_IS_INCLUDE, Ipv4Addr::UNSPECIFIED, vec![]).is_change());
        assert!(!GroupRecord::new(MODE_IS_EXCLUDE, Ipv4Addr::UNSPECIFIED, vec![]).is_change());
        assert!(GroupRecord::new(CHANGE_TO_INCLUDE, Ipv4Addr::UNSPECIFIED, vec![]).is_change());
        assert!(GroupRecord::new(CHANGE_TO_EXCLUDE, Ipv4Addr::UNSPECIFIED, vec![]).is_change());
    }
}
