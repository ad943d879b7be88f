// SPDX-License-Identifier: Apache-2.0 OR MIT
//! IGMPv3 wire messages (RFC 3376 §4)
//!
//! Only the two message types used by version-3 endpoints are handled:
//!
//! | Type | Value | Direction |
//! |------|-------|-----------|
//! | Membership Query | 0x11 | querier → hosts |
//! | V3 Membership Report | 0x22 | hosts → routers |
//!
//! All multi-byte fields are network byte order and the layouts are
//! packed, so parsing and serialization work directly on byte slices.
//! Interval fields on the wire are in units of 0.1 seconds, encoded
//! through the shared code/value scheme of [`code_to_value`] and
//! [`value_to_code`].

pub mod checksum;
mod query;
mod report;

pub use query::MembershipQuery;
pub use report::{
    GroupRecord, MembershipReport, CHANGE_TO_EXCLUDE, CHANGE_TO_INCLUDE, MODE_IS_EXCLUDE,
    MODE_IS_INCLUDE,
};

use std::net::Ipv4Addr;
use thiserror::Error;

/// IGMP message type of membership queries.
pub const MEMBERSHIP_QUERY_TYPE: u8 = 0x11;

/// IGMP message type of version 3 membership reports.
pub const V3_MEMBERSHIP_REPORT_TYPE: u8 = 0x22;

/// The all-systems multicast address (224.0.0.1). Reception of packets
/// destined here is permanently enabled on every interface and no IGMP
/// messages are ever generated about it.
pub const ALL_SYSTEMS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);

/// The address all IGMPv3 membership reports are sent to (224.0.0.22).
pub const ALL_REPORTERS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 22);

/// Fixed part of a membership query, before the source list.
pub const QUERY_HEADER_LEN: usize = 12;

/// Fixed part of a v3 membership report, before the group records.
pub const REPORT_HEADER_LEN: usize = 8;

/// Fixed part of a group record, before the source list.
pub const GROUP_RECORD_HEADER_LEN: usize = 8;

/// Largest value representable by the floating-point code encoding:
/// `(0x0F | 0x10) << (7 + 3)`.
pub const MAX_CODE_VALUE: u32 = 0x1F << 10;

/// Errors produced while parsing a received IGMP message.
///
/// Per the input-handling contract, a message that fails to parse is
/// dropped without touching any protocol state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("message too short: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("unknown IGMP message type {0:#04x}")]
    UnknownType(u8),
}

/// Decodes a code byte into an interval value (0.1 s units).
///
/// * If `code < 128`, the value is the code itself.
/// * Otherwise the code is a floating-point encoding
///   `1|exp(3)|mant(4)` and the value is `(mant | 0x10) << (exp + 3)`.
pub fn code_to_value(code: u8) -> u32 {
    if code < 128 {
        u32::from(code)
    } else {
        let mant = u32::from(code & 0x0F);
        let exp = u32::from((code >> 4) & 0x07);
        (mant | 0x10) << (exp + 3)
    }
}

/// Encodes an interval value (0.1 s units) as a code byte.
///
/// Exact codes are preferred; a value with no exact encoding maps to
/// the next lower representable value, so
/// `code_to_value(value_to_code(v)) <= v` always holds.
pub fn value_to_code(value: u32) -> u8 {
    if value < 128 {
        return value as u8;
    }
    if value >= MAX_CODE_VALUE {
        return 0xFF;
    }
    let high_bit = 31 - value.leading_zeros();
    let exp = high_bit - 7;
    let mant = ((value >> (exp + 3)) & 0x0F) as u8;
    0x80 | ((exp as u8) << 4) | mant
}

/// A parsed IGMP message of either supported type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Query(MembershipQuery),
    Report(MembershipReport),
}

/// Parses an IGMP message, dispatching on the type byte.
pub fn parse(data: &[u8]) -> Result<Message, MessageError> {
    let type_byte = *data.first().ok_or(MessageError::Truncated {
        expected: 1,
        actual: 0,
    })?;
    match type_byte {
        MEMBERSHIP_QUERY_TYPE => Ok(Message::Query(MembershipQuery::parse(data)?)),
        V3_MEMBERSHIP_REPORT_TYPE => Ok(Message::Report(MembershipReport::parse(data)?)),
        other => Err(MessageError::UnknownType(other)),
    }
}

/// Checks whether a buffer starts with the membership query type byte.
pub fn is_membership_query(data: &[u8]) -> bool {
    data.first() == Some(&MEMBERSHIP_QUERY_TYPE)
}

/// Checks whether a buffer starts with the v3 report type byte.
pub fn is_v3_membership_report(data: &[u8]) -> bool {
    data.first() == Some(&V3_MEMBERSHIP_REPORT_TYPE)
}

fn read_ipv4(data: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(data[0], data[1], data[2], data[3])
}

fn require_len(data: &[u8], expected: usize) -> Result<(), MessageError> {
    if data.len() < expected {
        Err(MessageError::Truncated {
            expected,
            actual: data.len(),
        })
    } else {
        Ok(())
    }
}
