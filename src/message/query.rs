// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Membership query parsing and serialization.

use std::net::Ipv4Addr;

use super::{
    checksum, code_to_value, read_ipv4, require_len, value_to_code, MessageError,
    MEMBERSHIP_QUERY_TYPE, QUERY_HEADER_LEN,
};

/// A parsed IGMP membership query.
///
/// Wire layout (12 bytes plus 4·N source addresses):
///
/// ```text
///  0      1               2..3      4..7
/// +------+---------------+---------+---------------+
/// | 0x11 | max resp code | cksum   | group address |
/// +------+---------------+---------+---------------+
///  8                9      10..11   12..
/// +----------------+------+--------+-----------------+
/// | resv:4 S:1 QRV | QQIC | N srcs | source addrs... |
/// +----------------+------+--------+-----------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipQuery {
    /// Maximum time allowed before sending a responding report, in
    /// 0.1 s units (already decoded from the max resp code).
    pub max_resp_time: u32,

    /// Zero for a general query; the queried multicast address for a
    /// group-specific query.
    pub group_address: Ipv4Addr,

    /// The S flag: receiving routers suppress their normal timer
    /// updates when set. Querier election and host-side processing
    /// are unaffected.
    pub suppress_router_side_processing: bool,

    /// The querier's robustness variable (QRV). Zero means the
    /// sender's value exceeded 7 and receivers keep their own.
    pub robustness_variable: u8,

    /// The querier's query interval in 0.1 s units (decoded from QQIC).
    pub query_interval: u32,

    /// Source addresses; only non-empty for group-and-source queries.
    pub source_addresses: Vec<Ipv4Addr>,
}

impl MembershipQuery {
    /// Builds a general query (group address zero, no sources).
    pub fn general(max_resp_time: u32, robustness_variable: u8, query_interval: u32) -> Self {
        Self {
            max_resp_time,
            group_address: Ipv4Addr::UNSPECIFIED,
            suppress_router_side_processing: false,
            robustness_variable,
            query_interval,
            source_addresses: Vec::new(),
        }
    }

    /// Builds a group-specific query.
    pub fn group_specific(
        group_address: Ipv4Addr,
        max_resp_time: u32,
        robustness_variable: u8,
        query_interval: u32,
        suppress_router_side_processing: bool,
    ) -> Self {
        Self {
            max_resp_time,
            group_address,
            suppress_router_side_processing,
            robustness_variable,
            query_interval,
            source_addresses: Vec::new(),
        }
    }

    /// A query is general iff its group address is unspecified.
    pub fn is_general_query(&self) -> bool {
        self.group_address.is_unspecified()
    }

    /// Serialized size in bytes.
    pub fn wire_len(&self) -> usize {
        QUERY_HEADER_LEN + 4 * self.source_addresses.len()
    }

    /// Serializes the query, including a valid checksum.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.push(MEMBERSHIP_QUERY_TYPE);
        buf.push(value_to_code(self.max_resp_time));
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&self.group_address.octets());
        buf.push(self.flags_byte());
        buf.push(value_to_code(self.query_interval));
        buf.extend_from_slice(&(self.source_addresses.len() as u16).to_be_bytes());
        for addr in &self.source_addresses {
            buf.extend_from_slice(&addr.octets());
        }
        checksum::update(&mut buf);
        buf
    }

    /// Parses a membership query. The checksum is not enforced here;
    /// the receive path verifies it separately before dispatch.
    pub fn parse(data: &[u8]) -> Result<Self, MessageError> {
        require_len(data, QUERY_HEADER_LEN)?;
        if data[0] != MEMBERSHIP_QUERY_TYPE {
            return Err(MessageError::UnknownType(data[0]));
        }

        let max_resp_time = code_to_value(data[1]);
        let group_address = read_ipv4(&data[4..8]);
        let flags = data[8];
        let query_interval = code_to_value(data[9]);
        let number_of_sources = u16::from_be_bytes([data[10], data[11]]) as usize;

        require_len(data, QUERY_HEADER_LEN + 4 * number_of_sources)?;
        let mut source_addresses = Vec::with_capacity(number_of_sources);
        for i in 0..number_of_sources {
            let offset = QUERY_HEADER_LEN + 4 * i;
            source_addresses.push(read_ipv4(&data[offset..offset + 4]));
        }

        Ok(Self {
            max_resp_time,
            group_address,
            suppress_router_side_processing: flags & 0x08 != 0,
            robustness_variable: flags & 0x07,
            query_interval,
            source_addresses,
        })
    }

    fn flags_byte(&self) -> u8 {
        let s = if self.suppress_router_side_processing {
            0x08
        } else {
            0
        };
        s | (self.robustness_variable & 0x07)
    }
}
