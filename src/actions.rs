// SPDX-License-Identifier: Apache-2.0 OR MIT
//! State machine output types
//!
//! Handlers never touch sockets or the timer wheel directly; they
//! return a [`HandlerOutput`] describing everything they want done
//! and the caller applies it. This keeps the state machines pure
//! functions of (state, event, now) and easy to test.

use std::net::Ipv4Addr;

use crate::timers::{TimerKind, TimerUpdate};

/// A serialized IGMP message waiting to be transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// IP destination (always one of the well-known multicast groups)
    pub destination: Ipv4Addr,
    /// Complete IGMP message, checksum already set
    pub payload: Vec<u8>,
}

/// Verdict for a received IP packet: forward to the delivery output
/// or to the reject output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forward {
    Deliver,
    Reject,
}

/// Result returned by state machine event handlers
#[derive(Debug, Default)]
pub struct HandlerOutput {
    /// Timer updates to apply to the wheel
    pub timers: Vec<TimerUpdate>,
    /// Messages to transmit
    pub packets: Vec<OutboundMessage>,
}

impl HandlerOutput {
    /// Create a new empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a timer update
    pub fn push_timer(&mut self, update: TimerUpdate) {
        self.timers.push(update);
    }

    /// Cancel a pending timer of the given kind
    pub fn cancel_timer(&mut self, kind: TimerKind) {
        self.timers.push(TimerUpdate::Cancel(kind));
    }

    /// Queue a message for transmission
    pub fn transmit(&mut self, destination: Ipv4Addr, payload: Vec<u8>) {
        self.packets.push(OutboundMessage {
            destination,
            payload,
        });
    }

    /// Merge another result into this one
    pub fn merge(&mut self, other: HandlerOutput) {
        self.timers.extend(other.timers);
        self.packets.extend(other.packets);
    }

    /// Check if the result carries no work
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty() && self.packets.is_empty()
    }
}
