// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging facilities (component identifiers)

use serde::{Deserialize, Serialize};

/// Logging facility - identifies which component generated the log message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Facility {
    /// Daemon lifecycle, event loop
    Daemon = 0,
    /// Group-member state machine
    Member = 1,
    /// Router state machine and filter
    Router = 2,
    /// Wire codec, parse/checksum rejects
    Wire = 3,
    /// Timer wheel scheduling
    Timer = 4,
    /// Unix control socket commands
    Control = 5,
    /// Raw socket setup and transmit
    Network = 6,
    /// Test harness and fixtures
    Test = 7,

    /// Fallback for uncategorized messages
    Unknown = 255,
}

impl Facility {
    /// Get facility code as u8
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get facility name as static string
    pub const fn as_str(self) -> &'static str {
        match self {
            Facility::Daemon => "Daemon",
            Facility::Member => "Member",
            Facility::Router => "Router",
            Facility::Wire => "Wire",
            Facility::Timer => "Timer",
            Facility::Control => "Control",
            Facility::Network => "Network",
            Facility::Test => "Test",
            Facility::Unknown => "Unknown",
        }
    }

    /// Create from u8 value (returns Unknown if invalid)
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Facility::Daemon,
            1 => Facility::Member,
            2 => Facility::Router,
            3 => Facility::Wire,
            4 => Facility::Timer,
            5 => Facility::Control,
            6 => Facility::Network,
            7 => Facility::Test,
            _ => Facility::Unknown,
        }
    }
}

impl std::fmt::Display for Facility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facility_values() {
        assert_eq!(Facility::Daemon.as_u8(), 0);
        assert_eq!(Facility::Test.as_u8(), 7);
        assert_eq!(Facility::Unknown.as_u8(), 255);
    }

    #[test]
    fn test_facility_from_u8() {
        assert_eq!(Facility::from_u8(0), Facility::Daemon);
        assert_eq!(Facility::from_u8(2), Facility::Router);
        assert_eq!(Facility::from_u8(255), Facility::Unknown);
        assert_eq!(Facility::from_u8(99), Facility::Unknown);
    }

    #[test]
    fn test_facility_display() {
        assert_eq!(format!("{}", Facility::Member), "Member");
        assert_eq!(format!("{}", Facility::Wire), "Wire");
    }
}
