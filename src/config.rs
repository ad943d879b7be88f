// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Configuration file types and parsing for igmpd.
//!
//! JSON5 configuration format supporting comments and trailing
//! commas. All interval values are in 0.1 s units, matching the wire
//! encoding of the protocol.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::member::MemberConfig;
use crate::router::RouterVariables;

/// Startup configuration (JSON5 file format)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// Group-member tunables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<MemberSection>,

    /// Router tunables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<RouterSection>,

    /// Path of the Unix control socket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_socket_path: Option<PathBuf>,
}

/// Member settings as stored in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MemberSection {
    /// Number of state-change report transmissions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robustness: Option<u8>,

    /// Unsolicited report interval in 0.1 s units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsolicited_report_interval: Option<u32>,
}

/// Router settings as stored in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RouterSection {
    /// This router's address on the attached network (querier
    /// election key). `ADDRESS` in the daemon's configuration
    /// surface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Ipv4Addr>,

    /// Robustness variable. MUST NOT be zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robustness: Option<u32>,

    /// Interval between general queries, 0.1 s units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_interval: Option<u32>,

    /// Max response time in general queries, 0.1 s units. Must be
    /// less than the query interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_response_interval: Option<u32>,

    /// Max response time in group-specific queries, 0.1 s units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_member_query_interval: Option<u32>,
}

impl Config {
    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            json5::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a JSON5-compatible string. The json5 crate has no
    /// pretty printer, so output goes through serde_json; json5
    /// handles comments and trailing commas on the way in.
    pub fn to_json5(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_json5())
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(member) = &self.member {
            if member.robustness == Some(0) {
                return Err(ConfigError::ZeroRobustness { section: "member" });
            }
            if member.unsolicited_report_interval == Some(0) {
                return Err(ConfigError::ZeroInterval {
                    field: "unsolicited_report_interval",
                });
            }
        }

        if let Some(router) = &self.router {
            if router.robustness == Some(0) {
                return Err(ConfigError::ZeroRobustness { section: "router" });
            }
            let query_interval = router
                .query_interval
                .unwrap_or(crate::router::variables::DEFAULT_QUERY_INTERVAL);
            let response_interval = router
                .query_response_interval
                .unwrap_or(crate::router::variables::DEFAULT_QUERY_RESPONSE_INTERVAL);
            if response_interval >= query_interval {
                return Err(ConfigError::ResponseIntervalTooLarge {
                    response_interval,
                    query_interval,
                });
            }
            if let Some(address) = router.address {
                validate_router_address(address)?;
            }
        }

        Ok(())
    }

    /// Member state machine config with file values applied over the
    /// defaults.
    pub fn member_config(&self) -> MemberConfig {
        let defaults = MemberConfig::default();
        match &self.member {
            Some(section) => MemberConfig {
                robustness_variable: section.robustness.unwrap_or(defaults.robustness_variable),
                unsolicited_report_interval: section
                    .unsolicited_report_interval
                    .unwrap_or(defaults.unsolicited_report_interval),
            },
            None => defaults,
        }
    }

    /// Router variables with file values applied over the defaults.
    pub fn router_variables(&self) -> RouterVariables {
        use crate::router::variables::*;
        match &self.router {
            Some(section) => RouterVariables::new(
                section.robustness.unwrap_or(DEFAULT_ROBUSTNESS_VARIABLE),
                section.query_interval.unwrap_or(DEFAULT_QUERY_INTERVAL),
                section
                    .query_response_interval
                    .unwrap_or(DEFAULT_QUERY_RESPONSE_INTERVAL),
                section
                    .last_member_query_interval
                    .unwrap_or(DEFAULT_LAST_MEMBER_QUERY_INTERVAL),
            ),
            None => RouterVariables::default(),
        }
    }

    /// Router address from the file, if configured.
    pub fn router_address(&self) -> Option<Ipv4Addr> {
        self.router.as_ref().and_then(|r| r.address)
    }
}

/// The election address must be a specified unicast address.
pub fn validate_router_address(address: Ipv4Addr) -> Result<(), ConfigError> {
    if address.is_unspecified() || address.is_multicast() || address.is_broadcast() {
        return Err(ConfigError::InvalidRouterAddress(address));
    }
    Ok(())
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    Io(PathBuf, String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("robustness in the {section} section must not be zero")]
    ZeroRobustness { section: &'static str },

    #[error("{field} must not be zero")]
    ZeroInterval { field: &'static str },

    #[error(
        "query_response_interval ({response_interval}) must be less than query_interval ({query_interval})"
    )]
    ResponseIntervalTooLarge {
        response_interval: u32,
        query_interval: u32,
    },

    #[error("invalid router address {0}: must be a specified unicast address")]
    InvalidRouterAddress(Ipv4Addr),
}
