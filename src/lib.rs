// SPDX-License-Identifier: Apache-2.0 OR MIT
use clap::Parser;

pub mod actions;
pub mod config;
pub mod daemon;
pub mod logging;
pub mod member;
pub mod message;
pub mod random;
pub mod router;
pub mod schedule;
pub mod timers;

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;

pub use config::Config;
pub use member::filter::FilterMode;

/// Protocol version for daemon-client communication.
/// Increment when making breaking changes to ControlCommand or Response.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default path of the Unix control socket.
pub const DEFAULT_CONTROL_SOCKET: &str = "/tmp/igmpd_control.sock";

#[derive(Parser, Debug, PartialEq)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Parser, Debug, PartialEq)]
pub enum Command {
    /// Run the multicast group-member endpoint
    Member {
        /// Path to JSON5 configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Path to the Unix socket for join/leave commands.
        #[clap(long, default_value = DEFAULT_CONTROL_SOCKET)]
        control_socket_path: PathBuf,

        /// Local address selecting the outgoing interface for reports.
        #[arg(long)]
        bind_address: Option<Ipv4Addr>,

        /// Minimum severity written to stderr.
        #[arg(long, default_value = "info")]
        log_level: logging::Severity,
    },
    /// Run the multicast router/querier endpoint
    Router {
        /// Path to JSON5 configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Path to the Unix socket for status commands.
        #[clap(long, default_value = DEFAULT_CONTROL_SOCKET)]
        control_socket_path: PathBuf,

        /// This router's address on the attached network. Takes part
        /// in querier election; required here or in the config file.
        #[arg(long)]
        address: Option<Ipv4Addr>,

        /// Minimum severity written to stderr.
        #[arg(long, default_value = "info")]
        log_level: logging::Severity,
    },
}

/// Commands accepted on the control socket.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub enum ControlCommand {
    /// Join a multicast group (member only)
    Join { group: Ipv4Addr },
    /// Leave a multicast group (member only)
    Leave { group: Ipv4Addr },
    /// Report the current membership/forwarding state
    Status,
    /// Health check - returns OK if the daemon is processing events
    Ping,
    /// Get protocol version for compatibility checking
    GetVersion,
    /// Set the minimum log level
    SetLogLevel { level: logging::Severity },
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub enum Response {
    Success(String),
    Error(String),
    Status(MembershipStatus),
    Version { protocol_version: u32 },
}

/// Snapshot of per-group state, as reported by `Status`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MembershipStatus {
    pub groups: Vec<GroupStatus>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GroupStatus {
    pub group: Ipv4Addr,
    pub mode: FilterMode,
    pub sources: Vec<Ipv4Addr>,
}
