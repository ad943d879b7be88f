// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Daemon event loops.
//!
//! One endpoint (member or router) runs as a single dispatch task fed
//! by three producers:
//!
//! - the timer wheel (expirations),
//! - a blocking reader on the raw IGMP socket (received messages),
//! - the Unix control socket listener (commands with reply channels).
//!
//! All protocol state lives inside the dispatch task, so handlers run
//! to completion one at a time and the state machines never see
//! concurrent mutation. Handler outputs are applied centrally:
//! timer updates go to the wheel, packets go out the raw socket (a
//! failed transmit is logged and skipped; the peer reconciles via the
//! next periodic query or report).

pub mod socket;

use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};

use crate::actions::HandlerOutput;
use crate::config::{validate_router_address, Config};
use crate::logging::{Facility, Logger};
use crate::member::{GroupMember, MemberConfig};
use crate::message::{self, checksum, Message};
use crate::random::ThreadRandom;
use crate::router::{Router, RouterVariables};
use crate::timers::{TimerKind, TimerUpdate, TimerWheel};
use crate::{
    log_debug, log_error, log_info, log_warning, ControlCommand, GroupStatus, MembershipStatus,
    Response, PROTOCOL_VERSION,
};

/// Everything the dispatch loop reacts to.
#[derive(Debug)]
enum Event {
    Timer(TimerKind),
    Packet {
        source: Ipv4Addr,
        payload: Vec<u8>,
    },
    Control {
        command: ControlCommand,
        reply: oneshot::Sender<Response>,
    },
}

/// One protocol endpoint as seen by the dispatch loop.
trait Endpoint {
    fn handle_timer(&mut self, kind: TimerKind, now: Instant) -> HandlerOutput;
    fn handle_packet(&mut self, source: Ipv4Addr, payload: &[u8], now: Instant) -> HandlerOutput;
    fn handle_control(
        &mut self,
        command: ControlCommand,
        now: Instant,
    ) -> (Response, HandlerOutput);
}

/// Options for the member endpoint.
pub struct MemberOptions {
    pub config: MemberConfig,
    pub control_socket_path: PathBuf,
    pub bind_address: Option<Ipv4Addr>,
    pub logger: Logger,
}

impl MemberOptions {
    /// Builds options from a parsed config file and CLI overrides.
    pub fn from_config(
        config: &Config,
        control_socket_path: PathBuf,
        bind_address: Option<Ipv4Addr>,
        logger: Logger,
    ) -> Self {
        Self {
            config: config.member_config(),
            control_socket_path: config
                .control_socket_path
                .clone()
                .unwrap_or(control_socket_path),
            bind_address,
            logger,
        }
    }
}

/// Options for the router endpoint.
pub struct RouterOptions {
    pub variables: RouterVariables,
    pub address: Ipv4Addr,
    pub control_socket_path: PathBuf,
    pub logger: Logger,
}

impl RouterOptions {
    /// Builds options from a parsed config file and CLI overrides.
    /// The address must come from one of the two.
    pub fn from_config(
        config: &Config,
        control_socket_path: PathBuf,
        address: Option<Ipv4Addr>,
        logger: Logger,
    ) -> Result<Self> {
        let address = address
            .or_else(|| config.router_address())
            .context("router address missing: pass --address or set router.address in the config")?;
        validate_router_address(address)?;
        Ok(Self {
            variables: config.router_variables(),
            address,
            control_socket_path: config
                .control_socket_path
                .clone()
                .unwrap_or(control_socket_path),
            logger,
        })
    }
}

struct MemberEndpoint {
    member: GroupMember,
}

impl Endpoint for MemberEndpoint {
    fn handle_timer(&mut self, kind: TimerKind, now: Instant) -> HandlerOutput {
        self.member.handle_timer(kind, now)
    }

    fn handle_packet(&mut self, _source: Ipv4Addr, payload: &[u8], now: Instant) -> HandlerOutput {
        match message::parse(payload) {
            Ok(Message::Query(query)) => self.member.handle_query(&query, now),
            // Hosts do not process other hosts' reports.
            Ok(Message::Report(_)) => HandlerOutput::new(),
            Err(_) => HandlerOutput::new(),
        }
    }

    fn handle_control(
        &mut self,
        command: ControlCommand,
        now: Instant,
    ) -> (Response, HandlerOutput) {
        match command {
            ControlCommand::Join { group } => {
                if !group.is_multicast() {
                    return (
                        Response::Error(format!("{} is not a multicast address", group)),
                        HandlerOutput::new(),
                    );
                }
                let output = self.member.join(group, now);
                (Response::Success(format!("joined {}", group)), output)
            }
            ControlCommand::Leave { group } => {
                let output = self.member.leave(group, now);
                (Response::Success(format!("left {}", group)), output)
            }
            ControlCommand::Status => {
                let groups = self
                    .member
                    .filter()
                    .iter()
                    .map(|(&group, record)| GroupStatus {
                        group,
                        mode: record.filter_mode,
                        sources: record.source_addresses.iter().copied().collect(),
                    })
                    .collect();
                (
                    Response::Status(MembershipStatus { groups }),
                    HandlerOutput::new(),
                )
            }
            other => (shared_control(other), HandlerOutput::new()),
        }
    }
}

struct RouterEndpoint {
    router: Router,
}

impl Endpoint for RouterEndpoint {
    fn handle_timer(&mut self, kind: TimerKind, now: Instant) -> HandlerOutput {
        self.router.handle_timer(kind, now)
    }

    fn handle_packet(&mut self, source: Ipv4Addr, payload: &[u8], now: Instant) -> HandlerOutput {
        match message::parse(payload) {
            Ok(Message::Query(query)) => self.router.handle_query(&query, source, now),
            Ok(Message::Report(report)) => self.router.handle_report(&report, now),
            Err(_) => HandlerOutput::new(),
        }
    }

    fn handle_control(
        &mut self,
        command: ControlCommand,
        _now: Instant,
    ) -> (Response, HandlerOutput) {
        let response = match command {
            ControlCommand::Status => {
                let filter = self.router.filter();
                let groups = filter
                    .groups()
                    .filter_map(|&group| {
                        filter.record(group).map(|record| GroupStatus {
                            group,
                            mode: record.filter_mode,
                            sources: record.source_addresses().into_iter().collect(),
                        })
                    })
                    .collect();
                Response::Status(MembershipStatus { groups })
            }
            ControlCommand::Join { .. } | ControlCommand::Leave { .. } => {
                Response::Error("join/leave apply to the member endpoint".to_string())
            }
            other => shared_control(other),
        };
        (response, HandlerOutput::new())
    }
}

/// Commands handled identically by both endpoints. `SetLogLevel` is
/// intercepted by the dispatch loop before this is reached.
fn shared_control(command: ControlCommand) -> Response {
    match command {
        ControlCommand::Ping => Response::Success("OK".to_string()),
        ControlCommand::GetVersion => Response::Version {
            protocol_version: PROTOCOL_VERSION,
        },
        other => Response::Error(format!("unsupported command {:?}", other)),
    }
}

/// Runs the group-member endpoint until the process is stopped.
pub async fn run_member(options: MemberOptions) -> Result<()> {
    let logger = options.logger.clone();
    log_info!(logger, Facility::Daemon, "starting group-member endpoint");

    let member = GroupMember::new(options.config, Box::new(ThreadRandom), logger.clone());
    let endpoint = MemberEndpoint { member };
    run_endpoint(
        endpoint,
        options.bind_address,
        &options.control_socket_path,
        HandlerOutput::new(),
        logger,
    )
    .await
}

/// Runs the router endpoint until the process is stopped.
pub async fn run_router(options: RouterOptions) -> Result<()> {
    let logger = options.logger.clone();
    log_info!(
        logger,
        Facility::Daemon,
        &format!("starting router endpoint at {}", options.address)
    );

    let mut router = Router::new(options.address, options.variables, logger.clone());
    let startup = router.configure(Instant::now());
    let endpoint = RouterEndpoint { router };
    run_endpoint(
        endpoint,
        Some(options.address),
        &options.control_socket_path,
        startup,
        logger,
    )
    .await
}

/// Wires up socket, wheel, and control listener, then dispatches.
async fn run_endpoint<E: Endpoint>(
    mut endpoint: E,
    bind_address: Option<Ipv4Addr>,
    control_socket_path: &Path,
    initial_output: HandlerOutput,
    logger: Logger,
) -> Result<()> {
    let socket_fd = Arc::new(socket::open_igmp_socket(bind_address)?);
    log_info!(
        logger,
        Facility::Network,
        "raw IGMP socket open, well-known groups joined"
    );
    let (event_tx, mut event_rx) = mpsc::channel::<Event>(64);
    let (timer_tx, timer_rx) = mpsc::channel::<TimerUpdate>(64);
    let (expiry_tx, mut expiry_rx) = mpsc::channel::<TimerKind>(64);

    tokio::spawn(TimerWheel::new(timer_rx, expiry_tx, logger.clone()).run());
    let forward_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(kind) = expiry_rx.recv().await {
            if forward_tx.send(Event::Timer(kind)).await.is_err() {
                return;
            }
        }
    });
    spawn_packet_reader(Arc::clone(&socket_fd), event_tx.clone(), logger.clone());
    spawn_control_listener(control_socket_path, event_tx, logger.clone())?;

    apply_output(initial_output, &timer_tx, &socket_fd, &logger).await;

    while let Some(event) = event_rx.recv().await {
        let now = Instant::now();
        match event {
            Event::Timer(kind) => {
                let output = endpoint.handle_timer(kind, now);
                apply_output(output, &timer_tx, &socket_fd, &logger).await;
            }
            Event::Packet { source, payload } => {
                let output = endpoint.handle_packet(source, &payload, now);
                apply_output(output, &timer_tx, &socket_fd, &logger).await;
            }
            Event::Control { command, reply } => {
                log_debug!(
                    logger,
                    Facility::Control,
                    &format!("control command {:?}", command)
                );
                let response = if let ControlCommand::SetLogLevel { level } = command {
                    logger.set_level(level);
                    Response::Success(format!("log level set to {}", level))
                } else {
                    let (response, output) = endpoint.handle_control(command, now);
                    apply_output(output, &timer_tx, &socket_fd, &logger).await;
                    response
                };
                let _ = reply.send(response);
            }
        }
    }
    Ok(())
}

async fn apply_output(
    output: HandlerOutput,
    timer_tx: &mpsc::Sender<TimerUpdate>,
    socket_fd: &OwnedFd,
    logger: &Logger,
) {
    for update in output.timers {
        if timer_tx.send(update).await.is_err() {
            log_error!(logger, Facility::Daemon, "timer wheel gone");
            return;
        }
    }
    for packet in output.packets {
        match socket::send_igmp(socket_fd.as_raw_fd(), packet.destination, &packet.payload) {
            Ok(_) => log_debug!(
                logger,
                Facility::Network,
                &format!(
                    "sent {} bytes to {}",
                    packet.payload.len(),
                    packet.destination
                )
            ),
            // Skip the transmission; state stays as recorded and the
            // peer reconciles on the next periodic exchange.
            Err(e) => log_error!(
                logger,
                Facility::Network,
                &format!("transmit to {} failed: {}", packet.destination, e)
            ),
        }
    }
}

/// Reads raw datagrams off the IGMP socket on a blocking thread,
/// verifying checksums and stripping IP headers before dispatch.
fn spawn_packet_reader(socket_fd: Arc<OwnedFd>, event_tx: mpsc::Sender<Event>, logger: Logger) {
    std::thread::spawn(move || {
        let mut buf = [0u8; 1500];
        loop {
            let (len, from) = match socket::recv_igmp(socket_fd.as_raw_fd(), &mut buf) {
                Ok(result) => result,
                Err(e) => {
                    log_error!(logger, Facility::Network, &format!("receive failed: {}", e));
                    return;
                }
            };
            let datagram = &buf[..len];
            let Some((ip_source, _, offset)) = socket::strip_ipv4_header(datagram) else {
                log_debug!(logger, Facility::Wire, "dropping non-IPv4 datagram");
                continue;
            };
            let payload = &datagram[offset..];
            if !checksum::verify(payload) {
                log_warning!(
                    logger,
                    Facility::Wire,
                    &format!("checksum reject from {}", ip_source)
                );
                continue;
            }
            let event = Event::Packet {
                source: from.unwrap_or(ip_source),
                payload: payload.to_vec(),
            };
            if event_tx.blocking_send(event).is_err() {
                return;
            }
        }
    });
}

/// Accepts control connections: one serde_json command per
/// connection, one response back.
fn spawn_control_listener(
    path: &Path,
    event_tx: mpsc::Sender<Event>,
    logger: Logger,
) -> Result<()> {
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)
        .with_context(|| format!("bind control socket {}", path.display()))?;
    log_info!(
        logger,
        Facility::Control,
        &format!("control socket listening on {}", path.display())
    );

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    log_error!(logger, Facility::Control, &format!("accept failed: {}", e));
                    continue;
                }
            };
            let event_tx = event_tx.clone();
            let logger = logger.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_control_connection(stream, event_tx).await {
                    log_warning!(
                        logger,
                        Facility::Control,
                        &format!("control connection failed: {}", e)
                    );
                }
            });
        }
    });
    Ok(())
}

async fn handle_control_connection(
    mut stream: UnixStream,
    event_tx: mpsc::Sender<Event>,
) -> Result<()> {
    let mut request = Vec::new();
    stream.read_to_end(&mut request).await?;
    let command: ControlCommand = serde_json::from_slice(&request)?;

    let (reply_tx, reply_rx) = oneshot::channel();
    event_tx
        .send(Event::Control {
            command,
            reply: reply_tx,
        })
        .await
        .map_err(|_| anyhow::anyhow!("dispatch loop gone"))?;
    let response = reply_rx
        .await
        .unwrap_or(Response::Error("daemon shutting down".to_string()));

    stream.write_all(&serde_json::to_vec(&response)?).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn member_endpoint() -> MemberEndpoint {
        MemberEndpoint {
            member: GroupMember::new(
                MemberConfig::default(),
                Box::new(ThreadRandom),
                Logger::null(),
            ),
        }
    }

    #[test]
    fn test_member_control_join_and_status() {
        let mut endpoint = member_endpoint();
        let now = Instant::now();

        let (response, output) = endpoint.handle_control(
            ControlCommand::Join {
                group: addr("239.1.1.1"),
            },
            now,
        );
        assert!(matches!(response, Response::Success(_)));
        assert!(!output.packets.is_empty());

        let (response, _) = endpoint.handle_control(ControlCommand::Status, now);
        match response {
            Response::Status(status) => {
                assert_eq!(status.groups.len(), 1);
                assert_eq!(status.groups[0].group, addr("239.1.1.1"));
                assert_eq!(status.groups[0].mode, crate::FilterMode::Exclude);
            }
            other => panic!("expected status, got {:?}", other),
        }
    }

    #[test]
    fn test_member_control_rejects_unicast_join() {
        let mut endpoint = member_endpoint();
        let (response, output) = endpoint.handle_control(
            ControlCommand::Join {
                group: addr("10.0.0.1"),
            },
            Instant::now(),
        );
        assert!(matches!(response, Response::Error(_)));
        assert!(output.is_empty());
    }

    #[test]
    fn test_member_packet_path_parses_query() {
        let mut endpoint = member_endpoint();
        let now = Instant::now();
        endpoint.handle_control(
            ControlCommand::Join {
                group: addr("239.1.1.1"),
            },
            now,
        );

        let query = message::MembershipQuery::general(100, 2, 1216).to_bytes();
        let output = endpoint.handle_packet(addr("10.0.0.2"), &query, now);
        // A response timer was armed.
        assert!(!output.timers.is_empty());

        // Garbage is dropped without output.
        let output = endpoint.handle_packet(addr("10.0.0.2"), &[0xFF, 0x00], now);
        assert!(output.is_empty());
    }

    #[test]
    fn test_router_control_rejects_join() {
        let mut endpoint = RouterEndpoint {
            router: Router::new(addr("10.0.0.5"), RouterVariables::default(), Logger::null()),
        };
        let (response, _) = endpoint.handle_control(
            ControlCommand::Join {
                group: addr("239.1.1.1"),
            },
            Instant::now(),
        );
        assert!(matches!(response, Response::Error(_)));
    }

    #[test]
    fn test_shared_control() {
        assert_eq!(
            shared_control(ControlCommand::Ping),
            Response::Success("OK".to_string())
        );
        assert_eq!(
            shared_control(ControlCommand::GetVersion),
            Response::Version {
                protocol_version: PROTOCOL_VERSION
            }
        );
    }

    #[test]
    fn test_router_options_require_address() {
        let config = Config::default();
        let result = RouterOptions::from_config(
            &config,
            PathBuf::from("/tmp/igmpd-test.sock"),
            None,
            Logger::null(),
        );
        assert!(result.is_err());

        let result = RouterOptions::from_config(
            &config,
            PathBuf::from("/tmp/igmpd-test.sock"),
            Some(addr("10.0.0.5")),
            Logger::null(),
        );
        assert_eq!(result.unwrap().address, addr("10.0.0.5"));
    }
}
