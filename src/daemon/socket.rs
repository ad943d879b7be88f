// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Raw IGMP socket helpers.
//!
//! The daemon speaks protocol 2 (IGMP) over a raw AF_INET socket.
//! Received datagrams arrive with their IPv4 header attached; the
//! reader strips it before handing the IGMP payload to the core.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use anyhow::{Context, Result};
use nix::sys::socket::{recvfrom, sendto, MsgFlags, SockaddrIn};
use socket2::{Domain, Protocol, Socket, Type};

use crate::message::{ALL_REPORTERS, ALL_SYSTEMS};

/// Check a libc function result and convert to anyhow::Result
fn check_libc_result(result: i32, context: &str) -> Result<()> {
    if result < 0 {
        Err(anyhow::anyhow!(
            "Failed to {}: {}",
            context,
            std::io::Error::last_os_error()
        ))
    } else {
        Ok(())
    }
}

/// Set the TTL for outgoing multicast packets. IGMP messages never
/// leave the local network, so the daemon pins this to 1.
pub fn set_multicast_ttl(fd: RawFd, ttl: u8) -> Result<()> {
    let ttl_val: libc::c_int = libc::c_int::from(ttl);
    let result = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            libc::IP_MULTICAST_TTL,
            &ttl_val as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    check_libc_result(result, &format!("set IP_MULTICAST_TTL to {}", ttl))
}

/// Set the outgoing interface for multicast packets by source IP address.
pub fn set_multicast_if_by_addr(fd: RawFd, source_ip: Ipv4Addr) -> Result<()> {
    let mcast_if = libc::in_addr {
        s_addr: u32::from_ne_bytes(source_ip.octets()),
    };
    let result = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            libc::IP_MULTICAST_IF,
            &mcast_if as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::in_addr>() as libc::socklen_t,
        )
    };
    check_libc_result(result, &format!("set IP_MULTICAST_IF to {}", source_ip))
}

/// Join a multicast group on the default interface, enabling kernel
/// delivery of datagrams sent to the group.
pub fn join_multicast_group(fd: RawFd, group: Ipv4Addr) -> Result<()> {
    let mreqn = libc::ip_mreqn {
        imr_multiaddr: libc::in_addr {
            s_addr: u32::from(group).to_be(),
        },
        imr_address: libc::in_addr { s_addr: 0 },
        imr_ifindex: 0,
    };
    let result = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            libc::IP_ADD_MEMBERSHIP,
            &mreqn as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::ip_mreqn>() as libc::socklen_t,
        )
    };
    check_libc_result(result, &format!("join multicast group {}", group))
}

/// Create and configure the raw IGMP socket for one endpoint.
///
/// Joins both well-known groups (queries arrive on 224.0.0.1,
/// reports on 224.0.0.22) and pins the multicast TTL to 1. Requires
/// CAP_NET_RAW.
pub fn open_igmp_socket(multicast_if: Option<Ipv4Addr>) -> Result<OwnedFd> {
    let socket = Socket::new(
        Domain::IPV4,
        Type::RAW,
        Some(Protocol::from(libc::IPPROTO_IGMP)),
    )
    .context("Failed to create raw IGMP socket (requires CAP_NET_RAW)")?;

    let fd = socket.as_raw_fd();
    set_multicast_ttl(fd, 1)?;
    if let Some(addr) = multicast_if {
        set_multicast_if_by_addr(fd, addr)?;
    }
    join_multicast_group(fd, ALL_SYSTEMS)?;
    join_multicast_group(fd, ALL_REPORTERS)?;

    Ok(OwnedFd::from(socket))
}

/// Transmit one IGMP message to the given destination.
pub fn send_igmp(fd: RawFd, destination: Ipv4Addr, payload: &[u8]) -> Result<usize> {
    let addr = SockaddrIn::from(SocketAddrV4::new(destination, 0));
    let sent = sendto(fd, payload, &addr, MsgFlags::empty())
        .with_context(|| format!("send IGMP message to {}", destination))?;
    Ok(sent)
}

/// Blocking receive of one raw datagram. Returns the byte count and
/// the sender, when the kernel provides one.
pub fn recv_igmp(fd: RawFd, buf: &mut [u8]) -> Result<(usize, Option<Ipv4Addr>)> {
    let (len, addr) = recvfrom::<SockaddrIn>(fd, buf).context("receive on raw IGMP socket")?;
    Ok((len, addr.map(|a| a.ip())))
}

/// Strips the IPv4 header from a raw datagram, returning the source,
/// destination, and the payload offset. Returns `None` for anything
/// too short or not version 4.
pub fn strip_ipv4_header(data: &[u8]) -> Option<(Ipv4Addr, Ipv4Addr, usize)> {
    if data.len() < 20 {
        return None;
    }
    let version = data[0] >> 4;
    if version != 4 {
        return None;
    }
    let header_len = usize::from(data[0] & 0x0F) * 4;
    if header_len < 20 || data.len() < header_len {
        return None;
    }
    let source = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
    let destination = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
    Some((source, destination, header_len))
}
