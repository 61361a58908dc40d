//! WireGuard device configuration via generic netlink.
//!
//! Link creation goes through rtnetlink (see [`crate::RtNetlink`]); keys,
//! peers and allowed IPs are set with `WG_CMD_SET_DEVICE` on the
//! `wireguard` generic netlink family, whose id is resolved at runtime
//! through `nlctrl`.

use std::net::{IpAddr, SocketAddr};

use ipnet::IpNet;

use crate::device::{DeviceConfig, PeerConfig};
use crate::error::{Error, Result};
use crate::netlink::{
    attr_u16, Attrs, MsgBuffer, NetlinkSocket, NETLINK_GENERIC, NLM_F_ACK, NLM_F_REQUEST,
};
use crate::store::DeviceController;

// nlctrl
const GENL_ID_CTRL: u16 = 0x10;
const CTRL_CMD_GETFAMILY: u8 = 3;
const CTRL_ATTR_FAMILY_ID: u16 = 1;
const CTRL_ATTR_FAMILY_NAME: u16 = 2;

const WG_GENL_NAME: &str = "wireguard";
const WG_GENL_VERSION: u8 = 1;
const WG_CMD_SET_DEVICE: u8 = 1;

// Device attributes
const WGDEVICE_A_IFNAME: u16 = 2;
const WGDEVICE_A_PRIVATE_KEY: u16 = 3;
const WGDEVICE_A_FLAGS: u16 = 5;
const WGDEVICE_A_LISTEN_PORT: u16 = 6;
const WGDEVICE_A_FWMARK: u16 = 7;
const WGDEVICE_A_PEERS: u16 = 8;
const WGDEVICE_F_REPLACE_PEERS: u32 = 1 << 0;

// Peer attributes
const WGPEER_A_PUBLIC_KEY: u16 = 1;
const WGPEER_A_PRESHARED_KEY: u16 = 2;
const WGPEER_A_FLAGS: u16 = 3;
const WGPEER_A_ENDPOINT: u16 = 4;
const WGPEER_A_PERSISTENT_KEEPALIVE_INTERVAL: u16 = 5;
const WGPEER_A_ALLOWEDIPS: u16 = 9;
const WGPEER_F_REPLACE_ALLOWEDIPS: u32 = 1 << 1;

// Allowed IP attributes
const WGALLOWEDIP_A_FAMILY: u16 = 1;
const WGALLOWEDIP_A_IPADDR: u16 = 2;
const WGALLOWEDIP_A_CIDR_MASK: u16 = 3;

const GENLMSGHDR_LEN: usize = 4;

// Size of one SET_DEVICE request
const BUFF_SZ: usize = 4096;
// Largest encoding of a peer entry without its allowed IPs
const PEER_HEADER_MAX: usize = 128;
// Largest encoding of one allowed IP (IPv6)
const ALLOWEDIP_MAX: usize = 40;

/// [`DeviceController`] that talks to the in-kernel WireGuard module.
#[derive(Debug, Default, Clone, Copy)]
pub struct WireguardNetlink;

impl WireguardNetlink {
    pub fn new() -> Self {
        Self
    }
}

/// struct genlmsghdr
fn put_genlmsghdr(buf: &mut MsgBuffer, cmd: u8, version: u8) {
    buf.put_u8(cmd);
    buf.put_u8(version);
    buf.put_u16(0);
}

/// Look up the numeric id of a generic netlink family by name.
fn resolve_family(socket: &NetlinkSocket, name: &str) -> Result<u16> {
    let mut buf = MsgBuffer::new(128);
    buf.put_nlmsghdr(GENL_ID_CTRL, NLM_F_REQUEST, 1);
    put_genlmsghdr(&mut buf, CTRL_CMD_GETFAMILY, 1);
    buf.put_attr_str(CTRL_ATTR_FAMILY_NAME, name);
    buf.finalize_nlmsg()?;

    let body = match socket.request_one(buf.as_slice()) {
        Ok(body) => body,
        Err(Error::Netlink(errno)) if errno == libc::ENOENT => {
            return Err(Error::FamilyNotFound(name.to_string()));
        }
        Err(e) => return Err(e),
    };

    parse_family_id(&body).ok_or_else(|| Error::Protocol("nlctrl reply without family id".into()))
}

fn parse_family_id(body: &[u8]) -> Option<u16> {
    let attrs = body.get(GENLMSGHDR_LEN..)?;
    Attrs::new(attrs)
        .find(|(t, _)| *t == CTRL_ATTR_FAMILY_ID)
        .and_then(|(_, payload)| attr_u16(payload))
}

/// Encode a socket address as the kernel's sockaddr_in / sockaddr_in6.
fn sockaddr_bytes(addr: &SocketAddr) -> Vec<u8> {
    let mut out = Vec::with_capacity(28);
    match addr {
        SocketAddr::V4(v4) => {
            out.extend_from_slice(&(libc::AF_INET as u16).to_ne_bytes());
            out.extend_from_slice(&v4.port().to_be_bytes());
            out.extend_from_slice(&v4.ip().octets());
            out.extend_from_slice(&[0u8; 8]);
        }
        SocketAddr::V6(v6) => {
            out.extend_from_slice(&(libc::AF_INET6 as u16).to_ne_bytes());
            out.extend_from_slice(&v6.port().to_be_bytes());
            out.extend_from_slice(&v6.flowinfo().to_be_bytes());
            out.extend_from_slice(&v6.ip().octets());
            out.extend_from_slice(&v6.scope_id().to_ne_bytes());
        }
    }
    out
}

fn put_allowed_ip(buf: &mut MsgBuffer, net: &IpNet) {
    let entry = buf.start_nested(0);
    match net.addr() {
        IpAddr::V4(ip) => {
            buf.put_attr_u16(WGALLOWEDIP_A_FAMILY, libc::AF_INET as u16);
            buf.put_attr_bytes(WGALLOWEDIP_A_IPADDR, &ip.octets());
        }
        IpAddr::V6(ip) => {
            buf.put_attr_u16(WGALLOWEDIP_A_FAMILY, libc::AF_INET6 as u16);
            buf.put_attr_bytes(WGALLOWEDIP_A_IPADDR, &ip.octets());
        }
    }
    buf.put_attr_u8(WGALLOWEDIP_A_CIDR_MASK, net.prefix_len());
    buf.end_nested(entry);
}

/// Encode `peer` starting at its allowed IP `from`, stopping before the
/// request outgrows [`BUFF_SZ`]. Returns the index of the first allowed IP
/// left out. Only the part starting at zero carries the peer's settings, so
/// later parts append to the allowed IPs instead of replacing them.
fn put_peer(buf: &mut MsgBuffer, peer: &PeerConfig, from: usize) -> usize {
    let entry = buf.start_nested(0);
    buf.put_attr_bytes(WGPEER_A_PUBLIC_KEY, peer.public_key.as_bytes());
    if from == 0 {
        if let Some(ref psk) = peer.preshared_key {
            buf.put_attr_bytes(WGPEER_A_PRESHARED_KEY, psk.as_bytes());
        }
        if peer.replace_allowed_ips {
            buf.put_attr_u32(WGPEER_A_FLAGS, WGPEER_F_REPLACE_ALLOWEDIPS);
        }
        if let Some(ref endpoint) = peer.endpoint {
            buf.put_attr_bytes(WGPEER_A_ENDPOINT, &sockaddr_bytes(endpoint));
        }
        if let Some(keepalive) = peer.persistent_keepalive {
            buf.put_attr_u16(WGPEER_A_PERSISTENT_KEEPALIVE_INTERVAL, keepalive);
        }
    }

    let ips = buf.start_nested(WGPEER_A_ALLOWEDIPS);
    let mut next = from;
    for net in &peer.allowed_ips[from..] {
        if next > from && buf.len() + ALLOWEDIP_MAX > BUFF_SZ {
            break;
        }
        put_allowed_ip(buf, net);
        next += 1;
    }
    buf.end_nested(ips);
    buf.end_nested(entry);
    next
}

fn start_set_device(family: u16, link_name: &str) -> MsgBuffer {
    let mut buf = MsgBuffer::new(BUFF_SZ);
    buf.put_nlmsghdr(family, NLM_F_REQUEST | NLM_F_ACK, 1);
    put_genlmsghdr(&mut buf, WG_CMD_SET_DEVICE, WG_GENL_VERSION);
    buf.put_attr_str(WGDEVICE_A_IFNAME, link_name);
    buf
}

/// Build the SET_DEVICE requests for `family`.
///
/// Peers that do not fit in one request are spread over several, the way
/// wg(8) does it. Device settings and `REPLACE_PEERS` go in the first
/// request only; the rest add to the peer set it installed.
fn build_set_device(
    family: u16,
    link_name: &str,
    config: &DeviceConfig,
) -> Result<Vec<MsgBuffer>> {
    let mut buf = start_set_device(family, link_name);
    if let Some(ref key) = config.private_key {
        buf.put_attr_bytes(WGDEVICE_A_PRIVATE_KEY, key.as_bytes());
    }
    if let Some(port) = config.listen_port {
        buf.put_attr_u16(WGDEVICE_A_LISTEN_PORT, port);
    }
    if let Some(fwmark) = config.fwmark {
        buf.put_attr_u32(WGDEVICE_A_FWMARK, fwmark);
    }
    if config.replace_peers {
        buf.put_attr_u32(WGDEVICE_A_FLAGS, WGDEVICE_F_REPLACE_PEERS);
    }

    let mut messages = Vec::new();
    let mut peer = 0;
    let mut from = 0;
    loop {
        if peer < config.peers.len() {
            let peers = buf.start_nested(WGDEVICE_A_PEERS);
            let mut first = true;
            while let Some(next) = config.peers.get(peer) {
                if !first && buf.len() + PEER_HEADER_MAX + ALLOWEDIP_MAX > BUFF_SZ {
                    break;
                }
                first = false;

                from = put_peer(&mut buf, next, from);
                if from < next.allowed_ips.len() {
                    break;
                }
                peer += 1;
                from = 0;
            }
            buf.end_nested(peers);
        }

        buf.finalize_nlmsg()?;
        messages.push(buf);
        if peer == config.peers.len() {
            return Ok(messages);
        }
        buf = start_set_device(family, link_name);
    }
}

impl DeviceController for WireguardNetlink {
    fn push_configuration(&self, link_name: &str, config: &DeviceConfig) -> Result<()> {
        let socket = NetlinkSocket::new(NETLINK_GENERIC)?;
        let family = resolve_family(&socket, WG_GENL_NAME)?;

        let messages = build_set_device(family, link_name, config)?;
        for msg in &messages {
            socket.request_ack(msg.as_slice())?;
        }

        log::debug!(
            "SET_DEVICE {} via family {:#x} ({} requests, {} bytes)",
            link_name,
            family,
            messages.len(),
            messages.iter().map(MsgBuffer::len).sum::<usize>()
        );
        Ok(())
    }
}
