//! Link, address and route operations over NETLINK_ROUTE.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::{Error, Result};
use crate::netlink::{
    attr_ipv4, attr_str, attr_u32, Attrs, MsgBuffer, NetlinkSocket, NETLINK_ROUTE, NLM_F_ACK,
    NLM_F_CREATE, NLM_F_DUMP, NLM_F_EXCL, NLM_F_REPLACE, NLM_F_REQUEST,
};
use crate::store::LinkStore;
use crate::types::{
    AddressEntry, Link, LinkSpec, RouteEntry, ROUTE_DELETE_SCOPE, ROUTE_INSTALL_SCOPE,
    RT_SCOPE_UNIVERSE,
};

// rtnetlink message types
const RTM_NEWLINK: u16 = 16;
const RTM_DELLINK: u16 = 17;
const RTM_GETLINK: u16 = 18;
const RTM_NEWADDR: u16 = 20;
const RTM_DELADDR: u16 = 21;
const RTM_GETADDR: u16 = 22;
const RTM_NEWROUTE: u16 = 24;
const RTM_DELROUTE: u16 = 25;
const RTM_GETROUTE: u16 = 26;

// Link attributes
const IFLA_IFNAME: u16 = 3;
const IFLA_MTU: u16 = 4;
const IFLA_LINKINFO: u16 = 18;
const IFLA_INFO_KIND: u16 = 1;

// Address attributes
const IFA_ADDRESS: u16 = 1;
const IFA_LOCAL: u16 = 2;
const IFA_LABEL: u16 = 3;
const IFA_BROADCAST: u16 = 4;

// Route attributes
const RTA_DST: u16 = 1;
const RTA_OIF: u16 = 4;
const RTA_PRIORITY: u16 = 6;
const RTA_TABLE: u16 = 15;

const RT_TABLE_UNSPEC: u8 = 0;
const RTM_F_CLONED: u32 = 0x200;

const IFF_UP: u32 = libc::IFF_UP as u32;
const AF_INET: u8 = libc::AF_INET as u8;

// Fixed-size message headers that follow nlmsghdr
const IFINFOMSG_LEN: usize = 16;
const IFADDRMSG_LEN: usize = 8;
const RTMSG_LEN: usize = 12;

const BUFF_SZ: usize = 256;

/// [`LinkStore`] backed by the kernel's rtnetlink interface.
///
/// Each call opens its own socket; there is no state shared between calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct RtNetlink;

impl RtNetlink {
    pub fn new() -> Self {
        Self
    }

    fn socket() -> Result<NetlinkSocket> {
        Ok(NetlinkSocket::new(NETLINK_ROUTE)?)
    }
}

/// struct ifinfomsg
fn put_ifinfomsg(buf: &mut MsgBuffer, index: u32, flags: u32, change: u32) {
    buf.put_u8(libc::AF_UNSPEC as u8);
    buf.put_u8(0);
    buf.put_u16(0); // ifi_type
    buf.put_u32(index);
    buf.put_u32(flags);
    buf.put_u32(change);
}

/// struct ifaddrmsg
fn put_ifaddrmsg(buf: &mut MsgBuffer, prefix_len: u8, index: u32) {
    buf.put_u8(AF_INET);
    buf.put_u8(prefix_len);
    buf.put_u8(0); // ifa_flags
    buf.put_u8(RT_SCOPE_UNIVERSE);
    buf.put_u32(index);
}

/// struct rtmsg for an IPv4 route
fn put_rtmsg(buf: &mut MsgBuffer, route: &RouteEntry, scope: u8) {
    // Tables above 255 only fit in RTA_TABLE
    let table = u8::try_from(route.table).unwrap_or(RT_TABLE_UNSPEC);

    buf.put_u8(AF_INET);
    buf.put_u8(route.destination.prefix_len());
    buf.put_u8(0); // rtm_src_len
    buf.put_u8(0); // rtm_tos
    buf.put_u8(table);
    buf.put_u8(route.protocol);
    buf.put_u8(scope);
    buf.put_u8(route.kind);
    buf.put_u32(0); // rtm_flags
}

fn put_route_attrs(buf: &mut MsgBuffer, route: &RouteEntry) {
    if route.destination.prefix_len() > 0 {
        buf.put_attr_bytes(RTA_DST, &route.destination.network().octets());
    }
    buf.put_attr_u32(RTA_OIF, route.link_index);
    if route.priority > 0 {
        buf.put_attr_u32(RTA_PRIORITY, route.priority);
    }
    buf.put_attr_u32(RTA_TABLE, route.table);
}

/// RTM_NEWROUTE / RTM_DELROUTE request for `route`
fn route_request(
    msg_type: u16,
    flags: u16,
    route: &RouteEntry,
    scope: u8,
) -> Result<MsgBuffer> {
    let mut buf = MsgBuffer::new(BUFF_SZ);
    buf.put_nlmsghdr(msg_type, NLM_F_REQUEST | NLM_F_ACK | flags, 1);
    put_rtmsg(&mut buf, route, scope);
    put_route_attrs(&mut buf, route);
    buf.finalize_nlmsg()?;
    Ok(buf)
}

fn parse_link(body: &[u8]) -> Result<Link> {
    if body.len() < IFINFOMSG_LEN {
        return Err(Error::Protocol("truncated ifinfomsg".into()));
    }

    let index = u32::from_ne_bytes([body[4], body[5], body[6], body[7]]);
    let flags = u32::from_ne_bytes([body[8], body[9], body[10], body[11]]);

    let mut link = Link {
        name: String::new(),
        index,
        mtu: 0,
        up: flags & IFF_UP != 0,
        kind: None,
    };

    for (attr_type, payload) in Attrs::new(&body[IFINFOMSG_LEN..]) {
        match attr_type {
            IFLA_IFNAME => link.name = attr_str(payload),
            IFLA_MTU => link.mtu = attr_u32(payload).unwrap_or(0),
            IFLA_LINKINFO => {
                link.kind = Attrs::new(payload)
                    .find(|(t, _)| *t == IFLA_INFO_KIND)
                    .map(|(_, kind)| attr_str(kind));
            }
            _ => {}
        }
    }

    Ok(link)
}

/// Parse an RTM_NEWADDR body, returning the interface index and the entry.
/// Non-IPv4 entries yield `None`.
fn parse_address(body: &[u8]) -> Option<(u32, AddressEntry)> {
    if body.len() < IFADDRMSG_LEN || body[0] != AF_INET {
        return None;
    }

    let prefix_len = body[1];
    let index = u32::from_ne_bytes([body[4], body[5], body[6], body[7]]);

    let mut local = None;
    let mut address = None;
    let mut label = None;

    for (attr_type, payload) in Attrs::new(&body[IFADDRMSG_LEN..]) {
        match attr_type {
            IFA_LOCAL => local = attr_ipv4(payload),
            IFA_ADDRESS => address = attr_ipv4(payload),
            IFA_LABEL => label = Some(attr_str(payload)),
            _ => {}
        }
    }

    // On point-to-point links IFA_ADDRESS is the peer; IFA_LOCAL is ours.
    let ip = local.or(address)?;
    let net = Ipv4Net::new(ip, prefix_len).ok()?;
    Some((index, AddressEntry::new(net).with_label(label)))
}

/// Parse an RTM_NEWROUTE body. Cloned cache entries and non-IPv4 routes
/// yield `None`; routes without an output interface get index 0.
fn parse_route(body: &[u8]) -> Option<RouteEntry> {
    if body.len() < RTMSG_LEN || body[0] != AF_INET {
        return None;
    }

    let dst_len = body[1];
    let rtm_table = body[4];
    let protocol = body[5];
    let kind = body[7];
    let flags = u32::from_ne_bytes([body[8], body[9], body[10], body[11]]);

    if flags & RTM_F_CLONED != 0 {
        return None;
    }

    let mut dst = Ipv4Addr::UNSPECIFIED;
    let mut oif = 0;
    let mut priority = 0;
    let mut table = u32::from(rtm_table);

    for (attr_type, payload) in Attrs::new(&body[RTMSG_LEN..]) {
        match attr_type {
            RTA_DST => dst = attr_ipv4(payload)?,
            RTA_OIF => oif = attr_u32(payload)?,
            RTA_PRIORITY => priority = attr_u32(payload)?,
            RTA_TABLE => table = attr_u32(payload)?,
            _ => {}
        }
    }

    let destination = Ipv4Net::new(dst, dst_len).ok()?;
    Some(RouteEntry {
        destination,
        link_index: oif,
        table,
        protocol,
        priority,
        kind,
    })
}

impl LinkStore for RtNetlink {
    fn find_by_name(&self, name: &str) -> Result<Link> {
        let mut buf = MsgBuffer::new(BUFF_SZ);
        buf.put_nlmsghdr(RTM_GETLINK, NLM_F_REQUEST, 1);
        put_ifinfomsg(&mut buf, 0, 0, 0);
        buf.put_attr_str(IFLA_IFNAME, name);
        buf.finalize_nlmsg()?;

        let body = match Self::socket()?.request_one(buf.as_slice()) {
            Ok(body) => body,
            Err(Error::Netlink(errno)) if errno == libc::ENODEV => {
                return Err(Error::NotFound(name.to_string()));
            }
            Err(e) => return Err(e),
        };

        parse_link(&body)
    }

    fn create(&self, spec: &LinkSpec) -> Result<()> {
        let mut buf = MsgBuffer::new(BUFF_SZ);
        buf.put_nlmsghdr(
            RTM_NEWLINK,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
            1,
        );
        put_ifinfomsg(&mut buf, 0, 0, 0);
        buf.put_attr_str(IFLA_IFNAME, &spec.name);
        if let Some(mtu) = spec.mtu {
            buf.put_attr_u32(IFLA_MTU, mtu);
        }
        let info = buf.start_nested(IFLA_LINKINFO);
        buf.put_attr_str(IFLA_INFO_KIND, &spec.kind);
        buf.end_nested(info);
        buf.finalize_nlmsg()?;

        Self::socket()?.request_ack(buf.as_slice())
    }

    fn set_up(&self, link: &Link) -> Result<()> {
        let mut buf = MsgBuffer::new(BUFF_SZ);
        buf.put_nlmsghdr(RTM_NEWLINK, NLM_F_REQUEST | NLM_F_ACK, 1);
        put_ifinfomsg(&mut buf, link.index, IFF_UP, IFF_UP);
        buf.finalize_nlmsg()?;

        Self::socket()?.request_ack(buf.as_slice())
    }

    fn delete(&self, link: &Link) -> Result<()> {
        let mut buf = MsgBuffer::new(BUFF_SZ);
        buf.put_nlmsghdr(RTM_DELLINK, NLM_F_REQUEST | NLM_F_ACK, 1);
        put_ifinfomsg(&mut buf, link.index, 0, 0);
        buf.finalize_nlmsg()?;

        Self::socket()?.request_ack(buf.as_slice())
    }

    fn list_addresses(&self, link: &Link) -> Result<Vec<AddressEntry>> {
        let mut buf = MsgBuffer::new(BUFF_SZ);
        buf.put_nlmsghdr(RTM_GETADDR, NLM_F_REQUEST | NLM_F_DUMP, 1);
        put_ifaddrmsg(&mut buf, 0, 0);
        buf.finalize_nlmsg()?;

        let bodies = Self::socket()?.dump(buf.as_slice())?;
        Ok(bodies
            .iter()
            .filter_map(|body| parse_address(body))
            .filter(|(index, _)| *index == link.index)
            .map(|(_, entry)| entry)
            .collect())
    }

    fn add_address(&self, link: &Link, address: &AddressEntry) -> Result<()> {
        let net = address.address;
        let ip = net.addr().octets();

        let mut buf = MsgBuffer::new(BUFF_SZ);
        buf.put_nlmsghdr(
            RTM_NEWADDR,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
            1,
        );
        put_ifaddrmsg(&mut buf, net.prefix_len(), link.index);
        buf.put_attr_bytes(IFA_LOCAL, &ip);
        buf.put_attr_bytes(IFA_ADDRESS, &ip);
        if net.prefix_len() < 31 {
            buf.put_attr_bytes(IFA_BROADCAST, &net.broadcast().octets());
        }
        if let Some(ref label) = address.label {
            buf.put_attr_str(IFA_LABEL, label);
        }
        buf.finalize_nlmsg()?;

        Self::socket()?.request_ack(buf.as_slice())
    }

    fn delete_address(&self, link: &Link, address: &AddressEntry) -> Result<()> {
        let net = address.address;
        let ip = net.addr().octets();

        let mut buf = MsgBuffer::new(BUFF_SZ);
        buf.put_nlmsghdr(RTM_DELADDR, NLM_F_REQUEST | NLM_F_ACK, 1);
        put_ifaddrmsg(&mut buf, net.prefix_len(), link.index);
        buf.put_attr_bytes(IFA_LOCAL, &ip);
        buf.put_attr_bytes(IFA_ADDRESS, &ip);
        buf.finalize_nlmsg()?;

        Self::socket()?.request_ack(buf.as_slice())
    }

    fn list_routes(&self, link: &Link) -> Result<Vec<RouteEntry>> {
        let mut buf = MsgBuffer::new(BUFF_SZ);
        buf.put_nlmsghdr(RTM_GETROUTE, NLM_F_REQUEST | NLM_F_DUMP, 1);
        put_rtmsg(
            &mut buf,
            &RouteEntry::new(Ipv4Net::default(), 0),
            RT_SCOPE_UNIVERSE,
        );
        buf.finalize_nlmsg()?;

        let bodies = Self::socket()?.dump(buf.as_slice())?;
        let routes: Vec<RouteEntry> = bodies
            .iter()
            .filter_map(|body| parse_route(body))
            .filter(|route| route.link_index == link.index)
            .collect();
        log::debug!(
            "{} of {} IPv4 routes use {}",
            routes.len(),
            bodies.len(),
            link.name
        );
        Ok(routes)
    }

    fn upsert_route(&self, route: &RouteEntry) -> Result<()> {
        let buf = route_request(
            RTM_NEWROUTE,
            NLM_F_CREATE | NLM_F_REPLACE,
            route,
            ROUTE_INSTALL_SCOPE,
        )?;
        Self::socket()?.request_ack(buf.as_slice())
    }

    fn delete_route(&self, route: &RouteEntry) -> Result<()> {
        let buf = route_request(RTM_DELROUTE, 0, route, ROUTE_DELETE_SCOPE)?;
        Self::socket()?.request_ack(buf.as_slice())
    }
}
