//! Kernel object types shared by the link store backends

use std::fmt;
use std::hash::{Hash, Hasher};

use ipnet::Ipv4Net;

/// Main routing table id
pub const RT_TABLE_MAIN: u32 = 254;

/// Route protocol tag for routes installed during boot / by an admin tool
pub const RTPROT_BOOT: u8 = 3;

/// Route type for ordinary unicast routes
pub const RTN_UNICAST: u8 = 1;

// Route scopes (rtm_scope)
pub(crate) const RT_SCOPE_UNIVERSE: u8 = 0;
pub(crate) const RT_SCOPE_LINK: u8 = 253;
pub(crate) const RT_SCOPE_NOWHERE: u8 = 255;

/// Scope given to installed routes. They are direct routes through the link.
pub(crate) const ROUTE_INSTALL_SCOPE: u8 = RT_SCOPE_LINK;

/// Scope sent with route deletions. The kernel only skips the scope
/// comparison for `RT_SCOPE_NOWHERE`.
pub(crate) const ROUTE_DELETE_SCOPE: u8 = RT_SCOPE_NOWHERE;

/// Whether a delete request carrying `requested` matches a route that was
/// installed with scope `installed`
pub(crate) fn scope_matches(requested: u8, installed: u8) -> bool {
    requested == RT_SCOPE_NOWHERE || requested == installed
}

/// Link kind reported by the kernel for WireGuard interfaces
pub const WIREGUARD_KIND: &str = "wireguard";

/// Handle to a kernel network interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Interface name
    pub name: String,
    /// Kernel-assigned interface index
    pub index: u32,
    /// Current MTU
    pub mtu: u32,
    /// Administrative state (IFF_UP)
    pub up: bool,
    /// Link kind from IFLA_INFO_KIND, if the driver reports one
    pub kind: Option<String>,
}

impl Link {
    /// Whether this link is a WireGuard interface
    pub fn is_wireguard(&self) -> bool {
        self.kind.as_deref() == Some(WIREGUARD_KIND)
    }
}

/// Parameters for creating a new link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpec {
    pub name: String,
    pub kind: String,
    /// MTU to create the link with; the kernel default is used when `None`
    pub mtu: Option<u32>,
}

impl LinkSpec {
    /// Spec for a WireGuard interface
    pub fn wireguard(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: WIREGUARD_KIND.to_string(),
            mtu: None,
        }
    }

    /// Set the MTU; zero leaves it to the kernel
    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = (mtu > 0).then_some(mtu);
        self
    }
}

/// An IPv4 address bound to a link
///
/// Identity is the address and prefix length only. Two entries that differ
/// only by label compare equal.
#[derive(Debug, Clone)]
pub struct AddressEntry {
    /// Address with its prefix length (host bits preserved)
    pub address: Ipv4Net,
    pub label: Option<String>,
}

impl AddressEntry {
    pub fn new(address: Ipv4Net) -> Self {
        Self {
            address,
            label: None,
        }
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }
}

impl PartialEq for AddressEntry {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for AddressEntry {}

impl Hash for AddressEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for AddressEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        if let Some(ref label) = self.label {
            write!(f, " label {}", label)?;
        }
        Ok(())
    }
}

/// An IPv4 route bound to a link
///
/// Equality covers every field, so a route that differs from a wanted one
/// only by priority is a different route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteEntry {
    /// Destination prefix (network address)
    pub destination: Ipv4Net,
    /// Output interface index
    pub link_index: u32,
    /// Routing table id (0 = unset)
    pub table: u32,
    /// Route protocol tag (0 = unset)
    pub protocol: u8,
    /// Route priority / metric
    pub priority: u32,
    /// Route type (0 = unset)
    pub kind: u8,
}

impl RouteEntry {
    /// Create a direct route to `destination` through the link at `link_index`
    pub fn new(destination: Ipv4Net, link_index: u32) -> Self {
        Self {
            destination: destination.trunc(),
            link_index,
            table: 0,
            protocol: 0,
            priority: 0,
            kind: 0,
        }
    }

    pub fn with_table(mut self, table: u32) -> Self {
        self.table = table;
        self
    }

    pub fn with_protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_kind(mut self, kind: u8) -> Self {
        self.kind = kind;
        self
    }

    /// Fill unset fields with the values the kernel reports back:
    /// main table, boot protocol and unicast type.
    pub fn with_defaults(mut self) -> Self {
        if self.table == 0 {
            self.table = RT_TABLE_MAIN;
        }
        if self.protocol == 0 {
            self.protocol = RTPROT_BOOT;
        }
        if self.kind == 0 {
            self.kind = RTN_UNICAST;
        }
        self
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} dev #{} table {} proto {} metric {}",
            self.destination, self.link_index, self.table, self.protocol, self.priority
        )?;
        if self.kind != RTN_UNICAST {
            write!(f, " type {}", self.kind)?;
        }
        Ok(())
    }
}
