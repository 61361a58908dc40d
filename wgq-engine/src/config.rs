//! Interface configuration
//!
//! The configuration file uses TOML format with one `[interface]` table and
//! any number of `[[peer]]` tables. It is read once per invocation and never
//! modified while a reconciliation runs.
//!
//! # Example Configuration
//!
//! ```toml
//! [interface]
//! private_key = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk="
//! listen_port = 51820
//! address = ["10.0.0.1/24"]
//! dns = ["10.0.0.53"]
//! table = 51820
//!
//! [[peer]]
//! public_key = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg="
//! endpoint = "192.0.2.1:51820"
//! allowed_ips = ["10.1.0.0/16"]
//! ```

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::Path;

use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};
use wgq_netlink::{DeviceConfig, Key, PeerConfig};

use crate::error::{Error, Result};

/// Longest label the kernel accepts (IFNAMSIZ without the NUL)
pub const MAX_LABEL_LEN: usize = 15;

/// Smallest MTU accepted for the tunnel interface
pub const MIN_MTU: u32 = 576;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub interface: InterfaceConfig,

    #[serde(default, rename = "peer")]
    pub peers: Vec<PeerSection>,
}

/// `[interface]` table: local keys, addressing, routing and hooks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    /// Base64 private key (required)
    pub private_key: String,

    pub listen_port: Option<u16>,

    pub fwmark: Option<u32>,

    /// IPv4 addresses to assign, with host bits (e.g. "10.0.0.1/24")
    pub address: Vec<Ipv4Net>,

    /// Label applied to newly added addresses; must start with the interface name
    pub address_label: Option<String>,

    /// DNS servers registered through resolvconf on `up`
    pub dns: Vec<IpAddr>,

    /// Interface MTU (0 = kernel default)
    pub mtu: u32,

    /// Routing table for peer routes (0 = main)
    pub table: u32,

    /// Route protocol tag marking routes this tool owns (0 = unset)
    pub route_protocol: u8,

    /// Priority of installed routes
    pub route_metric: u32,

    pub pre_up: Vec<String>,
    pub post_up: Vec<String>,
    pub pre_down: Vec<String>,
    pub post_down: Vec<String>,
}

/// `[[peer]]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerSection {
    /// Base64 public key (required)
    pub public_key: String,

    pub preshared_key: Option<String>,

    /// "host:port"; resolved when the device configuration is built
    pub endpoint: Option<String>,

    /// Crypto-routing prefixes; the IPv4 ones also become routes
    pub allowed_ips: Vec<IpNet>,

    /// Keepalive interval in seconds
    pub persistent_keepalive: Option<u16>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.interface.validate()?;

        let mut seen = HashSet::new();
        for (i, peer) in self.peers.iter().enumerate() {
            peer.validate().map_err(|e| match e {
                Error::Config(msg) => Error::Config(format!("peer {}: {}", i + 1, msg)),
                other => other,
            })?;

            if !seen.insert(peer.public_key.trim()) {
                return Err(Error::Config(format!(
                    "peer {}: duplicate public key {}",
                    i + 1,
                    peer.public_key
                )));
            }
        }

        Ok(())
    }

    /// Build the payload for the device controller. The peer set and each
    /// peer's allowed IPs replace whatever the device currently holds.
    pub fn device_config(&self) -> Result<DeviceConfig> {
        let peers = self
            .peers
            .iter()
            .map(PeerSection::peer_config)
            .collect::<Result<Vec<_>>>()?;

        Ok(DeviceConfig {
            private_key: Some(parse_key("private_key", &self.interface.private_key)?),
            listen_port: self.interface.listen_port,
            fwmark: self.interface.fwmark,
            replace_peers: true,
            peers,
        })
    }

    /// IPv4 allowed-IP prefixes of all peers, in peer order. These are the
    /// destinations the route reconciler manages.
    pub fn managed_prefixes(&self) -> Vec<Ipv4Net> {
        self.peers
            .iter()
            .flat_map(|peer| peer.allowed_ips.iter())
            .filter_map(|net| match net {
                IpNet::V4(v4) => Some(v4.trunc()),
                IpNet::V6(_) => None,
            })
            .collect()
    }

    /// Generate a sample configuration
    pub fn sample() -> String {
        r#"# wgq interface configuration

[interface]
# Base64 private key of this host (required)
private_key = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk="

# UDP port to listen on (optional, random if unset)
listen_port = 51820

# Firewall mark for outgoing packets (optional)
# fwmark = 51820

# IPv4 addresses assigned to the interface
address = ["10.0.0.1/24"]

# Label for added addresses; must start with the interface name (optional)
# address_label = "wg0:vpn"

# DNS servers registered with resolvconf while the interface is up
dns = ["10.0.0.53"]

# Interface MTU (0 = kernel default)
mtu = 1420

# Routing table for peer routes (0 = main)
table = 0

# Route protocol tag identifying routes managed by wgq.
# Routes on the interface with a different tag or table are never removed.
# 3 is what the kernel reports for routes installed without a tag (boot).
route_protocol = 3

# Priority of installed routes
route_metric = 0

# Shell commands run around activation; %i expands to the interface name
pre_up = []
post_up = []
pre_down = []
post_down = []

[[peer]]
# Base64 public key of the peer (required)
public_key = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg="

# Optional preshared key
# preshared_key = ""

# host:port of the peer (optional for peers that connect to us)
endpoint = "192.0.2.1:51820"

# Prefixes routed to this peer
allowed_ips = ["10.1.0.0/16"]

# Keepalive interval in seconds (optional)
persistent_keepalive = 25
"#
        .to_string()
    }
}

impl InterfaceConfig {
    fn validate(&self) -> Result<()> {
        if self.private_key.trim().is_empty() {
            return Err(Error::Config("private_key is required".into()));
        }
        parse_key("private_key", &self.private_key)?;

        if self.mtu != 0 && !(MIN_MTU..=u32::from(u16::MAX)).contains(&self.mtu) {
            return Err(Error::Config(format!(
                "MTU {} is out of range ({}..={})",
                self.mtu,
                MIN_MTU,
                u16::MAX
            )));
        }

        if let Some(ref label) = self.address_label {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(Error::Config(format!(
                    "address_label {:?} must be 1..={} bytes",
                    label, MAX_LABEL_LEN
                )));
            }
        }

        Ok(())
    }
}

impl PeerSection {
    fn validate(&self) -> Result<()> {
        if self.public_key.trim().is_empty() {
            return Err(Error::Config("public_key is required".into()));
        }
        parse_key("public_key", &self.public_key)?;

        if let Some(ref psk) = self.preshared_key {
            parse_key("preshared_key", psk)?;
        }

        if let Some(ref endpoint) = self.endpoint {
            let valid = endpoint
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
            if !valid {
                return Err(Error::Config(format!(
                    "endpoint {:?} must be host:port",
                    endpoint
                )));
            }
        }

        Ok(())
    }

    fn peer_config(&self) -> Result<PeerConfig> {
        let mut peer = PeerConfig::new(parse_key("public_key", &self.public_key)?);
        peer.preshared_key = self
            .preshared_key
            .as_deref()
            .map(|psk| parse_key("preshared_key", psk))
            .transpose()?;
        peer.endpoint = self.endpoint.as_deref().map(resolve_endpoint).transpose()?;
        peer.persistent_keepalive = self.persistent_keepalive;
        peer.allowed_ips = self.allowed_ips.iter().map(IpNet::trunc).collect();
        Ok(peer)
    }
}

fn parse_key(field: &str, value: &str) -> Result<Key> {
    Key::from_base64(value).map_err(|e| Error::Config(format!("{}: {}", field, e)))
}

fn resolve_endpoint(endpoint: &str) -> Result<SocketAddr> {
    endpoint
        .to_socket_addrs()
        .map_err(|e| Error::Config(format!("cannot resolve endpoint {}: {}", endpoint, e)))?
        .next()
        .ok_or_else(|| Error::Config(format!("endpoint {} resolved to no addresses", endpoint)))
}
