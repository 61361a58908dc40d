//! Kernel-facing capabilities for WireGuard interface management
//!
//! This crate exposes the two capabilities the reconciliation engine
//! consumes, plus their Linux implementations:
//!
//! - [`LinkStore`]: links, IPv4 addresses and IPv4 routes, implemented over
//!   rtnetlink by [`RtNetlink`]
//! - [`DeviceController`]: WireGuard keys and peers, implemented over the
//!   `wireguard` generic netlink family by [`WireguardNetlink`]
//!
//! Both speak netlink directly through raw sockets; no external tools are
//! executed. On non-Linux platforms the backends exist but every call
//! returns `Err(Error::UnsupportedPlatform)`.
//!
//! The [`mock`] module provides in-memory implementations of both traits
//! for tests.
//!
//! # Platform Requirements
//!
//! - Root privileges or `CAP_NET_ADMIN`
//! - The `wireguard` kernel module (built in since Linux 5.6)

pub mod device;
pub mod error;
pub mod mock;
pub mod store;
pub mod types;

#[cfg(target_os = "linux")]
mod netlink;
#[cfg(target_os = "linux")]
mod rtnl;
#[cfg(target_os = "linux")]
mod wireguard;

#[cfg(target_os = "linux")]
pub use rtnl::RtNetlink;
#[cfg(target_os = "linux")]
pub use wireguard::WireguardNetlink;

// Stub implementations for non-Linux platforms
#[cfg(not(target_os = "linux"))]
mod stub;
#[cfg(not(target_os = "linux"))]
pub use stub::{RtNetlink, WireguardNetlink};

pub use device::{DeviceConfig, Key, PeerConfig, KEY_LEN};
pub use error::{Error, Result};
pub use store::{DeviceController, LinkStore};
pub use types::{
    AddressEntry, Link, LinkSpec, RouteEntry, RTN_UNICAST, RTPROT_BOOT, RT_TABLE_MAIN,
    WIREGUARD_KIND,
};
