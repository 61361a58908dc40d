//! wgq engine
//!
//! Converges a WireGuard interface to a declared configuration: link
//! existence and state, device keys and peers, IPv4 addresses and the IPv4
//! routes derived from peer allowed-IPs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  WgQuick (up / down / sync)                              │
//! │    - existence guards, DNS, pre/post hooks               │
//! │                      │                                   │
//! │                      ▼                                   │
//! │  sync: link ─▶ device ─▶ addresses ─▶ routes             │
//! └──────────────────────┬───────────────────────────────────┘
//!                        ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  wgq-netlink                                             │
//! │    - LinkStore (rtnetlink)                               │
//! │    - DeviceController (wireguard generic netlink)        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Route pruning only ever touches routes in the configured
//! (table, protocol) scope; see [`RouteScope`].

pub mod config;
pub mod dns;
pub mod error;
pub mod hook;
pub mod lifecycle;
pub mod reconcile;
pub mod sync;

pub use config::{Config, InterfaceConfig, PeerSection};
pub use error::{Error, Result, Stage};
pub use hook::{HookRunner, ShellHookRunner};
pub use lifecycle::{validate_interface_name, WgQuick};
pub use reconcile::{AddressPlan, RouteScope};
pub use sync::sync;
