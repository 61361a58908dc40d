//! Stub backends for non-Linux platforms.
//!
//! Every call returns `Err(Error::UnsupportedPlatform)`.

use crate::device::DeviceConfig;
use crate::error::{Error, Result};
use crate::store::{DeviceController, LinkStore};
use crate::types::{AddressEntry, Link, LinkSpec, RouteEntry};

/// Link store placeholder (stub for non-Linux)
#[derive(Debug, Default, Clone, Copy)]
pub struct RtNetlink;

impl RtNetlink {
    pub fn new() -> Self {
        Self
    }
}

impl LinkStore for RtNetlink {
    fn find_by_name(&self, _name: &str) -> Result<Link> {
        Err(Error::UnsupportedPlatform)
    }

    fn create(&self, _spec: &LinkSpec) -> Result<()> {
        Err(Error::UnsupportedPlatform)
    }

    fn set_up(&self, _link: &Link) -> Result<()> {
        Err(Error::UnsupportedPlatform)
    }

    fn delete(&self, _link: &Link) -> Result<()> {
        Err(Error::UnsupportedPlatform)
    }

    fn list_addresses(&self, _link: &Link) -> Result<Vec<AddressEntry>> {
        Err(Error::UnsupportedPlatform)
    }

    fn add_address(&self, _link: &Link, _address: &AddressEntry) -> Result<()> {
        Err(Error::UnsupportedPlatform)
    }

    fn delete_address(&self, _link: &Link, _address: &AddressEntry) -> Result<()> {
        Err(Error::UnsupportedPlatform)
    }

    fn list_routes(&self, _link: &Link) -> Result<Vec<RouteEntry>> {
        Err(Error::UnsupportedPlatform)
    }

    fn upsert_route(&self, _route: &RouteEntry) -> Result<()> {
        Err(Error::UnsupportedPlatform)
    }

    fn delete_route(&self, _route: &RouteEntry) -> Result<()> {
        Err(Error::UnsupportedPlatform)
    }
}

/// Device controller placeholder (stub for non-Linux)
#[derive(Debug, Default, Clone, Copy)]
pub struct WireguardNetlink;

impl WireguardNetlink {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceController for WireguardNetlink {
    fn push_configuration(&self, _link_name: &str, _config: &DeviceConfig) -> Result<()> {
        Err(Error::UnsupportedPlatform)
    }
}
