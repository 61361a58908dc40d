//! Capability traits consumed by the reconciliation engine
//!
//! [`LinkStore`] covers interface, address and route state in the kernel's
//! routing subsystem. [`DeviceController`] pushes WireGuard key and peer
//! configuration onto an existing interface. Both are synchronous: every
//! call blocks until the kernel has answered.
//!
//! The Linux implementations live in [`crate::RtNetlink`] and
//! [`crate::WireguardNetlink`]; [`crate::mock`] provides in-memory versions
//! for tests.

use crate::device::DeviceConfig;
use crate::error::Result;
use crate::types::{AddressEntry, Link, LinkSpec, RouteEntry};

/// Read and mutate link, address and route state
pub trait LinkStore {
    /// Look up a link by name. A missing link is reported as an error for
    /// which [`crate::Error::is_not_found`] is true.
    fn find_by_name(&self, name: &str) -> Result<Link>;

    /// Create a new link. Fails if a link with the same name exists.
    fn create(&self, spec: &LinkSpec) -> Result<()>;

    /// Set the link administratively up. Idempotent.
    fn set_up(&self, link: &Link) -> Result<()>;

    /// Delete the link together with its addresses and routes
    fn delete(&self, link: &Link) -> Result<()>;

    /// All IPv4 addresses currently bound to the link
    fn list_addresses(&self, link: &Link) -> Result<Vec<AddressEntry>>;

    /// Bind an address. Reports an "already exists" error if present.
    fn add_address(&self, link: &Link, address: &AddressEntry) -> Result<()>;

    fn delete_address(&self, link: &Link, address: &AddressEntry) -> Result<()>;

    /// All IPv4 routes whose output interface is the link, from every table
    fn list_routes(&self, link: &Link) -> Result<Vec<RouteEntry>>;

    /// Create the route, or replace the one with the same destination,
    /// table and priority
    fn upsert_route(&self, route: &RouteEntry) -> Result<()>;

    fn delete_route(&self, route: &RouteEntry) -> Result<()>;
}

/// Push WireGuard configuration to a device
pub trait DeviceController {
    /// Apply `config` to the device named `link_name`
    fn push_configuration(&self, link_name: &str, config: &DeviceConfig) -> Result<()>;
}

impl<T: LinkStore + ?Sized> LinkStore for &T {
    fn find_by_name(&self, name: &str) -> Result<Link> {
        (**self).find_by_name(name)
    }

    fn create(&self, spec: &LinkSpec) -> Result<()> {
        (**self).create(spec)
    }

    fn set_up(&self, link: &Link) -> Result<()> {
        (**self).set_up(link)
    }

    fn delete(&self, link: &Link) -> Result<()> {
        (**self).delete(link)
    }

    fn list_addresses(&self, link: &Link) -> Result<Vec<AddressEntry>> {
        (**self).list_addresses(link)
    }

    fn add_address(&self, link: &Link, address: &AddressEntry) -> Result<()> {
        (**self).add_address(link, address)
    }

    fn delete_address(&self, link: &Link, address: &AddressEntry) -> Result<()> {
        (**self).delete_address(link, address)
    }

    fn list_routes(&self, link: &Link) -> Result<Vec<RouteEntry>> {
        (**self).list_routes(link)
    }

    fn upsert_route(&self, route: &RouteEntry) -> Result<()> {
        (**self).upsert_route(route)
    }

    fn delete_route(&self, route: &RouteEntry) -> Result<()> {
        (**self).delete_route(route)
    }
}

impl<T: DeviceController + ?Sized> DeviceController for &T {
    fn push_configuration(&self, link_name: &str, config: &DeviceConfig) -> Result<()> {
        (**self).push_configuration(link_name, config)
    }
}
