//! In-memory link store and device controller for testing
//!
//! [`MockLinkStore`] simulates the parts of kernel state the engine touches:
//! links, IPv4 addresses per link and IPv4 routes across routing tables. It
//! applies the same replace and error semantics as rtnetlink (EEXIST on
//! duplicate address, replace keyed by destination/table/priority, ESRCH on
//! deleting a missing route or one whose scope the request does not match)
//! and records every successful mutation so tests
//! can assert on exactly which calls were made.
//!
//! # Example
//!
//! ```
//! use wgq_netlink::mock::{Call, MockLinkStore};
//! use wgq_netlink::{LinkSpec, LinkStore};
//!
//! let store = MockLinkStore::new();
//! store.create(&LinkSpec::wireguard("wg0")).unwrap();
//! let link = store.find_by_name("wg0").unwrap();
//! store.set_up(&link).unwrap();
//!
//! assert_eq!(store.calls().len(), 2);
//! assert!(matches!(store.calls()[0], Call::CreateLink(_)));
//! ```

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::device::DeviceConfig;
use crate::error::{Error, Result};
use crate::store::{DeviceController, LinkStore};
use crate::types::{
    scope_matches, AddressEntry, Link, LinkSpec, RouteEntry, ROUTE_DELETE_SCOPE,
    ROUTE_INSTALL_SCOPE, RT_SCOPE_UNIVERSE,
};

/// MTU given to links created without one
pub const DEFAULT_MTU: u32 = 1420;

/// A successful state-changing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateLink(LinkSpec),
    SetUp(String),
    DeleteLink(String),
    AddAddress(AddressEntry),
    DeleteAddress(AddressEntry),
    UpsertRoute(RouteEntry),
    DeleteRoute(RouteEntry),
}

impl Call {
    /// Whether the call adds, deletes or replaces something. Setting a link
    /// up is excluded since it is issued on every run.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::SetUp(_))
    }
}

/// Operation selector for fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    FindByName,
    Create,
    SetUp,
    Delete,
    ListAddresses,
    AddAddress,
    DeleteAddress,
    ListRoutes,
    UpsertRoute,
    DeleteRoute,
}

#[derive(Debug)]
struct State {
    links: BTreeMap<String, Link>,
    next_index: u32,
    addresses: BTreeMap<u32, Vec<AddressEntry>>,
    /// Installed routes with their scope
    routes: Vec<(RouteEntry, u8)>,
    calls: Vec<Call>,
    failures: Vec<(Op, Error)>,
}

impl State {
    fn link_by_index(&mut self, index: u32) -> Result<&mut Link> {
        self.links
            .values_mut()
            .find(|link| link.index == index)
            .ok_or(Error::Netlink(libc::ENODEV))
    }

    fn take_failure(&mut self, op: Op) -> Result<()> {
        match self.failures.iter().position(|(o, _)| *o == op) {
            Some(pos) => Err(self.failures.remove(pos).1),
            None => Ok(()),
        }
    }
}

/// Simulated kernel routing state
#[derive(Debug)]
pub struct MockLinkStore {
    state: Mutex<State>,
}

impl Default for MockLinkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLinkStore {
    /// Create an empty store. Indexes start at 2 (1 is loopback).
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                links: BTreeMap::new(),
                next_index: 2,
                addresses: BTreeMap::new(),
                routes: Vec::new(),
                calls: Vec::new(),
                failures: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a link directly, without recording a call
    pub fn add_link(&self, name: &str, kind: &str) -> Link {
        let mut state = self.state();
        let link = Link {
            name: name.to_string(),
            index: state.next_index,
            mtu: DEFAULT_MTU,
            up: false,
            kind: Some(kind.to_string()),
        };
        state.next_index += 1;
        state.links.insert(name.to_string(), link.clone());
        link
    }

    pub fn link(&self, name: &str) -> Option<Link> {
        self.state().links.get(name).cloned()
    }

    /// Bind an address directly, without recording a call
    pub fn insert_address(&self, link: &Link, entry: AddressEntry) {
        self.state()
            .addresses
            .entry(link.index)
            .or_default()
            .push(entry);
    }

    /// Install a universe-scope route directly, without recording a call
    pub fn insert_route(&self, route: RouteEntry) {
        self.state().routes.push((route, RT_SCOPE_UNIVERSE));
    }

    pub fn addresses(&self, link: &Link) -> Vec<AddressEntry> {
        self.state()
            .addresses
            .get(&link.index)
            .cloned()
            .unwrap_or_default()
    }

    /// Every route in every table
    pub fn routes(&self) -> Vec<RouteEntry> {
        self.state().routes.iter().map(|(route, _)| *route).collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Recorded calls that add, delete or replace state
    pub fn mutations(&self) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Make the next call of `op` fail with `err`
    pub fn fail_next(&self, op: Op, err: Error) {
        self.state().failures.push((op, err));
    }
}

impl LinkStore for MockLinkStore {
    fn find_by_name(&self, name: &str) -> Result<Link> {
        let mut state = self.state();
        state.take_failure(Op::FindByName)?;
        state
            .links
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    fn create(&self, spec: &LinkSpec) -> Result<()> {
        let mut state = self.state();
        state.take_failure(Op::Create)?;
        if state.links.contains_key(&spec.name) {
            return Err(Error::AlreadyExists(spec.name.clone()));
        }

        let link = Link {
            name: spec.name.clone(),
            index: state.next_index,
            mtu: spec.mtu.unwrap_or(DEFAULT_MTU),
            up: false,
            kind: Some(spec.kind.clone()),
        };
        state.next_index += 1;
        state.links.insert(spec.name.clone(), link);
        state.calls.push(Call::CreateLink(spec.clone()));
        Ok(())
    }

    fn set_up(&self, link: &Link) -> Result<()> {
        let mut state = self.state();
        state.take_failure(Op::SetUp)?;
        let live = state.link_by_index(link.index)?;
        live.up = true;
        let name = live.name.clone();
        state.calls.push(Call::SetUp(name));
        Ok(())
    }

    fn delete(&self, link: &Link) -> Result<()> {
        let mut state = self.state();
        state.take_failure(Op::Delete)?;
        let name = state.link_by_index(link.index)?.name.clone();

        state.links.remove(&name);
        state.addresses.remove(&link.index);
        state.routes.retain(|(route, _)| route.link_index != link.index);
        state.calls.push(Call::DeleteLink(name));
        Ok(())
    }

    fn list_addresses(&self, link: &Link) -> Result<Vec<AddressEntry>> {
        let mut state = self.state();
        state.take_failure(Op::ListAddresses)?;
        state.link_by_index(link.index)?;
        Ok(state
            .addresses
            .get(&link.index)
            .cloned()
            .unwrap_or_default())
    }

    fn add_address(&self, link: &Link, address: &AddressEntry) -> Result<()> {
        let mut state = self.state();
        state.take_failure(Op::AddAddress)?;
        state.link_by_index(link.index)?;

        let bound = state.addresses.entry(link.index).or_default();
        if bound.contains(address) {
            return Err(Error::Netlink(libc::EEXIST));
        }
        bound.push(address.clone());
        state.calls.push(Call::AddAddress(address.clone()));
        Ok(())
    }

    fn delete_address(&self, link: &Link, address: &AddressEntry) -> Result<()> {
        let mut state = self.state();
        state.take_failure(Op::DeleteAddress)?;

        let bound = state.addresses.entry(link.index).or_default();
        let Some(pos) = bound.iter().position(|a| a == address) else {
            return Err(Error::Netlink(libc::EADDRNOTAVAIL));
        };
        bound.remove(pos);
        state.calls.push(Call::DeleteAddress(address.clone()));
        Ok(())
    }

    fn list_routes(&self, link: &Link) -> Result<Vec<RouteEntry>> {
        let mut state = self.state();
        state.take_failure(Op::ListRoutes)?;
        state.link_by_index(link.index)?;
        Ok(state
            .routes
            .iter()
            .map(|(route, _)| *route)
            .filter(|route| route.link_index == link.index)
            .collect())
    }

    fn upsert_route(&self, route: &RouteEntry) -> Result<()> {
        let mut state = self.state();
        state.take_failure(Op::UpsertRoute)?;
        state.link_by_index(route.link_index)?;

        state.routes.retain(|(r, _)| {
            !(r.destination == route.destination
                && r.table == route.table
                && r.priority == route.priority)
        });
        state.routes.push((*route, ROUTE_INSTALL_SCOPE));
        state.calls.push(Call::UpsertRoute(*route));
        Ok(())
    }

    fn delete_route(&self, route: &RouteEntry) -> Result<()> {
        let mut state = self.state();
        state.take_failure(Op::DeleteRoute)?;

        let Some(pos) = state.routes.iter().position(|(r, scope)| {
            r == route && scope_matches(ROUTE_DELETE_SCOPE, *scope)
        }) else {
            return Err(Error::Netlink(libc::ESRCH));
        };
        state.routes.remove(pos);
        state.calls.push(Call::DeleteRoute(*route));
        Ok(())
    }
}

/// Device controller that records every pushed configuration
#[derive(Debug, Default)]
pub struct MockDevice {
    pushes: Mutex<Vec<(String, DeviceConfig)>>,
    failure: Mutex<Option<Error>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configurations pushed so far, keyed by link name
    pub fn pushes(&self) -> Vec<(String, DeviceConfig)> {
        self.pushes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make the next push fail with `err`
    pub fn fail_next(&self, err: Error) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
    }
}

impl DeviceController for MockDevice {
    fn push_configuration(&self, link_name: &str, config: &DeviceConfig) -> Result<()> {
        if let Some(err) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(err);
        }

        self.pushes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((link_name.to_string(), config.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WIREGUARD_KIND;

    #[test]
    fn test_create_assigns_index_and_records() {
        let store = MockLinkStore::new();
        store.create(&LinkSpec::wireguard("wg0").with_mtu(1380)).unwrap();

        let link = store.find_by_name("wg0").unwrap();
        assert_eq!(link.index, 2);
        assert_eq!(link.mtu, 1380);
        assert!(!link.up);
        assert_eq!(link.kind.as_deref(), Some(WIREGUARD_KIND));

        let err = store.create(&LinkSpec::wireguard("wg0")).unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(store.calls().len(), 1);
    }

    #[test]
    fn test_missing_link_is_not_found() {
        let store = MockLinkStore::new();
        assert!(store.find_by_name("wg9").unwrap_err().is_not_found());
    }

    #[test]
    fn test_duplicate_address_is_eexist() {
        let store = MockLinkStore::new();
        let link = store.add_link("wg0", WIREGUARD_KIND);
        let entry = AddressEntry::new("10.0.0.1/24".parse().unwrap());

        store.add_address(&link, &entry).unwrap();
        let err = store.add_address(&link, &entry).unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(store.addresses(&link).len(), 1);
    }

    #[test]
    fn test_upsert_replaces_same_key() {
        let store = MockLinkStore::new();
        let link = store.add_link("wg0", WIREGUARD_KIND);
        let route = RouteEntry::new("10.1.0.0/16".parse().unwrap(), link.index).with_defaults();

        store.upsert_route(&route).unwrap();
        store.upsert_route(&route.with_protocol(4)).unwrap();
        assert_eq!(store.routes(), vec![route.with_protocol(4)]);

        // a different priority is a different route
        store.upsert_route(&route.with_priority(5)).unwrap();
        assert_eq!(store.routes().len(), 2);
    }

    #[test]
    fn test_delete_route_matches_any_scope() {
        let store = MockLinkStore::new();
        let link = store.add_link("wg0", WIREGUARD_KIND);
        let installed = RouteEntry::new("10.1.0.0/16".parse().unwrap(), link.index)
            .with_table(51820)
            .with_defaults();
        let foreign = RouteEntry::new("10.2.0.0/16".parse().unwrap(), link.index).with_defaults();

        store.upsert_route(&installed).unwrap();
        store.insert_route(foreign);

        store.delete_route(&installed).unwrap();
        store.delete_route(&foreign).unwrap();
        assert!(store.routes().is_empty());

        let err = store.delete_route(&installed).unwrap_err();
        assert!(matches!(err, Error::Netlink(e) if e == libc::ESRCH));
        assert_eq!(
            store.mutations(),
            vec![
                Call::UpsertRoute(installed),
                Call::DeleteRoute(installed),
                Call::DeleteRoute(foreign),
            ]
        );
    }

    #[test]
    fn test_delete_link_drops_addresses_and_routes() {
        let store = MockLinkStore::new();
        let link = store.add_link("wg0", WIREGUARD_KIND);
        store.insert_address(&link, AddressEntry::new("10.0.0.1/24".parse().unwrap()));
        store.insert_route(RouteEntry::new("10.1.0.0/16".parse().unwrap(), link.index));
        store.insert_route(RouteEntry::new("0.0.0.0/0".parse().unwrap(), 99));

        store.delete(&link).unwrap();
        assert!(store.link("wg0").is_none());
        assert!(store.addresses(&link).is_empty());
        assert_eq!(store.routes().len(), 1);
    }

    #[test]
    fn test_fail_next_fires_once() {
        let store = MockLinkStore::new();
        store.fail_next(Op::FindByName, Error::Netlink(libc::EPERM));

        assert!(matches!(
            store.find_by_name("wg0"),
            Err(Error::Netlink(e)) if e == libc::EPERM
        ));
        assert!(store.find_by_name("wg0").unwrap_err().is_not_found());
    }

    #[test]
    fn test_set_up_is_not_a_mutation() {
        let store = MockLinkStore::new();
        let link = store.add_link("wg0", WIREGUARD_KIND);
        store.set_up(&link).unwrap();
        assert_eq!(store.calls().len(), 1);
        assert!(store.mutations().is_empty());
        assert!(store.link("wg0").unwrap().up);
    }

    #[test]
    fn test_mock_device_records_and_fails() {
        let device = MockDevice::new();
        device.fail_next(Error::Netlink(libc::EINVAL));
        assert!(device.push_configuration("wg0", &DeviceConfig::default()).is_err());

        device
            .push_configuration("wg0", &DeviceConfig::default())
            .unwrap();
        assert_eq!(device.pushes().len(), 1);
        assert_eq!(device.pushes()[0].0, "wg0");
    }
}
