//! Route reconciliation
//!
//! Routes are derived from the IPv4 allowed-IPs of every peer. Pruning is
//! confined to routes carrying the configured table and protocol tag, so
//! routes installed on the same link by anything else are left alone.

use std::collections::BTreeMap;

use ipnet::Ipv4Net;
use wgq_netlink::{Link, LinkStore, RouteEntry, RT_TABLE_MAIN};

use crate::config::Config;
use crate::error::{Error, Result};

/// The (table, protocol) pair marking routes this tool manages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteScope {
    /// Configured table; 0 stands for the main table
    pub table: u32,
    /// Configured protocol tag, compared literally
    pub protocol: u8,
}

impl RouteScope {
    pub fn from_config(config: &Config) -> Self {
        Self {
            table: config.interface.table,
            protocol: config.interface.route_protocol,
        }
    }

    /// Whether `route` falls inside this scope and may be pruned
    pub fn owns(&self, route: &RouteEntry) -> bool {
        let table_matches =
            route.table == self.table || (self.table == 0 && route.table == RT_TABLE_MAIN);
        table_matches && route.protocol == self.protocol
    }
}

/// Concrete routes wanted on `link`, grouped by destination.
///
/// Prefixes shared by several peers yield a single entry.
pub fn wanted_routes(
    config: &Config,
    link: &Link,
    prefixes: &[Ipv4Net],
) -> BTreeMap<Ipv4Net, Vec<RouteEntry>> {
    let mut wanted: BTreeMap<Ipv4Net, Vec<RouteEntry>> = BTreeMap::new();

    for prefix in prefixes {
        let route = RouteEntry::new(*prefix, link.index)
            .with_table(config.interface.table)
            .with_protocol(config.interface.route_protocol)
            .with_priority(config.interface.route_metric)
            .with_defaults();

        let group = wanted.entry(route.destination).or_default();
        if !group.contains(&route) {
            group.push(route);
        }
    }

    wanted
}

/// Install every wanted route on `link` and delete in-scope routes that
/// are no longer wanted.
pub fn sync_routes<S: LinkStore>(
    store: &S,
    config: &Config,
    link: &Link,
    prefixes: &[Ipv4Net],
) -> Result<()> {
    let wanted = wanted_routes(config, link, prefixes);
    let present = store
        .list_routes(link)
        .map_err(Error::netlink("cannot read existing routes"))?;

    for route in wanted.values().flatten() {
        // an identical route needs no replace
        if present.contains(route) {
            log::debug!("Route {} already installed", route);
            continue;
        }
        store
            .upsert_route(route)
            .map_err(Error::netlink("cannot add/replace route"))?;
        log::info!("Installed route {}", route);
    }

    let scope = RouteScope::from_config(config);
    for route in &present {
        if !scope.owns(route) {
            log::debug!("Skipping foreign route {}", route);
            continue;
        }

        let is_wanted = wanted
            .get(&route.destination)
            .is_some_and(|group| group.contains(route));
        if is_wanted {
            continue;
        }

        store
            .delete_route(route)
            .map_err(Error::netlink("cannot delete route"))?;
        log::info!("Deleted stale route {}", route);
    }

    Ok(())
}
