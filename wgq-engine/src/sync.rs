//! Sync pipeline
//!
//! Runs the link, device, address and route reconcilers in that order.
//! The first failing stage stops the run and is reported with its stage
//! prefix. Earlier stages are not rolled back; running the pipeline again
//! once the cause is fixed converges the rest.

use wgq_netlink::{DeviceController, Link, LinkStore};

use crate::config::Config;
use crate::error::{Result, Stage};
use crate::reconcile::{configure_device, ensure_link, sync_addresses, sync_routes};

/// Converge interface `name` to `config`, returning the live link
pub fn sync<S, D>(store: &S, device: &D, config: &Config, name: &str) -> Result<Link>
where
    S: LinkStore,
    D: DeviceController,
{
    log::info!("Syncing interface {}", name);

    let link = ensure_link(store, config, name).map_err(|e| e.in_stage(Stage::Link))?;

    configure_device(device, config, &link).map_err(|e| e.in_stage(Stage::Device))?;

    sync_addresses(store, config, &link).map_err(|e| e.in_stage(Stage::Addresses))?;

    let prefixes = config.managed_prefixes();
    sync_routes(store, config, &link, &prefixes).map_err(|e| e.in_stage(Stage::Routes))?;

    log::info!("Interface {} in sync", name);
    Ok(link)
}
