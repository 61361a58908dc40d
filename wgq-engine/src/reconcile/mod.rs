//! Per-resource reconcilers
//!
//! Each reconciler reads the live state it is responsible for, compares it
//! with the configuration and applies only the difference.

mod address;
mod device;
mod link;
mod route;

pub use address::{plan_addresses, sync_addresses, AddressPlan};
pub use device::configure_device;
pub use link::ensure_link;
pub use route::{sync_routes, wanted_routes, RouteScope};
