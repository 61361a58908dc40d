use std::collections::HashSet;

use wgq_netlink::{AddressEntry, Link, LinkStore};

use crate::config::Config;
use crate::error::{Error, Result};

/// Address changes needed to converge a link
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AddressPlan {
    /// Desired but not present, in configuration order
    pub to_add: Vec<AddressEntry>,
    /// Present but not desired, in the order the kernel listed them
    pub to_delete: Vec<AddressEntry>,
}

impl AddressPlan {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_delete.is_empty()
    }
}

/// Set difference of desired and present addresses. Labels play no part
/// in the comparison and duplicate desired entries count once.
pub fn plan_addresses(present: &[AddressEntry], desired: &[AddressEntry]) -> AddressPlan {
    let present_set: HashSet<&AddressEntry> = present.iter().collect();
    let desired_set: HashSet<&AddressEntry> = desired.iter().collect();

    let mut queued = HashSet::new();
    let to_add = desired
        .iter()
        .filter(|entry| !present_set.contains(entry) && queued.insert(*entry))
        .cloned()
        .collect();

    let to_delete = present
        .iter()
        .filter(|entry| !desired_set.contains(entry))
        .cloned()
        .collect();

    AddressPlan { to_add, to_delete }
}

/// Converge the IPv4 addresses on `link` to the configured set
pub fn sync_addresses<S: LinkStore>(store: &S, config: &Config, link: &Link) -> Result<()> {
    let label = config.interface.address_label.clone();
    if let Some(ref label) = label {
        // the kernel rejects labels that do not extend the interface name
        if !label.starts_with(&link.name) {
            return Err(Error::Config(format!(
                "address_label {:?} must start with {:?}",
                label, link.name
            )));
        }
    }

    let desired: Vec<AddressEntry> = config
        .interface
        .address
        .iter()
        .map(|net| AddressEntry::new(*net).with_label(label.clone()))
        .collect();

    let present = store
        .list_addresses(link)
        .map_err(Error::netlink("cannot read link address"))?;

    let plan = plan_addresses(&present, &desired);
    if plan.is_empty() {
        log::debug!("Addresses on {} already in sync", link.name);
        return Ok(());
    }

    for entry in &plan.to_add {
        match store.add_address(link, entry) {
            Ok(()) => log::info!("Added address {} to {}", entry, link.name),
            Err(e) if e.is_already_exists() => {
                log::debug!("Address {} already on {}", entry, link.name);
            }
            Err(e) => return Err(Error::netlink("cannot add address")(e)),
        }
    }

    for entry in &plan.to_delete {
        store
            .delete_address(link, entry)
            .map_err(Error::netlink("cannot delete address"))?;
        log::info!("Deleted address {} from {}", entry, link.name);
    }

    Ok(())
}
