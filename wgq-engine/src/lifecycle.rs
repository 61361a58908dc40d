//! Interface activation and teardown

use wgq_netlink::{DeviceController, Link, LinkStore, RtNetlink, WireguardNetlink};

use crate::config::Config;
use crate::dns;
use crate::error::{Error, Result};
use crate::hook::{run_all, HookRunner, ShellHookRunner};
use crate::sync;

/// Longest interface name the kernel accepts
pub const MAX_IFACE_LEN: usize = 15;

/// Check that `name` is usable as an interface name: 1 to 15 characters
/// from `[A-Za-z0-9_=+.-]`, and not `.` or `..`.
pub fn validate_interface_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_IFACE_LEN
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_=+.-".contains(c));

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInterfaceName(name.to_string()))
    }
}

/// Brings interfaces up and down around the sync pipeline
pub struct WgQuick<S, D, H> {
    store: S,
    device: D,
    hooks: H,
}

impl WgQuick<RtNetlink, WireguardNetlink, ShellHookRunner> {
    /// Kernel-backed instance running hooks through the shell
    pub fn system() -> Self {
        Self::new(RtNetlink::new(), WireguardNetlink::new(), ShellHookRunner::new())
    }
}

impl<S, D, H> WgQuick<S, D, H>
where
    S: LinkStore,
    D: DeviceController,
    H: HookRunner,
{
    pub fn new(store: S, device: D, hooks: H) -> Self {
        Self {
            store,
            device,
            hooks,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Activate `name`. Fails if the interface already exists.
    pub fn up(&self, config: &Config, name: &str) -> Result<Link> {
        validate_interface_name(name)?;
        if self.lookup(name)?.is_some() {
            return Err(Error::LinkExists(name.to_string()));
        }

        dns::register(&self.hooks, &config.interface.dns, name)?;
        run_all(&self.hooks, &config.interface.pre_up, name)?;

        let link = sync::sync(&self.store, &self.device, config, name)?;

        run_all(&self.hooks, &config.interface.post_up, name)?;
        log::info!("Interface {} is up", name);
        Ok(link)
    }

    /// Tear down `name`. Fails if the interface does not exist.
    pub fn down(&self, config: &Config, name: &str) -> Result<()> {
        validate_interface_name(name)?;
        let link = self
            .lookup(name)?
            .ok_or_else(|| Error::LinkNotFound(name.to_string()))?;

        dns::deregister(&self.hooks, &config.interface.dns, name)?;
        run_all(&self.hooks, &config.interface.pre_down, name)?;

        self.store
            .delete(&link)
            .map_err(Error::netlink("cannot delete link"))?;
        log::info!("Deleted link {}", name);

        run_all(&self.hooks, &config.interface.post_down, name)?;
        Ok(())
    }

    /// Converge `name` without activation guards, hooks or DNS. Safe to
    /// repeat.
    pub fn sync(&self, config: &Config, name: &str) -> Result<Link> {
        validate_interface_name(name)?;
        sync::sync(&self.store, &self.device, config, name)
    }

    fn lookup(&self, name: &str) -> Result<Option<Link>> {
        match self.store.find_by_name(name) {
            Ok(link) => Ok(Some(link)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(Error::netlink("cannot read link")(e)),
        }
    }
}
