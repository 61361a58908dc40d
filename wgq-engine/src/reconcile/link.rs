use wgq_netlink::{Link, LinkSpec, LinkStore};

use crate::config::Config;
use crate::error::{Error, Result};

/// Make sure `name` exists as an administratively up WireGuard link.
///
/// A missing link is created with the configured MTU. Any lookup failure
/// other than a clean miss aborts without creating anything.
pub fn ensure_link<S: LinkStore>(store: &S, config: &Config, name: &str) -> Result<Link> {
    let link = match store.find_by_name(name) {
        Ok(link) => link,
        Err(e) if e.is_not_found() => {
            let spec = LinkSpec::wireguard(name).with_mtu(config.interface.mtu);
            store
                .create(&spec)
                .map_err(Error::netlink("cannot create link"))?;
            log::info!("Created link {} (mtu {:?})", name, spec.mtu);

            store
                .find_by_name(name)
                .map_err(Error::netlink("cannot read link"))?
        }
        Err(e) => return Err(Error::netlink("cannot read link")(e)),
    };

    if !link.is_wireguard() {
        return Err(Error::WrongKind {
            name: link.name,
            kind: link.kind.unwrap_or_else(|| "none".to_string()),
        });
    }

    store
        .set_up(&link)
        .map_err(Error::netlink("cannot set link up"))?;

    Ok(link)
}
