use wgq_netlink::{DeviceController, Link};

use crate::config::Config;
use crate::error::{Error, Result};

/// Push keys and the full peer set onto the device behind `link`.
///
/// The controller replaces peers and their allowed IPs wholesale, so no
/// diff is computed here.
pub fn configure_device<D: DeviceController>(device: &D, config: &Config, link: &Link) -> Result<()> {
    let payload = config.device_config()?;
    device
        .push_configuration(&link.name, &payload)
        .map_err(Error::netlink("cannot push configuration"))?;

    log::info!(
        "Configured device {} with {} peer(s)",
        link.name,
        payload.peers.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgq_netlink::mock::MockDevice;

    const CONFIG: &str = r#"
[interface]
private_key = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk="
listen_port = 51820

[[peer]]
public_key = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg="
allowed_ips = ["10.1.0.0/16"]
"#;

    fn link() -> Link {
        Link {
            name: "wg0".into(),
            index: 2,
            mtu: 1420,
            up: true,
            kind: Some("wireguard".into()),
        }
    }

    #[test]
    fn test_pushes_by_link_name() {
        let config = Config::from_toml(CONFIG).unwrap();
        let device = MockDevice::new();

        configure_device(&device, &config, &link()).unwrap();

        let pushes = device.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, "wg0");
        assert_eq!(pushes[0].1, config.device_config().unwrap());
    }

    #[test]
    fn test_push_failure_is_fatal() {
        let config = Config::from_toml(CONFIG).unwrap();
        let device = MockDevice::new();
        device.fail_next(wgq_netlink::Error::FamilyNotFound("wireguard".into()));

        let err = configure_device(&device, &config, &link()).unwrap_err();
        assert!(err.to_string().starts_with("cannot push configuration"));
        assert!(device.pushes().is_empty());
    }
}
