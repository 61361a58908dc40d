//! DNS registration through resolvconf

use std::net::IpAddr;

use crate::error::Result;
use crate::hook::HookRunner;

/// Command registering one nameserver for the interface
pub const REGISTER_COMMAND: &str = "resolvconf -a tun.%i -m 0 -x";

/// Command dropping every nameserver registered for the interface
pub const DEREGISTER_COMMAND: &str = "resolvconf -d tun.%i";

/// Register each server with one resolvconf call, fed `nameserver <ip>` on stdin
pub fn register<H: HookRunner>(runner: &H, servers: &[IpAddr], iface: &str) -> Result<()> {
    for server in servers {
        log::info!("Registering DNS server {} for {}", server, iface);
        runner.run(REGISTER_COMMAND, iface, Some(&format!("nameserver {}\n", server)))?;
    }
    Ok(())
}

/// Drop the interface's resolvconf entry.
///
/// Only runs when more than one server is configured; a single registered
/// server is left in place.
pub fn deregister<H: HookRunner>(runner: &H, servers: &[IpAddr], iface: &str) -> Result<()> {
    if servers.len() <= 1 {
        log::debug!("Skipping DNS deregistration for {}", iface);
        return Ok(());
    }
    log::info!("Deregistering DNS servers for {}", iface);
    runner.run(DEREGISTER_COMMAND, iface, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        runs: RefCell<Vec<(String, Option<String>)>>,
    }

    impl HookRunner for Recorder {
        fn run(&self, command: &str, iface: &str, stdin: Option<&str>) -> Result<()> {
            self.runs.borrow_mut().push((
                crate::hook::substitute(command, iface),
                stdin.map(str::to_string),
            ));
            Ok(())
        }
    }

    fn servers(list: &[&str]) -> Vec<IpAddr> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn test_register_one_call_per_server() {
        let recorder = Recorder::default();
        register(&recorder, &servers(&["10.0.0.53", "1.1.1.1"]), "wg0").unwrap();

        let runs = recorder.runs.borrow();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].0, "resolvconf -a tun.wg0 -m 0 -x");
        assert_eq!(runs[0].1.as_deref(), Some("nameserver 10.0.0.53\n"));
        assert_eq!(runs[1].1.as_deref(), Some("nameserver 1.1.1.1\n"));
    }

    #[test]
    fn test_deregister_needs_more_than_one_server() {
        let recorder = Recorder::default();
        deregister(&recorder, &servers(&[]), "wg0").unwrap();
        deregister(&recorder, &servers(&["10.0.0.53"]), "wg0").unwrap();
        assert!(recorder.runs.borrow().is_empty());

        deregister(&recorder, &servers(&["10.0.0.53", "1.1.1.1"]), "wg0").unwrap();
        assert_eq!(
            *recorder.runs.borrow(),
            [("resolvconf -d tun.wg0".to_string(), None)]
        );
    }
}
