//! Convergence tests for the sync pipeline and the up/down lifecycle
//!
//! Everything here runs against the in-memory link store and device from
//! `wgq_netlink::mock`; no privileges are needed.

use std::cell::RefCell;

use ipnet::Ipv4Net;
use wgq_engine::hook::substitute;
use wgq_engine::reconcile::sync_addresses;
use wgq_engine::{Config, Error, HookRunner, Result, Stage, WgQuick};
use wgq_netlink::mock::{Call, MockDevice, MockLinkStore, Op};
use wgq_netlink::{AddressEntry, LinkStore, RouteEntry, RTPROT_BOOT, RT_TABLE_MAIN, WIREGUARD_KIND};

const PRIVATE_KEY: &str = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=";
const PEER_A: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";
const PEER_B: &str = "TrMvSoP4jYQlY6RIzBgbssQqY3vxI2Pi+y71lOWWXX0=";
const RTPROT_STATIC: u8 = 4;

/// Records every hook invocation after `%i` substitution
#[derive(Default)]
struct RecordingHooks {
    runs: RefCell<Vec<String>>,
    stdin: RefCell<Vec<Option<String>>>,
    fail_on: Option<&'static str>,
}

impl RecordingHooks {
    fn failing_on(command: &'static str) -> Self {
        Self {
            fail_on: Some(command),
            ..Default::default()
        }
    }

    fn runs(&self) -> Vec<String> {
        self.runs.borrow().clone()
    }
}

impl HookRunner for RecordingHooks {
    fn run(&self, command: &str, iface: &str, stdin: Option<&str>) -> Result<()> {
        self.runs.borrow_mut().push(substitute(command, iface));
        self.stdin.borrow_mut().push(stdin.map(str::to_string));
        if self.fail_on == Some(command) {
            return Err(Error::Hook {
                command: command.to_string(),
                output: "hook failed\n".to_string(),
            });
        }
        Ok(())
    }
}

fn net(s: &str) -> Ipv4Net {
    s.parse().unwrap()
}

fn config(body: &str) -> Config {
    Config::from_toml(&format!(
        "[interface]\nprivate_key = \"{}\"\n{}",
        PRIVATE_KEY, body
    ))
    .unwrap()
}

fn full_config() -> Config {
    config(&format!(
        r#"
address = ["10.0.0.1/24"]
dns = ["10.0.0.53", "10.0.0.54"]
table = 51820
route_protocol = 3
pre_up = ["echo pre-up %i"]
post_up = ["echo post-up %i"]
pre_down = ["echo pre-down %i"]
post_down = ["echo post-down %i"]

[[peer]]
public_key = "{}"
allowed_ips = ["10.1.0.0/16", "10.3.0.0/16"]

[[peer]]
public_key = "{}"
allowed_ips = ["10.2.0.0/16", "10.3.0.0/16", "fd00::/64"]
"#,
        PEER_A, PEER_B
    ))
}

type Harness = WgQuick<MockLinkStore, MockDevice, RecordingHooks>;

fn harness() -> Harness {
    WgQuick::new(MockLinkStore::new(), MockDevice::new(), RecordingHooks::default())
}

// =====================
// idempotence
// =====================

#[test]
fn test_second_sync_makes_no_mutations() {
    let wg = harness();
    let config = full_config();

    wg.sync(&config, "wg0").unwrap();
    assert!(!wg.store().mutations().is_empty());

    wg.store().clear_calls();
    wg.sync(&config, "wg0").unwrap();
    assert!(wg.store().mutations().is_empty(), "{:?}", wg.store().mutations());
}

#[test]
fn test_sync_after_up_is_quiet() {
    let wg = harness();
    let config = full_config();

    wg.up(&config, "wg0").unwrap();
    wg.store().clear_calls();
    wg.sync(&config, "wg0").unwrap();
    assert!(wg.store().mutations().is_empty());
}

// =====================
// address convergence
// =====================

#[test]
fn test_address_convergence_for_all_subsets() {
    let universe = ["10.0.0.1/24", "10.0.0.2/24", "10.0.0.1/32", "192.168.7.1/24"];
    let subset = |mask: u32| -> Vec<&'static str> {
        universe
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, s)| *s)
            .collect()
    };

    for present_mask in 0..16u32 {
        for desired_mask in 0..16u32 {
            let store = MockLinkStore::new();
            let link = store.add_link("wg0", WIREGUARD_KIND);
            for addr in subset(present_mask) {
                store.insert_address(&link, AddressEntry::new(net(addr)));
            }

            let mut config = Config::default();
            config.interface.address = subset(desired_mask).into_iter().map(net).collect();
            sync_addresses(&store, &config, &link).unwrap();

            let mut live: Vec<Ipv4Net> =
                store.addresses(&link).iter().map(|a| a.address).collect();
            let mut wanted = config.interface.address.clone();
            live.sort();
            wanted.sort();
            assert_eq!(live, wanted, "present={present_mask:04b} desired={desired_mask:04b}");

            let adds = store
                .mutations()
                .iter()
                .filter(|c| matches!(c, Call::AddAddress(_)))
                .count();
            let deletes = store
                .mutations()
                .iter()
                .filter(|c| matches!(c, Call::DeleteAddress(_)))
                .count();
            assert_eq!(adds, (desired_mask & !present_mask).count_ones() as usize);
            assert_eq!(deletes, (present_mask & !desired_mask).count_ones() as usize);
        }
    }
}

#[test]
fn test_address_scenario_one_add() {
    let wg = harness();
    let link = wg.store().add_link("wg0", WIREGUARD_KIND);
    wg.store()
        .insert_address(&link, AddressEntry::new(net("10.0.0.1/24")));

    wg.sync(&config(r#"address = ["10.0.0.1/24", "10.0.0.2/24"]"#), "wg0")
        .unwrap();

    assert_eq!(
        wg.store().mutations(),
        vec![Call::AddAddress(AddressEntry::new(net("10.0.0.2/24")))]
    );
}

#[test]
fn test_duplicate_addresses_add_once() {
    let wg = harness();
    wg.sync(&config(r#"address = ["10.0.0.1/24", "10.0.0.1/24"]"#), "wg0")
        .unwrap();

    let adds: Vec<Call> = wg
        .store()
        .mutations()
        .into_iter()
        .filter(|c| matches!(c, Call::AddAddress(_)))
        .collect();
    assert_eq!(adds.len(), 1);
}

// =====================
// route ownership and convergence
// =====================

fn scoped(dest: &str, index: u32, table: u32, protocol: u8) -> RouteEntry {
    RouteEntry::new(net(dest), index)
        .with_table(table)
        .with_protocol(protocol)
        .with_defaults()
}

#[test]
fn test_route_scenario_replace_stale() {
    let wg = harness();
    let link = wg.store().add_link("wg0", WIREGUARD_KIND);
    let stale = scoped("10.1.0.0/16", link.index, 51820, RTPROT_BOOT);
    wg.store().insert_route(stale);

    let config = config(&format!(
        "table = 51820\nroute_protocol = 3\n[[peer]]\npublic_key = \"{}\"\nallowed_ips = [\"10.2.0.0/16\"]\n",
        PEER_A
    ));
    wg.sync(&config, "wg0").unwrap();

    assert_eq!(
        wg.store().mutations(),
        vec![
            Call::UpsertRoute(scoped("10.2.0.0/16", link.index, 51820, RTPROT_BOOT)),
            Call::DeleteRoute(stale),
        ]
    );
}

#[test]
fn test_foreign_default_route_survives() {
    let wg = harness();
    let link = wg.store().add_link("wg0", WIREGUARD_KIND);
    let default_route = scoped("0.0.0.0/0", link.index, RT_TABLE_MAIN, RTPROT_STATIC);
    wg.store().insert_route(default_route);

    // shrinking to nothing still leaves the foreign route alone
    for body in ["table = 51820\nroute_protocol = 3", "table = 0\nroute_protocol = 3"] {
        wg.sync(&config(body), "wg0").unwrap();
        assert!(wg.store().routes().contains(&default_route));
    }
    assert!(!wg
        .store()
        .mutations()
        .iter()
        .any(|c| matches!(c, Call::DeleteRoute(_))));
}

#[test]
fn test_routes_converge_within_scope() {
    let wg = harness();
    let link = wg.store().add_link("wg0", WIREGUARD_KIND);
    wg.store()
        .insert_route(scoped("10.9.0.0/16", link.index, 51820, RTPROT_BOOT));
    wg.store()
        .insert_route(scoped("10.1.0.0/16", link.index, 51820, RTPROT_BOOT));

    let config = full_config();
    wg.sync(&config, "wg0").unwrap();

    let scope = wgq_engine::RouteScope::from_config(&config);
    let mut live: Vec<Ipv4Net> = wg
        .store()
        .routes()
        .iter()
        .filter(|r| scope.owns(r))
        .map(|r| r.destination)
        .collect();
    live.sort();
    assert_eq!(
        live,
        vec![net("10.1.0.0/16"), net("10.2.0.0/16"), net("10.3.0.0/16")]
    );
}

#[test]
fn test_shared_prefix_upserted_once() {
    let wg = harness();
    wg.sync(&full_config(), "wg0").unwrap();

    let upserts: Vec<Ipv4Net> = wg
        .store()
        .mutations()
        .iter()
        .filter_map(|c| match c {
            Call::UpsertRoute(r) => Some(r.destination),
            _ => None,
        })
        .collect();
    assert_eq!(upserts.len(), 3);
    assert_eq!(
        upserts.iter().filter(|d| **d == net("10.3.0.0/16")).count(),
        1
    );
}

#[test]
fn test_routes_on_other_links_untouched() {
    let wg = harness();
    let other = wg.store().add_link("eth0", "veth");
    let route = scoped("10.1.0.0/16", other.index, 51820, RTPROT_BOOT);
    wg.store().insert_route(route);

    wg.sync(&config("table = 51820\nroute_protocol = 3"), "wg0")
        .unwrap();
    assert_eq!(wg.store().routes(), vec![route]);
}

// =====================
// partial failure
// =====================

#[test]
fn test_failure_keeps_earlier_stages_and_resync_converges() {
    let wg = harness();
    let config = full_config();
    wg.store()
        .fail_next(Op::UpsertRoute, wgq_netlink::Error::Netlink(1));

    let err = wg.sync(&config, "wg0").unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Routes));
    assert!(err.to_string().starts_with("cannot sync routes: cannot add/replace route"));

    let link = wg.store().link("wg0").unwrap();
    assert_eq!(wg.store().addresses(&link).len(), 1);
    assert_eq!(wg.device().pushes().len(), 1);

    wg.sync(&config, "wg0").unwrap();
    assert_eq!(wg.store().routes().len(), 3);
}

// =====================
// lifecycle
// =====================

#[test]
fn test_up_runs_everything_in_order() {
    let wg = harness();
    let link = wg.up(&full_config(), "wg0").unwrap();

    assert_eq!(link.name, "wg0");
    assert!(wg.store().link("wg0").unwrap().up);
    assert_eq!(
        wg.hooks().runs(),
        [
            "resolvconf -a tun.wg0 -m 0 -x",
            "resolvconf -a tun.wg0 -m 0 -x",
            "echo pre-up wg0",
            "echo post-up wg0",
        ]
    );
    assert_eq!(
        wg.hooks().stdin.borrow()[0].as_deref(),
        Some("nameserver 10.0.0.53\n")
    );

    let calls = wg.store().calls();
    assert!(matches!(calls[0], Call::CreateLink(_)));
    assert_eq!(wg.device().pushes()[0].1.peers.len(), 2);
}

#[test]
fn test_up_on_existing_link_fails_first() {
    let wg = harness();
    wg.store().add_link("wg0", WIREGUARD_KIND);

    let err = wg.up(&full_config(), "wg0").unwrap_err();
    assert!(matches!(err, Error::LinkExists(ref name) if name == "wg0"));
    assert!(wg.store().calls().is_empty());
    assert!(wg.device().pushes().is_empty());
    assert!(wg.hooks().runs().is_empty());
}

#[test]
fn test_up_pre_hook_failure_aborts() {
    let wg = WgQuick::new(
        MockLinkStore::new(),
        MockDevice::new(),
        RecordingHooks::failing_on("echo pre-up %i"),
    );

    let err = wg.up(&full_config(), "wg0").unwrap_err();
    assert!(err.to_string().contains("hook failed"));
    assert!(wg.store().link("wg0").is_none());
}

#[test]
fn test_down_deletes_link_between_hooks() {
    let wg = harness();
    let config = full_config();
    wg.up(&config, "wg0").unwrap();
    wg.hooks().runs.borrow_mut().clear();

    wg.down(&config, "wg0").unwrap();

    assert!(wg.store().link("wg0").is_none());
    assert!(wg.store().routes().is_empty());
    assert_eq!(
        wg.hooks().runs(),
        ["resolvconf -d tun.wg0", "echo pre-down wg0", "echo post-down wg0"]
    );
}

#[test]
fn test_down_single_dns_skips_deregistration() {
    let wg = harness();
    let config = config(r#"dns = ["10.0.0.53"]"#);
    wg.up(&config, "wg0").unwrap();
    wg.hooks().runs.borrow_mut().clear();

    wg.down(&config, "wg0").unwrap();
    assert!(wg.hooks().runs().is_empty());
}

#[test]
fn test_down_missing_link_fails() {
    let wg = harness();
    let err = wg.down(&full_config(), "wg0").unwrap_err();
    assert!(matches!(err, Error::LinkNotFound(_)));
    assert!(wg.hooks().runs().is_empty());
}

#[test]
fn test_down_post_hook_runs_after_delete() {
    let wg = WgQuick::new(
        MockLinkStore::new(),
        MockDevice::new(),
        RecordingHooks::failing_on("echo post-down %i"),
    );
    let config = full_config();
    wg.up(&config, "wg0").unwrap();

    assert!(wg.down(&config, "wg0").is_err());
    assert!(wg.store().link("wg0").is_none());
}

#[test]
fn test_invalid_interface_name() {
    let wg = harness();
    let err = wg.up(&full_config(), "wg 0").unwrap_err();
    assert!(matches!(err, Error::InvalidInterfaceName(_)));
    assert!(wg.store().calls().is_empty());
}

#[test]
fn test_store_lookup_error_on_up_is_fatal() {
    let wg = harness();
    wg.store()
        .fail_next(Op::FindByName, wgq_netlink::Error::Netlink(1));

    let err = wg.up(&full_config(), "wg0").unwrap_err();
    assert!(err.to_string().starts_with("cannot read link"));
    assert!(wg.hooks().runs().is_empty());
    assert!(wg.store().find_by_name("wg0").unwrap_err().is_not_found());
}
