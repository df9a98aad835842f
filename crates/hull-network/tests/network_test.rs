//! Integration tests for the network registry, driven through fake
//! drivers and wiring so no privileges are needed.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use hull_common::error::{HullError, Result};
use hull_network::{
    ContainerLink, Endpoint, EndpointWiring, Ipam, Network, NetworkDriver, NetworkManager,
};
use ipnetwork::Ipv4Network;

type Log = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct FakeDriver {
    log: Log,
    fail_create: bool,
}

impl NetworkDriver for FakeDriver {
    fn name(&self) -> &'static str {
        "bridge"
    }

    fn create(&self, name: &str, gateway: Ipv4Network) -> Result<Network> {
        self.log.lock().unwrap().push(format!("create {name} {gateway}"));
        if self.fail_create {
            return Err(HullError::Netlink {
                message: "boom".into(),
            });
        }
        Ok(Network {
            name: name.into(),
            ip_range: gateway,
            driver: "bridge".into(),
        })
    }

    fn delete(&self, network: &Network) -> Result<()> {
        self.log.lock().unwrap().push(format!("delete {}", network.name));
        Ok(())
    }

    fn connect(&self, network: &Network, endpoint: &Endpoint<'_>) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("connect {} {}", network.name, endpoint.device.name));
        Ok(())
    }

    fn disconnect(&self, network: &Network, endpoint: &Endpoint<'_>) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("disconnect {} {}", network.name, endpoint.device.name));
        Ok(())
    }
}

#[derive(Default)]
struct FakeWiring {
    log: Log,
    fail_attach: bool,
}

impl EndpointWiring for FakeWiring {
    fn attach(&self, endpoint: &Endpoint<'_>, pid: u32) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("attach {} {} {pid}", endpoint.device.peer, endpoint.cidr()));
        if self.fail_attach {
            return Err(HullError::Netlink {
                message: "no such process".into(),
            });
        }
        Ok(())
    }

    fn publish_ports(&self, endpoint: &Endpoint<'_>) -> Result<()> {
        for m in &endpoint.port_mapping {
            self.log.lock().unwrap().push(format!("publish {m}"));
        }
        Ok(())
    }

    fn unpublish_ports(&self, endpoint: &Endpoint<'_>) -> Result<()> {
        for m in &endpoint.port_mapping {
            self.log.lock().unwrap().push(format!("unpublish {m}"));
        }
        Ok(())
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    manager: NetworkManager,
    ipam: Ipam,
    log: Log,
}

fn fixture(fail_create: bool, fail_attach: bool) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let log = Log::default();
    let ipam = Ipam::new(dir.path().join("ipam/subnet.json"));
    let manager = NetworkManager::with_parts(
        dir.path().join("network"),
        ipam.clone(),
        vec![Box::new(FakeDriver {
            log: Arc::clone(&log),
            fail_create,
        })],
        Box::new(FakeWiring {
            log: Arc::clone(&log),
            fail_attach,
        }),
    )
    .unwrap();
    Fixture {
        dir,
        manager,
        ipam,
        log,
    }
}

fn subnet() -> Ipv4Network {
    "192.168.1.0/24".parse().unwrap()
}

fn link<'a>(id: &'a str, ports: &'a [String]) -> ContainerLink<'a> {
    ContainerLink {
        id,
        pid: 4242,
        port_mapping: ports,
    }
}

// ── Create / delete ──────────────────────────────────────────────────

#[test]
fn create_takes_first_address_as_gateway() {
    let mut fx = fixture(false, false);
    let net = fx.manager.create_network("bridge", subnet(), "br0").unwrap();
    assert_eq!(net.ip_range.to_string(), "192.168.1.1/24");

    let descriptor = fx.dir.path().join("network/br0");
    let json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(descriptor).unwrap()).unwrap();
    assert_eq!(json["ipRange"], "192.168.1.1/24");
    assert_eq!(json["driver"], "bridge");

    let bitmap = fx.ipam.bitmap(&subnet()).unwrap().unwrap();
    assert!(bitmap.starts_with("10"));
}

#[test]
fn duplicate_and_unknown_driver_are_rejected() {
    let mut fx = fixture(false, false);
    let _ = fx.manager.create_network("bridge", subnet(), "br0").unwrap();
    let dup = fx
        .manager
        .create_network("bridge", subnet(), "br0")
        .unwrap_err();
    assert!(matches!(dup, HullError::InvalidState { .. }));

    let unknown = fx
        .manager
        .create_network("macvlan", subnet(), "mv0")
        .unwrap_err();
    assert!(matches!(unknown, HullError::NotFound { .. }));
    assert_eq!(fx.manager.networks().count(), 1);
}

#[test]
fn failed_driver_create_releases_gateway() {
    let mut fx = fixture(true, false);
    assert!(fx.manager.create_network("bridge", subnet(), "br0").is_err());
    let bitmap = fx.ipam.bitmap(&subnet()).unwrap().unwrap();
    assert!(bitmap.chars().all(|c| c == '0'));
    assert!(fx.manager.network("br0").is_err());
}

#[test]
fn delete_releases_gateway_and_forgets_network() {
    let mut fx = fixture(false, false);
    let _ = fx.manager.create_network("bridge", subnet(), "br0").unwrap();
    fx.manager.delete_network("br0").unwrap();

    assert_eq!(fx.manager.networks().count(), 0);
    assert!(!fx.dir.path().join("network/br0").exists());
    let bitmap = fx.ipam.bitmap(&subnet()).unwrap().unwrap();
    assert!(bitmap.chars().all(|c| c == '0'));
    assert!(fx.log.lock().unwrap().contains(&"delete br0".to_owned()));

    let err = fx.manager.delete_network("br0").unwrap_err();
    assert!(matches!(err, HullError::NotFound { .. }));
}

#[test]
fn registry_survives_reload() {
    let mut fx = fixture(false, false);
    let _ = fx.manager.create_network("bridge", subnet(), "br0").unwrap();
    let reloaded = NetworkManager::with_parts(
        fx.dir.path().join("network"),
        fx.ipam.clone(),
        vec![Box::new(FakeDriver::default())],
        Box::new(FakeWiring::default()),
    )
    .unwrap();
    let names: Vec<_> = reloaded.networks().map(|n| n.name.clone()).collect();
    assert_eq!(names, vec!["br0"]);
}

// ── Connect / disconnect ─────────────────────────────────────────────

#[test]
fn connect_allocates_and_wires_endpoint() {
    let mut fx = fixture(false, false);
    let _ = fx.manager.create_network("bridge", subnet(), "br0").unwrap();
    let ports = vec!["8080:80".to_owned(), "garbage".to_owned()];
    let ip = fx.manager.connect("br0", link("0123456789", &ports)).unwrap();
    assert_eq!(ip, Ipv4Addr::new(192, 168, 1, 2));

    let log = fx.log.lock().unwrap().clone();
    let veth = hull_network::VethPair::for_endpoint("0123456789-br0");
    assert!(log.contains(&format!("connect br0 {}", veth.name)));
    assert!(log.contains(&format!("attach {} 192.168.1.2/24 4242", veth.peer)));
    assert!(log.contains(&"publish 8080:80".to_owned()));
    assert!(!log.iter().any(|l| l.contains("garbage")));
}

#[test]
fn disconnect_frees_address_for_reuse() {
    let mut fx = fixture(false, false);
    let _ = fx.manager.create_network("bridge", subnet(), "br0").unwrap();
    let ports = vec!["8080:80".to_owned()];
    let first = fx.manager.connect("br0", link("1", &ports)).unwrap();
    let second = fx.manager.connect("br0", link("2", &[])).unwrap();
    assert_eq!(second, Ipv4Addr::new(192, 168, 1, 3));

    fx.manager.disconnect("br0", "1", first, &ports).unwrap();
    assert!(fx.log.lock().unwrap().contains(&"unpublish 8080:80".to_owned()));

    let third = fx.manager.connect("br0", link("3", &[])).unwrap();
    assert_eq!(third, first);
}

#[test]
fn failed_wiring_rolls_back_endpoint() {
    let mut fx = fixture(false, true);
    let _ = fx.manager.create_network("bridge", subnet(), "br0").unwrap();
    assert!(fx.manager.connect("br0", link("1", &[])).is_err());

    let log = fx.log.lock().unwrap().clone();
    assert!(log.iter().any(|l| l.starts_with("disconnect br0")));
    let bitmap = fx.ipam.bitmap(&subnet()).unwrap().unwrap();
    assert!(bitmap.starts_with("10"));
}

#[test]
fn connect_to_unknown_network_fails() {
    let fx = fixture(false, false);
    let err = fx.manager.connect("nope", link("1", &[])).unwrap_err();
    assert!(matches!(err, HullError::NotFound { .. }));
}
