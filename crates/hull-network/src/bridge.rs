//! Linux bridge driver.
//!
//! Each network is a bridge carrying the gateway address, with outbound
//! traffic masqueraded. Endpoints are veth pairs whose host end is
//! enslaved to the bridge.

use hull_common::error::{HullError, Result};
use ipnetwork::Ipv4Network;

use crate::driver::NetworkDriver;
use crate::iptables::{Iptables, NatRule};
use crate::netlink::{self, Netlink};
use crate::types::{Endpoint, Network};

/// Registered name of the bridge driver.
pub const BRIDGE_DRIVER: &str = "bridge";

/// Driver backed by kernel bridges and `iptables` masquerading.
#[derive(Debug, Clone, Default)]
pub struct BridgeDriver {
    iptables: Iptables,
}

impl BridgeDriver {
    /// Driver using the given `iptables` runner.
    #[must_use]
    pub const fn new(iptables: Iptables) -> Self {
        Self { iptables }
    }

    fn setup_bridge(&self, nl: &mut Netlink, name: &str, gateway: Ipv4Network) -> Result<()> {
        let index = netlink::require_link(name)?;
        nl.add_address(index, gateway)?;
        nl.set_up(index)?;
        let subnet = Ipv4Network::new(gateway.network(), gateway.prefix()).map_err(|e| {
            HullError::InvalidInput {
                message: format!("invalid gateway {gateway}: {e}"),
            }
        })?;
        self.iptables.append(&NatRule::masquerade(subnet, name))
    }
}

impl NetworkDriver for BridgeDriver {
    fn name(&self) -> &'static str {
        BRIDGE_DRIVER
    }

    fn create(&self, name: &str, gateway: Ipv4Network) -> Result<Network> {
        if netlink::link_index(name)?.is_some() {
            return Err(HullError::InvalidState {
                message: format!("interface {name} already exists"),
            });
        }
        let mut nl = Netlink::open()?;
        nl.create_bridge(name)?;
        if let Err(e) = self.setup_bridge(&mut nl, name, gateway) {
            if let Ok(Some(index)) = netlink::link_index(name) {
                if let Err(cleanup) = nl.delete_link(index) {
                    tracing::warn!(bridge = name, error = %cleanup, "bridge rollback failed");
                }
            }
            return Err(e);
        }
        tracing::info!(bridge = name, gateway = %gateway, "bridge created");
        Ok(Network {
            name: name.to_owned(),
            ip_range: gateway,
            driver: BRIDGE_DRIVER.to_owned(),
        })
    }

    fn delete(&self, network: &Network) -> Result<()> {
        let mut errors = Vec::new();
        let rule = NatRule::masquerade(network.subnet(), network.name.clone());
        if let Err(e) = self.iptables.remove(&rule) {
            errors.push(e);
        }
        match netlink::link_index(&network.name) {
            Ok(Some(index)) => {
                if let Err(e) = Netlink::open().and_then(|mut nl| nl.delete_link(index)) {
                    errors.push(e);
                }
            }
            Ok(None) => {
                tracing::warn!(bridge = %network.name, "bridge already gone");
            }
            Err(e) => errors.push(e),
        }
        HullError::collect(errors)?;
        tracing::info!(bridge = %network.name, "bridge deleted");
        Ok(())
    }

    fn connect(&self, network: &Network, endpoint: &Endpoint<'_>) -> Result<()> {
        let bridge = netlink::require_link(&network.name)?;
        let veth = &endpoint.device;
        let mut nl = Netlink::open()?;
        nl.create_veth(&veth.name, &veth.peer)?;
        let attached = netlink::require_link(&veth.name).and_then(|host| {
            nl.set_master(host, bridge)?;
            nl.set_up(host)
        });
        if let Err(e) = attached {
            if let Ok(Some(host)) = netlink::link_index(&veth.name) {
                if let Err(cleanup) = nl.delete_link(host) {
                    tracing::warn!(veth = %veth.name, error = %cleanup, "veth rollback failed");
                }
            }
            return Err(e);
        }
        tracing::debug!(veth = %veth.name, bridge = %network.name, "endpoint attached to bridge");
        Ok(())
    }

    fn disconnect(&self, _network: &Network, endpoint: &Endpoint<'_>) -> Result<()> {
        let Some(index) = netlink::link_index(&endpoint.device.name)? else {
            return Ok(());
        };
        Netlink::open()?.delete_link(index)?;
        tracing::debug!(veth = %endpoint.device.name, "endpoint detached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_is_registered_as_bridge() {
        assert_eq!(BridgeDriver::default().name(), "bridge");
    }

    #[test]
    fn disconnect_of_missing_veth_is_noop() {
        let net = Network {
            name: "hullnone0".into(),
            ip_range: "10.250.0.1/24".parse().unwrap(),
            driver: BRIDGE_DRIVER.into(),
        };
        let ep = Endpoint::new("0000000000", &net, "10.250.0.2".parse().unwrap(), Vec::new());
        BridgeDriver::default().disconnect(&net, &ep).unwrap();
    }

    #[test]
    fn create_and_delete_bridge_as_root() {
        if !nix::unistd::geteuid().is_root() {
            return;
        }
        let driver = BridgeDriver::default();
        let gateway: Ipv4Network = "10.251.7.1/24".parse().unwrap();
        let Ok(net) = driver.create("hulltest7", gateway) else {
            // No iptables or no netlink permission in this sandbox.
            return;
        };
        assert_eq!(net.ip_range, gateway);
        assert!(netlink::link_index("hulltest7").unwrap().is_some());
        driver.delete(&net).unwrap();
        assert!(netlink::link_index("hulltest7").unwrap().is_none());
    }
}
