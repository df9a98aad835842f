//! Container-side configuration of an endpoint.
//!
//! After the driver has created the veth pair on the host, the peer end is
//! moved into the container's network namespace, addressed, brought up
//! together with loopback and used as the default route. Published ports
//! become DNAT rules on the host.

use std::os::fd::AsFd;

use hull_common::error::{HullError, Result};
use hull_core::namespace::network::{netns_path, open_netns, with_netns};

use crate::iptables::{Iptables, NatRule};
use crate::netlink::{self, Netlink};
use crate::types::Endpoint;

/// Namespace and firewall side of connecting a container.
pub trait EndpointWiring: Send + Sync {
    /// Moves the container end of `endpoint` into the namespace of `pid`
    /// and configures address, links and default route there.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails.
    fn attach(&self, endpoint: &Endpoint<'_>, pid: u32) -> Result<()>;

    /// Installs one DNAT rule per port mapping of `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if a rule cannot be installed.
    fn publish_ports(&self, endpoint: &Endpoint<'_>) -> Result<()>;

    /// Removes the DNAT rules of `endpoint`. Missing rules are ignored.
    ///
    /// # Errors
    ///
    /// Returns every rule that could not be removed, aggregated.
    fn unpublish_ports(&self, endpoint: &Endpoint<'_>) -> Result<()>;
}

/// Wiring through netlink, `setns(2)` and `iptables`.
#[derive(Debug, Clone, Default)]
pub struct KernelWiring {
    iptables: Iptables,
}

impl KernelWiring {
    /// Wiring using the given `iptables` runner.
    #[must_use]
    pub const fn new(iptables: Iptables) -> Self {
        Self { iptables }
    }
}

fn dnat_rules<'a>(endpoint: &'a Endpoint<'_>) -> impl Iterator<Item = NatRule> + 'a {
    endpoint.port_mapping.iter().map(|m| NatRule::Dnat {
        host_port: m.host,
        destination: endpoint.ip_address,
        container_port: m.container,
    })
}

impl EndpointWiring for KernelWiring {
    fn attach(&self, endpoint: &Endpoint<'_>, pid: u32) -> Result<()> {
        let ns_path = netns_path(pid);
        let ns = open_netns(&ns_path)?;
        let peer = &endpoint.device.peer;

        let mut host = Netlink::open()?;
        host.set_netns(netlink::require_link(peer)?, ns.as_fd())?;

        let address = endpoint.cidr();
        let gateway = endpoint.network.gateway();
        with_netns(&ns_path, || {
            let mut nl = Netlink::open()?;
            let index = netlink::require_link(peer)?;
            nl.add_address(index, address)?;
            nl.set_up(index)?;
            nl.set_up(netlink::require_link("lo")?)?;
            nl.add_default_route(gateway, index)
        })?;
        tracing::info!(pid, address = %address, interface = %peer, "container network configured");
        Ok(())
    }

    fn publish_ports(&self, endpoint: &Endpoint<'_>) -> Result<()> {
        for rule in dnat_rules(endpoint) {
            self.iptables.append(&rule)?;
        }
        Ok(())
    }

    fn unpublish_ports(&self, endpoint: &Endpoint<'_>) -> Result<()> {
        let errors = dnat_rules(endpoint)
            .filter_map(|rule| self.iptables.remove(&rule).err())
            .collect();
        HullError::collect(errors)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::types::{Network, PortMapping};

    #[test]
    fn one_dnat_rule_per_mapping() {
        let net = Network {
            name: "br0".into(),
            ip_range: "192.168.1.1/24".parse().unwrap(),
            driver: "bridge".into(),
        };
        let ports = vec![
            PortMapping {
                host: 8080,
                container: 80,
            },
            PortMapping {
                host: 8443,
                container: 443,
            },
        ];
        let ep = Endpoint::new("1", &net, Ipv4Addr::new(192, 168, 1, 9), ports);
        let rules: Vec<_> = dnat_rules(&ep).collect();
        assert_eq!(rules.len(), 2);
        assert_eq!(
            rules[1],
            NatRule::Dnat {
                host_port: 8443,
                destination: Ipv4Addr::new(192, 168, 1, 9),
                container_port: 443,
            }
        );
    }

    #[test]
    fn attach_to_missing_process_fails_before_touching_links() {
        let net = Network {
            name: "br0".into(),
            ip_range: "192.168.1.1/24".parse().unwrap(),
            driver: "bridge".into(),
        };
        let ep = Endpoint::new("1", &net, Ipv4Addr::new(192, 168, 1, 2), Vec::new());
        let err = KernelWiring::default().attach(&ep, u32::MAX).unwrap_err();
        assert!(matches!(err, HullError::Io { .. }));
    }
}
