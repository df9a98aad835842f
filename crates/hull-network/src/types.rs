//! Networks, endpoints and port mappings.

use std::fmt;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Prefix of the host-side veth name.
pub const HOST_VETH_PREFIX: &str = "veth";
/// Prefix of the container-side veth name.
pub const PEER_VETH_PREFIX: &str = "cif-";

/// A named virtual network.
///
/// The address part of `ip_range` is the gateway, assigned to the bridge;
/// the prefix defines the subnet containers draw their addresses from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// Unique name, also used as the bridge interface name.
    pub name: String,
    /// Gateway address with the subnet prefix, e.g. `192.168.1.1/24`.
    pub ip_range: Ipv4Network,
    /// Name of the driver managing this network.
    pub driver: String,
}

impl Network {
    /// Gateway address.
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        self.ip_range.ip()
    }

    /// Subnet with host bits cleared.
    #[must_use]
    pub fn subnet(&self) -> Ipv4Network {
        Ipv4Network::new(self.ip_range.network(), self.ip_range.prefix()).unwrap_or(self.ip_range)
    }
}

/// Names of the two ends of a veth pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethPair {
    /// End attached to the bridge on the host.
    pub name: String,
    /// End moved into the container.
    pub peer: String,
}

impl VethPair {
    /// Derives stable, collision-resistant interface names from an endpoint id.
    ///
    /// Both names fit the kernel's 15 character limit.
    #[must_use]
    pub fn for_endpoint(endpoint_id: &str) -> Self {
        let digest = Sha256::digest(endpoint_id.as_bytes());
        let tag: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
        Self {
            name: format!("{HOST_VETH_PREFIX}{tag}"),
            peer: format!("{PEER_VETH_PREFIX}{tag}"),
        }
    }
}

/// A published port: traffic to `host` on the host reaches `container`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortMapping {
    /// Port on the host.
    pub host: u16,
    /// Port inside the container.
    pub container: u16,
}

impl PortMapping {
    /// Parses `host:container`. Anything else yields `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(':');
        let host = parts.next()?.trim().parse().ok()?;
        let container = parts.next()?.trim().parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { host, container })
    }

    /// Parses every entry, logging and dropping malformed ones.
    #[must_use]
    pub fn parse_all(raw: &[String]) -> Vec<Self> {
        raw.iter()
            .filter_map(|entry| {
                let parsed = Self::parse(entry);
                if parsed.is_none() {
                    tracing::warn!(mapping = %entry, "ignoring malformed port mapping");
                }
                parsed
            })
            .collect()
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// A container's attachment to a network.
#[derive(Debug, Clone)]
pub struct Endpoint<'n> {
    /// `<container id>-<network name>`.
    pub id: String,
    /// Interfaces carrying the attachment.
    pub device: VethPair,
    /// Address allocated to the container.
    pub ip_address: Ipv4Addr,
    /// Hardware address; left to the kernel when unset.
    pub mac_address: Option<String>,
    /// Ports published on the host.
    pub port_mapping: Vec<PortMapping>,
    /// The network this endpoint belongs to.
    pub network: &'n Network,
}

impl<'n> Endpoint<'n> {
    /// Builds the endpoint of `container_id` on `network`.
    #[must_use]
    pub fn new(
        container_id: &str,
        network: &'n Network,
        ip_address: Ipv4Addr,
        port_mapping: Vec<PortMapping>,
    ) -> Self {
        let id = format!("{container_id}-{}", network.name);
        Self {
            device: VethPair::for_endpoint(&id),
            id,
            ip_address,
            mac_address: None,
            port_mapping,
            network,
        }
    }

    /// Container address with the network prefix.
    #[must_use]
    pub fn cidr(&self) -> Ipv4Network {
        Ipv4Network::new(self.ip_address, self.network.ip_range.prefix())
            .unwrap_or_else(|_| Ipv4Network::from(self.ip_address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn br0() -> Network {
        Network {
            name: "br0".into(),
            ip_range: "192.168.1.1/24".parse().unwrap(),
            driver: "bridge".into(),
        }
    }

    #[test]
    fn network_json_uses_camel_case() {
        let json = serde_json::to_value(br0()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "br0", "ipRange": "192.168.1.1/24", "driver": "bridge"})
        );
        let back: Network = serde_json::from_value(json).unwrap();
        assert_eq!(back, br0());
    }

    #[test]
    fn gateway_and_subnet_split_ip_range() {
        let net = br0();
        assert_eq!(net.gateway(), Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(net.subnet().to_string(), "192.168.1.0/24");
    }

    #[test]
    fn veth_names_are_stable_and_short() {
        let a = VethPair::for_endpoint("0123456789-br0");
        let b = VethPair::for_endpoint("0123456789-br0");
        let c = VethPair::for_endpoint("0123456789-br1");
        assert_eq!(a, b);
        assert_ne!(a.name, c.name);
        assert!(a.name.starts_with("veth") && a.name.len() == 12);
        assert!(a.peer.starts_with("cif-") && a.peer.len() == 12);
        assert_eq!(a.name[4..], a.peer[4..]);
    }

    #[test]
    fn endpoint_id_joins_container_and_network() {
        let net = br0();
        let ep = Endpoint::new("42", &net, Ipv4Addr::new(192, 168, 1, 2), Vec::new());
        assert_eq!(ep.id, "42-br0");
        assert_eq!(ep.cidr().to_string(), "192.168.1.2/24");
        assert!(ep.mac_address.is_none());
    }

    #[test]
    fn port_mapping_requires_two_numeric_fields() {
        assert_eq!(
            PortMapping::parse("8080:80"),
            Some(PortMapping {
                host: 8080,
                container: 80
            })
        );
        assert_eq!(PortMapping::parse("8080"), None);
        assert_eq!(PortMapping::parse("8080:80:1"), None);
        assert_eq!(PortMapping::parse("http:80"), None);
        let parsed = PortMapping::parse_all(&["1:2".into(), "bad".into(), "3:4".into()]);
        assert_eq!(parsed.len(), 2);
    }
}
