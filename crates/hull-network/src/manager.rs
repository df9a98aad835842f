//! The network registry.
//!
//! [`NetworkManager`] owns the registered drivers, the networks loaded
//! from `<run>/network/network/` and the address allocator, and sequences
//! them for every network and container operation. Registry changes are
//! serialized across processes by a lock file next to the network
//! directory.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use hull_common::config::HullConfig;
use hull_common::error::{HullError, Result};
use hull_common::lock::FileLock;
use ipnetwork::Ipv4Network;

use crate::bridge::BridgeDriver;
use crate::driver::NetworkDriver;
use crate::ipam::Ipam;
use crate::types::{Endpoint, Network, PortMapping};
use crate::wiring::{EndpointWiring, KernelWiring};

/// Longest interface name the kernel accepts.
const IFNAMSIZ_MAX: usize = 15;

/// What the manager needs to know about a container to connect it.
#[derive(Debug, Clone, Copy)]
pub struct ContainerLink<'a> {
    /// Container id.
    pub id: &'a str,
    /// Host pid of the container init.
    pub pid: u32,
    /// Raw `host:container` port mappings.
    pub port_mapping: &'a [String],
}

/// Registry of networks, drivers and the address allocator.
pub struct NetworkManager {
    network_dir: PathBuf,
    lock_path: PathBuf,
    ipam: Ipam,
    drivers: BTreeMap<&'static str, Box<dyn NetworkDriver>>,
    wiring: Box<dyn EndpointWiring>,
    networks: BTreeMap<String, Network>,
}

impl std::fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkManager")
            .field("network_dir", &self.network_dir)
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .field("networks", &self.networks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl NetworkManager {
    /// Manager with the bridge driver and kernel wiring, loading the
    /// registry from the locations in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the network directory cannot be read.
    pub fn init(config: &HullConfig) -> Result<Self> {
        Self::with_parts(
            config.network_dir(),
            Ipam::new(config.ipam_file()),
            vec![Box::new(BridgeDriver::default())],
            Box::new(KernelWiring::default()),
        )
    }

    /// Manager built from explicit parts.
    ///
    /// # Errors
    ///
    /// Returns an error if the network directory cannot be read.
    pub fn with_parts(
        network_dir: impl Into<PathBuf>,
        ipam: Ipam,
        drivers: Vec<Box<dyn NetworkDriver>>,
        wiring: Box<dyn EndpointWiring>,
    ) -> Result<Self> {
        let network_dir = network_dir.into();
        let lock_path = network_dir.with_extension("lock");
        let drivers = drivers.into_iter().map(|d| (d.name(), d)).collect();
        let networks = load_networks(&network_dir)?;
        tracing::debug!(dir = %network_dir.display(), count = networks.len(), "network registry loaded");
        Ok(Self {
            network_dir,
            lock_path,
            ipam,
            drivers,
            wiring,
            networks,
        })
    }

    /// Registered networks, ordered by name.
    pub fn networks(&self) -> impl Iterator<Item = &Network> {
        self.networks.values()
    }

    /// Looks up a network by name.
    ///
    /// # Errors
    ///
    /// Returns [`HullError::NotFound`] if no such network is registered.
    pub fn network(&self, name: &str) -> Result<&Network> {
        self.networks.get(name).ok_or_else(|| HullError::NotFound {
            kind: "network",
            id: name.to_owned(),
        })
    }

    /// The allocator shared by every network.
    #[must_use]
    pub const fn ipam(&self) -> &Ipam {
        &self.ipam
    }

    fn driver(&self, name: &str) -> Result<&dyn NetworkDriver> {
        self.drivers
            .get(name)
            .map(|d| d.as_ref())
            .ok_or_else(|| HullError::NotFound {
                kind: "network driver",
                id: name.to_owned(),
            })
    }

    fn descriptor_path(&self, name: &str) -> PathBuf {
        self.network_dir.join(name)
    }

    /// Creates network `name` on `subnet` with the driver called `driver`.
    ///
    /// The first free address of the subnet becomes the gateway.
    ///
    /// # Errors
    ///
    /// Returns [`HullError::InvalidState`] for a duplicate name,
    /// [`HullError::NotFound`] for an unknown driver, and any allocator,
    /// driver or I/O failure. On failure nothing stays allocated.
    pub fn create_network(
        &mut self,
        driver: &str,
        subnet: Ipv4Network,
        name: &str,
    ) -> Result<&Network> {
        validate_name(name)?;
        let _lock = FileLock::acquire(&self.lock_path)?;
        if self.networks.contains_key(name) || self.descriptor_path(name).exists() {
            return Err(HullError::InvalidState {
                message: format!("network {name} already exists"),
            });
        }
        let driver = self.driver(driver)?;

        let gateway = self.ipam.allocate(&subnet)?;
        let gateway_cidr = Ipv4Network::new(gateway, subnet.prefix()).map_err(|e| {
            HullError::InvalidInput {
                message: format!("invalid subnet {subnet}: {e}"),
            }
        })?;
        let network = match driver.create(name, gateway_cidr) {
            Ok(network) => network,
            Err(e) => {
                self.release_quietly(&subnet, gateway);
                return Err(e);
            }
        };
        if let Err(e) = self.dump(&network) {
            if let Err(cleanup) = driver.delete(&network) {
                tracing::warn!(network = name, error = %cleanup, "driver rollback failed");
            }
            self.release_quietly(&subnet, gateway);
            return Err(e);
        }

        tracing::info!(network = name, gateway = %gateway_cidr, "network created");
        Ok(&*self.networks.entry(name.to_owned()).or_insert(network))
    }

    /// Deletes network `name`: gateway address, driver plumbing,
    /// descriptor file and registry entry.
    ///
    /// # Errors
    ///
    /// Returns [`HullError::NotFound`] for an unknown network, otherwise
    /// every failed step aggregated.
    pub fn delete_network(&mut self, name: &str) -> Result<()> {
        let _lock = FileLock::acquire(&self.lock_path)?;
        let network = self.network(name)?.clone();
        let mut errors = Vec::new();

        if let Err(e) = self.ipam.release(&network.subnet(), network.gateway()) {
            errors.push(e);
        }
        match self.driver(&network.driver) {
            Ok(driver) => {
                if let Err(e) = driver.delete(&network) {
                    errors.push(e);
                }
            }
            Err(e) => errors.push(e),
        }
        let path = self.descriptor_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                let _ = self.networks.remove(name);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let _ = self.networks.remove(name);
            }
            Err(e) => errors.push(HullError::io(&path, e)),
        }

        HullError::collect(errors)?;
        tracing::info!(network = name, "network deleted");
        Ok(())
    }

    /// Connects a running container to network `name` and returns the
    /// address it was given.
    ///
    /// Malformed port mappings are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation, the driver or the namespace wiring
    /// fails; everything done before the failure is undone.
    pub fn connect(&self, name: &str, container: ContainerLink<'_>) -> Result<Ipv4Addr> {
        let network = self.network(name)?;
        let driver = self.driver(&network.driver)?;
        let subnet = network.subnet();
        let ip = self.ipam.allocate(&subnet)?;
        let endpoint = Endpoint::new(
            container.id,
            network,
            ip,
            PortMapping::parse_all(container.port_mapping),
        );

        if let Err(e) = driver.connect(network, &endpoint) {
            self.release_quietly(&subnet, ip);
            return Err(e);
        }
        let wired = self
            .wiring
            .attach(&endpoint, container.pid)
            .and_then(|()| self.wiring.publish_ports(&endpoint));
        if let Err(e) = wired {
            if let Err(cleanup) = self.wiring.unpublish_ports(&endpoint) {
                tracing::warn!(endpoint = %endpoint.id, error = %cleanup, "port rollback failed");
            }
            if let Err(cleanup) = driver.disconnect(network, &endpoint) {
                tracing::warn!(endpoint = %endpoint.id, error = %cleanup, "veth rollback failed");
            }
            self.release_quietly(&subnet, ip);
            return Err(e);
        }

        tracing::info!(
            network = name,
            container = container.id,
            address = %ip,
            "container connected"
        );
        Ok(ip)
    }

    /// Disconnects container `container_id` holding `ip` from network `name`.
    ///
    /// Port rules, the host-side veth and the address are all attempted.
    ///
    /// # Errors
    ///
    /// Returns every failed step aggregated.
    pub fn disconnect(
        &self,
        name: &str,
        container_id: &str,
        ip: Ipv4Addr,
        port_mapping: &[String],
    ) -> Result<()> {
        let network = self.network(name)?;
        let endpoint = Endpoint::new(
            container_id,
            network,
            ip,
            PortMapping::parse_all(port_mapping),
        );
        let mut errors = Vec::new();
        if let Err(e) = self.wiring.unpublish_ports(&endpoint) {
            errors.push(e);
        }
        match self.driver(&network.driver) {
            Ok(driver) => {
                if let Err(e) = driver.disconnect(network, &endpoint) {
                    errors.push(e);
                }
            }
            Err(e) => errors.push(e),
        }
        if let Err(e) = self.ipam.release(&network.subnet(), ip) {
            errors.push(e);
        }
        HullError::collect(errors)?;
        tracing::info!(network = name, container = container_id, "container disconnected");
        Ok(())
    }

    fn release_quietly(&self, subnet: &Ipv4Network, ip: Ipv4Addr) {
        if let Err(e) = self.ipam.release(subnet, ip) {
            tracing::warn!(subnet = %subnet, address = %ip, error = %e, "address rollback failed");
        }
    }

    fn dump(&self, network: &Network) -> Result<()> {
        std::fs::create_dir_all(&self.network_dir)
            .map_err(|e| HullError::io(&self.network_dir, e))?;
        let path = self.descriptor_path(&network.name);
        let json = serde_json::to_vec(network)?;
        std::fs::write(&path, json).map_err(|e| HullError::io(&path, e))
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= IFNAMSIZ_MAX
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(HullError::InvalidInput {
            message: format!(
                "network name {name:?} must be 1-{IFNAMSIZ_MAX} characters of [A-Za-z0-9._-]"
            ),
        })
    }
}

fn load_networks(dir: &Path) -> Result<BTreeMap<String, Network>> {
    let mut networks = BTreeMap::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(networks),
        Err(e) => return Err(HullError::io(dir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| HullError::io(dir, e))?;
        let path = entry.path();
        if !path.is_file() || entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let parsed = std::fs::read(&path)
            .map_err(|e| HullError::io(&path, e))
            .and_then(|raw| Ok(serde_json::from_slice::<Network>(&raw)?));
        match parsed {
            Ok(network) => {
                let _ = networks.insert(network.name.clone(), network);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable network descriptor");
            }
        }
    }
    Ok(networks)
}
