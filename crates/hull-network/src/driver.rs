//! The network driver abstraction.

use hull_common::error::Result;
use ipnetwork::Ipv4Network;

use crate::types::{Endpoint, Network};

/// Creates the host-side plumbing of networks and their endpoints.
pub trait NetworkDriver: Send + Sync {
    /// Name under which the driver is registered.
    fn name(&self) -> &'static str;

    /// Creates network `name` whose gateway is the address of `gateway`.
    ///
    /// # Errors
    ///
    /// Returns an error if the network cannot be created. Anything created
    /// before the failure is rolled back.
    fn create(&self, name: &str, gateway: Ipv4Network) -> Result<Network>;

    /// Tears down the host-side plumbing of `network`.
    ///
    /// # Errors
    ///
    /// Returns an error if the network cannot be removed.
    fn delete(&self, network: &Network) -> Result<()>;

    /// Creates the host side of `endpoint` and attaches it to `network`.
    ///
    /// # Errors
    ///
    /// Returns an error if the interfaces cannot be created or attached.
    fn connect(&self, network: &Network, endpoint: &Endpoint<'_>) -> Result<()>;

    /// Removes the host side of `endpoint` if it still exists.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing interface cannot be removed.
    fn disconnect(&self, network: &Network, endpoint: &Endpoint<'_>) -> Result<()>;
}
