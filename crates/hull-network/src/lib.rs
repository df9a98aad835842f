//! # hull-network
//!
//! Container networking for the hull runtime.
//!
//! - **IPAM**: a per-subnet bitmap allocator persisted as JSON.
//! - **Bridge driver**: Linux bridges, veth pairs and masquerading.
//! - **Wiring**: moving the container end of a veth pair into the
//!   container's network namespace and publishing ports.
//! - **Manager**: the registry tying networks, drivers and the allocator
//!   together.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bridge;
pub mod driver;
pub mod ipam;
pub mod iptables;
pub mod manager;
pub mod netlink;
pub mod types;
pub mod wiring;

pub use driver::NetworkDriver;
pub use ipam::Ipam;
pub use manager::{ContainerLink, NetworkManager};
pub use types::{Endpoint, Network, PortMapping, VethPair};
pub use wiring::{EndpointWiring, KernelWiring};
