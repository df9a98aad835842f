//! `hull network` — manage container networks.

use anyhow::Context;
use clap::{Args, Subcommand};
use hull_common::config::HullConfig;
use hull_network::NetworkManager;
use hull_network::bridge::BRIDGE_DRIVER;
use ipnetwork::Ipv4Network;

/// Arguments for the `network` command.
#[derive(Args, Debug)]
pub struct NetworkArgs {
    /// Network operation.
    #[command(subcommand)]
    pub command: NetworkCommand,
}

/// Network operations.
#[derive(Subcommand, Debug)]
pub enum NetworkCommand {
    /// Create a network.
    Create {
        /// Network driver.
        #[arg(long, default_value = BRIDGE_DRIVER)]
        driver: String,
        /// Subnet in CIDR notation, e.g. `192.168.10.0/24`.
        #[arg(long)]
        subnet: String,
        /// Network name; also the bridge interface name.
        name: String,
    },
    /// List networks.
    #[command(alias = "ls")]
    List,
    /// Remove a network.
    #[command(alias = "rm")]
    Remove {
        /// Network name.
        name: String,
    },
}

/// Executes the `network` command.
///
/// # Errors
///
/// Returns an error if the registry cannot be loaded or the operation
/// fails.
#[allow(clippy::print_stdout)]
pub fn execute(config: &HullConfig, args: NetworkArgs) -> anyhow::Result<()> {
    let mut manager = NetworkManager::init(config)?;
    match args.command {
        NetworkCommand::Create {
            driver,
            subnet,
            name,
        } => {
            let subnet: Ipv4Network = subnet
                .parse()
                .with_context(|| format!("invalid subnet {subnet}"))?;
            let network = manager.create_network(&driver, subnet, &name)?;
            println!("{} {}", network.name, network.ip_range);
        }
        NetworkCommand::List => {
            println!("{:<16} {:<20} {:<8}", "NAME", "IPRANGE", "DRIVER");
            for network in manager.networks() {
                println!(
                    "{:<16} {:<20} {:<8}",
                    network.name,
                    network.ip_range.to_string(),
                    network.driver
                );
            }
        }
        NetworkCommand::Remove { name } => manager.delete_network(&name)?,
    }
    Ok(())
}
