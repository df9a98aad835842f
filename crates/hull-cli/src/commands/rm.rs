//! `hull rm` — remove a stopped container.

use clap::Args;
use hull_common::config::HullConfig;
use hull_runtime::engine::Engine;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container name.
    pub container: String,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if the container is unknown, still running, or its
/// workspace cannot be torn down.
pub fn execute(config: &HullConfig, args: &RmArgs) -> anyhow::Result<()> {
    Engine::new(config)?.remove(&args.container)?;
    Ok(())
}
