//! `hull stop` — stop a running container.

use clap::Args;
use hull_common::config::HullConfig;
use hull_runtime::engine::Engine;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container name.
    pub container: String,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if the container is unknown, not running, or cannot
/// be cleaned up.
pub fn execute(config: &HullConfig, args: &StopArgs) -> anyhow::Result<()> {
    Engine::new(config)?.stop(&args.container)?;
    Ok(())
}
