//! `hull exec` — execute a command inside a running container.

use clap::Args;
use hull_common::config::HullConfig;
use hull_runtime::engine::Engine;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Container name.
    pub container: String,

    /// Command to execute.
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command.
///
/// Joins the target container's namespaces and runs the command with the
/// caller's terminal, exiting with its code.
///
/// # Errors
///
/// Returns an error if the container is not running or namespace joining fails.
pub fn execute(config: &HullConfig, args: &ExecArgs) -> anyhow::Result<()> {
    let code = Engine::new(config)?.exec(&args.container, &args.command)?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
