//! CLI command definitions and dispatch.

pub mod exec;
pub mod init;
pub mod network;
pub mod rm;
pub mod run;
pub mod stop;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hull_common::config::HullConfig;
use hull_common::constants::{DEFAULT_DATA_DIR, DEFAULT_RUN_DIR};

/// hull — a minimal container runtime.
#[derive(Parser, Debug)]
#[command(name = "hull", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Directory for container records, logs and network state.
    #[arg(long, global = true, env = "HULL_RUN_DIR", default_value = DEFAULT_RUN_DIR)]
    pub run_dir: PathBuf,

    /// Directory for images and container layers.
    #[arg(long, global = true, env = "HULL_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,
}

impl Cli {
    /// Runtime configuration selected by the global flags.
    #[must_use]
    pub fn config(&self) -> HullConfig {
        HullConfig {
            run_dir: self.run_dir.clone(),
            data_dir: self.data_dir.clone(),
        }
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and start a container.
    Run(run::RunArgs),
    /// Container init; invoked by the runtime itself.
    #[command(hide = true)]
    Init,
    /// Stop a running container.
    Stop(stop::StopArgs),
    /// Remove a stopped container.
    Rm(rm::RmArgs),
    /// Execute a command inside a running container.
    Exec(exec::ExecArgs),
    /// Manage container networks.
    Network(network::NetworkArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config();
    config.validate()?;
    tracing::debug!(
        run_dir = %config.run_dir.display(),
        data_dir = %config.data_dir.display(),
        "configuration resolved"
    );
    match cli.command {
        Command::Run(args) => run::execute(&config, args),
        Command::Init => init::execute(),
        Command::Stop(args) => stop::execute(&config, &args),
        Command::Rm(args) => rm::execute(&config, &args),
        Command::Exec(args) => exec::execute(&config, &args),
        Command::Network(args) => network::execute(&config, args),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_dirs_reach_config() {
        let cli =
            Cli::try_parse_from(["hull", "--run-dir", "/r", "stop", "web", "--data-dir", "/d"])
                .unwrap();
        let cfg = cli.config();
        assert_eq!(cfg.run_dir, PathBuf::from("/r"));
        assert_eq!(cfg.data_dir, PathBuf::from("/d"));
    }

    #[test]
    fn init_is_hidden_but_parses() {
        let cli = Cli::try_parse_from(["hull", "init"]).unwrap();
        assert!(matches!(cli.command, Command::Init));
        let help = Cli::command().render_help().to_string();
        assert!(!help.contains("init"));
    }

    #[test]
    fn relative_run_dir_is_refused() {
        let cli = Cli::try_parse_from(["hull", "--run-dir", "state", "network", "list"]).unwrap();
        let err = execute(cli).unwrap_err();
        assert!(err.to_string().contains("run_dir must be absolute"));
    }
}
