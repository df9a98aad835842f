//! `hull run` — create and start a container.

use clap::Args;
use hull_common::config::HullConfig;
use hull_common::types::ResourceConfig;
use hull_runtime::engine::{Engine, RunOptions, RunOutcome};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Attach the terminal and wait for the container to exit.
    #[arg(short = 't', long = "tty", conflicts_with = "detach")]
    pub tty: bool,

    /// Run in the background, logging to the container log.
    #[arg(short, long)]
    pub detach: bool,

    /// Memory limit, e.g. `100m`.
    #[arg(short = 'm', long = "memory", default_value = "")]
    pub memory: String,

    /// Relative CPU share weight.
    #[arg(long = "cpushare", default_value = "")]
    pub cpu_share: String,

    /// CPUs the container may run on, e.g. `0-1`.
    #[arg(long = "cpuset", default_value = "")]
    pub cpu_set: String,

    /// Bind a host directory: `host:container`.
    #[arg(short = 'v', long = "volume", default_value = "")]
    pub volume: String,

    /// Container name; defaults to the generated id.
    #[arg(long)]
    pub name: Option<String>,

    /// Network to attach the container to.
    #[arg(long = "net")]
    pub network: Option<String>,

    /// Publish a container port: `host:container`. Repeatable.
    #[arg(short = 'p', long = "publish")]
    pub publish: Vec<String>,

    /// Image name (an archive under the images directory).
    pub image: String,

    /// Command to run inside the container.
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    fn into_options(self) -> RunOptions {
        RunOptions {
            image: self.image,
            command: self.command,
            name: self.name,
            tty: self.tty,
            detach: self.detach,
            resources: ResourceConfig {
                memory_limit: self.memory,
                cpu_share: self.cpu_share,
                cpu_set: self.cpu_set,
            },
            volume: self.volume,
            network: self.network,
            port_mapping: self.publish,
        }
    }
}

/// Executes the `run` command.
///
/// Prints the container id for detached containers; exits with the
/// container's code for interactive ones.
///
/// # Errors
///
/// Returns an error if the container cannot be started.
#[allow(clippy::print_stdout)]
pub fn execute(config: &HullConfig, args: RunArgs) -> anyhow::Result<()> {
    let engine = Engine::new(config)?;
    match engine.run(&args.into_options())? {
        RunOutcome::Detached(record) => {
            println!("{}", record.id);
            Ok(())
        }
        RunOutcome::Exited { code: 0, .. } => Ok(()),
        RunOutcome::Exited { code, .. } => std::process::exit(code),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use crate::commands::{Cli, Command};

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("hull").chain(args.iter().copied()))
    }

    #[test]
    fn flags_map_onto_options() {
        let cli = parse(&[
            "run", "-d", "-m", "100m", "--cpushare", "512", "--cpuset", "0-1", "-v",
            "/h:/c", "--name", "web", "--net", "br0", "-p", "8080:80", "-p", "8443:443",
            "busybox", "sh", "-c", "top",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            unreachable!("not a run command");
        };
        let options = args.into_options();
        assert!(options.detach && !options.tty);
        assert_eq!(options.resources.memory_limit, "100m");
        assert_eq!(options.resources.cpu_share, "512");
        assert_eq!(options.resources.cpu_set, "0-1");
        assert_eq!(options.volume, "/h:/c");
        assert_eq!(options.name.as_deref(), Some("web"));
        assert_eq!(options.network.as_deref(), Some("br0"));
        assert_eq!(options.port_mapping, vec!["8080:80", "8443:443"]);
        assert_eq!(options.image, "busybox");
        assert_eq!(options.command, vec!["sh", "-c", "top"]);
    }

    #[test]
    fn tty_conflicts_with_detach() {
        let err = parse(&["run", "-t", "-d", "busybox", "sh"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn command_is_required() {
        assert!(parse(&["run", "-t", "busybox"]).is_err());
    }
}
