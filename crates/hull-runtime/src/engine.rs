//! Runtime engine that orchestrates container lifecycle.
//!
//! `run` goes launcher → cgroups → network → record → command handoff.
//! A failure after the child exists kills it and releases whatever was
//! already set up. Releasing is always network → cgroup → workspace →
//! record, and every step tolerates its resource being absent.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use hull_common::config::HullConfig;
use hull_common::error::{HullError, Result};
use hull_common::types::{ContainerId, ContainerStatus, ResourceConfig};
use hull_core::cgroup::CgroupManager;
use hull_core::mountinfo::MountTable;
use hull_network::{ContainerLink, NetworkManager};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use crate::process::{LaunchRequest, ParentProcess, ProcessLauncher};
use crate::state::{ContainerRecord, StateStore};
use crate::workspace::WorkspaceManager;

/// Time a container gets to exit after `SIGTERM` before it is killed.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Time a killed process gets to disappear before stop gives up.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Everything `run` needs to know.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Image name.
    pub image: String,
    /// Command and arguments.
    pub command: Vec<String>,
    /// Container name; defaults to the generated id.
    pub name: Option<String>,
    /// Attach the caller's terminal and wait for the container to exit.
    pub tty: bool,
    /// Run in the background, logging to a file.
    pub detach: bool,
    /// Resource limits.
    pub resources: ResourceConfig,
    /// Raw `host:container` volume spec, or empty.
    pub volume: String,
    /// Network to attach to.
    pub network: Option<String>,
    /// Raw `host:container` port mappings.
    pub port_mapping: Vec<String>,
}

impl RunOptions {
    fn validate(&self) -> Result<()> {
        if self.tty && self.detach {
            return Err(HullError::InvalidInput {
                message: "tty and detach cannot both be set".into(),
            });
        }
        if self.command.is_empty() {
            return Err(HullError::InvalidInput {
                message: "container command is empty".into(),
            });
        }
        if let Some(name) = &self.name {
            let valid = !name.is_empty()
                && !name.starts_with('.')
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
            if !valid {
                return Err(HullError::InvalidInput {
                    message: format!("invalid container name {name:?}"),
                });
            }
        }
        Ok(())
    }
}

/// How a `run` ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The container keeps running in the background.
    Detached(ContainerRecord),
    /// The interactive container exited and was cleaned up.
    Exited {
        /// Container id.
        id: ContainerId,
        /// Exit code of the container init.
        code: i32,
    },
}

/// What has to be released for a container.
struct Release<'a> {
    id: &'a str,
    name: &'a str,
    volume: &'a str,
    network: Option<(&'a str, Ipv4Addr)>,
    port_mapping: &'a [String],
}

impl<'a> Release<'a> {
    fn of(record: &'a ContainerRecord) -> Self {
        Self {
            id: record.id.as_str(),
            name: &record.name,
            volume: &record.volume,
            network: record.network.as_deref().zip(record.ip_address),
            port_mapping: &record.port_mapping,
        }
    }
}

/// The runtime engine that coordinates all container operations.
#[derive(Debug)]
pub struct Engine {
    state: StateStore,
    workspace: WorkspaceManager,
    launcher: ProcessLauncher,
    network: NetworkManager,
    mounts: MountTable,
}

impl Engine {
    /// Engine for the directories in `config`, using the live mount table
    /// and the kernel network stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the network registry cannot be loaded.
    pub fn new(config: &HullConfig) -> Result<Self> {
        Ok(Self::with_parts(
            config,
            MountTable::current(),
            ProcessLauncher::new(config),
            NetworkManager::init(config)?,
        ))
    }

    /// Engine built from explicit parts; `mounts` drives cgroup discovery
    /// and mount-point checks.
    #[must_use]
    pub fn with_parts(
        config: &HullConfig,
        mounts: MountTable,
        launcher: ProcessLauncher,
        network: NetworkManager,
    ) -> Self {
        Self {
            state: StateStore::new(config),
            workspace: WorkspaceManager::with_mounts(config, mounts.clone()),
            launcher,
            network,
            mounts,
        }
    }

    /// Container records.
    #[must_use]
    pub const fn state(&self) -> &StateStore {
        &self.state
    }

    /// The network registry.
    #[must_use]
    pub const fn networks(&self) -> &NetworkManager {
        &self.network
    }

    /// The network registry, for creating and deleting networks.
    pub const fn networks_mut(&mut self) -> &mut NetworkManager {
        &mut self.network
    }

    fn cgroup(&self, id: &str) -> CgroupManager {
        CgroupManager::with_mounts(id, self.mounts.clone())
    }

    /// Starts a container.
    ///
    /// In tty mode this waits for the container to exit and then releases
    /// everything it held, record included.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid options or a name already in use, or if
    /// any setup step fails; in that case the child is killed and
    /// everything set up so far is released.
    pub fn run(&self, options: &RunOptions) -> Result<RunOutcome> {
        options.validate()?;
        let id = ContainerId::generate();
        let name = options.name.clone().unwrap_or_else(|| id.to_string());
        if self.state.exists(&name) {
            return Err(HullError::InvalidState {
                message: format!("container name {name} is already in use"),
            });
        }

        let request = LaunchRequest {
            name: &name,
            image: &options.image,
            volume: &options.volume,
            tty: options.tty,
        };
        let mut parent = self.launcher.launch(&request, &self.workspace)?;

        let mut record = ContainerRecord::running(id, &name, parent.pid(), &options.command);
        record.volume.clone_from(&options.volume);
        record.image.clone_from(&options.image);
        record.port_mapping.clone_from(&options.port_mapping);

        if let Err(e) = self.start(&mut parent, &mut record, options) {
            parent.kill();
            self.release_quietly(&Release::of(&record));
            return Err(e);
        }
        tracing::info!(
            id = %record.id,
            name = %record.name,
            pid = parent.pid(),
            "container started"
        );

        if !options.tty {
            return Ok(RunOutcome::Detached(record));
        }
        let code = parent.wait()?;
        tracing::info!(name = %record.name, code, "container exited");
        self.release(&Release::of(&record))?;
        Ok(RunOutcome::Exited {
            id: record.id,
            code,
        })
    }

    /// Steps between launch and a running container.
    fn start(
        &self,
        parent: &mut ParentProcess,
        record: &mut ContainerRecord,
        options: &RunOptions,
    ) -> Result<()> {
        let cgroup = self.cgroup(record.id.as_str());
        cgroup.set(&options.resources)?;
        cgroup.apply(parent.pid())?;

        if let Some(network) = &options.network {
            let link = ContainerLink {
                id: record.id.as_str(),
                pid: parent.pid(),
                port_mapping: &options.port_mapping,
            };
            record.ip_address = Some(self.network.connect(network, link)?);
            record.network = Some(network.clone());
        }

        self.state.save(record)?;
        parent.send_command(&options.command)
    }

    /// Stops a running container: `SIGTERM`, then `SIGKILL` after
    /// [`STOP_GRACE_PERIOD`], then network and cgroup teardown.
    ///
    /// The record is marked stopped even if teardown fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist or is not running,
    /// the process cannot be signalled, or teardown fails.
    pub fn stop(&self, name: &str) -> Result<()> {
        self.stop_within(name, STOP_GRACE_PERIOD)
    }

    /// [`Self::stop`] with an explicit grace period.
    ///
    /// # Errors
    ///
    /// See [`Self::stop`].
    pub fn stop_within(&self, name: &str, grace: Duration) -> Result<()> {
        let mut record = self.state.load(name)?;
        let pid = match (record.status, record.pid) {
            (ContainerStatus::Running, Some(pid)) => pid,
            _ => {
                return Err(HullError::InvalidState {
                    message: format!("container {name} is not running"),
                });
            }
        };
        let exited = process_gone(pid);
        if exited {
            tracing::info!(name, pid, "container process already exited");
        } else {
            terminate(pid, grace)?;
        }

        let mut errors = Vec::new();
        if let Some((network, ip)) = record.network.as_deref().zip(record.ip_address) {
            let id = record.id.as_str();
            if let Err(e) = self.network.disconnect(network, id, ip, &record.port_mapping) {
                errors.push(e);
            }
        }
        if let Err(e) = self.cgroup(record.id.as_str()).destroy() {
            errors.push(e);
        }
        record.ip_address = None;
        if exited {
            record.mark_exited();
        } else {
            record.mark_stopped();
        }
        self.state.save(&record)?;
        HullError::collect(errors)?;
        tracing::info!(name, pid, "container stopped");
        Ok(())
    }

    /// Removes a stopped container: its workspace and its record.
    ///
    /// # Errors
    ///
    /// Returns [`HullError::InvalidState`] for a running container, or the
    /// first teardown failure; the record is kept in that case.
    pub fn remove(&self, name: &str) -> Result<()> {
        let record = self.state.load(name)?;
        if record.status == ContainerStatus::Running {
            return Err(HullError::InvalidState {
                message: format!("container {name} is running, stop it first"),
            });
        }
        self.release(&Release::of(&record))?;
        tracing::info!(name, "container removed");
        Ok(())
    }

    /// Runs `command` inside running container `name` and returns its exit
    /// code.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not running or `nsenter` cannot
    /// be started.
    pub fn exec(&self, name: &str, command: &[String]) -> Result<i32> {
        let record = self.state.load(name)?;
        match (record.status, record.pid) {
            (ContainerStatus::Running, Some(pid)) => crate::exec::exec_in_container(pid, command),
            _ => Err(HullError::InvalidState {
                message: format!("container {name} is not running"),
            }),
        }
    }

    /// Releases network, cgroup, workspace and record, in that order.
    /// Every step is attempted.
    fn release(&self, target: &Release<'_>) -> Result<()> {
        let mut errors = Vec::new();
        if let Some((network, ip)) = target.network {
            if let Err(e) = self.network.disconnect(network, target.id, ip, target.port_mapping) {
                errors.push(e);
            }
        }
        if let Err(e) = self.cgroup(target.id).destroy() {
            errors.push(e);
        }
        match self.workspace.teardown(target.name, target.volume) {
            Ok(()) => {
                if let Err(e) = self.state.delete(target.name) {
                    errors.push(e);
                }
            }
            Err(e) => errors.push(e),
        }
        HullError::collect(errors)
    }

    fn release_quietly(&self, target: &Release<'_>) {
        if let Err(e) = self.release(target) {
            tracing::warn!(name = target.name, error = %e, "cleanup after failed run incomplete");
        }
    }
}

/// Sends `SIGTERM` to `pid`, waits up to `grace` for it to go away and
/// then sends `SIGKILL` and waits for the process to disappear. A process
/// that is already gone is fine.
///
/// # Errors
///
/// Returns an error if a signal cannot be delivered for a reason other
/// than the process not existing, or if the process survives `SIGKILL`.
pub fn terminate(pid: u32, grace: Duration) -> Result<()> {
    let target = Pid::from_raw(i32::try_from(pid).map_err(|_| HullError::InvalidInput {
        message: format!("invalid pid {pid}"),
    })?);
    match kill(target, Signal::SIGTERM) {
        Err(Errno::ESRCH) => return Ok(()),
        Err(e) => return Err(HullError::syscall(format!("kill {pid}"), e)),
        Ok(()) => {}
    }
    if wait_gone(pid, grace) {
        tracing::debug!(pid, "process exited after SIGTERM");
        return Ok(());
    }
    tracing::warn!(pid, "grace period elapsed, sending SIGKILL");
    match kill(target, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => return Err(HullError::syscall(format!("kill {pid}"), e)),
    }
    if wait_gone(pid, KILL_WAIT) {
        Ok(())
    } else {
        Err(HullError::InvalidState {
            message: format!("process {pid} still present after SIGKILL"),
        })
    }
}

fn wait_gone(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if process_gone(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(STOP_POLL_INTERVAL);
    }
}

/// Whether `pid` no longer runs. A zombie counts as gone: it has left its
/// cgroup and only waits for its parent to reap it.
fn process_gone(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return true;
    };
    if kill(Pid::from_raw(raw), None) == Err(Errno::ESRCH) {
        return true;
    }
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            stat.rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next().map(|s| s == "Z"))
        })
        .unwrap_or(false)
}
