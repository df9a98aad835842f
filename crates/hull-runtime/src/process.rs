//! Launching the isolated container init.
//!
//! The launcher clones a child into fresh namespaces and has it re-execute
//! the current binary as `<program> init`. Two pipes connect the sides:
//!
//! - a sync pipe the child blocks on until the parent has written its
//!   uid/gid maps, since nothing in the child may run as an unmapped user;
//! - the command pipe, whose read end becomes fd 3 of the init and whose
//!   write end stays with the parent for [`ParentProcess::send_command`].
//!
//! Between `clone(2)` and `execv(2)` the child only makes raw libc calls on
//! data prepared beforehand.

use std::ffi::{CString, OsStr};
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use hull_common::config::HullConfig;
use hull_common::constants::{COMMAND_PIPE_FD, INIT_ARG};
use hull_common::error::{HullError, Result};
use hull_core::namespace::NamespaceConfig;
use hull_core::namespace::user::{IdMap, write_uid_gid_map};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{Pid, getgid, getuid, pipe2};

use crate::logs;
use crate::workspace::WorkspaceManager;

/// Binary re-executed as the container init.
pub const SELF_EXE: &str = "/proc/self/exe";

const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// What to launch.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    /// Container name; keys the workspace and the log directory.
    pub name: &'a str,
    /// Image providing the base layer.
    pub image: &'a str,
    /// Raw `host:container` volume spec, or empty.
    pub volume: &'a str,
    /// Share the caller's terminal instead of logging to a file.
    pub tty: bool,
}

/// Parent→init command channel.
#[derive(Debug)]
pub struct CommandPipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl CommandPipe {
    /// Opens a new close-on-exec pipe.
    ///
    /// # Errors
    ///
    /// Returns an error if `pipe2(2)` fails.
    pub fn new() -> Result<Self> {
        let (read, write) = pipe2(OFlag::O_CLOEXEC).map_err(|e| HullError::syscall("pipe", e))?;
        Ok(Self { read, write })
    }
}

/// Spawns container init processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: HullConfig,
    namespaces: NamespaceConfig,
    program: PathBuf,
}

impl ProcessLauncher {
    /// Launcher re-executing [`SELF_EXE`] in every namespace.
    #[must_use]
    pub fn new(config: &HullConfig) -> Self {
        Self {
            config: config.clone(),
            namespaces: NamespaceConfig::default(),
            program: PathBuf::from(SELF_EXE),
        }
    }

    /// Restricts which namespaces the child gets.
    #[must_use]
    pub const fn with_namespaces(mut self, namespaces: NamespaceConfig) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// Executes `program` instead of [`SELF_EXE`].
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Launches the init of a new container.
    ///
    /// Order: command pipe, log file (detached only), workspace, clone.
    /// The returned handle's child is blocked reading its command.
    ///
    /// # Errors
    ///
    /// Any failure aborts the launch and no handle is returned. A failed
    /// clone tears the freshly built workspace down again.
    pub fn launch(
        &self,
        request: &LaunchRequest<'_>,
        workspace: &WorkspaceManager,
    ) -> Result<ParentProcess> {
        let pipe = CommandPipe::new()?;
        let log = if request.tty {
            None
        } else {
            Some(logs::create_log(&logs::log_path(&self.config, request.name))?)
        };
        let root = workspace.create(request.image, request.name, request.volume)?;

        match self.spawn(&root.merged, pipe, log.as_ref()) {
            Ok(parent) => {
                tracing::info!(
                    name = request.name,
                    pid = parent.pid(),
                    tty = request.tty,
                    "container init launched"
                );
                Ok(parent)
            }
            Err(e) => {
                if let Err(cleanup) = workspace.teardown(request.name, request.volume) {
                    tracing::warn!(name = request.name, error = %cleanup, "workspace rollback incomplete");
                }
                Err(e)
            }
        }
    }

    /// Clones the child with `root` as its working directory.
    fn spawn(&self, root: &Path, pipe: CommandPipe, log: Option<&File>) -> Result<ParentProcess> {
        let program = c_string(self.program.as_os_str())?;
        let init_arg = c_string(OsStr::new(INIT_ARG))?;
        let (sync_read, sync_write) =
            pipe2(OFlag::O_CLOEXEC).map_err(|e| HullError::syscall("pipe", e))?;
        let setup = ChildSetup {
            sync_read: sync_read.as_raw_fd(),
            command_read: pipe.read.as_raw_fd(),
            log: log.map(AsRawFd::as_raw_fd),
            root: c_string(root.as_os_str())?,
            argv: [program.as_ptr(), init_arg.as_ptr(), std::ptr::null()],
            program: &program,
        };

        let mut stack = vec![0u8; CHILD_STACK_SIZE];
        // SAFETY: without CLONE_VM the child gets its own copy of the address
        // space, so `setup` and the strings it points into stay valid there.
        // The child only performs async-signal-safe libc calls before exec.
        let pid = unsafe {
            nix::sched::clone(
                Box::new(|| child_entry(&setup)),
                &mut stack,
                self.namespaces.clone_flags(),
                Some(Signal::SIGCHLD as libc::c_int),
            )
        }
        .map_err(|e| HullError::syscall("clone", e))?;
        drop(sync_read);
        drop(pipe.read);

        let parent = ParentProcess {
            pid,
            command: Some(File::from(pipe.write)),
        };
        if let Err(e) = self.release_child(&parent, sync_write) {
            parent.kill();
            return Err(e);
        }
        Ok(parent)
    }

    /// Writes the id maps (if the child has a user namespace) and lets the
    /// child continue.
    fn release_child(&self, parent: &ParentProcess, sync_write: OwnedFd) -> Result<()> {
        if self.namespaces.user {
            write_uid_gid_map(
                parent.pid(),
                IdMap::root_to(getuid().as_raw()),
                IdMap::root_to(getgid().as_raw()),
            )?;
        }
        File::from(sync_write)
            .write_all(&[1])
            .map_err(|e| HullError::io("sync pipe", e))
    }
}

fn c_string(s: &OsStr) -> Result<CString> {
    CString::new(s.as_bytes()).map_err(|_| HullError::InvalidInput {
        message: format!("{} contains a NUL byte", s.to_string_lossy()),
    })
}

/// Everything the child needs, resolved before `clone(2)`.
struct ChildSetup<'a> {
    sync_read: RawFd,
    command_read: RawFd,
    log: Option<RawFd>,
    root: CString,
    program: &'a CString,
    argv: [*const libc::c_char; 3],
}

/// Body of the cloned child. Returns only on failure.
fn child_entry(setup: &ChildSetup<'_>) -> isize {
    let mut byte = 0u8;
    // SAFETY: one-byte read into a live stack variable.
    if unsafe { libc::read(setup.sync_read, (&raw mut byte).cast(), 1) } != 1 {
        return 1;
    }
    // SAFETY: descriptor and path syscalls on values owned by this process;
    // `argv` is NULL-terminated and points into strings kept alive by the
    // parent frame this address space was copied from.
    unsafe {
        if let Some(log) = setup.log {
            if libc::dup2(log, libc::STDOUT_FILENO) < 0 || libc::dup2(log, libc::STDERR_FILENO) < 0
            {
                return 1;
            }
        }
        let handed_over = if setup.command_read == COMMAND_PIPE_FD {
            libc::fcntl(COMMAND_PIPE_FD, libc::F_SETFD, 0)
        } else {
            libc::dup2(setup.command_read, COMMAND_PIPE_FD)
        };
        if handed_over < 0 || libc::chdir(setup.root.as_ptr()) < 0 {
            return 1;
        }
        let _ = libc::execv(setup.program.as_ptr(), setup.argv.as_ptr());
    }
    1
}

/// Parent-side handle on a launched init.
#[derive(Debug)]
pub struct ParentProcess {
    pid: Pid,
    command: Option<File>,
}

impl ParentProcess {
    /// Host pid of the init.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid.as_raw().unsigned_abs()
    }

    /// Sends the user command to the init and closes the pipe.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty command, a second call, or a failed
    /// write (for instance because the child already died).
    pub fn send_command(&mut self, argv: &[String]) -> Result<()> {
        if argv.is_empty() {
            return Err(HullError::InvalidInput {
                message: "container command is empty".into(),
            });
        }
        let mut pipe = self.command.take().ok_or_else(|| HullError::InvalidState {
            message: "command already sent".into(),
        })?;
        let line = argv.join(" ");
        writeln!(pipe, "{line}").map_err(|e| HullError::io("command pipe", e))?;
        tracing::debug!(pid = self.pid(), command = %line, "command sent to init");
        Ok(())
    }

    /// Waits for the init to exit and returns its exit code
    /// (`128 + signal` when killed by a signal).
    ///
    /// # Errors
    ///
    /// Returns an error if `waitpid(2)` fails.
    pub fn wait(&self) -> Result<i32> {
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(code),
                Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => return Err(HullError::syscall("waitpid", e)),
            }
        }
    }

    /// Kills the init and reaps it. Failures are only logged.
    pub fn kill(&self) {
        if let Err(e) = kill(self.pid, Signal::SIGKILL) {
            tracing::warn!(pid = self.pid(), error = %e, "could not kill init");
            return;
        }
        if let Err(e) = waitpid(self.pid, None) {
            tracing::warn!(pid = self.pid(), error = %e, "could not reap init");
        }
    }
}
