//! The container init, run as the hidden `init` subcommand.
//!
//! It starts inside the namespaces the launcher created, with the union
//! mount as its working directory and the command pipe on fd 3. It reads
//! the command, moves its root onto the union mount, mounts a fresh
//! `/proc` and replaces itself with the command.

use std::convert::Infallible;
use std::ffi::CString;
use std::fs::File;
use std::io::Read;
use std::os::fd::FromRawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use hull_common::constants::{COMMAND_PIPE_FD, DEFAULT_PATH};
use hull_common::error::{HullError, Result};
use hull_core::filesystem::mount::{make_mounts_private, mount_proc};
use hull_core::filesystem::pivot_root::pivot_root;

/// Runs the container init. Only returns on failure.
///
/// # Errors
///
/// Returns an error if the command cannot be read, the mount namespace
/// cannot be prepared, or the program cannot be executed.
pub fn run() -> Result<Infallible> {
    let command = read_command()?;
    let argv = parse_command(&command)?;
    tracing::debug!(command = %command.trim(), "init received command");

    let root = std::env::current_dir().map_err(|e| HullError::io(".", e))?;
    prepare_root(&root)?;

    let search_path = std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_owned());
    let program = resolve_program(&argv[0], &search_path)?;
    exec(&program, &argv)
}

/// Reads the whole command sent by the parent on [`COMMAND_PIPE_FD`].
fn read_command() -> Result<String> {
    // SAFETY: the launcher placed the read end of the command pipe at this
    // descriptor and nothing else in the init refers to it.
    let mut pipe = unsafe { File::from_raw_fd(COMMAND_PIPE_FD) };
    let mut command = String::new();
    let _ = pipe
        .read_to_string(&mut command)
        .map_err(|e| HullError::io("command pipe", e))?;
    Ok(command)
}

/// Splits the command on whitespace.
///
/// # Errors
///
/// Returns [`HullError::InvalidInput`] if nothing but whitespace was sent.
pub fn parse_command(command: &str) -> Result<Vec<String>> {
    let argv: Vec<String> = command.split_whitespace().map(str::to_owned).collect();
    if argv.is_empty() {
        return Err(HullError::InvalidInput {
            message: "init received an empty command".into(),
        });
    }
    Ok(argv)
}

fn prepare_root(root: &Path) -> Result<()> {
    make_mounts_private()?;
    pivot_root(root)?;
    mount_proc()?;
    tracing::debug!(root = %root.display(), "container root prepared");
    Ok(())
}

/// Finds `name` on `search_path`, or checks it directly when it contains a
/// slash.
///
/// # Errors
///
/// Returns [`HullError::NotFound`] if no executable matches.
pub fn resolve_program(name: &str, search_path: &str) -> Result<PathBuf> {
    which::which_in(name, Some(search_path), "/").map_err(|_| HullError::NotFound {
        kind: "program",
        id: name.to_owned(),
    })
}

fn exec(program: &Path, argv: &[String]) -> Result<Infallible> {
    let invalid = |what: &str| HullError::InvalidInput {
        message: format!("{what} contains a NUL byte"),
    };
    let path = CString::new(program.as_os_str().as_bytes()).map_err(|_| invalid("program"))?;
    let args = argv
        .iter()
        .map(|a| CString::new(a.as_str()).map_err(|_| invalid("argument")))
        .collect::<Result<Vec<_>>>()?;
    nix::unistd::execv(&path, &args)
        .map_err(|e| HullError::syscall(format!("execv {}", program.display()), e))
}
