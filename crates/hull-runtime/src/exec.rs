//! Namespace joining for executing commands in running containers.

use std::process::Command;

use hull_common::error::{HullError, Result};

/// Program used to join the namespaces.
pub const NSENTER: &str = "nsenter";

/// Builds the `nsenter` argument list for running `command` in the
/// namespaces and root of process `pid`.
#[must_use]
pub fn nsenter_args(pid: u32, command: &[String]) -> Vec<String> {
    let mut args = vec!["--target".to_owned(), pid.to_string()];
    args.extend(
        ["--mount", "--uts", "--ipc", "--net", "--pid", "--root", "--wd", "--"]
            .into_iter()
            .map(str::to_owned),
    );
    args.extend(command.iter().cloned());
    args
}

/// Runs `command` inside the namespaces of process `pid` with the caller's
/// standard streams and returns its exit code.
///
/// Uses `nsenter` to enter the target's mount, UTS, IPC, network and PID
/// namespaces.
///
/// # Errors
///
/// Returns an error if the command is empty or `nsenter` cannot be started.
pub fn exec_in_container(pid: u32, command: &[String]) -> Result<i32> {
    if command.is_empty() {
        return Err(HullError::InvalidInput {
            message: "exec command is empty".into(),
        });
    }
    tracing::info!(pid, cmd = ?command, "exec into container");
    let status = Command::new(NSENTER)
        .args(nsenter_args(pid, command))
        .status()
        .map_err(|e| HullError::io(NSENTER, e))?;
    Ok(status.code().unwrap_or(-1))
}
