//! Unified error types for the hull workspace.
//!
//! Every library crate returns [`HullError`]; the CLI wraps it in
//! `anyhow` at the outermost layer.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum HullError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A permission or capability error.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// A system call failed.
    #[error("{operation} failed: {source}")]
    Syscall {
        /// Short description of the attempted operation.
        operation: String,
        /// Errno returned by the kernel.
        source: nix::errno::Errno,
    },

    /// An external program exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Command {
        /// Program and arguments that were run.
        program: String,
        /// Exit status description.
        status: String,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// A netlink request was rejected by the kernel.
    #[error("netlink error: {message}")]
    Netlink {
        /// Description including the kernel errno.
        message: String,
    },

    /// No free address is left in a subnet.
    #[error("no free address left in subnet {subnet}")]
    AddressExhausted {
        /// Subnet in CIDR notation.
        subnet: String,
    },

    /// The operation is not allowed in the resource's current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the state conflict.
        message: String,
    },

    /// User input is malformed.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of the malformed input.
        message: String,
    },

    /// Several independent steps failed.
    #[error("{}", JoinedErrors(.0))]
    Aggregate(Vec<HullError>),
}

struct JoinedErrors<'a>(&'a [HullError]);

impl fmt::Display for JoinedErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors: ", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl HullError {
    /// Builds an [`HullError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds an [`HullError::Syscall`] for the named operation, or
    /// [`HullError::PermissionDenied`] when the kernel refused it for lack
    /// of privilege.
    pub fn syscall(operation: impl Into<String>, source: nix::errno::Errno) -> Self {
        use nix::errno::Errno;

        let operation = operation.into();
        match source {
            Errno::EPERM | Errno::EACCES => Self::PermissionDenied {
                message: format!("{operation}: {source}"),
            },
            _ => Self::Syscall { operation, source },
        }
    }

    /// Folds the collected failures of a multi-step operation.
    ///
    /// No errors yields `Ok(())`, a single error is returned as is, and
    /// anything more becomes [`HullError::Aggregate`].
    ///
    /// # Errors
    ///
    /// Returns the folded error when `errors` is not empty.
    pub fn collect(mut errors: Vec<Self>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Aggregate(errors)),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, HullError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_empty_is_ok() {
        assert!(HullError::collect(Vec::new()).is_ok());
    }

    #[test]
    fn collect_single_error_is_unwrapped() {
        let err = HullError::collect(vec![HullError::NotFound {
            kind: "network",
            id: "br0".into(),
        }])
        .unwrap_err();
        assert!(matches!(err, HullError::NotFound { .. }));
    }

    #[test]
    fn collect_many_errors_keeps_all_messages() {
        let err = HullError::collect(vec![
            HullError::Config {
                message: "first".into(),
            },
            HullError::Config {
                message: "second".into(),
            },
        ])
        .unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("2 errors"));
        assert!(text.contains("first"));
        assert!(text.contains("second"));
    }

    #[test]
    fn privilege_errnos_become_permission_denied() {
        let err = HullError::syscall("mount overlay", nix::errno::Errno::EPERM);
        assert!(matches!(err, HullError::PermissionDenied { .. }));
        assert!(err.to_string().contains("mount overlay"));
        let err = HullError::syscall("unshare", nix::errno::Errno::EINVAL);
        assert!(matches!(err, HullError::Syscall { .. }));
    }
}
