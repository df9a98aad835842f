//! System-wide constants and default paths.

/// Default directory for runtime state (container records, network registry).
pub const DEFAULT_RUN_DIR: &str = "/var/run/hull";

/// Default directory for filesystem layers and image archives.
pub const DEFAULT_DATA_DIR: &str = "/var/lib/hull";

/// Name of the per-container record file.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Name of the per-container log file used in detached mode.
pub const LOG_FILE_NAME: &str = "container.log";

/// Name of the IPAM allocation table file.
pub const IPAM_FILE_NAME: &str = "subnet.json";

/// Parent directory of every per-container cgroup.
pub const CGROUP_PARENT: &str = "hull";

/// Sentinel argument that re-enters the binary as the container init process.
pub const INIT_ARG: &str = "init";

/// File descriptor on which the init process receives its command.
pub const COMMAND_PIPE_FD: i32 = 3;

/// Fallback `PATH` used by the init process when resolving the command.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
