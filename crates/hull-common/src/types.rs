//! Domain primitive types used across the hull workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of decimal digits in a generated container ID.
pub const CONTAINER_ID_LEN: usize = 10;

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from an existing string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random numeric container ID of [`CONTAINER_ID_LEN`] digits.
    #[must_use]
    pub fn generate() -> Self {
        let modulus = 10u128.pow(u32::try_from(CONTAINER_ID_LEN).unwrap_or(10));
        let value = uuid::Uuid::new_v4().as_u128() % modulus;
        Self(format!("{value:0width$}", width = CONTAINER_ID_LEN))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a container as persisted in its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// The init process is alive.
    Running,
    /// The container was stopped explicitly.
    Stopped,
    /// The init process exited on its own.
    Exited,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Resource limits requested for a container.
///
/// Every field uses the kernel's own textual syntax and an empty string
/// means "leave the controller default alone".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit, e.g. `100m` or `1073741824`.
    pub memory_limit: String,
    /// Relative CPU share weight, e.g. `512`.
    pub cpu_share: String,
    /// CPU list, e.g. `0-1,3`.
    pub cpu_set: String,
}

impl ResourceConfig {
    /// Returns the memory limit if one was requested.
    #[must_use]
    pub fn memory_limit(&self) -> Option<&str> {
        non_empty(&self.memory_limit)
    }

    /// Returns the CPU share weight if one was requested.
    #[must_use]
    pub fn cpu_share(&self) -> Option<&str> {
        non_empty(&self.cpu_share)
    }

    /// Returns the CPU list if one was requested.
    #[must_use]
    pub fn cpu_set(&self) -> Option<&str> {
        non_empty(&self.cpu_set)
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_is_fixed_length_numeric() {
        for _ in 0..32 {
            let id = ContainerId::generate();
            assert_eq!(id.as_str().len(), CONTAINER_ID_LEN);
            assert!(id.as_str().chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&ContainerStatus::Stopped).unwrap();
        assert_eq!(json, "\"stopped\"");
    }

    #[test]
    fn empty_resource_fields_are_unset() {
        let res = ResourceConfig {
            memory_limit: String::new(),
            cpu_share: "512".into(),
            cpu_set: "  ".into(),
        };
        assert_eq!(res.memory_limit(), None);
        assert_eq!(res.cpu_share(), Some("512"));
        assert_eq!(res.cpu_set(), None);
    }
}
