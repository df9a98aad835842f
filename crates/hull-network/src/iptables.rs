//! NAT rules installed through the `iptables` binary.

use std::net::Ipv4Addr;
use std::process::Command;

use hull_common::error::{HullError, Result};
use ipnetwork::Ipv4Network;

/// A rule in the `nat` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NatRule {
    /// Source-NAT traffic from `subnet` leaving through anything but `bridge`.
    Masquerade {
        /// Container subnet.
        subnet: Ipv4Network,
        /// Bridge interface of the network.
        bridge: String,
    },
    /// Forward TCP `host_port` on the host to `destination:container_port`.
    Dnat {
        /// Port on the host.
        host_port: u16,
        /// Container address.
        destination: Ipv4Addr,
        /// Port inside the container.
        container_port: u16,
    },
}

impl NatRule {
    /// Masquerade rule for a bridge network.
    #[must_use]
    pub fn masquerade(subnet: Ipv4Network, bridge: impl Into<String>) -> Self {
        Self::Masquerade {
            subnet,
            bridge: bridge.into(),
        }
    }

    /// Chain the rule lives in.
    #[must_use]
    pub const fn chain(&self) -> &'static str {
        match self {
            Self::Masquerade { .. } => "POSTROUTING",
            Self::Dnat { .. } => "PREROUTING",
        }
    }

    /// Match and target arguments, without table, action or chain.
    #[must_use]
    pub fn rule_args(&self) -> Vec<String> {
        match self {
            Self::Masquerade { subnet, bridge } => vec![
                "-s".into(),
                subnet.to_string(),
                "!".into(),
                "-o".into(),
                bridge.clone(),
                "-j".into(),
                "MASQUERADE".into(),
            ],
            Self::Dnat {
                host_port,
                destination,
                container_port,
            } => vec![
                "-p".into(),
                "tcp".into(),
                "-m".into(),
                "tcp".into(),
                "--dport".into(),
                host_port.to_string(),
                "-j".into(),
                "DNAT".into(),
                "--to-destination".into(),
                format!("{destination}:{container_port}"),
            ],
        }
    }

    fn command_args(&self, action: &str) -> Vec<String> {
        let mut args = vec![
            "-t".to_owned(),
            "nat".to_owned(),
            action.to_owned(),
            self.chain().to_owned(),
        ];
        args.extend(self.rule_args());
        args
    }
}

/// Runs `iptables` for rule changes.
#[derive(Debug, Clone)]
pub struct Iptables {
    program: String,
}

impl Default for Iptables {
    fn default() -> Self {
        Self {
            program: "iptables".into(),
        }
    }
}

impl Iptables {
    /// Uses an explicit binary instead of `iptables` from `PATH`.
    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Appends `rule`.
    ///
    /// # Errors
    ///
    /// Returns an error if `iptables` cannot be run or rejects the rule.
    pub fn append(&self, rule: &NatRule) -> Result<()> {
        self.run(&rule.command_args("-A"))?;
        tracing::debug!(rule = ?rule, "iptables rule added");
        Ok(())
    }

    /// Deletes `rule` if it is installed. Returns whether it was.
    ///
    /// # Errors
    ///
    /// Returns an error if `iptables` cannot be run or the delete fails.
    pub fn remove(&self, rule: &NatRule) -> Result<bool> {
        if !self.exists(rule)? {
            return Ok(false);
        }
        self.run(&rule.command_args("-D"))?;
        tracing::debug!(rule = ?rule, "iptables rule removed");
        Ok(true)
    }

    /// Checks whether `rule` is installed.
    ///
    /// # Errors
    ///
    /// Returns an error if `iptables` cannot be run.
    pub fn exists(&self, rule: &NatRule) -> Result<bool> {
        let output = Command::new(&self.program)
            .args(rule.command_args("-C"))
            .output()
            .map_err(|e| HullError::io(&self.program, e))?;
        Ok(output.status.success())
    }

    fn run(&self, args: &[String]) -> Result<()> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| HullError::io(&self.program, e))?;
        if output.status.success() {
            return Ok(());
        }
        Err(HullError::Command {
            program: format!("{} {}", self.program, args.join(" ")),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}
