// SPDX-License-Identifier: Apache-2.0

//! YAML cluster configuration with strict validation at startup.
//!
//! The raw file is deserialized first and then converted into a validated
//! `GuardConfig`. Any invalid field, a missing self entry or an unreadable
//! file is fatal: the daemon refuses to start on a bad configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{GuardError, GuardResult};
use crate::topology::{NodeAddress, Topology};
use crate::types::NodeId;

/// Raw per-node entry as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
struct RawNodeEntry {
    id: u32,
    host: String,
    #[serde(default = "default_outer_port")]
    port: u16,
}

/// Raw configuration file.
#[derive(Debug, Deserialize)]
struct RawGuardConfig {
    nodes: Vec<RawNodeEntry>,
    #[serde(default = "default_store_root")]
    store_root: PathBuf,
    #[serde(default = "default_ext_data_dir")]
    ext_data_dir: PathBuf,
    #[serde(default = "default_control_socket")]
    control_socket: PathBuf,
    #[serde(default = "default_inner_socket")]
    inner_socket: PathBuf,
    #[serde(default = "default_pid_refresh_secs")]
    pid_refresh_secs: u64,
    #[serde(default = "default_checkpoint_interval_secs")]
    checkpoint_interval_secs: u64,
    #[serde(default = "default_checkpoint_leader")]
    checkpoint_leader: u32,
    #[serde(default = "default_utility_timeout_secs")]
    utility_timeout_secs: u64,
    #[serde(default)]
    transfer_user: Option<String>,
}

fn default_outer_port() -> u16 {
    12345
}

fn default_store_root() -> PathBuf {
    PathBuf::from("/tmp/checkpoint_store")
}

fn default_ext_data_dir() -> PathBuf {
    PathBuf::from("/data/store")
}

fn default_control_socket() -> PathBuf {
    PathBuf::from("/tmp/checkpoint.server.sock")
}

fn default_inner_socket() -> PathBuf {
    PathBuf::from("/tmp/guard.sock")
}

fn default_pid_refresh_secs() -> u64 {
    5
}

fn default_checkpoint_interval_secs() -> u64 {
    5 * 60
}

fn default_checkpoint_leader() -> u32 {
    1
}

fn default_utility_timeout_secs() -> u64 {
    120
}

/// Validated, immutable daemon configuration.
///
/// Constructed once at startup and passed by reference into every component;
/// there is no mutation or reload API.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// This guard's own node id.
    pub self_id: NodeId,
    /// Process name used for PID discovery of the watched process.
    pub process_name: String,
    pub topology: Topology,
    /// Root directory holding checkpoint archives.
    pub store_root: PathBuf,
    /// External-data directory versioned with every snapshot.
    pub ext_data_dir: PathBuf,
    /// Unix socket of the watched process's private control channel.
    pub control_socket: PathBuf,
    /// Unix socket the inner listener binds.
    pub inner_socket: PathBuf,
    /// Port the outer listener binds (own entry in the topology).
    pub outer_port: u16,
    pub pid_refresh_interval: Duration,
    pub checkpoint_interval: Duration,
    /// Node that drives periodic checkpoints for the cluster.
    pub checkpoint_leader: NodeId,
    /// Timeout around criu/tar/rsync invocations.
    pub utility_timeout: Duration,
    /// Grace period after sending "disconnect" before dumping.
    pub disconnect_grace: Duration,
    /// Grace period after SIGKILL before unpacking.
    pub kill_grace: Duration,
    /// Remote user for replication pushes; current user when unset.
    pub transfer_user: Option<String>,
}

impl GuardConfig {
    /// Load and validate the configuration file for the given identity.
    pub fn load(
        path: impl AsRef<Path>,
        self_id: NodeId,
        process_name: impl Into<String>,
    ) -> GuardResult<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(GuardError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| GuardError::io("reading configuration file", e))?;

        Self::load_str(&content, self_id, process_name)
    }

    /// Load and validate from a YAML string.
    pub fn load_str(
        content: &str,
        self_id: NodeId,
        process_name: impl Into<String>,
    ) -> GuardResult<Self> {
        let raw: RawGuardConfig =
            serde_yaml::from_str(content).map_err(|e| GuardError::ConfigParse {
                message: format!("YAML parse error: {e}"),
            })?;

        Self::validate(raw, self_id, process_name.into())
    }

    fn validate(raw: RawGuardConfig, self_id: NodeId, process_name: String) -> GuardResult<Self> {
        if process_name.is_empty() {
            return Err(GuardError::InvalidConfig {
                field: "process_name",
                reason: "watched-process name cannot be empty".to_string(),
            });
        }

        let entries = raw
            .nodes
            .into_iter()
            .map(|n| {
                if n.host.is_empty() {
                    return Err(GuardError::InvalidConfig {
                        field: "host",
                        reason: format!("node {} has an empty host", n.id),
                    });
                }
                if n.port == 0 {
                    return Err(GuardError::InvalidConfig {
                        field: "port",
                        reason: format!("node {} declares port 0", n.id),
                    });
                }
                Ok((
                    NodeId::new(n.id),
                    NodeAddress {
                        host: n.host,
                        port: n.port,
                    },
                ))
            })
            .collect::<GuardResult<Vec<_>>>()?;

        let topology = Topology::new(entries)?;

        // A guard that is not in its own topology cannot serve anything.
        let outer_port = topology
            .address_of(self_id)
            .map_err(|_| GuardError::InvalidConfig {
                field: "nodes",
                reason: format!("self id {self_id} has no entry in the cluster configuration"),
            })?
            .port;

        if raw.pid_refresh_secs == 0 {
            return Err(GuardError::InvalidConfig {
                field: "pid_refresh_secs",
                reason: "must be greater than 0".to_string(),
            });
        }
        if raw.checkpoint_interval_secs == 0 {
            return Err(GuardError::InvalidConfig {
                field: "checkpoint_interval_secs",
                reason: "must be greater than 0".to_string(),
            });
        }
        if raw.utility_timeout_secs == 0 {
            return Err(GuardError::InvalidConfig {
                field: "utility_timeout_secs",
                reason: "must be greater than 0".to_string(),
            });
        }

        Ok(Self {
            self_id,
            process_name,
            topology,
            store_root: raw.store_root,
            ext_data_dir: raw.ext_data_dir,
            control_socket: raw.control_socket,
            inner_socket: raw.inner_socket,
            outer_port,
            pid_refresh_interval: Duration::from_secs(raw.pid_refresh_secs),
            checkpoint_interval: Duration::from_secs(raw.checkpoint_interval_secs),
            checkpoint_leader: NodeId::new(raw.checkpoint_leader),
            utility_timeout: Duration::from_secs(raw.utility_timeout_secs),
            disconnect_grace: Duration::from_secs(1),
            kill_grace: Duration::from_secs(1),
            transfer_user: raw.transfer_user,
        })
    }

    /// Whether this node drives the periodic checkpoint timer.
    pub fn is_checkpoint_leader(&self) -> bool {
        self.self_id == self.checkpoint_leader
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CONFIG: &str = r#"
nodes:
  - id: 1
    host: 10.22.1.1
  - id: 2
    host: 10.22.1.2
    port: 23456
store_root: /tmp/ck_store
checkpoint_leader: 2
"#;

    #[test]
    fn valid_config_loads() {
        let config = GuardConfig::load_str(VALID_CONFIG, NodeId::new(1), "redis-server").unwrap();
        assert_eq!(config.topology.len(), 2);
        assert_eq!(config.outer_port, 12345);
        assert_eq!(config.store_root, PathBuf::from("/tmp/ck_store"));
        assert_eq!(config.checkpoint_leader, NodeId::new(2));
        assert!(!config.is_checkpoint_leader());
        assert_eq!(config.pid_refresh_interval, Duration::from_secs(5));
    }

    #[test]
    fn own_port_comes_from_topology_entry() {
        let config = GuardConfig::load_str(VALID_CONFIG, NodeId::new(2), "redis-server").unwrap();
        assert_eq!(config.outer_port, 23456);
    }

    #[test]
    fn missing_self_entry_is_fatal() {
        let result = GuardConfig::load_str(VALID_CONFIG, NodeId::new(7), "redis-server");
        assert!(matches!(result, Err(GuardError::InvalidConfig { .. })));
    }

    #[test]
    fn empty_process_name_rejected() {
        assert!(GuardConfig::load_str(VALID_CONFIG, NodeId::new(1), "").is_err());
    }

    #[test]
    fn duplicate_node_ids_rejected() {
        let yaml = r#"
nodes:
  - id: 1
    host: a
  - id: 1
    host: b
"#;
        assert!(GuardConfig::load_str(yaml, NodeId::new(1), "x").is_err());
    }

    #[test]
    fn port_zero_rejected() {
        let yaml = r#"
nodes:
  - id: 1
    host: a
    port: 0
"#;
        assert!(GuardConfig::load_str(yaml, NodeId::new(1), "x").is_err());
    }

    #[test]
    fn garbage_yaml_is_parse_error() {
        let result = GuardConfig::load_str("nodes: [", NodeId::new(1), "x");
        assert!(matches!(result, Err(GuardError::ConfigParse { .. })));
    }

    #[test]
    fn missing_file_reports_path() {
        let result = GuardConfig::load("/nonexistent/guard.yaml", NodeId::new(1), "x");
        assert!(matches!(result, Err(GuardError::ConfigNotFound { .. })));
    }
}
