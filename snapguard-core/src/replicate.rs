// SPDX-License-Identifier: Apache-2.0

//! Replication of the snapshot store to peer nodes.
//!
//! After every committed archive the whole store root is mirrored to each
//! peer's storage parent with delete-on-destination semantics, so the
//! destination tree exactly mirrors the source. One transfer per peer;
//! a failing peer is logged and never blocks the others or the checkpoint.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GuardConfig;
use crate::subprocess;
use crate::types::NodeId;

pub struct ReplicationPublisher {
    config: Arc<GuardConfig>,
    utility_timeout: Duration,
}

impl ReplicationPublisher {
    pub fn new(config: Arc<GuardConfig>) -> Self {
        let utility_timeout = config.utility_timeout;
        Self {
            config,
            utility_timeout,
        }
    }

    /// Mirror the store root to every peer. Returns how many peers accepted
    /// the transfer.
    pub async fn publish(&self) -> usize {
        let mut pushed = 0;
        for (peer, addr) in self.config.topology.peers_of(self.config.self_id) {
            let args = self.transfer_args(&addr.host);
            match subprocess::run_checked("rsync", args, self.utility_timeout).await {
                Ok(_) => {
                    tracing::info!(peer = peer.value(), host = %addr.host, "store mirrored to peer");
                    pushed += 1;
                }
                Err(e) => {
                    tracing::warn!(peer = peer.value(), host = %addr.host, error = %e,
                        "replication to peer failed");
                }
            }
        }
        pushed
    }

    /// Argument vector for one peer transfer. Destination is the parent of
    /// the store root, so the mirrored tree lands at the same path remotely.
    fn transfer_args(&self, host: &str) -> Vec<OsString> {
        let dest_parent: PathBuf = self
            .config
            .store_root
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("/"));
        let target = match &self.config.transfer_user {
            Some(user) => format!("{user}@{host}:{}", dest_parent.display()),
            None => format!("{host}:{}", dest_parent.display()),
        };
        vec![
            OsString::from("-a"),
            OsString::from("--delete"),
            self.config.store_root.clone().into_os_string(),
            OsString::from(target),
        ]
    }

    /// Peers this node would push to, in id order. Exposed for wiring logs.
    pub fn peer_ids(&self) -> Vec<NodeId> {
        self.config
            .topology
            .peers_of(self.config.self_id)
            .map(|(n, _)| n)
            .collect()
    }
}
