// SPDX-License-Identifier: Apache-2.0

//! Cluster topology: node id to network address mapping.
//!
//! Loaded once from the cluster configuration file at startup and immutable
//! for the daemon's lifetime. Reload is deliberately unsupported.

use std::collections::BTreeMap;

use crate::error::{GuardError, GuardResult};
use crate::types::NodeId;

/// Network address of one guard's outer listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    /// Base URL of the node's outer listener.
    pub fn http_base(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Ordered, immutable mapping from node id to address.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: BTreeMap<NodeId, NodeAddress>,
}

impl Topology {
    /// Build a topology from (id, address) entries, rejecting duplicates.
    pub fn new(entries: Vec<(NodeId, NodeAddress)>) -> GuardResult<Self> {
        let mut nodes = BTreeMap::new();
        for (id, addr) in entries {
            if nodes.insert(id, addr).is_some() {
                return Err(GuardError::InvalidConfig {
                    field: "nodes",
                    reason: format!("duplicate node id {id}"),
                });
            }
        }
        if nodes.is_empty() {
            return Err(GuardError::InvalidConfig {
                field: "nodes",
                reason: "at least one node must be declared".to_string(),
            });
        }
        Ok(Self { nodes })
    }

    /// Resolve a node id to its outer-listener address.
    pub fn address_of(&self, id: NodeId) -> GuardResult<&NodeAddress> {
        self.nodes.get(&id).ok_or(GuardError::UnknownNode(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// All members except the given one, in id order. Used for replication.
    pub fn peers_of(&self, id: NodeId) -> impl Iterator<Item = (NodeId, &NodeAddress)> {
        self.nodes
            .iter()
            .filter(move |(n, _)| **n != id)
            .map(|(n, a)| (*n, a))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
