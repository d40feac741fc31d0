// SPDX-License-Identifier: Apache-2.0

//! Newtype wrappers for the guard's core identifiers.
//!
//! Following the "Newtype" pattern so that node ids, checkpoint rounds and
//! process ids cannot be mixed up at call sites. Validation happens at
//! construction time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one cluster member. Small integer, unique per cluster,
/// assigned by the operator in the cluster configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Monotonically increasing, node-local checkpoint identifier.
///
/// Rounds are assigned by scanning existing archives and taking max+1, so no
/// two archives on one node ever share a round. Peers checkpoint
/// independently and may diverge in numbering; that is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointRound(u64);

impl CheckpointRound {
    pub const ZERO: CheckpointRound = CheckpointRound(0);

    pub fn new(round: u64) -> Self {
        Self(round)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The round a checkpoint committed after this one would get.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for CheckpointRound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CheckpointRound {
    fn from(round: u64) -> Self {
        Self(round)
    }
}

/// OS process id of the watched process. Must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(i32);

impl Pid {
    /// Create a Pid, rejecting zero and negative values.
    pub fn new(pid: i32) -> Option<Self> {
        if pid > 0 {
            Some(Self(pid))
        } else {
            None
        }
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_next_increments() {
        assert_eq!(CheckpointRound::ZERO.next(), CheckpointRound::new(1));
        assert_eq!(CheckpointRound::new(41).next().value(), 42);
    }

    #[test]
    fn round_ordering() {
        assert!(CheckpointRound::new(2) < CheckpointRound::new(5));
    }

    #[test]
    fn pid_rejects_non_positive() {
        assert!(Pid::new(0).is_none());
        assert!(Pid::new(-1).is_none());
        assert_eq!(Pid::new(1234).unwrap().value(), 1234);
    }
}
