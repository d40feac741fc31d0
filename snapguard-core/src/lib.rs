//! snapguard core library
//!
//! Per-node guard for a replicated, stateful process: PID discovery,
//! versioned snapshot archives around an external process-snapshot utility,
//! resource packing, peer replication, and command routing between nodes.

pub mod config;
pub mod control;
pub mod error;
pub mod executor;
pub mod liveness;
pub mod pack;
pub mod replicate;
pub mod router;
pub mod store;
pub mod subprocess;
pub mod topology;
pub mod types;

// Re-export commonly used types
pub use config::GuardConfig;
pub use error::{GuardError, GuardResult};
pub use executor::{Phase, SnapshotExecutor};
pub use liveness::LivenessTracker;
pub use router::{Command, CommandRouter, DispatchOutcome, Route};
pub use store::SnapshotStore;
pub use topology::{NodeAddress, Topology};
pub use types::{CheckpointRound, NodeId, Pid};
