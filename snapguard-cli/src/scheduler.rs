// SPDX-License-Identifier: Apache-2.0

//! Periodic duties: PID rediscovery on every node, checkpoint rounds on the
//! leader. Both loops sleep for the full interval after each pass, so a slow
//! checkpoint delays the next one instead of stacking up behind it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

use snapguard_core::{GuardError, LivenessTracker, SnapshotExecutor};

/// Rediscover the watched process's PID at a fixed cadence.
pub async fn run_pid_refresh(
    liveness: Arc<LivenessTracker>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = sleep(interval) => {
                liveness.refresh();
            }
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("pid refresh loop stopped");
}

/// Leader-only loop driving a checkpoint every interval.
pub async fn run_leader_checkpoints(
    executor: Arc<SnapshotExecutor>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = sleep(interval) => {
                match executor.checkpoint().await {
                    Ok(round) => tracing::info!(%round, "periodic checkpoint finished"),
                    // Another command beat the timer to the slot; the next
                    // tick tries again.
                    Err(GuardError::OperationInProgress) => {
                        tracing::info!("periodic checkpoint skipped, operation already running");
                    }
                    Err(e) => tracing::error!(error = %e, "periodic checkpoint failed"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("leader checkpoint loop stopped");
}
