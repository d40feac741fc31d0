// SPDX-License-Identifier: Apache-2.0

//! Checkpoint/restore orchestration around the external snapshot utility.
//!
//! Checkpoint path: Idle → Disconnecting → Dumping → Packing → Archiving →
//! Replicating → Idle. Restore path: Idle → Extracting → Terminating →
//! Unpacking → Restoring → Reconnecting → Idle. Each phase advances only on
//! success of its step; any failure cleans up the staging directory and
//! reports the error, never retrying within the same invocation.
//!
//! Both paths signal, kill or restart the same OS process, so at most one
//! operation runs at a time per node: the operation slot is a try-locked
//! mutex and a busy slot yields `OperationInProgress`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use nix::sys::signal::{kill, Signal};
use tempfile::TempDir;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::GuardConfig;
use crate::control::{ControlChannel, ControlCommand};
use crate::error::{GuardError, GuardResult};
use crate::liveness::LivenessTracker;
use crate::pack::ResourcePacker;
use crate::replicate::ReplicationPublisher;
use crate::store::SnapshotStore;
use crate::subprocess;
use crate::types::{CheckpointRound, Pid};

/// Where the operation currently is. Purely observational; transitions are
/// driven by the sequential steps below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    // checkpoint path
    Disconnecting,
    Dumping,
    Packing,
    Archiving,
    Replicating,
    // restore path
    Extracting,
    Terminating,
    Unpacking,
    Restoring,
    Reconnecting,
}

pub struct SnapshotExecutor {
    config: Arc<GuardConfig>,
    liveness: Arc<LivenessTracker>,
    store: SnapshotStore,
    packer: ResourcePacker,
    control: ControlChannel,
    publisher: ReplicationPublisher,
    criu: PathBuf,
    op_slot: Mutex<()>,
    phase: RwLock<Phase>,
}

impl SnapshotExecutor {
    pub fn new(config: Arc<GuardConfig>, liveness: Arc<LivenessTracker>) -> GuardResult<Self> {
        let store = SnapshotStore::open(&config.store_root, config.utility_timeout)?;
        let packer = ResourcePacker::new(&config.ext_data_dir);
        let control = ControlChannel::new(&config.control_socket);
        let publisher = ReplicationPublisher::new(Arc::clone(&config));
        let criu = find_criu();

        Ok(Self {
            config,
            liveness,
            store,
            packer,
            control,
            publisher,
            criu,
            op_slot: Mutex::new(()),
            phase: RwLock::new(Phase::Idle),
        })
    }

    pub fn phase(&self) -> Phase {
        *self.phase.read().unwrap()
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Wait until no operation is running and hold the slot. Used by the
    /// shutdown path to let an in-flight operation finish before exit.
    pub async fn wait_idle(&self) -> MutexGuard<'_, ()> {
        self.op_slot.lock().await
    }

    /// Checkpoint the watched process and replicate the archive.
    ///
    /// The dump leaves the watched process stopped, so a successful
    /// checkpoint always ends by restoring the round it just wrote, bringing
    /// the process back with a fresh PID.
    pub async fn checkpoint(&self) -> GuardResult<CheckpointRound> {
        let _slot = self
            .op_slot
            .try_lock()
            .map_err(|_| GuardError::OperationInProgress)?;

        let round = self.run_checkpoint().await?;
        self.run_restore(round).await?;
        Ok(round)
    }

    /// Restore from the newest archive whose round does not exceed
    /// `requested`. Returns the round actually restored.
    pub async fn restore(&self, requested: CheckpointRound) -> GuardResult<CheckpointRound> {
        let _slot = self
            .op_slot
            .try_lock()
            .map_err(|_| GuardError::OperationInProgress)?;

        self.run_restore(requested).await
    }

    async fn run_checkpoint(&self) -> GuardResult<CheckpointRound> {
        let result = self.checkpoint_steps().await;
        self.set_phase(Phase::Idle);
        if let Err(e) = &result {
            tracing::error!(error = %e, "checkpoint failed");
        }
        result
    }

    async fn checkpoint_steps(&self) -> GuardResult<CheckpointRound> {
        self.set_phase(Phase::Disconnecting);
        self.control.send(ControlCommand::Disconnect).await;
        tokio::time::sleep(self.config.disconnect_grace).await;

        // The operation fixes its PID snapshot here; a concurrent timer
        // refresh must not swap identities mid-dump.
        let pid = self.liveness.refresh().ok_or(GuardError::PidUnavailable)?;

        let staging = self.staging_dir("snapguard-ck-")?;

        self.set_phase(Phase::Dumping);
        self.packer.index_descriptors(staging.path(), pid)?;
        self.criu_dump(staging.path(), pid).await?;

        self.set_phase(Phase::Packing);
        self.packer.pack_resources(staging.path())?;

        self.set_phase(Phase::Archiving);
        let round = self.store.next_round()?;
        self.store.commit(staging.path(), round).await?;

        self.set_phase(Phase::Replicating);
        let pushed = self.publisher.publish().await;
        tracing::info!(round = round.value(), peers = pushed, "checkpoint replicated");

        Ok(round)
    }

    async fn run_restore(&self, requested: CheckpointRound) -> GuardResult<CheckpointRound> {
        let result = self.restore_steps(requested).await;
        self.set_phase(Phase::Idle);
        match &result {
            Ok(round) => {
                tracing::info!(requested = requested.value(), round = round.value(),
                    "restore complete")
            }
            Err(e) => tracing::error!(requested = requested.value(), error = %e, "restore failed"),
        }
        result
    }

    async fn restore_steps(&self, requested: CheckpointRound) -> GuardResult<CheckpointRound> {
        self.set_phase(Phase::Extracting);
        let round = self.store.nearest_round(requested)?;
        let staging = self.staging_dir("snapguard-rs-")?;
        self.store.extract_into(round, staging.path()).await?;

        self.set_phase(Phase::Terminating);
        self.liveness.refresh();
        if let Some(pid) = self.liveness.current() {
            terminate(pid);
        }
        tokio::time::sleep(self.config.kill_grace).await;

        self.set_phase(Phase::Unpacking);
        self.packer.unpack(staging.path())?;

        self.set_phase(Phase::Restoring);
        self.criu_restore(staging.path()).await?;

        // The restored process is a new OS process; pick up its identity.
        self.liveness.refresh();

        self.set_phase(Phase::Reconnecting);
        self.control.send(ControlCommand::Reconnect).await;

        Ok(round)
    }

    async fn criu_dump(&self, staging: &Path, pid: Pid) -> GuardResult<()> {
        let args: Vec<OsString> = vec![
            "dump".into(),
            "-v4".into(),
            "--file-locks".into(),
            "-o".into(),
            "dump.log".into(),
            "-D".into(),
            staging.into(),
            "-t".into(),
            pid.to_string().into(),
        ];
        subprocess::run_checked_at("criu", self.criu.as_os_str(), args, self.config.utility_timeout)
            .await?;
        tracing::info!(pid = pid.value(), "process image dumped");
        Ok(())
    }

    async fn criu_restore(&self, staging: &Path) -> GuardResult<()> {
        let args: Vec<OsString> = vec![
            "restore".into(),
            "-v4".into(),
            "--file-locks".into(),
            "-o".into(),
            "restore.log".into(),
            "-d".into(),
            "-D".into(),
            staging.into(),
        ];
        subprocess::run_checked_at("criu", self.criu.as_os_str(), args, self.config.utility_timeout)
            .await?;
        Ok(())
    }

    /// Staging directory for one operation. Removed unconditionally when the
    /// handle drops, success or failure.
    fn staging_dir(&self, prefix: &str) -> GuardResult<TempDir> {
        tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .map_err(|e| GuardError::io("creating staging directory", e))
    }

    fn set_phase(&self, phase: Phase) {
        let mut current = self.phase.write().unwrap();
        if *current != phase {
            tracing::debug!(from = ?*current, to = ?phase, "phase transition");
            *current = phase;
        }
    }
}

/// SIGKILL the watched process. A process that is already gone is fine.
fn terminate(pid: Pid) {
    match kill(nix::unistd::Pid::from_raw(pid.value()), Signal::SIGKILL) {
        Ok(()) => tracing::info!(pid = pid.value(), "watched process terminated"),
        Err(nix::errno::Errno::ESRCH) => {
            tracing::debug!(pid = pid.value(), "watched process already gone")
        }
        Err(e) => tracing::warn!(pid = pid.value(), error = %e, "kill failed"),
    }
}

/// Locate the criu binary. It commonly lives under sbin, outside PATH of the
/// daemon's environment; fall back to plain "criu" so the spawn error names
/// the real problem.
fn find_criu() -> PathBuf {
    const CANDIDATES: &[&str] = &[
        "/usr/sbin/criu",
        "/usr/bin/criu",
        "/sbin/criu",
        "/bin/criu",
        "/usr/local/sbin/criu",
        "/usr/local/bin/criu",
    ];
    for candidate in CANDIDATES {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return path;
        }
    }
    PathBuf::from("criu")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;
    use tempfile::TempDir;

    fn executor(world: &TempDir) -> SnapshotExecutor {
        let yaml = format!(
            r#"
nodes:
  - id: 1
    host: 127.0.0.1
store_root: {store}
ext_data_dir: {ext}
control_socket: {control}
inner_socket: {inner}
"#,
            store = world.path().join("store").display(),
            ext = world.path().join("data/store").display(),
            control = world.path().join("control.sock").display(),
            inner = world.path().join("guard.sock").display(),
        );
        let config =
            Arc::new(GuardConfig::load_str(&yaml, NodeId::new(1), "no-such-process").unwrap());
        let liveness = Arc::new(LivenessTracker::new(&config.process_name));
        SnapshotExecutor::new(config, liveness).unwrap()
    }

    #[test]
    fn starts_idle() {
        let world = TempDir::new().unwrap();
        let ex = executor(&world);
        assert_eq!(ex.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn restore_on_empty_store_fails_with_no_checkpoint() {
        let world = TempDir::new().unwrap();
        let ex = executor(&world);
        let err = ex.restore(CheckpointRound::ZERO).await.unwrap_err();
        assert!(matches!(err, GuardError::NoCheckpointAvailable { .. }));
        assert_eq!(ex.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn second_operation_is_rejected_while_busy() {
        let world = TempDir::new().unwrap();
        let ex = executor(&world);

        let slot = ex.wait_idle().await;
        let err = ex.restore(CheckpointRound::new(3)).await.unwrap_err();
        assert!(matches!(err, GuardError::OperationInProgress));
        let err = ex.checkpoint().await.unwrap_err();
        assert!(matches!(err, GuardError::OperationInProgress));
        drop(slot);

        // Slot released: the next attempt gets past admission again.
        let err = ex.restore(CheckpointRound::ZERO).await.unwrap_err();
        assert!(matches!(err, GuardError::NoCheckpointAvailable { .. }));
    }

    #[tokio::test]
    async fn checkpoint_without_watched_process_reports_pid_unavailable() {
        let world = TempDir::new().unwrap();
        let ex = executor(&world);
        let err = ex.checkpoint().await.unwrap_err();
        assert!(matches!(err, GuardError::PidUnavailable));
        assert_eq!(ex.phase(), Phase::Idle);
    }
}
