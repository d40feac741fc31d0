// SPDX-License-Identifier: Apache-2.0

//! Append-only snapshot archive store.
//!
//! Archives are named `checkpoint_<round>.tar.gz` under a fixed root
//! directory. Rounds are node-local and assigned by scanning existing
//! archives and taking max+1; an archive is never mutated after creation and
//! later rounds supersede rather than delete earlier ones. Retention is an
//! operator concern.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GuardError, GuardResult};
use crate::subprocess;
use crate::types::CheckpointRound;

const ARCHIVE_PREFIX: &str = "checkpoint_";
const ARCHIVE_SUFFIX: &str = ".tar.gz";

pub struct SnapshotStore {
    root: PathBuf,
    utility_timeout: Duration,
}

impl SnapshotStore {
    /// Open the store, creating the root directory when absent.
    pub fn open(root: impl Into<PathBuf>, utility_timeout: Duration) -> GuardResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| GuardError::io("creating store root", e))?;
        Ok(Self {
            root,
            utility_timeout,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an archive for `round` lives at (whether or not it exists yet).
    pub fn archive_path(&self, round: CheckpointRound) -> PathBuf {
        self.root
            .join(format!("{ARCHIVE_PREFIX}{round}{ARCHIVE_SUFFIX}"))
    }

    /// All rounds currently present, unsorted. Files that do not match the
    /// archive naming scheme are ignored.
    fn rounds(&self) -> GuardResult<Vec<CheckpointRound>> {
        let entries =
            std::fs::read_dir(&self.root).map_err(|e| GuardError::io("scanning store root", e))?;
        let mut rounds = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name
                .strip_prefix(ARCHIVE_PREFIX)
                .and_then(|s| s.strip_suffix(ARCHIVE_SUFFIX))
            else {
                continue;
            };
            if let Ok(round) = stem.parse::<u64>() {
                rounds.push(CheckpointRound::new(round));
            }
        }
        Ok(rounds)
    }

    /// Highest committed round, or None for an empty store.
    pub fn current_round(&self) -> GuardResult<Option<CheckpointRound>> {
        Ok(self.rounds()?.into_iter().max())
    }

    /// Round the next checkpoint will be committed as: max+1, or 0 when the
    /// store is empty.
    pub fn next_round(&self) -> GuardResult<CheckpointRound> {
        Ok(self
            .current_round()?
            .map(|r| r.next())
            .unwrap_or(CheckpointRound::ZERO))
    }

    /// Largest stored round not exceeding `at_most`. The restore path falls
    /// back to this when the exact requested round is unavailable.
    pub fn nearest_round(&self, at_most: CheckpointRound) -> GuardResult<CheckpointRound> {
        self.rounds()?
            .into_iter()
            .filter(|r| *r <= at_most)
            .max()
            .ok_or(GuardError::NoCheckpointAvailable { requested: at_most })
    }

    /// Atomically package a staging directory as the archive for `round`.
    ///
    /// The caller has already written the process dump, descriptor copies and
    /// external-data copy into the staging directory. The tarball is written
    /// to a temporary name first and renamed into place, so a partially
    /// written archive is never visible under the final name.
    pub async fn commit(&self, staging: &Path, round: CheckpointRound) -> GuardResult<PathBuf> {
        let final_path = self.archive_path(round);
        let tmp_path = self
            .root
            .join(format!(".tmp-{ARCHIVE_PREFIX}{round}{ARCHIVE_SUFFIX}"));

        let result = subprocess::run_checked(
            "tar",
            [
                "-czf".as_ref(),
                tmp_path.as_os_str(),
                "-C".as_ref(),
                staging.as_os_str(),
                ".".as_ref(),
            ],
            self.utility_timeout,
        )
        .await;

        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }

        std::fs::rename(&tmp_path, &final_path)
            .map_err(|e| GuardError::io("finalizing archive", e))?;

        tracing::info!(round = round.value(), path = %final_path.display(), "archive committed");
        Ok(final_path)
    }

    /// Extract the archive for `round` into an (empty) staging directory.
    pub async fn extract_into(&self, round: CheckpointRound, staging: &Path) -> GuardResult<()> {
        let archive = self.archive_path(round);
        if !archive.exists() {
            return Err(GuardError::NoCheckpointAvailable { requested: round });
        }

        subprocess::run_checked(
            "tar",
            [
                "-xzf".as_ref(),
                archive.as_os_str(),
                "-C".as_ref(),
                staging.as_os_str(),
            ],
            self.utility_timeout,
        )
        .await?;

        tracing::debug!(round = round.value(), staging = %staging.display(), "archive extracted");
        Ok(())
    }
}
