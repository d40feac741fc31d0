// SPDX-License-Identifier: Apache-2.0

//! Packing and unpacking of resources outside the process image.
//!
//! A process dump alone is not enough to move the watched process between
//! machines: regular files behind its open descriptors and the external-data
//! directory must travel with it. Staging layout inside one operation's
//! directory:
//!
//!   fd_index.txt   ordered absolute paths of open regular-file descriptors
//!   fd_dir/        copies of those files, keyed by basename
//!   ext_res_dir/   copy of the external-data directory, when it exists

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{GuardError, GuardResult};
use crate::types::Pid;

pub const FD_INDEX_NAME: &str = "fd_index.txt";
pub const FD_STORE_DIR: &str = "fd_dir";
pub const EXT_RES_DIR: &str = "ext_res_dir";

pub struct ResourcePacker {
    ext_data_dir: PathBuf,
}

impl ResourcePacker {
    pub fn new(ext_data_dir: impl Into<PathBuf>) -> Self {
        Self {
            ext_data_dir: ext_data_dir.into(),
        }
    }

    /// Write the descriptor index for `pid` into the staging directory.
    ///
    /// Descriptor link text cannot be trusted as a file name (anonymous and
    /// synthetic descriptors carry names like `pipe:[123]`), so each entry is
    /// classified by stat-ing the descriptor link itself and only regular
    /// files are indexed. Returns the number of indexed descriptors.
    pub fn index_descriptors(&self, staging: &Path, pid: Pid) -> GuardResult<usize> {
        self.index_descriptors_from(staging, pid, "/proc")
    }

    fn index_descriptors_from(
        &self,
        staging: &Path,
        pid: Pid,
        proc_root: impl AsRef<Path>,
    ) -> GuardResult<usize> {
        let fd_dir = proc_root.as_ref().join(pid.to_string()).join("fd");
        let entries = std::fs::read_dir(&fd_dir).map_err(|e| GuardError::PackFailed {
            reason: format!("cannot enumerate descriptors of pid {pid}: {e}"),
        })?;

        let mut paths = Vec::new();
        for entry in entries.flatten() {
            let link = entry.path();
            // metadata() follows the link, i.e. stats the descriptor target.
            let Ok(meta) = std::fs::metadata(&link) else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            match std::fs::read_link(&link) {
                Ok(target) => paths.push(target),
                Err(e) => {
                    tracing::warn!(fd = %link.display(), error = %e, "unreadable descriptor link, skipped");
                }
            }
        }
        paths.sort();

        let mut index = String::new();
        for path in &paths {
            index.push_str(&path.to_string_lossy());
            index.push('\n');
        }
        std::fs::write(staging.join(FD_INDEX_NAME), index)
            .map_err(|e| GuardError::io("writing descriptor index", e))?;

        tracing::debug!(pid = pid.value(), descriptors = paths.len(), "descriptor index written");
        Ok(paths.len())
    }

    /// Copy indexed descriptor files and the external-data directory into the
    /// staging area. Runs after the dump, against the index written before it.
    ///
    /// Individual missing or unreadable descriptor files are logged and
    /// skipped; a failed external-data copy aborts the pack.
    pub fn pack_resources(&self, staging: &Path) -> GuardResult<()> {
        let fd_dir = staging.join(FD_STORE_DIR);
        std::fs::create_dir_all(&fd_dir)
            .map_err(|e| GuardError::io("creating fd staging directory", e))?;

        for path in read_index(staging)? {
            let Some(basename) = path.file_name() else {
                tracing::warn!(path = %path.display(), "indexed path has no basename, skipped");
                continue;
            };
            match std::fs::copy(&path, fd_dir.join(basename)) {
                Ok(bytes) => {
                    tracing::debug!(path = %path.display(), bytes, "descriptor file staged")
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "descriptor file skipped")
                }
            }
        }

        if self.ext_data_dir.exists() {
            let staged = staging.join(EXT_RES_DIR);
            copy_tree(&self.ext_data_dir, &staged).map_err(|e| GuardError::PackFailed {
                reason: format!(
                    "copying external-data directory {}: {e}",
                    self.ext_data_dir.display()
                ),
            })?;
            tracing::info!(dir = %self.ext_data_dir.display(), "external-data directory staged");
        } else {
            tracing::info!(dir = %self.ext_data_dir.display(), "external-data directory absent, skipped");
        }

        Ok(())
    }

    /// Reverse of `pack_resources`: put descriptor files back at their
    /// original absolute paths and swap the live external-data directory for
    /// the staged copy.
    pub fn unpack(&self, staging: &Path) -> GuardResult<()> {
        let fd_dir = staging.join(FD_STORE_DIR);
        for path in read_index(staging)? {
            let Some(basename) = path.file_name() else {
                continue;
            };
            let staged = fd_dir.join(basename);
            // A missing staged copy must not block the rest of the restore.
            match std::fs::copy(&staged, &path) {
                Ok(_) => tracing::debug!(path = %path.display(), "descriptor file restored"),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "descriptor file not restored")
                }
            }
        }

        let staged_ext = staging.join(EXT_RES_DIR);
        if !staged_ext.exists() {
            return Err(GuardError::ExternalResourceRestoreFailed { path: staged_ext });
        }

        match std::fs::remove_dir_all(&self.ext_data_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(GuardError::io("removing live external-data directory", e)),
        }

        // Staging usually lives on a different filesystem than the data dir,
        // so fall back to a tree copy when rename is impossible.
        if std::fs::rename(&staged_ext, &self.ext_data_dir).is_err() {
            copy_tree(&staged_ext, &self.ext_data_dir).map_err(|e| {
                GuardError::io("moving staged external-data directory into place", e)
            })?;
        }

        tracing::info!(dir = %self.ext_data_dir.display(), "external-data directory restored");
        Ok(())
    }
}

/// Read the descriptor index back as absolute paths.
fn read_index(staging: &Path) -> GuardResult<Vec<PathBuf>> {
    let content = std::fs::read_to_string(staging.join(FD_INDEX_NAME))
        .map_err(|e| GuardError::io("reading descriptor index", e))?;
    Ok(content
        .lines()
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .collect())
}

/// Recursive copy of a directory tree.
fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(std::io::Error::other)?;
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &dest)?;
        }
        // Symlinks inside the external-data tree are not carried over.
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn index_descriptors_finds_own_open_file() {
        let staging = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let target = data.path().join("held-open.log");
        fs::write(&target, b"contents").unwrap();
        let _held = fs::File::open(&target).unwrap();

        let packer = ResourcePacker::new(data.path().join("ext"));
        let pid = Pid::new(std::process::id() as i32).unwrap();
        let count = packer.index_descriptors(staging.path(), pid).unwrap();
        assert!(count >= 1);

        let index = fs::read_to_string(staging.path().join(FD_INDEX_NAME)).unwrap();
        assert!(index.lines().any(|l| l == target.to_string_lossy()));
    }

    #[test]
    fn index_descriptors_unknown_pid_fails() {
        let staging = TempDir::new().unwrap();
        let packer = ResourcePacker::new("/does/not/matter");
        // PID near the i32 maximum should not exist.
        let err = packer
            .index_descriptors(staging.path(), Pid::new(i32::MAX - 1).unwrap())
            .unwrap_err();
        assert!(matches!(err, GuardError::PackFailed { .. }));
    }

    #[test]
    fn pack_unpack_round_trip_restores_bytes() {
        let staging = TempDir::new().unwrap();
        let world = TempDir::new().unwrap();

        // A "live" file an open descriptor would point at.
        let live_file = world.path().join("appendonly.aof");
        fs::write(&live_file, b"original aof").unwrap();

        // A live external-data directory.
        let ext_dir = world.path().join("store");
        fs::create_dir_all(ext_dir.join("nested")).unwrap();
        fs::write(ext_dir.join("db.bin"), b"db bytes").unwrap();
        fs::write(ext_dir.join("nested/meta"), b"meta").unwrap();

        let packer = ResourcePacker::new(&ext_dir);
        fs::write(
            staging.path().join(FD_INDEX_NAME),
            format!("{}\n", live_file.display()),
        )
        .unwrap();
        packer.pack_resources(staging.path()).unwrap();

        // Clobber the live state, then unpack.
        fs::write(&live_file, b"corrupted").unwrap();
        fs::remove_dir_all(&ext_dir).unwrap();
        fs::create_dir(&ext_dir).unwrap();
        fs::write(ext_dir.join("junk"), b"junk").unwrap();

        packer.unpack(staging.path()).unwrap();

        assert_eq!(fs::read(&live_file).unwrap(), b"original aof");
        assert_eq!(fs::read(ext_dir.join("db.bin")).unwrap(), b"db bytes");
        assert_eq!(fs::read(ext_dir.join("nested/meta")).unwrap(), b"meta");
        assert!(!ext_dir.join("junk").exists());
    }

    #[test]
    fn pack_succeeds_without_external_data_dir() {
        let staging = TempDir::new().unwrap();
        let packer = ResourcePacker::new("/nonexistent/ext/dir");
        fs::write(staging.path().join(FD_INDEX_NAME), "").unwrap();

        packer.pack_resources(staging.path()).unwrap();
        assert!(!staging.path().join(EXT_RES_DIR).exists());
    }

    #[test]
    fn unpack_without_staged_external_data_fails_cleanly() {
        let staging = TempDir::new().unwrap();
        let world = TempDir::new().unwrap();
        let ext_dir = world.path().join("store");
        fs::create_dir(&ext_dir).unwrap();
        fs::write(ext_dir.join("keep.bin"), b"keep").unwrap();

        let packer = ResourcePacker::new(&ext_dir);
        fs::write(staging.path().join(FD_INDEX_NAME), "").unwrap();

        let err = packer.unpack(staging.path()).unwrap_err();
        assert!(matches!(
            err,
            GuardError::ExternalResourceRestoreFailed { .. }
        ));
        // The unrelated live directory must not have been touched.
        assert_eq!(fs::read(ext_dir.join("keep.bin")).unwrap(), b"keep");
    }

    #[test]
    fn missing_staged_descriptor_copy_is_skipped() {
        let staging = TempDir::new().unwrap();
        let world = TempDir::new().unwrap();

        let restored = world.path().join("present.log");
        let missing = world.path().join("missing.log");
        fs::write(&restored, b"old").unwrap();

        let ext_dir = world.path().join("store");
        let packer = ResourcePacker::new(&ext_dir);

        fs::write(
            staging.path().join(FD_INDEX_NAME),
            format!("{}\n{}\n", missing.display(), restored.display()),
        )
        .unwrap();
        fs::create_dir(staging.path().join(FD_STORE_DIR)).unwrap();
        fs::write(staging.path().join(FD_STORE_DIR).join("present.log"), b"new").unwrap();
        fs::create_dir(staging.path().join(EXT_RES_DIR)).unwrap();

        packer.unpack(staging.path()).unwrap();
        assert_eq!(fs::read(&restored).unwrap(), b"new");
        assert!(!missing.exists());
    }
}
