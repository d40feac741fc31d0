// SPDX-License-Identifier: Apache-2.0

//! PID discovery for the watched process.
//!
//! Scans `/proc` by process name instead of shelling out to a ps pipeline.
//! The watched process is an external program the guard does not spawn, and
//! its PID changes across restores, so consumers must re-fetch the PID rather
//! than cache it across a restore boundary.

use std::path::Path;
use std::sync::RwLock;

use crate::types::Pid;

/// Names of helper processes the guard itself may be running (remote-copy,
/// shells, the snapshot utility). Excluded from the match set so a restore
/// helper never shadows the real watched process.
const HELPER_NAMES: &[&str] = &["sh", "bash", "ssh", "scp", "rsync", "tar", "criu", "snapguard"];

/// Tracks the current PID of the watched process.
pub struct LivenessTracker {
    process_name: String,
    current: RwLock<Option<Pid>>,
}

impl LivenessTracker {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            current: RwLock::new(None),
        }
    }

    /// The PID found by the most recent refresh, if any.
    pub fn current(&self) -> Option<Pid> {
        *self.current.read().unwrap()
    }

    /// Re-discover the watched process and update the current PID.
    ///
    /// Runs on a recurring timer and is forced before and after every restore
    /// (a restored process is a new OS process). Returns the PID found, or
    /// None when no matching process exists right now.
    pub fn refresh(&self) -> Option<Pid> {
        let found = self.scan("/proc");
        let mut current = self.current.write().unwrap();
        if *current != found {
            match found {
                Some(pid) => tracing::info!(
                    process = %self.process_name,
                    pid = pid.value(),
                    "watched process PID updated"
                ),
                None => tracing::warn!(
                    process = %self.process_name,
                    "watched process not found"
                ),
            }
            *current = found;
        }
        found
    }

    /// Scan a proc-style directory for the lowest-numbered matching PID.
    fn scan(&self, proc_root: impl AsRef<Path>) -> Option<Pid> {
        let own_pid = std::process::id() as i32;
        let entries = match std::fs::read_dir(proc_root.as_ref()) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read proc directory");
                return None;
            }
        };

        let mut best: Option<Pid> = None;
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.parse::<i32>().ok())
                .and_then(Pid::new)
            else {
                continue;
            };
            if pid.value() == own_pid {
                continue;
            }
            let Some(name) = process_name_of(&entry.path()) else {
                continue;
            };
            if HELPER_NAMES.contains(&name.as_str()) {
                continue;
            }
            if !self.name_matches(&name) {
                continue;
            }
            best = match best {
                Some(b) if b.value() <= pid.value() => Some(b),
                _ => Some(pid),
            };
        }
        best
    }

    /// `/proc/<pid>/comm` truncates names to 15 bytes, so a long configured
    /// name must be compared against its truncated form too.
    fn name_matches(&self, comm: &str) -> bool {
        if comm == self.process_name {
            return true;
        }
        self.process_name.len() > 15 && self.process_name.as_bytes().starts_with(comm.as_bytes())
    }
}

/// Short process name from `<pid>/comm`, falling back to the basename of the
/// first cmdline argument.
fn process_name_of(pid_dir: &Path) -> Option<String> {
    if let Ok(comm) = std::fs::read_to_string(pid_dir.join("comm")) {
        let comm = comm.trim();
        if !comm.is_empty() {
            return Some(comm.to_string());
        }
    }
    let cmdline = std::fs::read(pid_dir.join("cmdline")).ok()?;
    let first = cmdline.split(|b| *b == 0).next()?;
    let arg0 = std::str::from_utf8(first).ok()?;
    Path::new(arg0)
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
}
