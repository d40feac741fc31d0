//! Structured invocation of external utilities.
//!
//! Argument vectors only, never shell-interpreted strings. Every invocation
//! carries a timeout and captures stdout/stderr so a wedged utility surfaces
//! as `OperationTimedOut` instead of blocking the daemon forever.

use std::ffi::OsStr;
use std::process::Output;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{GuardError, GuardResult};

/// Run a utility from PATH, enforcing the timeout and a zero exit status.
pub async fn run_checked<I, S>(
    utility: &'static str,
    args: I,
    timeout: Duration,
) -> GuardResult<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    run_checked_at(utility, OsStr::new(utility), args, timeout).await
}

/// Like `run_checked`, but with an explicit program path. The label is what
/// shows up in errors and logs; criu is typically found under sbin rather
/// than on PATH.
pub async fn run_checked_at<I, S>(
    utility: &'static str,
    program: &OsStr,
    args: I,
    timeout: Duration,
) -> GuardResult<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    tracing::debug!(utility, timeout_secs = timeout.as_secs(), "running utility");

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| GuardError::OperationTimedOut {
            operation: utility,
            limit_secs: timeout.as_secs(),
        })?
        .map_err(|e| GuardError::io("spawning external utility", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GuardError::ExternalUtilityFailed {
            utility,
            status: output.status.code(),
            stderr: stderr_excerpt(&stderr),
        });
    }

    Ok(output)
}

/// First few lines of stderr, enough for a log line without dumping pages.
fn stderr_excerpt(stderr: &str) -> String {
    const MAX_LINES: usize = 5;
    let mut lines: Vec<&str> = stderr.lines().take(MAX_LINES).collect();
    if stderr.lines().nth(MAX_LINES).is_some() {
        lines.push("...");
    }
    lines.join(" | ")
}
