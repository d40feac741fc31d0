//! Client side of the watched process's private control channel.
//!
//! The watched process listens on a local unix socket and understands two
//! textual commands: "disconnect" (quiesce network connections before being
//! frozen) and "reconnect" (resume after a restore). Replies are bounded and
//! purely informational; an unreachable control socket is logged, not fatal,
//! because the guard must still be able to restore a process that died.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

const MAX_REPLY: usize = 512;
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Disconnect,
    Reconnect,
}

impl ControlCommand {
    fn wire(&self) -> &'static str {
        match self {
            Self::Disconnect => "disconnect\n",
            Self::Reconnect => "reconnect\n",
        }
    }
}

pub struct ControlChannel {
    socket: PathBuf,
}

impl ControlChannel {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    /// Send a command and wait briefly for the bounded reply. Best effort.
    pub async fn send(&self, command: ControlCommand) {
        match self.try_send(command).await {
            Ok(reply) => {
                tracing::info!(?command, reply = reply.trim(), "control command acknowledged")
            }
            Err(e) => {
                tracing::warn!(?command, socket = %self.socket.display(), error = %e,
                    "control command not delivered")
            }
        }
    }

    async fn try_send(&self, command: ControlCommand) -> std::io::Result<String> {
        let mut stream = UnixStream::connect(&self.socket).await?;
        stream.write_all(command.wire().as_bytes()).await?;

        let mut buf = vec![0u8; MAX_REPLY];
        let n = tokio::time::timeout(REPLY_TIMEOUT, stream.read(&mut buf))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "no control reply"))??;
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }
}
