// SPDX-License-Identifier: Apache-2.0

//! Inner listener: the local trusted command channel.
//!
//! A unix socket accepting line-oriented requests from the watched process on
//! the same host: `<command> <nodeId> <roundId>`. Requests for this node run
//! synchronously and the reply reports the outcome; requests for another node
//! are forwarded through the router and the reply only confirms routing.
//! Malformed input gets an error reply and is dropped, never a crash.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

use snapguard_core::{CheckpointRound, Command, CommandRouter, DispatchOutcome, NodeId};

const MAX_REQUEST: usize = 4096;

/// Accept connections until shutdown. Each connection is handled in its own
/// task so a long-running local operation never blocks the accept loop.
pub async fn run(socket: PathBuf, router: Arc<CommandRouter>, mut shutdown: watch::Receiver<bool>) {
    // A stale socket file from a previous run would make bind fail.
    if socket.exists() {
        if let Err(e) = std::fs::remove_file(&socket) {
            tracing::error!(socket = %socket.display(), error = %e, "cannot remove stale socket");
            return;
        }
    }

    let listener = match UnixListener::bind(&socket) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(socket = %socket.display(), error = %e, "inner listener bind failed");
            return;
        }
    };
    tracing::info!(socket = %socket.display(), "inner listener started");

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, _)) => {
                    let router = Arc::clone(&router);
                    tokio::spawn(async move {
                        handle_connection(stream, router).await;
                    });
                }
                Err(e) => tracing::error!(error = %e, "inner accept error"),
            },
            _ = shutdown.changed() => break,
        }
    }

    let _ = std::fs::remove_file(&socket);
    tracing::info!("inner listener stopped");
}

async fn handle_connection(mut stream: UnixStream, router: Arc<CommandRouter>) {
    let mut buf = vec![0u8; MAX_REQUEST];
    let n = match stream.read(&mut buf).await {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, "inner read failed");
            return;
        }
    };
    let request = String::from_utf8_lossy(&buf[..n]).into_owned();
    let reply = serve_request(request.trim(), &router).await;
    if let Err(e) = stream.write_all(reply.as_bytes()).await {
        tracing::warn!(error = %e, "inner reply failed");
    }
}

async fn serve_request(request: &str, router: &CommandRouter) -> String {
    tracing::debug!(request, "inner request");
    let (command, node, round) = match parse_request(request) {
        Ok(parsed) => parsed,
        Err(reason) => {
            tracing::warn!(request, reason, "malformed inner request");
            return format!("ERROR {reason}\n");
        }
    };

    match router.dispatch(command, node, round).await {
        Ok(DispatchOutcome::Served(served)) => {
            format!("OK served {command} at round {served}\n")
        }
        Ok(DispatchOutcome::Routed(node)) => format!("OK routed {command} to node {node}\n"),
        Err(e) => {
            tracing::error!(request, error = %e, "inner request failed");
            format!("ERROR {e}\n")
        }
    }
}

/// Parse `<command> <nodeId> <roundId>`.
fn parse_request(request: &str) -> Result<(Command, NodeId, CheckpointRound), &'static str> {
    let mut parts = request.split_whitespace();
    let (Some(command), Some(node), Some(round), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err("expected: <command> <nodeId> <roundId>");
    };

    let command: Command = command.parse().map_err(|_| "unknown command")?;
    let node: u32 = node.parse().map_err(|_| "node id is not an integer")?;
    let round: u64 = round.parse().map_err(|_| "round id is not an integer")?;
    Ok((command, NodeId::new(node), CheckpointRound::new(round)))
}
