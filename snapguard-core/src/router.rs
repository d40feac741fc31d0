// SPDX-License-Identifier: Apache-2.0

//! Command routing: execute locally or forward to the owning node.
//!
//! Commands are a closed enum rather than string-keyed handler tables, so
//! dispatch is pattern-matched and exhaustive at compile time. Forwarded
//! requests target the remote guard's outer listener; the call returns once
//! the remote node has acknowledged, while the remote work proceeds in the
//! background over there.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::GuardConfig;
use crate::error::{GuardError, GuardResult};
use crate::executor::SnapshotExecutor;
use crate::topology::NodeAddress;
use crate::types::{CheckpointRound, NodeId};

/// The two operations a guard understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Checkpoint,
    Restore,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checkpoint => "checkpoint",
            Self::Restore => "restore",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkpoint" => Ok(Self::Checkpoint),
            "restore" => Ok(Self::Restore),
            _ => Err(()),
        }
    }
}

/// Where a command for a given node id must go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Local,
    Remote(NodeAddress),
}

/// What dispatch did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Executed here; carries the round served.
    Served(CheckpointRound),
    /// Forwarded to the owning node, which acknowledged receipt.
    Routed(NodeId),
}

pub struct CommandRouter {
    config: Arc<GuardConfig>,
    executor: Arc<SnapshotExecutor>,
    client: reqwest::Client,
}

impl CommandRouter {
    pub fn new(config: Arc<GuardConfig>, executor: Arc<SnapshotExecutor>) -> GuardResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.utility_timeout)
            .build()
            .map_err(|e| GuardError::InvalidConfig {
                field: "http_client",
                reason: e.to_string(),
            })?;
        Ok(Self {
            config,
            executor,
            client,
        })
    }

    pub fn self_id(&self) -> NodeId {
        self.config.self_id
    }

    /// Resolve a target node to a routing decision.
    pub fn resolve(&self, node: NodeId) -> GuardResult<Route> {
        if node == self.config.self_id {
            return Ok(Route::Local);
        }
        let addr = self.config.topology.address_of(node)?;
        Ok(Route::Remote(addr.clone()))
    }

    /// Execute a command locally or forward it to the owning node.
    pub async fn dispatch(
        &self,
        command: Command,
        node: NodeId,
        round: CheckpointRound,
    ) -> GuardResult<DispatchOutcome> {
        match self.resolve(node)? {
            Route::Local => {
                let served = match command {
                    // A checkpoint always gets the next local round; the
                    // round in the request is only meaningful for restores.
                    Command::Checkpoint => self.executor.checkpoint().await?,
                    Command::Restore => self.executor.restore(round).await?,
                };
                Ok(DispatchOutcome::Served(served))
            }
            Route::Remote(addr) => {
                self.forward(command, node, round, &addr).await?;
                Ok(DispatchOutcome::Routed(node))
            }
        }
    }

    async fn forward(
        &self,
        command: Command,
        node: NodeId,
        round: CheckpointRound,
        addr: &NodeAddress,
    ) -> GuardResult<()> {
        let url = format!(
            "{}/{}?node_id={}&round_id={}",
            addr.http_base(),
            command,
            node,
            round
        );
        tracing::info!(%url, "forwarding command to owning node");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GuardError::RemoteDispatchFailed {
                node,
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(GuardError::RemoteDispatchFailed {
                node,
                reason: format!("remote replied {}", response.status()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::LivenessTracker;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn router_with_peer(world: &TempDir, peer_port: u16) -> CommandRouter {
        let yaml = format!(
            r#"
nodes:
  - id: 1
    host: 127.0.0.1
  - id: 2
    host: 127.0.0.1
    port: {peer_port}
store_root: {store}
ext_data_dir: {ext}
control_socket: {control}
inner_socket: {inner}
"#,
            store = world.path().join("store").display(),
            ext = world.path().join("data").display(),
            control = world.path().join("control.sock").display(),
            inner = world.path().join("guard.sock").display(),
        );
        let config =
            Arc::new(GuardConfig::load_str(&yaml, NodeId::new(1), "no-such-process").unwrap());
        let liveness = Arc::new(LivenessTracker::new(&config.process_name));
        let executor = Arc::new(SnapshotExecutor::new(Arc::clone(&config), liveness).unwrap());
        CommandRouter::new(config, executor).unwrap()
    }

    #[test]
    fn command_wire_names_round_trip() {
        assert_eq!("checkpoint".parse::<Command>().unwrap(), Command::Checkpoint);
        assert_eq!("restore".parse::<Command>().unwrap(), Command::Restore);
        assert!("reboot".parse::<Command>().is_err());
        assert_eq!(Command::Restore.to_string(), "restore");
    }

    #[tokio::test]
    async fn resolve_self_is_local() {
        let world = TempDir::new().unwrap();
        let router = router_with_peer(&world, 19999);
        assert_eq!(router.resolve(NodeId::new(1)).unwrap(), Route::Local);
        assert!(matches!(
            router.resolve(NodeId::new(2)).unwrap(),
            Route::Remote(_)
        ));
    }

    #[tokio::test]
    async fn resolve_unknown_node_fails() {
        let world = TempDir::new().unwrap();
        let router = router_with_peer(&world, 19999);
        assert!(matches!(
            router.resolve(NodeId::new(42)),
            Err(GuardError::UnknownNode(_))
        ));
    }

    #[tokio::test]
    async fn foreign_dispatch_issues_one_call_and_never_executes_locally() {
        // Minimal HTTP endpoint standing in for the peer's outer listener.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = stream.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();
            stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 3\r\n\r\nok\n")
                .await
                .unwrap();
            request
        });

        let world = TempDir::new().unwrap();
        let router = router_with_peer(&world, peer_port);

        let outcome = router
            .dispatch(Command::Restore, NodeId::new(2), CheckpointRound::new(7))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Routed(NodeId::new(2)));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /restore?node_id=2&round_id=7"));
        // Nothing ran locally: the local store stayed empty.
        assert_eq!(router.executor.store().current_round().unwrap(), None);
    }

    #[tokio::test]
    async fn unreachable_peer_is_a_dispatch_error() {
        let world = TempDir::new().unwrap();
        // Port from the reserved range with nothing listening.
        let router = router_with_peer(&world, 1);
        let err = router
            .dispatch(Command::Checkpoint, NodeId::new(2), CheckpointRound::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::RemoteDispatchFailed { .. }));
    }
}
