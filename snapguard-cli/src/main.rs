// SPDX-License-Identifier: Apache-2.0

//! snapguard daemon
//!
//! One guard per cluster node. Serves checkpoint/restore commands on a local
//! unix socket (inner) and an HTTP endpoint (outer), discovers the watched
//! process's PID on a timer, and on the configured leader node drives
//! periodic checkpoints.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;

use snapguard_core::{CommandRouter, GuardConfig, LivenessTracker, NodeId, SnapshotExecutor};

mod inner;
mod outer;
mod scheduler;

/// Guard daemon for checkpoint/restore of a replicated process
#[derive(Parser)]
#[command(name = "snapguard")]
#[command(version, about, long_about = None)]
struct Cli {
    /// This node's id in the cluster configuration
    node_id: u32,

    /// Name of the watched process, used for PID discovery
    process_name: String,

    /// Path to the cluster configuration file
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    // Fail fast on a bad configuration or a missing self entry.
    let config = Arc::new(GuardConfig::load(
        &cli.config,
        NodeId::new(cli.node_id),
        cli.process_name,
    )?);

    tracing::info!(
        self_id = config.self_id.value(),
        process = %config.process_name,
        nodes = config.topology.len(),
        leader = config.checkpoint_leader.value(),
        "guard starting"
    );

    let liveness = Arc::new(LivenessTracker::new(&config.process_name));
    liveness.refresh();

    let executor = Arc::new(SnapshotExecutor::new(
        Arc::clone(&config),
        Arc::clone(&liveness),
    )?);
    let router = Arc::new(CommandRouter::new(
        Arc::clone(&config),
        Arc::clone(&executor),
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let inner_task = tokio::spawn(inner::run(
        config.inner_socket.clone(),
        Arc::clone(&router),
        shutdown_rx.clone(),
    ));

    let outer_task = tokio::spawn(outer::run(
        config.outer_port,
        Arc::clone(&router),
        shutdown_rx.clone(),
    ));

    let refresh_task = tokio::spawn(scheduler::run_pid_refresh(
        Arc::clone(&liveness),
        config.pid_refresh_interval,
        shutdown_rx.clone(),
    ));

    let checkpoint_task = if config.is_checkpoint_leader() {
        tracing::info!(
            interval_secs = config.checkpoint_interval.as_secs(),
            "this node drives periodic checkpoints"
        );
        Some(tokio::spawn(scheduler::run_leader_checkpoints(
            Arc::clone(&executor),
            config.checkpoint_interval,
            shutdown_rx,
        )))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    // Let an in-flight checkpoint/restore finish before exiting.
    drop(executor.wait_idle().await);

    for task in [Some(inner_task), Some(outer_task), Some(refresh_task), checkpoint_task]
        .into_iter()
        .flatten()
    {
        let _ = task.await;
    }

    tracing::info!("guard stopped");
    Ok(())
}
