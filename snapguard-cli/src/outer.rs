// SPDX-License-Identifier: Apache-2.0

//! Outer listener: the HTTP command surface other guards call.
//!
//! `GET /checkpoint?node_id=N&round_id=R` and `GET /restore?...` for this
//! node's id are acknowledged immediately and executed in the background;
//! the caller is a peer guard that only needs receipt, not completion.
//! Requests naming any other node are refused, never re-forwarded, so a
//! misrouted command cannot bounce between guards.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use snapguard_core::{CheckpointRound, Command, CommandRouter, GuardError, NodeId};

const INDEX_PAGE: &str = "<html><head><title>snapguard</title></head>\
<body><h3>snapguard node</h3>\
<p>GET /checkpoint?node_id=N&amp;round_id=R</p>\
<p>GET /restore?node_id=N&amp;round_id=R</p>\
</body></html>\n";

#[derive(Debug, Deserialize)]
struct OpQuery {
    node_id: u32,
    round_id: u64,
}

pub async fn run(port: u16, router: Arc<CommandRouter>, mut shutdown: watch::Receiver<bool>) {
    let app = build_router(router);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "outer listener bind failed");
            return;
        }
    };
    tracing::info!("outer listener on http://{}", addr);

    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
    });
    if let Err(e) = serve.await {
        tracing::error!(error = %e, "outer listener failed");
    }
    tracing::info!("outer listener stopped");
}

pub fn build_router(router: Arc<CommandRouter>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/checkpoint", get(checkpoint_handler))
        .route("/restore", get(restore_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(router)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

async fn checkpoint_handler(
    State(router): State<Arc<CommandRouter>>,
    Query(query): Query<OpQuery>,
) -> impl IntoResponse {
    accept(router, Command::Checkpoint, query)
}

async fn restore_handler(
    State(router): State<Arc<CommandRouter>>,
    Query(query): Query<OpQuery>,
) -> impl IntoResponse {
    accept(router, Command::Restore, query)
}

/// Acknowledge a command addressed to this node and run it in the background.
fn accept(router: Arc<CommandRouter>, command: Command, query: OpQuery) -> impl IntoResponse {
    let node = NodeId::new(query.node_id);
    if node != router.self_id() {
        let err = GuardError::AccessDenied {
            requested: node,
            local: router.self_id(),
        };
        tracing::warn!(%err, "refusing misrouted command");
        return (StatusCode::FORBIDDEN, format!("{err}\n"));
    }

    let round = CheckpointRound::new(query.round_id);
    tokio::spawn(async move {
        match router.dispatch(command, node, round).await {
            Ok(outcome) => tracing::info!(%command, ?outcome, "background command finished"),
            Err(e) => tracing::error!(%command, error = %e, "background command failed"),
        }
    });

    (StatusCode::OK, format!("{command} ok\n"))
}
