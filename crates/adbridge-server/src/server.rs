use axum::http::{header::HeaderValue, request::Parts};
use axum::Router;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use adbridge_core::{AdbCommands, CommandRunner, MemoryStore};

use crate::routes;

/// Everything a request handler can reach. Built once at startup.
pub struct ServerState {
    pub runner: Arc<dyn CommandRunner>,
    pub commands: AdbCommands,
    pub memory: MemoryStore,
}

impl ServerState {
    pub fn new(runner: Arc<dyn CommandRunner>, commands: AdbCommands, memory: MemoryStore) -> Self {
        Self {
            runner,
            commands,
            memory,
        }
    }
}

fn normalize_origin(origin: &str) -> Option<String> {
    let trimmed = origin.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn is_local_origin(origin: &str) -> bool {
    origin.starts_with("http://localhost:")
        || origin.starts_with("http://127.0.0.1:")
        || origin == "http://localhost"
        || origin == "http://127.0.0.1"
}

/// Localhost origins plus `extra`.
pub fn cors_layer(extra: Vec<String>) -> CorsLayer {
    let extra: Arc<HashSet<String>> = Arc::new(
        extra
            .iter()
            .filter_map(|origin| normalize_origin(origin))
            .collect(),
    );
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| {
                origin
                    .to_str()
                    .map(|o| is_local_origin(o) || extra.contains(o.trim_end_matches('/')))
                    .unwrap_or(false)
            },
        ))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn app(state: Arc<ServerState>, cors: Vec<String>) -> Router {
    routes::router()
        .layer(cors_layer(cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

pub async fn run_server(
    addr: SocketAddr,
    state: Arc<ServerState>,
    cors: Vec<String>,
) -> anyhow::Result<()> {
    let app = app(state, cors);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
