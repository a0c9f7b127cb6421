//! HTTP introspection endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::ToSocketAddrs;

use crate::registry::Registry;
use crate::reporter::Reporter;

#[derive(Clone)]
struct AppState {
    registry: Registry,
    reporter: Arc<Reporter>,
}

async fn report(State(state): State<AppState>) -> Response {
    let reporter = Arc::clone(&state.reporter);
    match tokio::task::spawn_blocking(move || reporter.report()).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => {
            log::error!("Failed to build report: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to build report").into_response()
        }
    }
}

async fn container(State(state): State<AppState>, Path(prefix): Path<String>) -> Response {
    let container = state
        .registry
        .get_container(&prefix)
        .or_else(|| state.registry.get_container_by_prefix(&prefix));
    match container {
        Some(container) => (StatusCode::OK, Json(container.node())).into_response(),
        None => (StatusCode::NOT_FOUND, "no unique container for prefix").into_response(),
    }
}

pub struct APIServer {
    router: axum::Router,
}

impl APIServer {
    pub fn new(registry: Registry, reporter: Arc<Reporter>) -> Self {
        let router = axum::Router::new()
            .route("/report", get(report))
            .route("/containers/{prefix}", get(container))
            .with_state(AppState { registry, reporter });
        Self { router }
    }

    pub fn router(&self) -> axum::Router {
        self.router.clone()
    }

    pub async fn listen(self, addr: impl ToSocketAddrs) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router.into_make_service()).await
    }
}
