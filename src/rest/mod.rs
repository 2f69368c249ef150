// rest/mod.rs — HTTP API for the editor host.
//
// Axum HTTP server on the main daemon port. The editor UI talks to this;
// the preview iframe talks to the sync socket instead.
//
// Endpoints:
//   GET  /api/v1/health
//   POST /api/v1/plan
//   GET  /api/v1/projects/{id}
//   POST /api/v1/projects/{id}/apply
//   POST /api/v1/projects/{id}/undo
//   POST /api/v1/projects/{id}/redo

pub mod routes;

use anyhow::Result;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::patch::error::PatchError;
use crate::AppContext;

pub async fn start_rest_server(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("REST API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/v1/plan", post(routes::plan::generate_plan))
        .route("/api/v1/projects/{id}", get(routes::projects::get_project))
        .route(
            "/api/v1/projects/{id}/apply",
            post(routes::projects::apply_plan),
        )
        .route(
            "/api/v1/projects/{id}/undo",
            post(routes::projects::undo_version),
        )
        .route(
            "/api/v1/projects/{id}/redo",
            post(routes::projects::redo_version),
        )
        .layer(middleware::from_fn_with_state(ctx.clone(), require_token))
        // Health stays outside the auth layer so probes never need the token
        .route("/api/v1/health", get(routes::health::health))
        // The editor host and preview run on arbitrary dev-server origins
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Bearer-token check, active only when `api_token` is configured.
async fn require_token(
    State(ctx): State<Arc<AppContext>>,
    req: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<serde_json::Value>)> {
    let Some(expected) = ctx.config.api_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if provided == Some(expected) {
        Ok(next.run(req).await)
    } else {
        warn!(path = %req.uri().path(), "rejected request with missing or bad token");
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid or missing bearer token" })),
        ))
    }
}

/// Map a patch error onto the REST boundary shape.
pub(crate) fn error_reply(err: PatchError) -> (StatusCode, Json<serde_json::Value>) {
    let status = err.status();
    if status.is_server_error() {
        warn!(err = %err, "request failed");
    }
    (status, Json(json!({ "error": err.to_string() })))
}
