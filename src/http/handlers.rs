//! Axum HTTP handlers for the web server
//!
//! The `/mcp` handler is the per-request dispatcher: it constructs a fresh
//! protocol server and transport session for every call, wires them
//! together, drives one request cycle, and relies on the session's drop
//! guards for teardown on every exit path.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Bytes},
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, info};

use crate::mcp::rpc::{json_rpc_error, INTERNAL_ERROR, METHOD_NOT_ALLOWED};
use crate::mcp::server::ProtocolServer;
use crate::mcp::transport::TransportSession;
use crate::AppState;

const MAX_BODY_BYTES: usize = 1 << 20;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub mcp_endpoint: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery() -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        mcp_endpoint: "/mcp",
    })
}

pub async fn mcp_endpoint(State(state): State<AppState>, request: Request) -> Response {
    let method = request.method().clone();
    info!(method = %method, "mcp request received");

    match method.as_str() {
        "POST" => {
            let body = match to_bytes(request.into_body(), MAX_BODY_BYTES).await {
                Ok(bytes) => bytes,
                Err(error) => {
                    error!(%error, "failed to read mcp request body");
                    return internal_error();
                }
            };
            serve_one_request(&state, Some(body)).await
        }
        "GET" => serve_one_request(&state, None).await,
        "DELETE" => method_not_allowed("Method not allowed.".to_string()),
        _ => method_not_allowed(format!("Method {method} not allowed.")),
    }
}

/// One fresh server/transport pair per request. A shared pair would collide
/// request ids across concurrent clients, so nothing here is pooled.
async fn serve_one_request(state: &AppState, body: Option<Bytes>) -> Response {
    let server = ProtocolServer::new(Arc::clone(&state.capabilities), Arc::clone(&state.lifecycle));
    let mut transport = TransportSession::new(Arc::clone(&state.lifecycle));

    if let Err(error) = transport.connect(server) {
        error!(%error, "failed to connect transport to protocol server");
        return internal_error();
    }

    match body {
        Some(bytes) => transport.handle_post(bytes).await.into_response(),
        None => transport.handle_get().into_response(),
    }
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json_rpc_error(None, INTERNAL_ERROR, "Internal server error")),
    )
        .into_response()
}

fn method_not_allowed(message: String) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json_rpc_error(None, METHOD_NOT_ALLOWED, &message)),
    )
        .into_response()
}
