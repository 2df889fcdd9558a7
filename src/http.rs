//! Authenticated static file server for published lists.
//!
//! Every request must carry `X-Auth-Token` equal to the configured token.
//! Anything else gets an empty `200 OK` so the endpoint does not reveal
//! itself.

use anyhow::{Context, Result};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::info;

use crate::config::SecureString;
use crate::signal;

pub const AUTH_HEADER: &str = "X-Auth-Token";

#[derive(Clone)]
struct AuthState {
    token: Arc<SecureString>,
}

/// Constant-time comparison of a presented token with the configured one.
///
/// An empty configured token matches nothing.
pub fn token_matches(expected: &SecureString, presented: &[u8]) -> bool {
    !expected.is_empty() && bool::from(expected.as_str().as_bytes().ct_eq(presented))
}

/// Router serving `output_dir` behind the token check.
pub fn router(output_dir: &Path, token: SecureString) -> Router {
    let state = AuthState {
        token: Arc::new(token),
    };
    Router::new()
        .fallback_service(ServeDir::new(output_dir))
        .layer(middleware::from_fn_with_state(state, require_token))
}

async fn require_token(State(state): State<AuthState>, request: Request, next: Next) -> Response {
    let authorized = request
        .headers()
        .get(AUTH_HEADER)
        .is_some_and(|value| token_matches(&state.token, value.as_bytes()));
    if !authorized {
        return StatusCode::OK.into_response();
    }

    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());
    info!("{} {}", remote, request.uri().path());

    next.run(request).await
}

/// Bind the listening socket.
///
/// Done before any feed starts so a busy or forbidden address fails startup.
pub async fn bind(listen: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", listen))
}

/// Serve until a shutdown is requested.
pub async fn serve(listener: TcpListener, output_dir: &Path, token: SecureString) -> Result<()> {
    let local = listener.local_addr().context("Failed to read listener address")?;
    info!("Serving {:?} on http://{}", output_dir, local);

    axum::serve(
        listener,
        router(output_dir, token).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signal::wait_for_shutdown())
    .await
    .context("HTTP server failed")
}
