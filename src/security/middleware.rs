use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// Caller identity used for admission control: the forwarded address when a
/// proxy supplied one, the peer address otherwise. No stronger identity
/// exists at this layer.
#[derive(Clone, Debug)]
pub struct ClientIdentity {
    pub ip: String,
}

/// Middleware that resolves the caller's identity and stashes it in the
/// request extensions for downstream layers.
pub async fn identity_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request,
    next: Next,
) -> Response {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let ip = forwarded.unwrap_or_else(|| addr.ip().to_string());
    req.extensions_mut().insert(ClientIdentity { ip });

    next.run(req).await
}

/// Middleware applying the admission guard to the ingestion route.
pub async fn admission_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let ip = req
        .extensions()
        .get::<ClientIdentity>()
        .map(|identity| identity.ip.clone())
        .unwrap_or_else(|| "unknown".to_string());

    if !state.guard.allow(&ip).await {
        debug!(identity = %ip, "submission rejected by admission guard");
        return ApiError::RateLimited.into_response();
    }

    next.run(req).await
}
