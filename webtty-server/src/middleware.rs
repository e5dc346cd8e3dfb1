//! Basic-auth + rate-limit middleware. Applied around the route table the
//! way "basic-auth (with rate limiting)" is one link in the middleware
//! chain, upstream of the random-URL guard that's enforced simply by
//! nesting the router under the configured prefix.

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use std::net::SocketAddr;
use tracing::{info, warn};

use crate::state::ServerState;

/// The token issued to a request after a successful basic-auth check (or a
/// constant empty string when auth is disabled), stashed for `auth_token.js`.
#[derive(Clone)]
pub struct IssuedToken(pub String);

pub async fn auth_and_rate_limit(
    State(state): State<ServerState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let forwarded_for = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    let client_ip = webtty_core::client_ip(forwarded_for, &addr.to_string());

    if let Some((remaining, dimension)) = state.rate_limiter.check_locked(&client_ip).await {
        warn!(ip = %client_ip, dimension = ?dimension, "rate limited");
        let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
        response.headers_mut().insert(
            header::RETRY_AFTER,
            remaining.as_secs().max(1).to_string().parse().unwrap(),
        );
        return response;
    }

    if !state.config.basic_auth_enabled() {
        req.extensions_mut().insert(IssuedToken(String::new()));
        return next.run(req).await;
    }

    let Some(credential) = &state.config.credential else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    match extract_basic_auth(&req) {
        Some(presented) if presented == *credential => {
            state.rate_limiter.record_success(&client_ip);
            let token = state.auth.issue(&client_ip);
            info!(ip = %client_ip, "basic auth succeeded");
            req.extensions_mut().insert(IssuedToken(token));
            next.run(req).await
        }
        _ => {
            state.rate_limiter.record_failure(&client_ip).await;
            warn!(ip = %client_ip, "basic auth failed");
            let mut response = StatusCode::UNAUTHORIZED.into_response();
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                "Basic realm=\"webtty\"".parse().unwrap(),
            );
            response
        }
    }
}

fn extract_basic_auth(req: &Request<Body>) -> Option<String> {
    let header = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    String::from_utf8(decoded).ok()
}

/// Sets a conservative `Server` header and strips anything identifying the
/// underlying framework version, the "header fixer" link in the chain.
pub async fn header_fixer(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert(header::SERVER, "webtty".parse().unwrap());
    response
}
