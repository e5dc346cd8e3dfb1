//! The HTTP route table, minus the out-of-scope pieces (presentation
//! layer, installers): index, manifest, JS config bundle, the auth-token
//! endpoint, and the WebSocket upgrade. Static assets and the
//! WebTransport entry are wired up in `server.rs`/`wt.rs`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Extension, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use tracing::warn;

use webtty_core::transport::ws::WsTransport;

use crate::middleware::IssuedToken;
use crate::state::ServerState;
use crate::{assets, wt};

pub async fn index(State(state): State<ServerState>) -> Html<String> {
    Html(assets::index_html(&state.title))
}

pub async fn manifest(State(state): State<ServerState>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/manifest+json")],
        assets::manifest_webmanifest(&state.title),
    )
        .into_response()
}

pub async fn config_js(State(state): State<ServerState>) -> Response {
    let body = format!(
        "var gotty_ws_query_args = '';\nvar gotty_webtransport_enabled = {};\n",
        state.config.webtransport
    );
    ([(header::CONTENT_TYPE, "application/javascript")], body).into_response()
}

pub async fn auth_token_js(Extension(token): Extension<IssuedToken>) -> Response {
    let body = format!("var gotty_auth_token = '{}';\n", token.0);
    ([(header::CONTENT_TYPE, "application/javascript")], body).into_response()
}

/// Split `scheme://host[:port]` into its scheme and host-plus-port parts.
fn parse_origin(origin: &str) -> Option<(&str, &str)> {
    origin.split_once("://")
}

/// If a regex is configured, accept only origins matching it. Otherwise
/// fall back to a same-origin comparison (scheme, host, and port) against
/// the scheme this listener serves and the request's `Host` header. A
/// request with no `Origin` header at all (a non-browser client) is let
/// through, since there is nothing to compare.
fn origin_allowed(
    pattern: Option<&str>,
    origin: Option<&str>,
    expected_scheme: &str,
    host_header: Option<&str>,
) -> bool {
    if let Some(pattern) = pattern {
        let Ok(re) = regex::Regex::new(pattern) else {
            return false;
        };
        return match origin {
            Some(origin) => re.is_match(origin),
            None => false,
        };
    }

    let Some(origin) = origin else {
        return true;
    };
    let Some(host) = host_header else {
        return false;
    };
    match parse_origin(origin) {
        Some((scheme, origin_host)) => {
            scheme.eq_ignore_ascii_case(expected_scheme) && origin_host.eq_ignore_ascii_case(host)
        }
        None => false,
    }
}

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    let expected_scheme = if state.config.tls { "https" } else { "http" };
    if !origin_allowed(state.config.ws_origin.as_deref(), origin, expected_scheme, host) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
        .collect();
    let client_ip = webtty_core::client_ip(header_map.get("x-forwarded-for").map(String::as_str), &addr.to_string());

    ws.protocols(["webtty"]).on_upgrade(move |socket| async move {
        let transport: Arc<dyn webtty_core::Transport> =
            Arc::new(WsTransport::new(socket, addr.to_string(), state.config.max_message_size));
        let options = state.engine_options();
        if let Err(e) = state
            .orchestrator
            .handle_session(transport, options, client_ip, header_map)
            .await
        {
            warn!(error = %e, "session ended with error");
        }
        if state.config.once {
            state.shutdown.cancel();
        }
    })
}

pub use wt::run_webtransport_listener;
