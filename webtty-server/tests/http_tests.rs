//! End-to-end exercise of the HTTP route table: build a real router from
//! `ServerState` and drive it in-process with `tower::ServiceExt::oneshot`,
//! since nothing here needs an actual bound socket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use base64::Engine;
use clap::Parser;
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use webtty_core::backend::{Backend, BackendArgs, BackendFactory};
use webtty_server::config::Config;
use webtty_server::server;
use webtty_server::state::ServerState;

struct UnusedBackendFactory;

#[async_trait]
impl BackendFactory for UnusedBackendFactory {
    async fn spawn(
        &self,
        _args: &BackendArgs,
        _headers: &HashMap<String, String>,
    ) -> Result<Box<dyn Backend>, String> {
        Err("not exercised by these tests".to_string())
    }
}

fn parse_config(args: &[&str]) -> Config {
    let mut full = vec!["webtty-server"];
    full.extend_from_slice(args);
    Config::parse_from(full)
}

fn build_state(config: Config) -> ServerState {
    let config = Arc::new(config);
    let factory: Arc<dyn BackendFactory> = Arc::new(UnusedBackendFactory);
    ServerState::new(config, factory, CancellationToken::new(), None)
}

fn connected_request(method: &str, uri: &str) -> Request<Body> {
    let addr: SocketAddr = "127.0.0.1:4242".parse().unwrap();
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    req.extensions_mut().insert(ConnectInfo(addr));
    req
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn index_serves_the_configured_title() {
    let state = build_state(parse_config(&["--title-format", "my session"]));
    let app = server::build_router(state);

    let response = app.oneshot(connected_request("GET", "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("my session"));
}

#[tokio::test]
async fn config_js_reports_webtransport_flag() {
    let state = build_state(parse_config(&["--webtransport", "--tls", "--tls-cert", "a.pem", "--tls-key", "a.key"]));
    let app = server::build_router(state);

    let response = app.oneshot(connected_request("GET", "/config.js")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("gotty_webtransport_enabled = true"));
}

#[tokio::test]
async fn requests_without_credentials_pass_when_auth_is_disabled() {
    let state = build_state(parse_config(&[]));
    let app = server::build_router(state);

    let response = app.oneshot(connected_request("GET", "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_credentials_are_rejected_when_basic_auth_is_configured() {
    let state = build_state(parse_config(&["--credential", "user:pass"]));
    let app = server::build_router(state);

    let response = app.oneshot(connected_request("GET", "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
}

#[tokio::test]
async fn matching_credentials_issue_a_usable_auth_token() {
    let state = build_state(parse_config(&["--credential", "user:pass"]));
    let app = server::build_router(state);

    let encoded = base64::engine::general_purpose::STANDARD.encode("user:pass");
    let mut req = connected_request("GET", "/auth_token.js");
    req.headers_mut()
        .insert(header::AUTHORIZATION, format!("Basic {encoded}").parse().unwrap());

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("gotty_auth_token"));
}

#[tokio::test]
async fn repeated_failed_credentials_eventually_trip_the_rate_limiter() {
    let state = build_state(parse_config(&["--credential", "user:pass"]));
    let app = server::build_router(state);

    let bad = base64::engine::general_purpose::STANDARD.encode("user:wrong");
    let mut last_status = StatusCode::OK;
    for _ in 0..6 {
        let mut req = connected_request("GET", "/");
        req.headers_mut()
            .insert(header::AUTHORIZATION, format!("Basic {bad}").parse().unwrap());
        last_status = app.clone().oneshot(req).await.unwrap().status();
    }
    assert_eq!(last_status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn path_prefix_nests_the_whole_router_under_the_configured_prefix() {
    let state = build_state(parse_config(&["--path-prefix", "/base"]));
    let prefix = state.prefix.clone();
    let inner = server::build_router(state);
    let app = axum::Router::new().nest(&prefix, inner);

    let ok = app.clone().oneshot(connected_request("GET", "/base/")).await.unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    let not_found = app.oneshot(connected_request("GET", "/")).await.unwrap();
    assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
}
