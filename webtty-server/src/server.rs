use axum::routing::get;
use axum::Router;
use axum_embed::ServeEmbed;
use tower_http::trace::TraceLayer;

use crate::assets::Assets;
use crate::middleware;
use crate::routes;
use crate::state::ServerState;

/// Build the full HTTP router: the explicit route table plus the embedded
/// static-asset fallback, wrapped in the middleware chain (header fixer,
/// access log, basic-auth + rate limiter). The random-URL guard is simply
/// the router being nested under `state.config.effective_prefix(..)` by
/// the caller in `main.rs`.
pub fn build_router(state: ServerState) -> Router {
    let serve_assets = ServeEmbed::<Assets>::new();

    Router::new()
        .route("/", get(routes::index))
        .route("/manifest.webmanifest", get(routes::manifest))
        .route("/config.js", get(routes::config_js))
        .route("/auth_token.js", get(routes::auth_token_js))
        .route("/ws", get(routes::ws_upgrade))
        .fallback_service(serve_assets)
        .layer(axum::middleware::from_fn(middleware::header_fixer))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_and_rate_limit,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
