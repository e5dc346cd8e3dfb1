use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use webtty_core::{AuthTokenStore, BackendFactory, ConnectionCounter, EngineOptions, Orchestrator, RateLimiter};

use crate::config::Config;

/// Everything an HTTP handler needs, shared across every request.
/// Constructed once in `main` and cloned (cheap, `Arc`-backed) into every
/// axum handler.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub auth: Arc<AuthTokenStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub orchestrator: Arc<Orchestrator>,
    pub counter: Arc<ConnectionCounter>,
    pub shutdown: CancellationToken,
    pub title: String,
    /// The effective path prefix (random segment already folded in, if
    /// `--random-url` was set), shared by the HTTP router and the
    /// WebTransport listener so both enforce the same guard.
    pub prefix: String,
}

impl ServerState {
    pub fn new(
        config: Arc<Config>,
        factory: Arc<dyn BackendFactory>,
        shutdown: CancellationToken,
        random_segment: Option<&str>,
    ) -> Self {
        let auth = Arc::new(AuthTokenStore::new(
            config.basic_auth_enabled(),
            config.ip_bind_tokens,
        ));
        let rate_limiter = Arc::new(RateLimiter::new());
        let max_connections = if config.max_connections > 0 {
            Some(config.max_connections)
        } else {
            None
        };
        let counter = Arc::new(ConnectionCounter::new(std::time::Duration::from_secs(
            config.drain_seconds,
        )));
        let orchestrator = Arc::new(Orchestrator::new(
            counter.clone(),
            auth.clone(),
            factory,
            max_connections,
            shutdown.clone(),
        ));
        let prefix = config.effective_prefix(random_segment);

        Self {
            title: config.title_format.clone(),
            config,
            auth,
            rate_limiter,
            orchestrator,
            counter,
            shutdown,
            prefix,
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            permit_write: self.config.permit_write,
            permit_arguments: self.config.permit_arguments,
            max_message_size: self.config.max_message_size,
            reconnect_secs: self.config.reconnect,
            preferences: serde_json::json!({}),
            title_template: self.config.title_format.clone(),
        }
    }
}
