//! C8: the session orchestrator. Ties together the connection counter,
//! the transport handed in by the upgrade handler, the backend factory,
//! and the engine.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth::AuthTokenStore;
use crate::backend::BackendFactory;
use crate::counter::ConnectionCounter;
use crate::engine::{Engine, EngineOptions};
use crate::error::EngineError;
use crate::transport::Transport;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("maximum connection count exceeded")]
    MaxConnectionsExceeded,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub struct Orchestrator {
    counter: Arc<ConnectionCounter>,
    auth: Arc<AuthTokenStore>,
    factory: Arc<dyn BackendFactory>,
    max_connections: Option<i64>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        counter: Arc<ConnectionCounter>,
        auth: Arc<AuthTokenStore>,
        factory: Arc<dyn BackendFactory>,
        max_connections: Option<i64>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            counter,
            auth,
            factory,
            max_connections,
            shutdown,
        }
    }

    /// Run one session to completion: admission control, engine run,
    /// guaranteed teardown.
    pub async fn handle_session(
        &self,
        transport: Arc<dyn Transport>,
        options: EngineOptions,
        client_ip: String,
        headers: HashMap<String, String>,
    ) -> Result<(), OrchestratorError> {
        if !self.counter.try_admit(self.max_connections) {
            return Err(OrchestratorError::MaxConnectionsExceeded);
        }

        let remote = transport.remote_addr();
        info!(remote = %remote, "session admitted");

        let cancel = self.shutdown.child_token();
        let engine = Engine::new(
            transport,
            self.factory.clone(),
            self.auth.clone(),
            options,
            client_ip,
            headers,
            cancel,
        );

        let result = engine.run().await;
        self.counter.done();
        info!(remote = %remote, "session torn down");
        result.map_err(OrchestratorError::from)
    }
}
