//! Session core for a dual-transport (WebSocket / WebTransport) terminal
//! bridge: wire protocol, per-connection state machine, the bidirectional
//! transport<->backend pump, liveness, auth, rate limiting, and lifecycle
//! accounting.

pub mod auth;
pub mod backend;
pub mod counter;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod proto;
pub mod ratelimit;
pub mod transport;

pub use auth::AuthTokenStore;
pub use backend::{Backend, BackendArgs, BackendFactory};
pub use counter::ConnectionCounter;
pub use engine::{Engine, EngineOptions};
pub use error::{EngineError, TransportError};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use ratelimit::{client_ip, LockDimension, RateLimiter};
pub use transport::Transport;
