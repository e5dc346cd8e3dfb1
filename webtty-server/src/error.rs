use thiserror::Error;

/// Startup-time configuration and bind failures. Library crates stay on
/// `thiserror`; this binary crate is the edge that converts everything
/// into `anyhow::Result` for `main`.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("TLS setup failed: {0}")]
    Tls(String),
}
