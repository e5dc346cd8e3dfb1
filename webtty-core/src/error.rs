use thiserror::Error;

/// Errors surfaced by a [`crate::transport::Transport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("message exceeds receiver buffer")]
    MessageTooLarge,
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("quic/webtransport error: {0}")]
    WebTransport(String),
}

/// Errors that end a session. These map onto the error-kind taxonomy
/// kinds 3-6 (handshake, protocol, io, resource).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed init message: {0}")]
    BadInitMessage(String),
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("malformed query-string arguments: {0}")]
    BadArguments(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("backend io error: {0}")]
    BackendIo(std::io::Error),
    #[error("session cancelled")]
    Cancelled,
}

impl EngineError {
    /// True for handshake-stage errors that must close the transport
    /// immediately without attempting the streaming pumps.
    pub fn is_handshake_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::BadInitMessage(_)
                | EngineError::AuthenticationFailed
                | EngineError::BadArguments(_)
                | EngineError::BackendUnavailable(_)
        )
    }
}
