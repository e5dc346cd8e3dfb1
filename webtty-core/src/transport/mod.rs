//! C1: the transport contract. A transport is a reliable, in-order,
//! message-preserving bidirectional byte channel. The engine depends only
//! on this trait — it never assumes anything about WS vs WebTransport
//! framing beyond message-boundary preservation.

pub mod ws;
pub mod wt;

use async_trait::async_trait;

use crate::error::TransportError;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Block until one complete protocol message is available, writing it
    /// into `buf`. Returns the message length.
    async fn read(&self, buf: &mut Vec<u8>) -> Result<usize, TransportError>;

    /// Send exactly one protocol message, atomically from the peer's
    /// viewpoint.
    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Tear down the underlying channel. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;

    /// Best-effort peer identification for logging/rate-limiting.
    fn remote_addr(&self) -> String;
}
