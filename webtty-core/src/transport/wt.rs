//! C3: WebTransport transport. QUIC streams carry no intrinsic message
//! boundary, so this transport imposes an explicit 2-byte big-endian
//! length prefix in front of every message.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::TransportError;
use crate::transport::Transport;

/// Maximum payload: N must fit in a 2-byte length prefix.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Encode a frame as it goes on the wire: 2-byte big-endian length prefix
/// followed by `payload`. Pulled out as a pure function so the framing
/// property can be tested without a live QUIC stream.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(TransportError::MessageTooLarge);
    }
    let mut out = Vec::with_capacity(2 + payload.len());
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decode one frame from the front of `wire`, returning the payload and
/// the number of bytes consumed. `max_buf` models the receiver's buffer
/// size (models `MessageTooLarge`).
pub fn decode_frame(wire: &[u8], max_buf: usize) -> Result<(Vec<u8>, usize), TransportError> {
    if wire.len() < 2 {
        return Err(TransportError::PeerClosed);
    }
    let len = u16::from_be_bytes([wire[0], wire[1]]) as usize;
    if len > max_buf {
        return Err(TransportError::MessageTooLarge);
    }
    if wire.len() < 2 + len {
        return Err(TransportError::PeerClosed);
    }
    Ok((wire[2..2 + len].to_vec(), 2 + len))
}

pub struct WtTransport {
    session: web_transport_quinn::Session,
    send: Mutex<web_transport_quinn::SendStream>,
    recv: Mutex<web_transport_quinn::RecvStream>,
    remote_addr: String,
}

impl WtTransport {
    /// Construct a transport over the session's single bidirectional
    /// stream, accepted once per session.
    pub async fn accept(
        session: web_transport_quinn::Session,
        remote_addr: String,
    ) -> Result<Self, TransportError> {
        let (send, recv) = session
            .accept_bi()
            .await
            .map_err(|e| TransportError::WebTransport(e.to_string()))?;
        Ok(Self {
            session,
            send: Mutex::new(send),
            recv: Mutex::new(recv),
            remote_addr,
        })
    }
}

#[async_trait]
impl Transport for WtTransport {
    async fn read(&self, buf: &mut Vec<u8>) -> Result<usize, TransportError> {
        let mut recv = self.recv.lock().await;
        let mut header = [0u8; 2];
        recv.read_exact(&mut header)
            .await
            .map_err(|_| TransportError::PeerClosed)?;
        let len = u16::from_be_bytes(header) as usize;

        if len > buf.capacity() {
            // Drain/skip so the stream stays in sync even though we reject
            // the message (the buffer is smaller than the message).
            let mut sink = vec![0u8; len];
            let _ = recv.read_exact(&mut sink).await;
            return Err(TransportError::MessageTooLarge);
        }

        buf.clear();
        buf.resize(len, 0);
        recv.read_exact(buf)
            .await
            .map_err(|_| TransportError::PeerClosed)?;
        Ok(len)
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let framed = encode_frame(bytes)?;
        let mut send = self.send.lock().await;
        send.write_all(&framed)
            .await
            .map_err(|e| TransportError::WebTransport(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        {
            let mut send = self.send.lock().await;
            let _ = send.finish();
        }
        self.session.close(0, b"");
        Ok(())
    }

    fn remote_addr(&self) -> String {
        self.remote_addr.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_for_payloads_within_the_limit() {
        for len in [0usize, 1, 1024, MAX_FRAME_LEN] {
            let payload = vec![0xAB; len];
            let wire = encode_frame(&payload).unwrap();
            let (decoded, consumed) = decode_frame(&wire, MAX_FRAME_LEN).unwrap();
            assert_eq!(decoded, payload);
            assert_eq!(consumed, wire.len());
        }
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_FRAME_LEN + 1];
        assert!(matches!(
            encode_frame(&payload),
            Err(TransportError::MessageTooLarge)
        ));
    }

    #[test]
    fn decode_rejects_payload_larger_than_receiver_buffer() {
        let payload = vec![0u8; 100];
        let wire = encode_frame(&payload).unwrap();
        assert!(matches!(
            decode_frame(&wire, 10),
            Err(TransportError::MessageTooLarge)
        ));
    }

    #[test]
    fn decode_reports_peer_closed_on_truncated_frame() {
        let wire = encode_frame(b"hello").unwrap();
        assert!(matches!(
            decode_frame(&wire[..3], MAX_FRAME_LEN),
            Err(TransportError::PeerClosed)
        ));
    }
}
