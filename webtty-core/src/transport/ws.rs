//! C2: WebSocket transport. One text WebSocket message encodes exactly one
//! protocol message.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;

use crate::error::TransportError;
use crate::transport::Transport;

pub struct WsTransport {
    sender: Mutex<SplitSink<WebSocket, Message>>,
    receiver: Mutex<SplitStream<WebSocket>>,
    remote_addr: String,
    max_message_size: usize,
}

impl WsTransport {
    pub fn new(socket: WebSocket, remote_addr: String, max_message_size: usize) -> Self {
        let (sender, receiver) = socket.split();
        Self {
            sender: Mutex::new(sender),
            receiver: Mutex::new(receiver),
            remote_addr,
            max_message_size,
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn read(&self, buf: &mut Vec<u8>) -> Result<usize, TransportError> {
        let mut receiver = self.receiver.lock().await;
        loop {
            match receiver.next().await {
                None => return Err(TransportError::PeerClosed),
                Some(Err(_)) => return Err(TransportError::PeerClosed),
                Some(Ok(Message::Close(_))) => return Err(TransportError::PeerClosed),
                // Binary frames are discarded defensively — only text frames
                // carry protocol messages.
                Some(Ok(Message::Binary(_))) => continue,
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Text(text))) => {
                    let bytes = text.into_bytes();
                    if bytes.len() > self.max_message_size {
                        return Err(TransportError::MessageTooLarge);
                    }
                    buf.clear();
                    buf.extend_from_slice(&bytes);
                    return Ok(bytes.len());
                }
            }
        }
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut sender = self.sender.lock().await;
        sender
            .send(Message::Text(bytes_to_ws_text(bytes).into()))
            .await
            .map_err(|_| TransportError::PeerClosed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut sender = self.sender.lock().await;
        // Close is best-effort and idempotent: a second call observes an
        // already-closed sink and simply returns an error we swallow.
        let _ = sender.send(Message::Close(None)).await;
        let _ = sender.close().await;
        Ok(())
    }

    fn remote_addr(&self) -> String {
        self.remote_addr.clone()
    }
}

/// Map each byte to the Unicode scalar value of the same ordinal rather
/// than re-encoding lossily. Raw PTY output sent under the "null" encoding
/// can be any byte and isn't guaranteed valid UTF-8, but every codepoint in
/// 0..=0xFF is, so the resulting string is always a legal WS text frame,
/// and the mapping is bijective, so every input byte survives the trip
/// exactly.
fn bytes_to_ws_text(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_payload_round_trips_as_plain_text() {
        let text = bytes_to_ws_text(b"hello\n");
        assert_eq!(text, "hello\n");
    }

    #[test]
    fn every_byte_value_maps_to_a_distinct_codepoint_and_back() {
        let bytes: Vec<u8> = (0..=255).collect();
        let text = bytes_to_ws_text(&bytes);
        let round_tripped: Vec<u8> = text.chars().map(|c| c as u32 as u8).collect();
        assert_eq!(round_tripped, bytes);
    }

    #[test]
    fn non_utf8_byte_sequence_still_produces_valid_text() {
        let bytes = [0xFFu8, 0x80, 0xC0, 0xFE, 0x00, 0x41];
        let text = bytes_to_ws_text(&bytes);
        let round_tripped: Vec<u8> = text.chars().map(|c| c as u32 as u8).collect();
        assert_eq!(round_tripped, bytes);
    }
}
