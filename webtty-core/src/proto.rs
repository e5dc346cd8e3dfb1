//! Wire message taxonomy: tags and payload shapes for both directions.
//!
//! Every protocol message on the wire is `[tag: u8][payload]`. The payload
//! shape depends on the tag: some are raw/base64 bytes, some are JSON.

use serde::{Deserialize, Serialize};

/// Client -> server tags.
pub mod client_tag {
    pub const UNKNOWN: u8 = 0;
    pub const INPUT: u8 = 1;
    pub const PING: u8 = 2;
    pub const RESIZE_TERMINAL: u8 = 3;
    pub const SET_ENCODING: u8 = 4;
    // tmux-specific pass-through tags, 0x05..=0x0E.
    pub const TMUX_FIRST: u8 = 0x05;
    pub const TMUX_LAST: u8 = 0x0E;
}

/// Server -> client tags.
pub mod server_tag {
    pub const UNKNOWN: u8 = 0;
    pub const OUTPUT: u8 = 1;
    pub const PONG: u8 = 2;
    pub const SET_WINDOW_TITLE: u8 = 3;
    pub const SET_PREFERENCES: u8 = 4;
    pub const SET_RECONNECT: u8 = 5;
    pub const SET_BUFFER_SIZE: u8 = 6;
    // tmux extensions, 0x07..=0x0B.
    pub const TMUX_FIRST: u8 = 0x07;
    pub const TMUX_LAST: u8 = 0x0B;
}

/// True for any client tag whose effect is a write to the backend and so
/// must be gated by `permit-write`: tag `1` and all tmux tags `5..=E`.
pub fn is_write_gated_tag(tag: u8) -> bool {
    tag == client_tag::INPUT || (client_tag::TMUX_FIRST..=client_tag::TMUX_LAST).contains(&tag)
}

/// The first message sent by the client after the transport opens.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct InitMessage {
    #[serde(rename = "AuthToken", default)]
    pub auth_token: String,
    #[serde(rename = "Arguments", default)]
    pub arguments: String,
}

/// Body of a `resize-terminal` (tag `3`) control message.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ResizeTerminal {
    pub columns: u16,
    pub rows: u16,
}

/// Body of a `set-encoding` (tag `4`) control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Base64,
    Null,
}

impl Encoding {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "base64" => Some(Encoding::Base64),
            "null" => Some(Encoding::Null),
            _ => None,
        }
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Base64
    }
}

/// Body of a `set-reconnect` (tag `5`) control message: seconds, or absent
/// if reconnect is disabled.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SetReconnect {
    pub reconnect: u32,
}

/// Body of a `set-buffer-size` (tag `6`) control message.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SetBufferSize {
    pub buffer_size: usize,
}

/// Encode a server->client message: one tag byte followed by `payload`.
pub fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(tag);
    out.extend_from_slice(payload);
    out
}

/// Encode an output (tag `1`) message, applying the active encoding.
pub fn frame_output(encoding: Encoding, data: &[u8]) -> Vec<u8> {
    match encoding {
        Encoding::Base64 => {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(data);
            frame(server_tag::OUTPUT, encoded.as_bytes())
        }
        Encoding::Null => frame(server_tag::OUTPUT, data),
    }
}
