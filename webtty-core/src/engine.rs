//! C7: the WebTTY protocol engine. Owns one transport and one backend for
//! the life of a session; runs the handshake, then two cooperating pumps
//! on top of the wire protocol.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde_json::Value as Json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::AuthTokenStore;
use crate::backend::{parse_query_args, Backend, BackendFactory};
use crate::error::{EngineError, TransportError};
use crate::proto::{self, client_tag, server_tag, Encoding, InitMessage, ResizeTerminal};
use crate::transport::Transport;

/// Options snapshot the orchestrator hands to each engine instance.
#[derive(Clone)]
pub struct EngineOptions {
    pub permit_write: bool,
    pub permit_arguments: bool,
    pub max_message_size: usize,
    pub reconnect_secs: Option<u32>,
    pub preferences: Json,
    pub title_template: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            permit_write: false,
            permit_arguments: false,
            max_message_size: 1024 * 1024,
            reconnect_secs: None,
            preferences: Json::Object(Default::default()),
            title_template: "{{.Command}}".to_string(),
        }
    }
}

pub struct Engine {
    transport: Arc<dyn Transport>,
    factory: Arc<dyn BackendFactory>,
    auth: Arc<AuthTokenStore>,
    options: EngineOptions,
    client_ip: String,
    headers: HashMap<String, String>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        transport: Arc<dyn Transport>,
        factory: Arc<dyn BackendFactory>,
        auth: Arc<AuthTokenStore>,
        options: EngineOptions,
        client_ip: String,
        headers: HashMap<String, String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            factory,
            auth,
            options,
            client_ip,
            headers,
            cancel,
        }
    }

    /// Drive one session end to end: INIT -> AUTH -> SPAWN -> STREAMING ->
    /// TEARDOWN. Always closes the transport and the backend
    /// before returning, regardless of outcome.
    pub async fn run(self) -> Result<(), EngineError> {
        let result = self.run_inner().await;
        if let Err(ref e) = result {
            if e.is_handshake_fatal() {
                info!(error = %e, remote = %self.transport.remote_addr(), "handshake failed");
            } else {
                info!(error = %e, remote = %self.transport.remote_addr(), "session ended");
            }
        }
        let _ = self.transport.close().await;
        result
    }

    async fn run_inner(&self) -> Result<(), EngineError> {
        let backend = self.handshake().await?;
        let result = self.stream(backend.as_ref()).await;
        let _ = backend.close().await;
        result
    }

    /// INIT -> AUTH -> SPAWN, emitting the fixed-order initial control
    /// messages on success.
    async fn handshake(&self) -> Result<Box<dyn Backend>, EngineError> {
        let mut buf = Vec::with_capacity(self.options.max_message_size);
        let n = self.transport.read(&mut buf).await?;
        let init: InitMessage = serde_json::from_slice(&buf[..n])
            .map_err(|e| EngineError::BadInitMessage(e.to_string()))?;

        if !self.auth.validate(&init.auth_token, &self.client_ip) {
            return Err(EngineError::AuthenticationFailed);
        }

        let args = if self.options.permit_arguments && !init.arguments.is_empty() {
            parse_query_args(&init.arguments).map_err(EngineError::BadArguments)?
        } else {
            Default::default()
        };

        let backend = self
            .factory
            .spawn(&args, &self.headers)
            .await
            .map_err(EngineError::BackendUnavailable)?;

        self.send_initial_messages(backend.as_ref()).await?;
        Ok(backend)
    }

    async fn send_initial_messages(&self, backend: &dyn Backend) -> Result<(), EngineError> {
        let title = render_title(&self.options.title_template, &backend.window_title_variables());
        self.transport
            .write(&proto::frame(server_tag::SET_WINDOW_TITLE, title.as_bytes()))
            .await?;

        let prefs = serde_json::to_vec(&self.options.preferences)
            .map_err(|e| EngineError::Protocol(e.to_string()))?;
        self.transport
            .write(&proto::frame(server_tag::SET_PREFERENCES, &prefs))
            .await?;

        if let Some(secs) = self.options.reconnect_secs {
            let payload = serde_json::to_vec(&serde_json::json!({ "reconnect": secs }))
                .map_err(|e| EngineError::Protocol(e.to_string()))?;
            self.transport
                .write(&proto::frame(server_tag::SET_RECONNECT, &payload))
                .await?;
        }

        let buffer_size = serde_json::to_vec(&serde_json::json!({
            "buffer_size": self.options.max_message_size
        }))
        .map_err(|e| EngineError::Protocol(e.to_string()))?;
        self.transport
            .write(&proto::frame(server_tag::SET_BUFFER_SIZE, &buffer_size))
            .await?;

        Ok(())
    }

    /// STREAMING: run both pumps until either exits, or the context is
    /// cancelled.
    async fn stream(&self, backend: &dyn Backend) -> Result<(), EngineError> {
        let encoding = AtomicU8::new(0); // 0 = base64 (default), 1 = null

        let client_to_backend = self.client_to_backend_pump(backend, &encoding);
        let backend_to_client = self.backend_to_client_pump(backend, &encoding);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                let _ = self.transport.close().await;
                let _ = backend.close().await;
                Err(EngineError::Cancelled)
            }
            res = client_to_backend => res,
            res = backend_to_client => res,
        }
    }

    async fn client_to_backend_pump(
        &self,
        backend: &dyn Backend,
        encoding: &AtomicU8,
    ) -> Result<(), EngineError> {
        let mut buf = Vec::with_capacity(self.options.max_message_size);
        loop {
            let n = match self.transport.read(&mut buf).await {
                Ok(n) => n,
                Err(TransportError::MessageTooLarge) => {
                    warn!(remote = %self.transport.remote_addr(), "oversized client message, closing session");
                    return Err(EngineError::Protocol("oversized client message".into()));
                }
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                continue;
            }
            let tag = buf[0];
            let payload = &buf[1..n];

            match tag {
                client_tag::INPUT => {
                    if self.options.permit_write {
                        match decode_payload(current_encoding(encoding), payload) {
                            Ok(data) => {
                                backend.write(&data).await.map_err(EngineError::BackendIo)?;
                            }
                            Err(e) => warn!(error = %e, "dropping malformed input message"),
                        }
                    }
                }
                client_tag::PING => {
                    self.transport
                        .write(&proto::frame(server_tag::PONG, &[]))
                        .await?;
                }
                client_tag::RESIZE_TERMINAL => {
                    match serde_json::from_slice::<ResizeTerminal>(payload) {
                        Ok(resize) => {
                            backend
                                .resize_terminal(resize.columns, resize.rows)
                                .await
                                .map_err(EngineError::BackendIo)?;
                        }
                        Err(e) => warn!(error = %e, "malformed resize message"),
                    }
                }
                client_tag::SET_ENCODING => {
                    let requested = String::from_utf8_lossy(payload);
                    match Encoding::parse(requested.trim()) {
                        Some(Encoding::Base64) => encoding.store(0, Ordering::SeqCst),
                        Some(Encoding::Null) => encoding.store(1, Ordering::SeqCst),
                        None => warn!(requested = %requested, "unknown encoding requested"),
                    }
                }
                t if (client_tag::TMUX_FIRST..=client_tag::TMUX_LAST).contains(&t) => {
                    // tmux-specific pass-through tags: gated behind
                    // permit_write the same as plain input, since they
                    // also cause backend writes.
                    if self.options.permit_write {
                        backend.write(payload).await.map_err(EngineError::BackendIo)?;
                    }
                }
                _ => {
                    debug!(tag, "ignoring unknown client tag");
                }
            }
        }
    }

    async fn backend_to_client_pump(
        &self,
        backend: &dyn Backend,
        encoding: &AtomicU8,
    ) -> Result<(), EngineError> {
        let chunk_size = self.options.max_message_size.saturating_sub(1).max(1);
        let mut buf = vec![0u8; chunk_size];
        loop {
            let n = backend.read(&mut buf).await.map_err(EngineError::BackendIo)?;
            if n == 0 {
                return Ok(()); // backend EOF
            }
            let framed = proto::frame_output(current_encoding(encoding), &buf[..n]);
            self.transport.write(&framed).await?;
        }
    }
}

fn current_encoding(encoding: &AtomicU8) -> Encoding {
    match encoding.load(Ordering::SeqCst) {
        1 => Encoding::Null,
        _ => Encoding::Base64,
    }
}

fn decode_payload(encoding: Encoding, payload: &[u8]) -> Result<Vec<u8>, String> {
    match encoding {
        Encoding::Null => Ok(payload.to_vec()),
        Encoding::Base64 => {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(payload)
                .map_err(|e| e.to_string())
        }
    }
}

/// Interpolate `{{name}}` placeholders in `template` from `vars`, leaving
/// unknown placeholders untouched (the window title is "interpolated
/// through the configured title template").
fn render_title(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        if let Some(end) = after.find("}}") {
            let name = after[..end].trim();
            if let Some(value) = vars.get(name) {
                out.push_str(value);
            } else {
                out.push_str(&rest[start..start + 4 + name.len()]);
            }
            rest = &after[end + 2..];
        } else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_title_substitutes_known_variables() {
        let mut vars = HashMap::new();
        vars.insert("Command".to_string(), "zsh".to_string());
        assert_eq!(render_title("shell: {{Command}}", &vars), "shell: zsh");
    }

    #[test]
    fn render_title_leaves_unknown_placeholders() {
        let vars = HashMap::new();
        assert_eq!(render_title("{{Unknown}}", &vars), "{{Unknown}}");
    }

    #[test]
    fn decode_payload_base64_roundtrip() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"hi");
        let decoded = decode_payload(Encoding::Base64, encoded.as_bytes()).unwrap();
        assert_eq!(decoded, b"hi");
    }

    #[test]
    fn decode_payload_null_is_identity() {
        let decoded = decode_payload(Encoding::Null, b"raw").unwrap();
        assert_eq!(decoded, b"raw");
    }
}
