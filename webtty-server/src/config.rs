//! CLI flags and environment variables for the server binary.
//! Out-of-scope for the session core itself, but still ambiently
//! required for a runnable binary, so this lives entirely in the server
//! crate and never leaks into `webtty-core`.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

#[derive(Parser, Debug, Clone)]
#[command(name = "webtty-server", about = "Bridge a PTY to a browser over WebSocket or WebTransport")]
pub struct Config {
    /// Address to listen on.
    #[arg(long, env = "WEBTTY_ADDR", default_value = "127.0.0.1")]
    pub addr: IpAddr,

    /// TCP/UDP port shared by HTTP(S), WebSocket and WebTransport.
    #[arg(long, env = "WEBTTY_PORT", default_value_t = 8080)]
    pub port: u16,

    /// URL path prefix all routes are served under, e.g. "/abc123".
    #[arg(long, env = "WEBTTY_PATH_PREFIX", default_value = "")]
    pub path_prefix: String,

    /// Append a random path prefix instead of (or in addition to) `path_prefix`.
    #[arg(long, env = "WEBTTY_RANDOM_URL")]
    pub random_url: bool,

    /// Enable TLS; requires `--tls-cert` and `--tls-key`.
    #[arg(long, env = "WEBTTY_TLS")]
    pub tls: bool,

    #[arg(long, env = "WEBTTY_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    #[arg(long, env = "WEBTTY_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Require and verify client certificates signed by this CA.
    #[arg(long, env = "WEBTTY_TLS_CA")]
    pub tls_ca: Option<PathBuf>,

    /// Enable the WebTransport (QUIC/HTTP3) listener. Requires TLS.
    #[arg(long, env = "WEBTTY_WEBTRANSPORT")]
    pub webtransport: bool,

    /// HTTP basic-auth credential, "user:pass". Omit with --no-auth.
    #[arg(long, env = "WEBTTY_CREDENTIAL")]
    pub credential: Option<String>,

    #[arg(long, env = "WEBTTY_NO_AUTH")]
    pub no_auth: bool,

    /// Bind issued auth tokens to the IP that requested them.
    #[arg(long, env = "WEBTTY_IP_BIND_TOKENS")]
    pub ip_bind_tokens: bool,

    /// Allow client input to reach the backend. Off by default (read-only demo mode).
    #[arg(long, env = "WEBTTY_PERMIT_WRITE")]
    pub permit_write: bool,

    /// Honor InitMessage.Arguments and forward them to the backend factory.
    #[arg(long, env = "WEBTTY_PERMIT_ARGUMENTS")]
    pub permit_arguments: bool,

    /// Reject new sessions once this many are concurrently active. 0 = unlimited.
    #[arg(long, env = "WEBTTY_MAX_CONNECTIONS", default_value_t = 0)]
    pub max_connections: i64,

    /// Reconnect hint advertised to the client, in seconds. Omit to disable.
    #[arg(long, env = "WEBTTY_RECONNECT")]
    pub reconnect: Option<u32>,

    #[arg(long, env = "WEBTTY_WIDTH", default_value_t = 80)]
    pub width: u16,

    #[arg(long, env = "WEBTTY_HEIGHT", default_value_t = 24)]
    pub height: u16,

    /// `{{Command}}`-style window title template.
    #[arg(long, env = "WEBTTY_TITLE_FORMAT", default_value = "{{Command}} (webtty)")]
    pub title_format: String,

    /// Only accept WebSocket upgrades whose Origin matches this regex.
    #[arg(long, env = "WEBTTY_WS_ORIGIN")]
    pub ws_origin: Option<String>,

    /// Shut down after the first session ends.
    #[arg(long, env = "WEBTTY_ONCE")]
    pub once: bool,

    /// How long shutdown waits for the live-session count to settle at zero.
    #[arg(long, env = "WEBTTY_DRAIN_SECONDS", default_value_t = 5)]
    pub drain_seconds: u64,

    /// Maximum size, in bytes, of a single protocol message.
    #[arg(long, env = "WEBTTY_MAX_MESSAGE_SIZE", default_value_t = 1 << 20)]
    pub max_message_size: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--webtransport requires --tls")]
    WebTransportWithoutTls,
    #[error("--tls requires both --tls-cert and --tls-key")]
    TlsMissingCertOrKey,
    #[error("--credential must be of the form user:pass")]
    MalformedCredential,
    #[error("invalid --ws-origin regex: {0}")]
    InvalidOriginRegex(String),
}

impl Config {
    /// Validate cross-field invariants: caught at startup, before any
    /// listener binds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.webtransport && !self.tls {
            return Err(ConfigError::WebTransportWithoutTls);
        }
        if self.tls && (self.tls_cert.is_none() || self.tls_key.is_none()) {
            return Err(ConfigError::TlsMissingCertOrKey);
        }
        if let Some(cred) = &self.credential {
            if !cred.contains(':') {
                return Err(ConfigError::MalformedCredential);
            }
        }
        if let Some(re) = &self.ws_origin {
            regex::Regex::new(re).map_err(|e| ConfigError::InvalidOriginRegex(e.to_string()))?;
        }
        Ok(())
    }

    pub fn basic_auth_enabled(&self) -> bool {
        !self.no_auth && self.credential.is_some()
    }

    /// The effective path prefix, with any random segment appended.
    pub fn effective_prefix(&self, random_segment: Option<&str>) -> String {
        let mut prefix = self.path_prefix.trim_end_matches('/').to_string();
        if let Some(seg) = random_segment {
            prefix.push('/');
            prefix.push_str(seg);
        }
        prefix
    }
}
