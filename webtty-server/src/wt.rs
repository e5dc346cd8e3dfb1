//! A standalone QUIC/HTTP3 accept loop for WebTransport sessions, sharing
//! the HTTP(S) port's address but its own UDP socket. `axum` has no
//! first-class WebTransport CONNECT support, so this runs independently of
//! the HTTP router and is only started when `--webtransport` is set.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use webtty_core::transport::wt::WtTransport;

use crate::config::Config;
use crate::state::ServerState;

pub async fn run_webtransport_listener(config: Arc<Config>, state: ServerState) -> anyhow::Result<()> {
    let server_config = build_quinn_server_config(&config)?;
    let addr = SocketAddr::new(config.addr, config.port);
    let endpoint = quinn::Endpoint::server(server_config, addr)
        .with_context(|| format!("binding WebTransport UDP listener on {addr}"))?;

    info!(%addr, "webtransport listener bound");

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            incoming = endpoint.accept() => {
                let Some(incoming) = incoming else { break };
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = accept_session(incoming, state).await {
                        warn!(error = %e, "webtransport session setup failed");
                    }
                });
            }
        }
    }

    endpoint.wait_idle().await;
    Ok(())
}

async fn accept_session(incoming: quinn::Incoming, state: ServerState) -> anyhow::Result<()> {
    let connection = incoming.await.context("QUIC handshake failed")?;
    let remote = connection.remote_address().to_string();

    let request = web_transport_quinn::accept(connection)
        .await
        .context("WebTransport CONNECT negotiation failed")?;

    let expected_path = format!("{}/wt", state.prefix);
    if request.url().path() != expected_path {
        let _ = request.close(404u32.into());
        return Ok(());
    }

    let session = request.ok().await.context("WebTransport session accept failed")?;
    let transport: Arc<dyn webtty_core::Transport> =
        Arc::new(WtTransport::accept(session, remote.clone()).await?);

    let headers: HashMap<String, String> = HashMap::new();
    let options = state.engine_options();
    let result = state
        .orchestrator
        .handle_session(transport, options, remote, headers)
        .await;
    if state.config.once {
        state.shutdown.cancel();
    }
    result?;
    Ok(())
}

fn build_quinn_server_config(config: &Config) -> anyhow::Result<quinn::ServerConfig> {
    let cert_path = config
        .tls_cert
        .as_ref()
        .context("--webtransport requires --tls-cert")?;
    let key_path = config
        .tls_key
        .as_ref()
        .context("--webtransport requires --tls-key")?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(
        File::open(cert_path).with_context(|| format!("reading {}", cert_path.display()))?,
    ))
    .collect::<Result<Vec<_>, _>>()
    .context("parsing TLS certificate chain")?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(key_path).with_context(|| format!("reading {}", key_path.display()))?,
    ))
    .context("parsing TLS private key")?
    .context("no private key found in key file")?;

    let mut rustls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("building rustls server config")?;
    rustls_config.alpn_protocols = vec![b"h3".to_vec()];

    let quic_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(rustls_config)
        .context("rustls config incompatible with QUIC")?;
    Ok(quinn::ServerConfig::with_crypto(Arc::new(quic_crypto)))
}
