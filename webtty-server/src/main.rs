use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use webtty_core::BackendFactory;
use webtty_pty::PtyBackendFactory;

use webtty_server::config::Config;
use webtty_server::error::ServerError;
use webtty_server::state::ServerState;
use webtty_server::{server, wt};

fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    config.validate().map_err(ServerError::from)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let shutdown = CancellationToken::new();

    let random_segment = config.random_url.then(|| nanoid::nanoid!(16));
    if let Some(segment) = &random_segment {
        info!(prefix = %format!("/{segment}"), "random URL guard active");
    }

    let factory: Arc<dyn BackendFactory> = Arc::new(PtyBackendFactory::from_env(config.width, config.height));
    let state = ServerState::new(config.clone(), factory, shutdown.clone(), random_segment.as_deref());

    let router = server::build_router(state.clone());
    let app = if state.prefix.is_empty() {
        router
    } else {
        axum::Router::new().nest(&state.prefix, router)
    };

    let addr = SocketAddr::new(config.addr, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    info!(%addr, "http listener bound");

    let wt_handle = if config.webtransport {
        let config = config.clone();
        let state = state.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = wt::run_webtransport_listener(config, state).await {
                error!(error = %e, "webtransport listener exited with error");
            }
        }))
    } else {
        None
    };

    let server_shutdown = shutdown.clone();
    let serve_handle = tokio::spawn(
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            server_shutdown.cancelled().await;
        }),
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, draining sessions");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();

    if let Ok(result) = serve_handle.await {
        result.context("http server error")?;
    }

    state.counter.wait().await;

    if let Some(handle) = wt_handle {
        let _ = handle.await;
    }

    info!("shutdown complete");
    Ok(())
}
