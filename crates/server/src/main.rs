//! Server bootstrap. Grounded verbatim in shape on
//! `crates/server/src/main.rs`'s tracing/metrics init and graceful-shutdown
//! serve loop; the teacher's domain-specific background jobs (indexing,
//! TUI progress, facet ingest) have no counterpart here — this binary's own
//! background work is the pub/sub listener and the connection sweep,
//! spawned by [`corpusq_server::engine::listener::spawn`].

use std::sync::Arc;

use corpusq_cache::{InMemoryCache, LocalChannel};
use corpusq_server::adapters::{NoopExportWriter, NoopPrefilter, StubDbExecutor, StubSqlGenerator, TokioWorkerRuntime};
use corpusq_server::config::EngineConfig;
use corpusq_server::engine::listener;
use corpusq_server::metrics::init_metrics;
use corpusq_server::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    init_metrics();

    let config = EngineConfig::from_env();
    let port = config.port;

    let channel = Arc::new(LocalChannel::default());
    let state = AppState::new(
        config,
        Arc::new(InMemoryCache::new()),
        channel.clone(),
        Arc::new(TokioWorkerRuntime::new()),
        Arc::new(StubSqlGenerator),
        Arc::new(NoopPrefilter),
        Arc::new(StubDbExecutor),
        Arc::new(NoopExportWriter),
    );

    listener::spawn(state.clone(), channel);

    let app = corpusq_server::create_app(state);

    let tcp_listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "corpusq-server listening");

    axum::serve(tcp_listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
