use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

use lodestone::engine::Engine;
use lodestone::{EngineConfig, routes, server};

#[tokio::main]
async fn main() -> Result<()> {
    // Resolve log directory (next to data_dir or from env)
    let log_dir = std::env::var("LODESTONE_LOG_DIR").unwrap_or_else(|_| {
        dirs::data_local_dir()
            .map(|d| d.join("lodestone").join("logs").to_string_lossy().to_string())
            .unwrap_or_else(|| ".lodestone-data/logs".to_string())
    });
    std::fs::create_dir_all(&log_dir).ok();

    // File appender: daily rotated log files
    let file_appender = tracing_appender::rolling::daily(&log_dir, "lodestone.log");
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lodestone=info,tower_http=info".into());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_ansi(false)
        .with_writer(non_blocking_writer)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    // Log panics before aborting
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_default();
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        error!(target: "lodestone::panic", location = %location, payload = %payload, "PANIC: thread panicked");
        default_panic(info);
    }));

    routes::health::init_start_time();
    routes::health::init_shutdown_notify();

    let config = EngineConfig::from_env();
    let addr: SocketAddr = config.listen_addr.parse()?;

    info!(
        root = %config.root_dir.display(),
        data_dir = %config.data_dir.display(),
        listen_addr = %config.listen_addr,
        embedder = %config.embedder,
        debounce_ms = config.watcher_debounce_ms,
        "lodestone starting"
    );

    let engine = Arc::new(Engine::from_config(config)?);
    let app = server::create_app(engine.clone());

    // Bind and serve first so /health answers immediately; the self-heal
    // pass and the backfill scan can take a while on a large corpus.
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("lodestone listening on {}", addr);

    let startup_engine = engine.clone();
    tokio::task::spawn_blocking(move || match startup_engine.start() {
        Ok(heal_actions) => {
            info!(heal_actions, "engine started");
        }
        Err(e) => {
            error!(error = %e, "engine startup failed");
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let stop_engine = engine.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = stop_engine.shutdown(true) {
            error!(error = %e, "engine shutdown reported an error");
        }
    })
    .await?;

    info!("lodestone shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install secondary Ctrl+C handler");
    };

    let http_shutdown = routes::health::wait_for_shutdown();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, initiating shutdown"); },
        _ = terminate => { info!("received terminate signal, initiating shutdown"); },
        _ = http_shutdown => { info!("received HTTP shutdown request, initiating shutdown"); },
    }
}
