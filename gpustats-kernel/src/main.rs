/**
 * GPU STATS KERNEL - Point d'entrée du serveur central
 *
 * RÔLE : Orchestration des modules : config, auth, store, registre SSE, HTTP.
 * Bootstrap du serveur avec logging et arrêt propre sur Ctrl-C.
 *
 * ARCHITECTURE : API REST (ingress/query) + flux SSE live + échantillonnage local optionnel.
 */

mod auth;
mod config;
mod error;
mod http;

use crate::config::{load_config, KernelConfig};
use crate::http::AppState;

use anyhow::{Context, Result};
use gpustats_core::{NvidiaSmi, StreamPublisher};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gpustats_kernel=info,gpustats_core=info,tower_http=info")),
        )
        .init();

    let cfg: KernelConfig = load_config().await;
    let app_state = AppState::new(&cfg);
    if app_state.keys.is_empty() {
        warn!("no API keys configured: /api/push and /api/stats will reject every request");
    } else {
        let devices: Vec<&String> = cfg.api_keys.keys().collect();
        info!(keys = app_state.keys.len(), ?devices, "loaded API keys");
    }

    // flux live alimenté par le GPU local
    let stream_task = if cfg.local_sampling {
        let publisher = Arc::new(StreamPublisher::new(
            Arc::new(
                NvidiaSmi::with_binary(&cfg.nvidia_smi)
                    .with_timeout(Duration::from_millis(cfg.sample_timeout_ms.max(1))),
            ),
            app_state.subscribers.clone(),
        ));
        Some(publisher.spawn(Duration::from_millis(cfg.stream_interval_ms.max(1))))
    } else {
        None
    };

    let app = http::build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on http://{addr}");
    info!("SSE live stats at http://localhost:{}/gpu/stream", cfg.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    if let Some(task) = stream_task {
        task.stop().await;
    }
    info!("kernel stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
