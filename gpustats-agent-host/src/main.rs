//! GPU Stats Agent Host - per-machine GPU telemetry agent
//!
//! This agent runs next to the GPU and:
//! - Serves the local snapshot on `GET /gpu`
//! - Streams live snapshots on `GET /gpu/stream` (SSE)
//! - Pushes snapshots to the stats kernel on a fixed cadence

mod config;
mod http;
mod push;

use anyhow::{Context, Result};
use config::AgentConfig;
use gpustats_core::{NvidiaSmi, PeriodicHandle, SnapshotSource, StreamPublisher, SubscriberRegistry};
use push::Pusher;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Main agent state
struct Agent {
    config: AgentConfig,
    source: Arc<dyn SnapshotSource>,
    subscribers: Arc<SubscriberRegistry>,
}

impl Agent {
    fn new(config: AgentConfig) -> Self {
        info!("Initializing GPU Stats Agent Host v{}", env!("CARGO_PKG_VERSION"));
        let source: Arc<dyn SnapshotSource> = Arc::new(
            NvidiaSmi::with_binary(&config.sampler.nvidia_smi)
                .with_timeout(Duration::from_millis(config.sampler.timeout_ms.max(1))),
        );
        Self {
            config,
            source,
            subscribers: Arc::new(SubscriberRegistry::new()),
        }
    }

    /// Push loop, or `None` when push is disabled or misconfigured.
    fn start_push(&self) -> Option<PeriodicHandle> {
        let target = match self.config.push.target() {
            Ok(Some(target)) => target,
            Ok(None) => {
                info!("Push disabled");
                return None;
            }
            Err(e) => {
                warn!("Push disabled: {}", e);
                return None;
            }
        };

        match Pusher::new(self.source.clone(), target) {
            Ok(pusher) => Some(Arc::new(pusher).spawn(self.config.push.interval())),
            Err(e) => {
                warn!("Push disabled: could not build HTTP client: {}", e);
                None
            }
        }
    }

    /// Start background loops and serve until Ctrl-C
    async fn run(self) -> Result<()> {
        let publisher = Arc::new(StreamPublisher::new(self.source.clone(), self.subscribers.clone()));
        let stream_task = publisher.spawn(Duration::from_millis(self.config.stream.interval_ms.max(1)));
        let push_task = self.start_push();

        let app = http::build_router(http::LocalState {
            source: self.source.clone(),
            subscribers: self.subscribers.clone(),
        });

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.server.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!("Local GPU server running at http://localhost:{}/gpu", self.config.server.port);
        info!("SSE stream at http://localhost:{}/gpu/stream", self.config.server.port);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server failed")?;

        stream_task.stop().await;
        if let Some(task) = push_task {
            task.stop().await;
        }
        info!("Agent stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gpustats_agent_host=info,gpustats_core=info")),
        )
        .init();

    info!("GPU Stats Agent Host starting...");

    let config = AgentConfig::load().await;
    Agent::new(config).run().await.context("Agent execution failed")?;

    Ok(())
}
