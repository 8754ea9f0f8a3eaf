//! Push loop: sample the local GPU and POST the snapshot to the kernel.
//!
//! Two wire shapes:
//! - authenticated: `{"deviceId": .., "stats": ..}` with an `x-api-key` header
//! - open: the bare snapshot, for the kernel's `/push-sse` rebroadcast
//!
//! Every failure is logged and the tick is dropped. No retry, no backlog.

use crate::config::PushTarget;
use gpustats_core::{spawn_periodic, GpuSnapshot, PeriodicHandle, SnapshotSource};
use reqwest::StatusCode;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("kernel answered {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    NoDevice,
    SampleFailed,
    Failed,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PushBody<'a> {
    device_id: &'a str,
    stats: &'a GpuSnapshot,
}

pub struct Pusher {
    client: reqwest::Client,
    target: PushTarget,
    source: Arc<dyn SnapshotSource>,
}

impl Pusher {
    pub fn new(source: Arc<dyn SnapshotSource>, target: PushTarget) -> Result<Self, PushError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, target, source })
    }

    pub fn url(&self) -> &str {
        match &self.target {
            PushTarget::Authenticated { url, .. } | PushTarget::Open { url } => url,
        }
    }

    /// Send one snapshot. Any non-2xx answer is a `Rejected` error.
    pub async fn push(&self, snapshot: &GpuSnapshot) -> Result<(), PushError> {
        let request = match &self.target {
            PushTarget::Authenticated { url, device_id, api_key } => self
                .client
                .post(url)
                .header("x-api-key", api_key)
                .json(&PushBody { device_id, stats: snapshot }),
            PushTarget::Open { url } => self.client.post(url).json(snapshot),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PushError::Rejected { status, body });
        }
        Ok(())
    }

    pub async fn tick(&self) -> PushOutcome {
        let snapshot = match self.source.sample().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("No NVIDIA GPU found, nothing to push");
                return PushOutcome::NoDevice;
            }
            Err(e) => {
                warn!("GPU sampling failed: {}", e);
                return PushOutcome::SampleFailed;
            }
        };

        match self.push(&snapshot).await {
            Ok(()) => {
                debug!("Pushed GPU stats to {}", self.url());
                PushOutcome::Pushed
            }
            Err(e) => {
                warn!("Push to {} failed: {}", self.url(), e);
                PushOutcome::Failed
            }
        }
    }

    pub fn spawn(self: Arc<Self>, period: Duration) -> PeriodicHandle {
        info!("Pushing GPU stats to {} every {:?}", self.url(), period);
        spawn_periodic("push", period, move || {
            let pusher = Arc::clone(&self);
            async move {
                pusher.tick().await;
            }
        })
    }
}
