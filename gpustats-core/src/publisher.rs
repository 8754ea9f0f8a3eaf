/**
 * STREAM PUBLISHER - Boucle "poll-and-publish" vers les abonnés SSE
 *
 * Un tick = une acquisition + une diffusion :
 * - aucun abonné : on ne lit même pas le capteur
 * - snapshot : `data: <json>` à tous les abonnés
 * - pas de GPU : tick ignoré silencieusement
 * - erreur capteur : log + frame `event: error`
 */

use crate::periodic::{spawn_periodic, PeriodicHandle};
use crate::sampler::SnapshotSource;
use crate::sse::Frame;
use crate::subscribers::SubscriberRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cadence par défaut du flux live.
pub const DEFAULT_STREAM_INTERVAL: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    NoDevice,
    Published { delivered: usize },
    Failed { delivered: usize },
}

pub struct StreamPublisher {
    source: Arc<dyn SnapshotSource>,
    subscribers: Arc<SubscriberRegistry>,
}

impl StreamPublisher {
    pub fn new(source: Arc<dyn SnapshotSource>, subscribers: Arc<SubscriberRegistry>) -> Self {
        Self { source, subscribers }
    }

    pub async fn tick(&self) -> TickOutcome {
        if self.subscribers.is_empty() {
            return TickOutcome::Idle;
        }

        match self.source.sample().await {
            Ok(Some(snapshot)) => match serde_json::to_string(&snapshot) {
                Ok(payload) => {
                    let delivered = self.subscribers.broadcast(&Frame::Data(payload));
                    debug!(delivered, "snapshot broadcast");
                    TickOutcome::Published { delivered }
                }
                Err(e) => {
                    warn!(error = %e, "snapshot serialization failed");
                    let delivered = self.subscribers.broadcast(&Frame::error(e.to_string()));
                    TickOutcome::Failed { delivered }
                }
            },
            Ok(None) => {
                debug!("no NVIDIA GPU found, skipping stream tick");
                TickOutcome::NoDevice
            }
            Err(e) => {
                warn!(error = %e, "GPU sampling failed");
                let delivered = self.subscribers.broadcast(&Frame::error(e.to_string()));
                TickOutcome::Failed { delivered }
            }
        }
    }

    pub fn spawn(self: Arc<Self>, period: Duration) -> PeriodicHandle {
        spawn_periodic("stream", period, move || {
            let publisher = Arc::clone(&self);
            async move {
                publisher.tick().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::SampleError;
    use crate::snapshot::GpuSnapshot;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Script {
        Snapshot,
        NoDevice,
        Fail,
    }

    struct ScriptedSource {
        script: Script,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self { script, calls: AtomicUsize::new(0) })
        }
    }

    impl SnapshotSource for ScriptedSource {
        fn sample(&self) -> BoxFuture<'_, Result<Option<GpuSnapshot>, SampleError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let result = match self.script {
                Script::Snapshot => Ok(Some(GpuSnapshot {
                    temperature_gpu: Some(65.0),
                    ..Default::default()
                })),
                Script::NoDevice => Ok(None),
                Script::Fail => Err(SampleError::Parse("garbage".into())),
            };
            Box::pin(async move { result })
        }
    }

    #[tokio::test]
    async fn test_idle_without_subscribers_does_not_sample() {
        let source = ScriptedSource::new(Script::Snapshot);
        let publisher = StreamPublisher::new(source.clone(), Arc::new(SubscriberRegistry::new()));
        assert_eq!(publisher.tick().await, TickOutcome::Idle);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_snapshot_is_broadcast_as_data_frame() {
        let registry = Arc::new(SubscriberRegistry::new());
        let mut sub = registry.register();
        let publisher = StreamPublisher::new(ScriptedSource::new(Script::Snapshot), registry.clone());

        assert_eq!(publisher.tick().await, TickOutcome::Published { delivered: 1 });
        let frame = sub.recv().await.unwrap();
        assert_eq!(frame.encode(), "data: {\"temperatureGpu\":65.0}\n\n");
    }

    #[tokio::test]
    async fn test_no_device_skips_silently() {
        let registry = Arc::new(SubscriberRegistry::new());
        let mut sub = registry.register();
        let publisher = StreamPublisher::new(ScriptedSource::new(Script::NoDevice), registry.clone());

        assert_eq!(publisher.tick().await, TickOutcome::NoDevice);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_sampling_error_becomes_error_event() {
        let registry = Arc::new(SubscriberRegistry::new());
        let mut sub = registry.register();
        let publisher = StreamPublisher::new(ScriptedSource::new(Script::Fail), registry.clone());

        assert_eq!(publisher.tick().await, TickOutcome::Failed { delivered: 1 });
        let encoded = sub.recv().await.unwrap().encode();
        assert!(encoded.starts_with("event: error\ndata: {\"error\":"));
        assert!(encoded.contains("garbage"));
    }

    #[tokio::test]
    async fn test_spawned_publisher_feeds_subscriber() {
        let registry = Arc::new(SubscriberRegistry::new());
        let mut sub = registry.register();
        let publisher = Arc::new(StreamPublisher::new(ScriptedSource::new(Script::Snapshot), registry.clone()));

        let handle = publisher.spawn(Duration::from_millis(10));
        let frame = tokio::time::timeout(Duration::from_secs(2), sub.recv()).await.unwrap().unwrap();
        assert!(matches!(frame, Frame::Data(_)));
        handle.stop().await;
    }
}
