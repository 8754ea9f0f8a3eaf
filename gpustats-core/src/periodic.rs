//! Tâches périodiques annulables (flux live, push distant).

use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Handle d'une boucle périodique ; `stop()` attend la fin du tick en cours.
pub struct PeriodicHandle {
    name: &'static str,
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl PeriodicHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match (&mut self.join).await {
            Ok(()) => info!(task = self.name, "periodic task stopped"),
            Err(e) => warn!(task = self.name, error = %e, "periodic task ended abnormally"),
        }
    }
}

/// Lance `tick` toutes les `period`. Le premier tick arrive après une période
/// complète ; un tick en retard est décalé, jamais rejoué en rafale.
pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> PeriodicHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let join = tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(task = name, period_ms = period.as_millis() as u64, "periodic task started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    debug!(task = name, "tick");
                    tick().await;
                }
                _ = &mut shutdown_rx => break,
            }
        }
    });

    PeriodicHandle {
        name,
        shutdown: Some(shutdown_tx),
        join,
    }
}
