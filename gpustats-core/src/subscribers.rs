/**
 * SUBSCRIBER REGISTRY - Abonnés live au flux SSE
 *
 * RÔLE : ensemble dynamique de canaux de sortie, un par client connecté.
 * La diffusion est best-effort : un canal en échec est retiré du registre,
 * jamais d'erreur remontée à l'appelant.
 *
 * FONCTIONNEMENT :
 * - register() : nouveau canal mpsc non borné, ajouté en fin de registre
 * - broadcast() : copie de la liste sous lock, envoi hors lock,
 *   puis retrait des canaux en échec une fois l'itération terminée
 * - Drop d'une Subscription = désinscription immédiate
 */

use crate::sse::Frame;
use futures::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::debug;

pub type SubscriberId = u64;

pub struct SubscriberRegistry {
    channels: Mutex<Vec<(SubscriberId, UnboundedSender<Frame>)>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Crée un canal, l'ajoute au registre et renvoie le côté lecture.
    pub fn register(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = unbounded_channel();
        let total = {
            let mut channels = self.channels.lock();
            channels.push((id, tx));
            channels.len()
        };
        debug!(subscriber = id, subscribers = total, "subscriber registered");
        Subscription {
            id,
            rx,
            registry: Arc::clone(self),
        }
    }

    /// Idempotent : retirer un canal absent ne fait rien.
    pub fn unregister(&self, id: SubscriberId) {
        let mut channels = self.channels.lock();
        let before = channels.len();
        channels.retain(|(sid, _)| *sid != id);
        if channels.len() != before {
            debug!(subscriber = id, subscribers = channels.len(), "subscriber removed");
        }
    }

    /// Diffuse `frame` à chaque canal dans l'ordre d'inscription.
    /// Renvoie le nombre de canaux atteints.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        let targets: Vec<(SubscriberId, UnboundedSender<Frame>)> = self.channels.lock().clone();

        let mut failed = Vec::new();
        for (id, tx) in &targets {
            if tx.send(frame.clone()).is_err() {
                failed.push(*id);
            }
        }

        if !failed.is_empty() {
            self.channels.lock().retain(|(id, _)| !failed.contains(id));
            debug!(dropped = failed.len(), "removed disconnected subscribers");
        }

        targets.len() - failed.len()
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Côté lecture d'un canal abonné ; se désinscrit au drop.
pub struct Subscription {
    id: SubscriberId,
    rx: UnboundedReceiver<Frame>,
    registry: Arc<SubscriberRegistry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Lecture non bloquante, utile pour vérifier qu'aucune frame n'attend.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
