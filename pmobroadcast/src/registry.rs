//! Registre des auditeurs et diffusion non bloquante.
//!
//! Chaque auditeur possède une file bornée. La diffusion prend un instantané
//! des files sous un verrou bref puis tente un `try_send` sur chacune : une
//! file pleine perd le chunk pour cet auditeur seulement, le producteur n'est
//! jamais ralenti.

use crate::chunk::BroadcastChunk;
use crate::error::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

#[cfg(feature = "pmoserver")]
use utoipa::ToSchema;

pub type SubscriberId = u64;

/// État partagé entre le registre et le handle d'un auditeur.
#[derive(Debug)]
struct SubscriberShared {
    id: SubscriberId,
    connected_at: DateTime<Utc>,
    alive: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Instantané d'un auditeur pour l'API.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "pmoserver", derive(ToSchema))]
pub struct SubscriberInfo {
    pub id: SubscriberId,
    #[cfg_attr(feature = "pmoserver", schema(value_type = String, format = DateTime))]
    pub connected_at: DateTime<Utc>,
    pub chunks_delivered: u64,
    pub chunks_dropped: u64,
}

/// Bilan d'une diffusion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
    pub disconnected: usize,
}

#[derive(Debug)]
struct Slot {
    tx: mpsc::Sender<BroadcastChunk>,
    shared: Arc<SubscriberShared>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    slots: HashMap<SubscriberId, Slot>,
    next_id: SubscriberId,
    closed: bool,
}

/// Ensemble des auditeurs connectés.
#[derive(Debug)]
pub struct SubscriberRegistry {
    inner: Mutex<RegistryInner>,
    queue_capacity: usize,
    max_subscribers: usize,
}

impl SubscriberRegistry {
    pub fn new(queue_capacity: usize, max_subscribers: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            queue_capacity: queue_capacity.max(1),
            max_subscribers,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn max_subscribers(&self) -> usize {
        self.max_subscribers
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Enregistre un nouvel auditeur.
    ///
    /// Refusé avec [`Error::CapacityExceeded`] quand le maximum est atteint,
    /// sans rien enregistrer.
    pub fn subscribe(self: &Arc<Self>) -> Result<Subscriber> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(Error::Closed);
        }
        if inner.slots.len() >= self.max_subscribers {
            return Err(Error::CapacityExceeded {
                max: self.max_subscribers,
            });
        }

        let id = inner.next_id;
        inner.next_id += 1;

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let shared = Arc::new(SubscriberShared {
            id,
            connected_at: Utc::now(),
            alive: AtomicBool::new(true),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        inner.slots.insert(
            id,
            Slot {
                tx,
                shared: shared.clone(),
            },
        );
        let active = inner.slots.len();
        drop(inner);

        info!(subscriber = id, active, "Listener connected");
        Ok(Subscriber {
            id,
            rx,
            shared,
            registry: Arc::downgrade(self),
        })
    }

    /// Retire un auditeur. Sans effet si l'identifiant est inconnu.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.lock().slots.remove(&id);
        match removed {
            Some(slot) => {
                slot.shared.alive.store(false, Ordering::Release);
                info!(
                    subscriber = id,
                    delivered = slot.shared.delivered.load(Ordering::Relaxed),
                    dropped = slot.shared.dropped.load(Ordering::Relaxed),
                    "Listener disconnected"
                );
                true
            }
            None => false,
        }
    }

    /// Pousse `chunk` dans la file de chaque auditeur, sans jamais attendre.
    pub fn deliver(&self, chunk: &BroadcastChunk) -> DeliveryReport {
        let targets: Vec<(mpsc::Sender<BroadcastChunk>, Arc<SubscriberShared>)> = self
            .lock()
            .slots
            .values()
            .map(|slot| (slot.tx.clone(), slot.shared.clone()))
            .collect();

        let mut report = DeliveryReport::default();
        let mut gone = Vec::new();
        for (tx, shared) in targets {
            match tx.try_send(chunk.clone()) {
                Ok(()) => {
                    shared.delivered.fetch_add(1, Ordering::Relaxed);
                    report.delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    shared.dropped.fetch_add(1, Ordering::Relaxed);
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    gone.push(shared.id);
                    report.disconnected += 1;
                }
            }
        }

        for id in gone {
            self.unsubscribe(id);
        }
        report
    }

    /// Ferme toutes les files : chaque auditeur termine à sa prochaine lecture
    /// et plus aucun abonnement n'est accepté.
    pub fn close(&self) {
        let slots: Vec<Slot> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.slots.drain().map(|(_, slot)| slot).collect()
        };
        for slot in &slots {
            slot.shared.alive.store(false, Ordering::Release);
        }
        debug!(closed = slots.len(), "Subscriber registry closed");
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Instantané des auditeurs, triés par ancienneté.
    pub fn snapshot(&self) -> Vec<SubscriberInfo> {
        let shared: Vec<Arc<SubscriberShared>> = self
            .lock()
            .slots
            .values()
            .map(|slot| slot.shared.clone())
            .collect();

        let mut infos: Vec<SubscriberInfo> = shared
            .iter()
            .map(|s| SubscriberInfo {
                id: s.id,
                connected_at: s.connected_at,
                chunks_delivered: s.delivered.load(Ordering::Relaxed),
                chunks_dropped: s.dropped.load(Ordering::Relaxed),
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }
}

/// Handle d'un auditeur connecté.
///
/// Se désinscrit automatiquement quand il est détruit, ce qui couvre la
/// déconnexion du client HTTP (le corps de la réponse est abandonné).
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    rx: mpsc::Receiver<BroadcastChunk>,
    shared: Arc<SubscriberShared>,
    registry: Weak<SubscriberRegistry>,
}

impl Subscriber {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Prochain chunk dans l'ordre de diffusion, `None` quand la station a
    /// fermé la file.
    pub async fn recv(&mut self) -> Option<BroadcastChunk> {
        self.rx.recv().await
    }

    /// Variante non bloquante de [`Subscriber::recv`].
    pub fn try_recv(&mut self) -> Option<BroadcastChunk> {
        self.rx.try_recv().ok()
    }

    /// Flux d'octets pour un corps de réponse HTTP.
    pub fn into_byte_stream(self) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send {
        stream::unfold(self, |mut subscriber| async move {
            subscriber
                .recv()
                .await
                .map(|chunk| (Ok(chunk.into_bytes()), subscriber))
        })
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn chunk(seq: u64) -> BroadcastChunk {
        BroadcastChunk::new(seq, vec![seq as u8; 8])
    }

    #[test]
    fn test_subscribe_until_capacity() {
        let registry = Arc::new(SubscriberRegistry::new(4, 2));
        let _a = registry.subscribe().unwrap();
        let _b = registry.subscribe().unwrap();

        match registry.subscribe() {
            Err(Error::CapacityExceeded { max }) => assert_eq!(max, 2),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_recv_waits_for_delivery() {
        let registry = Arc::new(SubscriberRegistry::new(4, 2));
        let mut sub = registry.subscribe().unwrap();

        let mut pull = tokio_test::task::spawn(sub.recv());
        tokio_test::assert_pending!(pull.poll());

        registry.deliver(&chunk(7));
        assert!(pull.is_woken());
        let received = tokio_test::assert_ready!(pull.poll());
        assert_eq!(received, Some(chunk(7)));
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry = Arc::new(SubscriberRegistry::new(4, 10));
        let sub = registry.subscribe().unwrap();
        let id = sub.id();

        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert!(!sub.is_alive());
        drop(sub);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = Arc::new(SubscriberRegistry::new(4, 1));
        let sub = registry.subscribe().unwrap();
        drop(sub);
        assert_eq!(registry.len(), 0);
        assert!(registry.subscribe().is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_drops_for_that_subscriber_only() {
        let registry = Arc::new(SubscriberRegistry::new(2, 10));
        let mut fast = registry.subscribe().unwrap();
        let mut slow = registry.subscribe().unwrap();

        let mut fast_seen = Vec::new();
        for seq in 0..5 {
            let report = registry.deliver(&chunk(seq));
            assert_eq!(report.delivered + report.dropped, 2);
            fast_seen.push(fast.recv().await.unwrap().seq());
        }

        assert_eq!(fast_seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(slow.try_recv().map(|c| c.seq()), Some(0));
        assert_eq!(slow.try_recv().map(|c| c.seq()), Some(1));
        assert!(slow.try_recv().is_none());
        assert_eq!(slow.dropped_chunks(), 3);
    }

    #[test]
    fn test_deliver_removes_closed_queues() {
        let registry = Arc::new(SubscriberRegistry::new(2, 10));
        let mut sub = registry.subscribe().unwrap();
        // file fermée côté auditeur, handle encore vivant
        sub.rx.close();

        let report = registry.deliver(&chunk(0));
        assert_eq!(report.disconnected, 1);
        assert!(registry.is_empty());
        assert!(!sub.is_alive());
    }

    #[tokio::test]
    async fn test_close_ends_streams_and_refuses_new_listeners() {
        let registry = Arc::new(SubscriberRegistry::new(4, 10));
        let sub = registry.subscribe().unwrap();
        registry.deliver(&chunk(7));
        registry.close();

        let collected: Vec<_> = sub.into_byte_stream().collect().await;
        assert_eq!(collected.len(), 1);
        assert!(matches!(registry.subscribe(), Err(Error::Closed)));
        assert!(registry.is_closed());
    }

    #[tokio::test]
    async fn test_snapshot_reports_counters() {
        let registry = Arc::new(SubscriberRegistry::new(1, 10));
        let _a = registry.subscribe().unwrap();
        let mut b = registry.subscribe().unwrap();
        registry.deliver(&chunk(0));
        b.recv().await.unwrap();
        registry.deliver(&chunk(1));
        registry.deliver(&chunk(2));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].chunks_delivered, 1);
        assert_eq!(snapshot[0].chunks_dropped, 2);
        assert_eq!(snapshot[1].chunks_delivered, 2);
        assert_eq!(snapshot[1].chunks_dropped, 1);
    }
}
