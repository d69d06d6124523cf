//! Snapshot Publisher
//!
//! [`Throttle`] bounds the publish rate; a finish transition bypasses it.
//! [`SubscriberHub`] keeps one outbound queue and one optional focus target
//! per connected subscriber. A snapshot is serialized once per publish and
//! again only for subscribers that carry a focus target.
//!
//! Forced snapshots skip the bounded queue and land in a single-value slot
//! per subscriber, so a full queue can delay them but never drop them.
//! Anything queued before a forced snapshot is superseded by it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::leaderboard::entity::EntityId;
use crate::leaderboard::snapshot::{FocusedSnapshot, LeaderboardSnapshot};

/// Outbound queue depth per subscriber.
pub const SUBSCRIBER_QUEUE: usize = 64;

/// Minimum-interval gate.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval_ms: u64,
    last: Option<u64>,
}

impl Throttle {
    /// Gate with the given minimum interval.
    pub fn new(interval_ms: u64) -> Self {
        Self { interval_ms, last: None }
    }

    /// Whether to publish now. A `true` answer starts a new window.
    pub fn admit(&mut self, now: u64, force: bool) -> bool {
        let due = self.last.map_or(true, |last| now.saturating_sub(last) >= self.interval_ms);
        if due || force {
            self.last = Some(now);
            true
        } else {
            false
        }
    }
}

/// Connection-scoped subscriber id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One payload tagged with its publish sequence.
#[derive(Debug, Clone)]
struct Delivery {
    seq: u64,
    json: Arc<str>,
}

struct Subscriber {
    focus: Option<EntityId>,
    queue: mpsc::Sender<Delivery>,
    forced: watch::Sender<Option<Delivery>>,
}

/// Receiving side of one subscriber.
pub struct SubscriberFeed {
    queue: mpsc::Receiver<Delivery>,
    forced: watch::Receiver<Option<Delivery>>,
    forced_open: bool,
    last_seq: u64,
}

impl SubscriberFeed {
    fn accept(&mut self, delivery: Option<Delivery>) -> Option<Arc<str>> {
        let delivery = delivery.filter(|d| d.seq > self.last_seq)?;
        self.last_seq = delivery.seq;
        Some(delivery.json)
    }

    /// Next payload, forced ones first. `None` once the hub dropped us.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        loop {
            tokio::select! {
                biased;
                changed = self.forced.changed(), if self.forced_open => {
                    if changed.is_err() {
                        self.forced_open = false;
                        continue;
                    }
                    let pending = self.forced.borrow_and_update().clone();
                    if let Some(json) = self.accept(pending) {
                        return Some(json);
                    }
                }
                queued = self.queue.recv() => {
                    let queued = queued?;
                    if let Some(json) = self.accept(Some(queued)) {
                        return Some(json);
                    }
                }
            }
        }
    }

    /// Next payload if one is ready.
    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        if self.forced.has_changed().unwrap_or(false) {
            let pending = self.forced.borrow_and_update().clone();
            if let Some(json) = self.accept(pending) {
                return Some(json);
            }
        }
        while let Ok(queued) = self.queue.try_recv() {
            if let Some(json) = self.accept(Some(queued)) {
                return Some(json);
            }
        }
        None
    }
}

/// Connected subscribers and the last published payload.
#[derive(Default)]
pub struct SubscriberHub {
    subscribers: RwLock<BTreeMap<SubscriberId, Subscriber>>,
    latest: RwLock<Option<Arc<str>>>,
    seq: AtomicU64,
}

impl SubscriberHub {
    /// Empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber. Returns its id and its feed.
    pub async fn register(&self) -> (SubscriberId, SubscriberFeed) {
        let (queue_tx, queue_rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let (forced_tx, forced_rx) = watch::channel(None);
        let id = SubscriberId::new();
        self.subscribers.write().await.insert(id, Subscriber {
            focus: None,
            queue: queue_tx,
            forced: forced_tx,
        });
        let feed = SubscriberFeed {
            queue: queue_rx,
            forced: forced_rx,
            forced_open: true,
            last_seq: 0,
        };
        (id, feed)
    }

    /// Drop a subscriber and its focus.
    pub async fn unregister(&self, id: SubscriberId) {
        self.subscribers.write().await.remove(&id);
    }

    /// Set or clear a subscriber's focus target.
    pub async fn set_focus(&self, id: SubscriberId, focus: Option<EntityId>) {
        if let Some(subscriber) = self.subscribers.write().await.get_mut(&id) {
            subscriber.focus = focus;
        }
    }

    /// A subscriber's focus target.
    pub async fn focus(&self, id: SubscriberId) -> Option<EntityId> {
        self.subscribers.read().await.get(&id).and_then(|s| s.focus)
    }

    /// Number of connected subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Last published snapshot, unannotated.
    pub async fn latest(&self) -> Option<Arc<str>> {
        self.latest.read().await.clone()
    }

    /// Store the snapshot as latest and fan it out. Returns deliveries.
    ///
    /// `forced` snapshots replace the subscriber's pending forced slot
    /// instead of queueing, so they cannot be dropped by a full queue.
    pub async fn broadcast(&self, snapshot: &LeaderboardSnapshot, forced: bool) -> usize {
        let base: Arc<str> = match snapshot.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                error!("Failed to serialize snapshot: {}", e);
                return 0;
            }
        };
        *self.latest.write().await = Some(base.clone());
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;

        let subscribers = self.subscribers.read().await;
        let mut delivered = 0;
        for (id, subscriber) in subscribers.iter() {
            let payload = match subscriber.focus {
                None => base.clone(),
                Some(focused_plid) => {
                    let focused = FocusedSnapshot { base: snapshot, focused_plid };
                    match serde_json::to_string(&focused) {
                        Ok(json) => json.into(),
                        Err(e) => {
                            error!("Failed to serialize focused snapshot: {}", e);
                            continue;
                        }
                    }
                }
            };

            let delivery = Delivery { seq, json: payload };
            if forced {
                if subscriber.forced.receiver_count() > 0 {
                    subscriber.forced.send_replace(Some(delivery));
                    delivered += 1;
                } else {
                    debug!("Subscriber {} already closed", id);
                }
                continue;
            }

            match subscriber.queue.try_send(delivery) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Subscriber {} is falling behind, snapshot dropped", id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Subscriber {} already closed", id);
                }
            }
        }
        delivered
    }
}

/// Throttled publisher in front of a hub.
pub struct SnapshotPublisher {
    throttle: Throttle,
    hub: Arc<SubscriberHub>,
}

impl SnapshotPublisher {
    /// Publisher with the given minimum interval.
    pub fn new(hub: Arc<SubscriberHub>, interval_ms: u64) -> Self {
        Self {
            throttle: Throttle::new(interval_ms),
            hub,
        }
    }

    /// The hub this publisher feeds.
    pub fn hub(&self) -> &Arc<SubscriberHub> {
        &self.hub
    }

    /// Publish if the throttle allows it or `force` is set.
    ///
    /// A snapshot that became finished is always forced. Returns whether it
    /// was published.
    pub async fn publish(&mut self, snapshot: &LeaderboardSnapshot, now: u64, force: bool) -> bool {
        let force = force || snapshot.became_finished;
        if !self.throttle.admit(now, force) {
            return false;
        }
        self.hub.broadcast(snapshot, force).await;
        true
    }
}
