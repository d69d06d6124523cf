//! Engine Runner
//!
//! The single task that owns the [`LeaderboardEngine`]. Telemetry events are
//! applied in arrival order; each event that asks for a refresh resolves new
//! vehicle metadata, rebuilds the snapshot and hands it to the publisher.
//! A fixed-interval probe asks the simulation to re-announce players while
//! any record still carries a placeholder name.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::leaderboard::engine::{LeaderboardEngine, Refresh};
use crate::network::publisher::SnapshotPublisher;
use crate::telemetry::control::SessionControl;
use crate::telemetry::packet::TelemetryEvent;

/// Wall clock in ms since the epoch.
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Owner of the engine and the publish side.
pub struct LeaderboardRunner {
    engine: LeaderboardEngine,
    publisher: SnapshotPublisher,
    control: Arc<dyn SessionControl>,
}

impl LeaderboardRunner {
    /// Create a runner.
    pub fn new(
        engine: LeaderboardEngine,
        publisher: SnapshotPublisher,
        control: Arc<dyn SessionControl>,
    ) -> Self {
        Self { engine, publisher, control }
    }

    /// The engine.
    pub fn engine(&self) -> &LeaderboardEngine {
        &self.engine
    }

    /// Apply one event and publish if it calls for it. Returns whether a
    /// snapshot went out.
    pub async fn handle(&mut self, event: TelemetryEvent, now: u64) -> bool {
        let refresh = self.engine.apply(event, now);
        if refresh == Refresh::None {
            return false;
        }

        let resolved = self.engine.enrich().await;
        if resolved > 0 {
            debug!("Resolved metadata for {} vehicle(s)", resolved);
        }

        let Some(snapshot) = self.engine.build_snapshot(now) else {
            return false;
        };
        self.publisher.publish(&snapshot, now, refresh == Refresh::Immediate).await
    }

    /// Ask for the player list if any name is still unresolved.
    pub async fn probe(&mut self) {
        let Some(request_id) = self.engine.next_probe() else {
            return;
        };
        debug!("Requesting player list (ReqI {})", request_id);
        if let Err(e) = self.control.request_player_list(request_id).await {
            debug!("Player list request failed: {}", e);
        }
    }

    /// Drive the engine until the event stream ends or shutdown fires.
    #[instrument(skip_all)]
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<TelemetryEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let probe_every = Duration::from_millis(self.engine.config().probe_interval_ms);
        let mut probe = interval(probe_every);
        probe.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Leaderboard engine started");

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        warn!("Telemetry stream closed, engine stopping");
                        break;
                    };
                    self.handle(event, now_ms()).await;
                }
                _ = probe.tick() => self.probe().await,
                _ = shutdown.recv() => {
                    info!("Leaderboard engine shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::enrichment::EnrichmentCache;
    use crate::leaderboard::engine::EngineConfig;
    use crate::leaderboard::entity::EntityId;
    use crate::network::publisher::SubscriberHub;
    use crate::telemetry::control::{ControlError, Directive};
    use crate::telemetry::packet::CarUpdate;

    #[derive(Default)]
    struct RecordingControl {
        sent: Mutex<Vec<Directive>>,
    }

    #[async_trait]
    impl SessionControl for RecordingControl {
        async fn send(&self, directive: Directive) -> Result<(), ControlError> {
            self.sent.lock().unwrap().push(directive);
            Ok(())
        }
    }

    fn runner() -> (LeaderboardRunner, Arc<SubscriberHub>, Arc<RecordingControl>) {
        let config = EngineConfig::default();
        let cache = EnrichmentCache::new(None, Duration::from_millis(config.lookup_timeout_ms));
        let hub = Arc::new(SubscriberHub::new());
        let publisher = SnapshotPublisher::new(hub.clone(), config.publish_interval_ms);
        let control = Arc::new(RecordingControl::default());
        let engine = LeaderboardEngine::new(config, cache);
        (LeaderboardRunner::new(engine, publisher, control.clone()), hub, control)
    }

    fn car(id: u8, laps: u16, node: u16, position: u16) -> CarUpdate {
        CarUpdate {
            id: EntityId(id),
            raw_name: None,
            laps,
            node,
            position,
            total_time: Some(u64::from(laps) * 60_000),
            model_id: None,
        }
    }

    fn tick(cars: Vec<CarUpdate>) -> TelemetryEvent {
        TelemetryEvent::Tick { cars, total_laps: None }
    }

    fn join(id: u8, name: &str) -> TelemetryEvent {
        TelemetryEvent::Joined { id: EntityId(id), raw_name: name.to_string(), model_id: None }
    }

    #[tokio::test]
    async fn test_ticks_are_throttled() {
        let (mut runner, hub, _control) = runner();
        assert!(!runner.handle(join(1, "Alice"), 0).await);
        assert!(hub.latest().await.is_none());

        assert!(runner.handle(tick(vec![car(1, 1, 10, 1)]), 1_000).await);
        assert!(!runner.handle(tick(vec![car(1, 1, 12, 1)]), 1_100).await);
        assert!(runner.handle(tick(vec![car(1, 1, 14, 1)]), 1_250).await);

        let latest: serde_json::Value = serde_json::from_str(&hub.latest().await.unwrap()).unwrap();
        assert_eq!(latest["leaderboard"][0]["node"], 14);
    }

    #[tokio::test]
    async fn test_finish_is_published_inside_throttle_window() {
        let (mut runner, hub, _control) = runner();
        runner.handle(TelemetryEvent::SessionConfigured { total_laps: Some(2) }, 0).await;
        runner.handle(join(1, "Alice"), 0).await;
        runner.handle(join(2, "Bob"), 0).await;

        assert!(runner.handle(tick(vec![car(1, 1, 10, 1), car(2, 1, 5, 2)]), 1_000).await);
        assert!(runner.handle(tick(vec![car(1, 2, 10, 1), car(2, 1, 8, 2)]), 1_010).await);

        let latest: serde_json::Value = serde_json::from_str(&hub.latest().await.unwrap()).unwrap();
        assert_eq!(latest["raceFinished"], true);
        assert_eq!(latest["becameFinished"], true);
        assert_eq!(latest["finalResults"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_official_results_publish_immediately() {
        let (mut runner, hub, _control) = runner();
        runner.handle(join(1, "Alice"), 0).await;
        runner.handle(join(2, "Bob"), 0).await;
        assert!(runner.handle(tick(vec![car(1, 3, 10, 1), car(2, 3, 5, 2)]), 1_000).await);

        let order = vec![EntityId(2), EntityId(1)];
        assert!(runner.handle(TelemetryEvent::OfficialResults { order }, 1_001).await);

        let latest: serde_json::Value = serde_json::from_str(&hub.latest().await.unwrap()).unwrap();
        assert_eq!(latest["finalResults"][0]["plid"], 2);
    }

    #[tokio::test]
    async fn test_probe_only_while_placeholders_remain() {
        let (mut runner, _hub, control) = runner();
        runner.handle(tick(vec![car(4, 0, 0, 1)]), 0).await;
        runner.probe().await;
        assert_eq!(control.sent.lock().unwrap().len(), 1);
        assert!(matches!(control.sent.lock().unwrap()[0], Directive::Tiny { .. }));

        runner.handle(join(4, "Carol"), 10).await;
        runner.probe().await;
        assert_eq!(control.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (runner, hub, _control) = runner();
        let (events_tx, events_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(runner.run(events_rx, shutdown_rx));

        events_tx.send(join(1, "Alice")).await.unwrap();
        events_tx.send(tick(vec![car(1, 1, 10, 1)])).await.unwrap();
        while hub.latest().await.is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
