//! Leaderboard Engine
//!
//! Owns the registry, the session state machine and the enrichment cache.
//! Telemetry events mutate state through [`LeaderboardEngine::apply`];
//! [`LeaderboardEngine::build_snapshot`] runs reconciliation, ranking and
//! the finish check, then assembles the immutable snapshot.
//!
//! The engine is not shared: one task owns it and feeds it events in order.

use tracing::{debug, info};

use crate::enrichment::EnrichmentCache;
use crate::leaderboard::entity::{EntityId, EntityPatch, NameSource};
use crate::leaderboard::ranking::{rank, Standings};
use crate::leaderboard::reconcile::reconcile;
use crate::leaderboard::registry::EntityRegistry;
use crate::leaderboard::session::{FinalResult, RaceSession, SessionKind, Transition};
use crate::leaderboard::snapshot::{LeaderboardEntry, LeaderboardSnapshot};
use crate::telemetry::packet::TelemetryEvent;

/// Engine timing constants.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Evict records not seen for this long (ms)
    pub stale_after_ms: u64,
    /// Debounce for telemetry name changes (ms)
    pub name_grace_ms: u64,
    /// Minimum interval between published snapshots (ms)
    pub publish_interval_ms: u64,
    /// Interval of the name-refresh probe (ms)
    pub probe_interval_ms: u64,
    /// Per-lookup enrichment budget (ms)
    pub lookup_timeout_ms: u64,
    /// Maximum quiet period of the tick summary log (ms)
    pub log_throttle_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 30_000,
            name_grace_ms: 2_000,
            publish_interval_ms: 250,
            probe_interval_ms: 5_000,
            lookup_timeout_ms: 5_000,
            log_throttle_ms: 10_000,
        }
    }
}

/// What an applied event asks of the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// State changed quietly; the next tick publishes it
    None,
    /// Rebuild now, publish subject to the throttle
    Throttled,
    /// Rebuild and publish now
    Immediate,
}

fn standings_for(kind: SessionKind, registry: &EntityRegistry) -> Option<Standings> {
    let field = reconcile(kind, registry.iter());
    rank(kind, &field)
}

fn final_results(standings: &Standings, cache: &EnrichmentCache) -> Vec<FinalResult> {
    standings.rows.iter()
        .enumerate()
        .map(|(i, row)| FinalResult::new(
            (i + 1) as u16,
            row.id,
            row.name.clone(),
            row.display_time,
            row.best_lap,
            row.model_id.as_deref().and_then(|m| cache.get(m)),
        ))
        .collect()
}

/// Telemetry reconciliation and leaderboard engine.
pub struct LeaderboardEngine {
    config: EngineConfig,
    registry: EntityRegistry,
    session: RaceSession,
    cache: EnrichmentCache,
    pending_finish: bool,
    last_leader: Option<EntityId>,
    last_log_ms: u64,
}

impl LeaderboardEngine {
    /// Create an engine with an empty registry and a live session.
    pub fn new(config: EngineConfig, cache: EnrichmentCache) -> Self {
        Self {
            registry: EntityRegistry::new(config.name_grace_ms),
            session: RaceSession::new(),
            cache,
            pending_finish: false,
            last_leader: None,
            last_log_ms: 0,
            config,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Entity registry.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Session state.
    pub fn session(&self) -> &RaceSession {
        &self.session
    }

    /// Enrichment cache.
    pub fn cache(&self) -> &EnrichmentCache {
        &self.cache
    }

    /// Apply one telemetry event.
    pub fn apply(&mut self, event: TelemetryEvent, now: u64) -> Refresh {
        match event {
            TelemetryEvent::Tick { cars, total_laps } => {
                for car in cars {
                    let patch = EntityPatch {
                        raw_name: car.raw_name,
                        name_source: NameSource::Telemetry,
                        laps: Some(car.laps),
                        node: Some(car.node),
                        position: Some(car.position),
                        total_time: car.total_time,
                        model_id: car.model_id,
                        ..Default::default()
                    };
                    self.registry.upsert(car.id, &patch, now);
                }
                if let Some(total) = total_laps {
                    self.session.configure(total);
                }

                let evicted = self.registry.sweep_stale(now, self.config.stale_after_ms);
                if !evicted.is_empty() {
                    debug!("Evicted stale drivers: {:?}", evicted);
                }
                Refresh::Throttled
            }

            TelemetryEvent::Joined { id, raw_name, model_id } => {
                let patch = EntityPatch {
                    raw_name: Some(raw_name),
                    name_source: NameSource::Join,
                    model_id: model_id.clone(),
                    ..Default::default()
                };
                let record = self.registry.upsert(id, &patch, now);
                match model_id {
                    Some(model) => info!("Driver joined: {} (PLID {}) - vehicle {}", record.name, id, model),
                    None => info!("Driver joined: {} (PLID {})", record.name, id),
                }
                Refresh::None
            }

            TelemetryEvent::Left { id } => {
                if let Some(record) = self.registry.remove(id) {
                    info!("Driver left: {} (PLID {})", record.name, id);
                }
                Refresh::None
            }

            TelemetryEvent::LapCompleted { id, laps_done, lap_time, elapsed } => {
                let Some(record) = self.registry.get(id) else {
                    debug!("Lap for unknown PLID {}", id);
                    return Refresh::None;
                };
                self.session.note_lap_completed(laps_done, now);

                let finishing = self.session.kind == SessionKind::Race
                    && self.session.total_laps > 0
                    && laps_done >= self.session.total_laps
                    && !record.is_frozen();
                let finish_time = finishing.then(|| record.total_time.or(elapsed).unwrap_or(0));

                let patch = EntityPatch {
                    laps: Some(laps_done),
                    lap_time,
                    finish_time,
                    ..Default::default()
                };
                let record = self.registry.upsert(id, &patch, now);
                if let Some(time) = finish_time {
                    info!(
                        "FINISH: {} completed race at position {} - final time {:.2}s",
                        record.name, record.position, time as f64 / 1000.0
                    );
                }
                Refresh::None
            }

            TelemetryEvent::SessionConfigured { total_laps } => {
                if let Some(total) = total_laps {
                    self.session.configure(total);
                    if total > 0 {
                        info!("Race configured: total laps = {}", total);
                    }
                }
                Refresh::None
            }

            TelemetryEvent::SessionReset { total_laps } => {
                let total_laps = total_laps.unwrap_or(self.session.total_laps);
                self.registry.reset_race_fields(now);
                self.session.reset(total_laps);
                self.pending_finish = false;
                info!("Race state reset (total laps = {})", total_laps);
                Refresh::Throttled
            }

            TelemetryEvent::OfficialResults { order } => {
                let fallback = self.session.elapsed_ms(now);
                self.registry.freeze_all(fallback);

                let rows: Vec<FinalResult> = order.iter()
                    .filter_map(|id| self.registry.get(*id))
                    .map(|r| FinalResult::new(
                        0,
                        r.id,
                        r.name.clone(),
                        r.display_time(),
                        r.best_lap,
                        r.model_id.as_deref().and_then(|m| self.cache.get(m)),
                    ))
                    .collect();

                info!("Official results received ({} drivers)", rows.len());
                if self.session.finish_official(rows, now) {
                    self.pending_finish = true;
                }
                Refresh::Immediate
            }

            TelemetryEvent::Version { product, version } => {
                info!("Telemetry source version: {} {}", product, version);
                Refresh::None
            }
        }
    }

    /// Vehicle models referenced by live records but not yet resolved.
    pub fn unresolved_models(&self) -> Vec<String> {
        self.registry.iter()
            .filter_map(|r| r.model_id.as_deref())
            .filter(|m| !self.cache.is_resolved(m))
            .map(str::to_string)
            .collect()
    }

    /// Resolve metadata for every unresolved model. Returns how many resolved.
    pub async fn enrich(&mut self) -> usize {
        let models = self.unresolved_models();
        self.cache.resolve_missing(models).await
    }

    /// Request id for a name-refresh probe, if any record lacks a real name.
    pub fn next_probe(&mut self) -> Option<u8> {
        if self.registry.has_placeholders() {
            Some(self.session.next_request_id())
        } else {
            None
        }
    }

    /// Reconcile, rank, evaluate the session and assemble a snapshot.
    ///
    /// Returns `None` while no driver is known.
    pub fn build_snapshot(&mut self, now: u64) -> Option<LeaderboardSnapshot> {
        let kind = self.session.kind;
        let standings = standings_for(kind, &self.registry)?;
        let leader_laps = standings.leader().laps;

        let fallback = self.session.elapsed_ms(now);
        let registry = &mut self.registry;
        let cache = &self.cache;
        let transition = self.session.evaluate(leader_laps, now, || {
            registry.freeze_all(fallback);
            standings_for(kind, registry)
                .map(|s| final_results(&s, cache))
                .unwrap_or_default()
        });

        let standings = match transition {
            Some(Transition::Finished) => standings_for(kind, &self.registry)?,
            Some(Transition::Reopened) => {
                info!("Leader below configured laps, session reopened");
                standings
            }
            None => standings,
        };
        let became_finished = transition == Some(Transition::Finished)
            || std::mem::take(&mut self.pending_finish);

        let leaderboard: Vec<LeaderboardEntry> = standings.rows.iter()
            .map(|row| {
                let vehicle = row.model_id.as_deref().and_then(|m| self.cache.get(m));
                LeaderboardEntry::new(row, vehicle)
            })
            .collect();

        let leader = standings.leader();
        let lap = match kind {
            SessionKind::Race => leader.laps,
            SessionKind::Qualifying => 0,
        };
        let final_results = self.session.results().map(<[FinalResult]>::to_vec);
        let podium_images = final_results.as_deref().map(LeaderboardSnapshot::podium_from);

        let snapshot = LeaderboardSnapshot {
            timestamp: now,
            session_type: kind,
            lap,
            total_laps: self.session.total_laps,
            lap_text: self.session.lap_text(lap),
            leader: Some(leaderboard[standings.leader].summary()),
            fastest: standings.fastest.map(Into::into),
            race_finished: self.session.is_finished(),
            final_results,
            became_finished,
            race_elapsed_ms: self.session.elapsed_ms(now),
            podium_images,
            leaderboard,
        };

        if self.last_leader != Some(leader.id)
            || now.saturating_sub(self.last_log_ms) >= self.config.log_throttle_ms
            || became_finished
        {
            self.last_leader = Some(leader.id);
            self.last_log_ms = now;
            info!(
                "drivers known: {} | leader: {} (#{}) lap {}/{} | finished: {}",
                self.registry.len(),
                leader.name,
                leader.position,
                lap,
                self.session.total_laps,
                snapshot.race_finished
            );
        }

        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::telemetry::packet::CarUpdate;

    fn engine() -> LeaderboardEngine {
        let cache = EnrichmentCache::new(None, Duration::from_millis(50));
        LeaderboardEngine::new(EngineConfig::default(), cache)
    }

    fn car(id: u8, laps: u16, node: u16, position: u16, total: Option<u64>) -> CarUpdate {
        CarUpdate {
            id: EntityId(id),
            raw_name: None,
            laps,
            node,
            position,
            total_time: total,
            model_id: None,
        }
    }

    fn tick(cars: Vec<CarUpdate>) -> TelemetryEvent {
        TelemetryEvent::Tick { cars, total_laps: None }
    }

    fn join(engine: &mut LeaderboardEngine, id: u8, name: &str, now: u64) {
        engine.apply(TelemetryEvent::Joined {
            id: EntityId(id),
            raw_name: name.to_string(),
            model_id: None,
        }, now);
    }

    fn without_clock(mut s: LeaderboardSnapshot) -> LeaderboardSnapshot {
        s.timestamp = 0;
        s
    }

    /// Two named drivers in a 10 lap race, one lap from the end.
    fn race_at_lap_nine() -> LeaderboardEngine {
        let mut e = engine();
        e.apply(TelemetryEvent::SessionConfigured { total_laps: Some(10) }, 0);
        join(&mut e, 1, "Alice", 0);
        join(&mut e, 2, "Bob", 0);
        e.apply(tick(vec![car(1, 1, 10, 1, None), car(2, 1, 5, 2, None)]), 50);
        e.apply(TelemetryEvent::LapCompleted {
            id: EntityId(1),
            laps_done: 1,
            lap_time: Some(60_000),
            elapsed: None,
        }, 100);
        e.apply(tick(vec![
            car(1, 9, 50, 1, Some(500_000)),
            car(2, 9, 40, 2, Some(501_000)),
        ]), 1_000);
        e
    }

    #[test]
    fn test_empty_registry_builds_nothing() {
        assert!(engine().build_snapshot(0).is_none());
    }

    #[test]
    fn test_same_tick_twice_is_idempotent() {
        let mut e = engine();
        join(&mut e, 1, "Alice", 0);
        join(&mut e, 2, "Bob", 0);
        let t = tick(vec![car(1, 2, 80, 1, Some(90_000)), car(2, 2, 60, 2, Some(92_500))]);

        e.apply(t.clone(), 1_000);
        let first = e.build_snapshot(1_000).unwrap();
        e.apply(t, 1_100);
        let second = e.build_snapshot(1_100).unwrap();

        assert_eq!(without_clock(first), without_clock(second));
    }

    #[test]
    fn test_placeholder_and_real_name_converge() {
        let mut e = engine();
        join(&mut e, 2, "Carol", 0);
        e.apply(tick(vec![car(1, 3, 120, 4, None), car(2, 3, 120, 4, None)]), 10);

        let snapshot = e.build_snapshot(10).unwrap();
        assert_eq!(snapshot.leaderboard.len(), 1);
        assert_eq!(snapshot.leaderboard[0].name, "Carol");
    }

    #[test]
    fn test_unresolved_driver_stays_and_is_probed() {
        let mut e = engine();
        e.apply(tick(vec![car(9, 0, 3, 1, None)]), 10);

        let snapshot = e.build_snapshot(10).unwrap();
        assert_eq!(snapshot.leaderboard[0].name, "PLID 9");
        assert_eq!(e.next_probe(), Some(1));
        assert_eq!(e.next_probe(), Some(2));

        join(&mut e, 9, "Dave", 20);
        assert_eq!(e.next_probe(), None);
        assert_eq!(e.build_snapshot(20).unwrap().leaderboard[0].name, "Dave");
    }

    #[test]
    fn test_finish_on_leader_lap_limit() {
        let mut e = race_at_lap_nine();
        let live = e.build_snapshot(1_000).unwrap();
        assert!(!live.race_finished);
        assert!(live.final_results.is_none());
        assert_eq!(live.lap_text, "LAP 9 / 10");

        e.apply(tick(vec![
            car(1, 10, 2, 1, Some(560_000)),
            car(2, 9, 90, 2, Some(561_000)),
        ]), 2_000);
        let finished = e.build_snapshot(2_000).unwrap();
        assert!(finished.race_finished);
        assert!(finished.became_finished);
        let results = finished.final_results.clone().unwrap();
        assert_eq!(results.len(), finished.leaderboard.len());
        assert_eq!(results[0].id, EntityId(1));
        assert_eq!(results[0].time_ms, Some(560_000));
        assert_eq!(finished.race_elapsed_ms, 1_900);

        // Leader reports lap 10 again: no new transition, nothing time-derived moves
        e.apply(tick(vec![
            car(1, 10, 8, 1, Some(570_000)),
            car(2, 10, 1, 2, Some(580_000)),
        ]), 3_000);
        let later = e.build_snapshot(60_000).unwrap();
        assert!(!later.became_finished);
        assert_eq!(later.final_results.unwrap(), results);
        assert_eq!(later.race_elapsed_ms, 1_900);
        assert_eq!(later.leaderboard[0].total_time, Some(560_000));
        assert_eq!(later.leaderboard[1].total_time, Some(561_000));
    }

    #[test]
    fn test_reset_clears_race_fields() {
        let mut e = race_at_lap_nine();
        e.apply(tick(vec![car(1, 10, 2, 1, Some(560_000)), car(2, 9, 90, 2, None)]), 2_000);
        assert!(e.build_snapshot(2_000).unwrap().race_finished);

        assert_eq!(e.apply(TelemetryEvent::SessionReset { total_laps: Some(10) }, 3_000), Refresh::Throttled);
        let reset = e.build_snapshot(3_000).unwrap();
        assert!(!reset.race_finished);
        assert!(reset.final_results.is_none());
        assert_eq!(reset.race_elapsed_ms, 0);
        assert!(reset.fastest.is_none());
        assert_eq!(reset.leaderboard.len(), e.registry().len());
        assert_eq!(reset.leaderboard.len(), 2);
        for row in &reset.leaderboard {
            assert_eq!(row.laps, 0);
            assert_eq!(row.fastest_lap_ms, None);
            assert_eq!(row.total_time, None);
        }

        e.apply(tick(vec![car(1, 0, 12, 1, None), car(2, 0, 9, 2, None)]), 3_100);
        let grid = e.build_snapshot(3_100).unwrap();
        assert_eq!(grid.leaderboard.len(), 2);
        assert_eq!(grid.leaderboard[0].name, "Alice");
        assert!(grid.leaderboard.iter().all(|r| r.laps == 0 && r.fastest_lap_ms.is_none()));
    }

    #[test]
    fn test_session_start_clears_finished_race() {
        use crate::telemetry::packet::parse_line;

        let mut e = race_at_lap_nine();
        e.apply(tick(vec![car(1, 10, 2, 1, Some(560_000)), car(2, 9, 90, 2, None)]), 2_000);
        assert!(e.build_snapshot(2_000).unwrap().race_finished);

        let start = parse_line(r#"{"type":"STA"}"#).unwrap().unwrap();
        e.apply(start, 3_000);
        assert_eq!(e.session().total_laps, 10);
        let snapshot = e.build_snapshot(3_000).unwrap();
        assert!(!snapshot.race_finished);
        assert!(snapshot.final_results.is_none());
        assert_eq!(snapshot.leaderboard.len(), 2);
        assert!(snapshot.leaderboard.iter().all(|r| r.laps == 0 && r.total_time.is_none()));

        let start = parse_line(r#"{"type":"STA","RaceLaps":2}"#).unwrap().unwrap();
        e.apply(start, 3_100);
        assert_eq!(e.session().total_laps, 2);
    }

    #[test]
    fn test_lap_event_sets_finish_time_once() {
        let mut e = race_at_lap_nine();
        e.apply(TelemetryEvent::LapCompleted {
            id: EntityId(2),
            laps_done: 10,
            lap_time: Some(58_000),
            elapsed: Some(999_999),
        }, 1_500);

        let bob = e.registry().get(EntityId(2)).unwrap();
        assert_eq!(bob.finish_time, Some(501_000));
        assert_eq!(bob.best_lap, Some(58_000));
        assert_eq!(bob.laps, 10);

        e.apply(TelemetryEvent::LapCompleted {
            id: EntityId(2),
            laps_done: 11,
            lap_time: None,
            elapsed: Some(1),
        }, 1_600);
        assert_eq!(e.registry().get(EntityId(2)).unwrap().finish_time, Some(501_000));
    }

    #[test]
    fn test_official_results_publish_immediately() {
        let mut e = race_at_lap_nine();
        let refresh = e.apply(TelemetryEvent::OfficialResults {
            order: vec![EntityId(2), EntityId(1), EntityId(77)],
        }, 1_200);
        assert_eq!(refresh, Refresh::Immediate);

        let snapshot = e.build_snapshot(1_200).unwrap();
        assert!(snapshot.became_finished);
        let results = snapshot.final_results.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, EntityId(2));
        assert_eq!(results[0].position, 1);

        // Official finishes are not reopened by lap counts
        let again = e.build_snapshot(1_300).unwrap();
        assert!(again.race_finished);
        assert!(!again.became_finished);
    }

    #[test]
    fn test_qualifying_snapshot() {
        let mut e = engine();
        e.apply(TelemetryEvent::SessionConfigured { total_laps: Some(0) }, 0);
        join(&mut e, 1, "A", 0);
        join(&mut e, 2, "B", 0);
        e.apply(tick(vec![car(1, 2, 10, 1, None), car(2, 2, 20, 2, None)]), 10);
        e.apply(TelemetryEvent::LapCompleted { id: EntityId(1), laps_done: 2, lap_time: Some(90_000), elapsed: None }, 20);
        e.apply(TelemetryEvent::LapCompleted { id: EntityId(2), laps_done: 2, lap_time: Some(91_500), elapsed: None }, 30);

        let snapshot = e.build_snapshot(40).unwrap();
        assert_eq!(snapshot.session_type, SessionKind::Qualifying);
        assert_eq!(snapshot.lap_text, "QUALIFYING");
        assert_eq!(snapshot.lap, 0);
        assert_eq!(snapshot.leaderboard[0].gap, "P1");
        assert_eq!(snapshot.leaderboard[1].gap, "+1.500");
        assert_eq!(snapshot.leader.unwrap().plid, EntityId(1));
    }

    #[test]
    fn test_stale_and_left_drivers_are_removed() {
        let mut e = engine();
        e.apply(tick(vec![car(1, 0, 1, 1, None)]), 0);
        e.apply(tick(vec![car(2, 0, 1, 2, None)]), 40_000);
        assert!(!e.registry().contains(EntityId(1)));
        assert!(e.registry().contains(EntityId(2)));

        e.apply(TelemetryEvent::Left { id: EntityId(2) }, 40_001);
        assert!(e.registry().is_empty());
    }

    #[tokio::test]
    async fn test_enrichment_reaches_snapshot() {
        let mut e = engine();
        e.apply(TelemetryEvent::Joined {
            id: EntityId(1),
            raw_name: "Alice".into(),
            model_id: Some("XRT".into()),
        }, 0);
        e.apply(tick(vec![car(1, 1, 5, 1, None)]), 10);

        assert_eq!(e.unresolved_models(), vec!["XRT".to_string()]);
        assert_eq!(e.enrich().await, 1);
        assert!(e.unresolved_models().is_empty());

        let snapshot = e.build_snapshot(10).unwrap();
        let row = &snapshot.leaderboard[0];
        assert_eq!(row.car_image.as_deref(), Some("/static/showroom/cars160/XRT.png"));
        assert_eq!(snapshot.leader.unwrap().car_abbrev.as_deref(), Some("XRT"));
    }
}
