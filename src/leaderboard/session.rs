//! Race Session State Machine
//!
//! Tracks lap configuration and the `LIVE -> FINISHED -> LIVE` lifecycle.
//!
//! ## Freeze guarantee
//!
//! Once finished, the result list and the end timestamp are captured and
//! elapsed time is computed from them only. Nothing time-derived moves again
//! until a reset.

use serde::{Serialize, Deserialize};

use crate::enrichment::VehicleInfo;
use crate::leaderboard::entity::EntityId;

/// Kind of session, derived from the configured lap count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    /// Fixed lap count race
    #[serde(rename = "race")]
    Race,
    /// Open session ranked by best lap
    #[serde(rename = "qualy")]
    Qualifying,
}

impl SessionKind {
    /// Race when laps are configured, qualifying otherwise.
    pub fn from_total_laps(total_laps: u16) -> Self {
        if total_laps > 0 {
            SessionKind::Race
        } else {
            SessionKind::Qualifying
        }
    }
}

/// Why a session finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishCause {
    /// Leader completed the configured laps
    LapLimit,
    /// Simulation announced the official order
    OfficialResult,
}

/// One row of the frozen results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalResult {
    /// Final place (1-based)
    pub position: u16,
    /// Player id
    #[serde(rename = "plid")]
    pub id: EntityId,
    /// Display name
    pub name: String,
    /// Frozen race time (ms)
    pub time_ms: Option<u64>,
    /// Best lap (ms)
    pub fastest_lap_ms: Option<u64>,
    /// Vehicle image
    pub car_image: Option<String>,
    /// Vehicle abbreviation
    pub car_abbrev: Option<String>,
    /// Mod attachment id
    pub mod_attachment_id: Option<String>,
    /// Drivetrain
    pub drive_type: Option<String>,
}

impl FinalResult {
    /// Build a row, copying any resolved vehicle info.
    pub fn new(
        position: u16,
        id: EntityId,
        name: String,
        time_ms: Option<u64>,
        fastest_lap_ms: Option<u64>,
        vehicle: Option<&VehicleInfo>,
    ) -> Self {
        Self {
            position,
            id,
            name,
            time_ms,
            fastest_lap_ms,
            car_image: vehicle.map(|v| v.image_url.clone()),
            car_abbrev: vehicle.and_then(|v| v.abbrev.clone()),
            mod_attachment_id: vehicle.and_then(|v| v.mod_attachment_id.clone()),
            drive_type: vehicle.and_then(|v| v.drive_type).map(|d| d.to_string()),
        }
    }
}

/// Lifecycle phase. Results exist exactly when finished.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionPhase {
    /// Racing
    Live,
    /// Results frozen
    Finished {
        /// Frozen results
        results: Vec<FinalResult>,
        /// When the session ended (ms)
        ended_at: u64,
        /// What ended it
        cause: FinishCause,
    },
}

/// Phase change reported by [`RaceSession::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Went LIVE -> FINISHED
    Finished,
    /// Went FINISHED -> LIVE
    Reopened,
}

/// Process-wide session state.
#[derive(Debug, Clone)]
pub struct RaceSession {
    /// Session kind
    pub kind: SessionKind,
    /// Configured laps (0 = open session)
    pub total_laps: u16,
    /// Lifecycle phase
    pub phase: SessionPhase,
    /// When racing started (ms)
    pub started_at: Option<u64>,
    /// Rolling request id for player-list probes
    probe_counter: u8,
}

impl Default for RaceSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RaceSession {
    /// Fresh live race session with no lap configuration.
    pub fn new() -> Self {
        Self {
            kind: SessionKind::Race,
            total_laps: 0,
            phase: SessionPhase::Live,
            started_at: None,
            probe_counter: 1,
        }
    }

    /// Whether results are frozen.
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, SessionPhase::Finished { .. })
    }

    /// Frozen results, if finished.
    pub fn results(&self) -> Option<&[FinalResult]> {
        match &self.phase {
            SessionPhase::Finished { results, .. } => Some(results),
            SessionPhase::Live => None,
        }
    }

    /// Apply a lap configuration without resetting progress.
    pub fn configure(&mut self, total_laps: u16) {
        self.total_laps = total_laps;
        self.kind = SessionKind::from_total_laps(total_laps);
    }

    /// Start over: back to LIVE, results and timestamps discarded.
    pub fn reset(&mut self, total_laps: u16) {
        self.configure(total_laps);
        self.phase = SessionPhase::Live;
        self.started_at = None;
    }

    /// Record the session start on the first completed lap.
    pub fn note_lap_completed(&mut self, laps_done: u16, now: u64) {
        if laps_done == 1 && self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    /// Check lap-based transitions against the current leader.
    ///
    /// `results` is only invoked when the session actually finishes.
    pub fn evaluate<F>(&mut self, leader_laps: u16, now: u64, results: F) -> Option<Transition>
    where
        F: FnOnce() -> Vec<FinalResult>,
    {
        if self.kind != SessionKind::Race || self.total_laps == 0 {
            return None;
        }

        let lap_limit_finish = matches!(
            self.phase,
            SessionPhase::Finished { cause: FinishCause::LapLimit, .. }
        );

        if !self.is_finished() && leader_laps >= self.total_laps {
            self.phase = SessionPhase::Finished {
                results: results(),
                ended_at: now,
                cause: FinishCause::LapLimit,
            };
            return Some(Transition::Finished);
        }

        if lap_limit_finish && leader_laps < self.total_laps {
            self.phase = SessionPhase::Live;
            self.started_at = None;
            return Some(Transition::Reopened);
        }

        None
    }

    /// Finish with the official order.
    ///
    /// When already finished, rows keep their frozen values and only the
    /// order changes. Returns `true` if this caused the transition.
    pub fn finish_official(&mut self, rows: Vec<FinalResult>, now: u64) -> bool {
        if let SessionPhase::Finished { results, cause, .. } = &mut self.phase {
            let reordered = rows.into_iter()
                .map(|row| {
                    results.iter()
                        .find(|frozen| frozen.id == row.id)
                        .cloned()
                        .unwrap_or(row)
                })
                .collect();
            *results = renumber(reordered);
            *cause = FinishCause::OfficialResult;
            return false;
        }

        self.phase = SessionPhase::Finished {
            results: renumber(rows),
            ended_at: now,
            cause: FinishCause::OfficialResult,
        };
        true
    }

    /// Elapsed session time in ms; constant once finished.
    pub fn elapsed_ms(&self, now: u64) -> u64 {
        let Some(start) = self.started_at else {
            return 0;
        };
        match &self.phase {
            SessionPhase::Finished { ended_at, .. } => ended_at.saturating_sub(start),
            SessionPhase::Live => now.saturating_sub(start),
        }
    }

    /// Lap counter text for display.
    pub fn lap_text(&self, leader_laps: u16) -> String {
        if self.total_laps > 0 {
            format!("LAP {} / {}", leader_laps, self.total_laps)
        } else if self.kind == SessionKind::Qualifying {
            "QUALIFYING".to_string()
        } else {
            format!("LAP {}", leader_laps)
        }
    }

    /// Next player-list request id, cycling through 1..=254.
    pub fn next_request_id(&mut self) -> u8 {
        let id = self.probe_counter;
        self.probe_counter = if self.probe_counter >= 254 { 1 } else { self.probe_counter + 1 };
        id
    }
}

fn renumber(mut rows: Vec<FinalResult>) -> Vec<FinalResult> {
    for (i, row) in rows.iter_mut().enumerate() {
        row.position = (i + 1) as u16;
    }
    rows
}
