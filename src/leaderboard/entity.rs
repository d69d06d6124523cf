//! Entity Records
//!
//! One record per driver the simulation reports, keyed by its player id.
//! Records only change through [`EntityPatch`] merges, which enforce the
//! record invariants: laps never go down, best lap only improves, and a
//! finish time, once set, freezes every time field.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::names::{
    is_placeholder_name, last_color, placeholder_name, strip_color_codes,
};

/// Rank hint stored until the simulation reports a real one.
pub const UNKNOWN_POSITION: u16 = 99;

/// Rank hints inside this range are considered trustworthy.
pub const PLAUSIBLE_POSITIONS: std::ops::Range<u16> = 1..200;

/// Player id assigned by the simulation (stable for the session).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u8);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reconciled state of a single driver.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityRecord {
    /// Simulation player id
    pub id: EntityId,
    /// Name as reported, color codes included
    pub raw_name: String,
    /// Display name (codes stripped)
    pub name: String,
    /// Accent color from the last color code
    pub color: Option<&'static str>,
    /// Reported rank hint (advisory)
    pub position: u16,
    /// Lap count
    pub laps: u16,
    /// Track progress node
    pub node: u16,
    /// Elapsed race time (ms)
    pub total_time: Option<u64>,
    /// Best lap time (ms)
    pub best_lap: Option<u64>,
    /// Frozen display time (ms); present once the driver or session finished
    pub finish_time: Option<u64>,
    /// Vehicle model identifier
    pub model_id: Option<String>,
    /// Last time any update touched this record (ms)
    pub last_seen: u64,
    /// Last time the display name changed (ms), 0 if never
    pub name_updated: u64,
}

impl EntityRecord {
    /// Create a record with default race fields and a placeholder name.
    pub fn new(id: EntityId, now: u64) -> Self {
        let name = placeholder_name(id);
        Self {
            id,
            raw_name: name.clone(),
            name,
            color: None,
            position: UNKNOWN_POSITION,
            laps: 0,
            node: 0,
            total_time: None,
            best_lap: None,
            finish_time: None,
            model_id: None,
            last_seen: now,
            name_updated: 0,
        }
    }

    /// Whether time fields are frozen.
    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.finish_time.is_some()
    }

    /// Time shown on the leaderboard: finish time if frozen, else elapsed.
    #[inline]
    pub fn display_time(&self) -> Option<u64> {
        self.finish_time.or(self.total_time)
    }

    /// Whether the rank hint is in the plausible range.
    #[inline]
    pub fn has_plausible_position(&self) -> bool {
        PLAUSIBLE_POSITIONS.contains(&self.position)
    }

    /// Whether the driver shows any sign of having started.
    #[inline]
    pub fn has_started(&self) -> bool {
        self.node > 0 || self.laps > 0
    }

    /// Whether the display name is still a placeholder.
    #[inline]
    pub fn has_placeholder_name(&self) -> bool {
        is_placeholder_name(&self.name)
    }

    /// Freeze the current display time as the finish time (no-op if set).
    pub fn freeze(&mut self, fallback_ms: u64) {
        if self.finish_time.is_none() {
            self.finish_time = Some(self.display_time().unwrap_or(fallback_ms));
        }
    }

    /// Clear race progress, keeping identity, name and vehicle.
    pub fn reset_race_fields(&mut self, now: u64) {
        self.laps = 0;
        self.node = 0;
        self.position = UNKNOWN_POSITION;
        self.total_time = None;
        self.best_lap = None;
        self.finish_time = None;
        self.last_seen = now;
    }

    fn set_name(&mut self, raw: &str, now: u64) {
        let name = strip_color_codes(raw);
        if name.is_empty() {
            return;
        }
        self.raw_name = raw.to_string();
        self.name = name;
        self.color = last_color(raw).or(self.color);
        self.name_updated = now;
    }

    /// Merge a partial update. Fields the patch leaves `None` are untouched.
    pub fn merge(&mut self, patch: &EntityPatch, now: u64, name_grace_ms: u64) {
        if let Some(raw) = patch.raw_name.as_deref() {
            match patch.name_source {
                NameSource::Join => {
                    let raw = if strip_color_codes(raw).is_empty() {
                        placeholder_name(self.id)
                    } else {
                        raw.to_string()
                    };
                    self.set_name(&raw, now);
                    self.color = last_color(&raw);
                }
                NameSource::Telemetry => {
                    let debounced = now.saturating_sub(self.name_updated) > name_grace_ms;
                    if !is_placeholder_name(raw) && (self.has_placeholder_name() || debounced) {
                        self.set_name(raw, now);
                    }
                }
            }
        }

        if let Some(laps) = patch.laps {
            self.laps = self.laps.max(laps);
        }
        if let Some(node) = patch.node {
            self.node = node;
        }
        if let Some(position) = patch.position {
            self.position = position;
        }

        if !self.is_frozen() {
            if let Some(total) = patch.total_time {
                if self.total_time.map_or(true, |t| total >= t) {
                    self.total_time = Some(total);
                }
            }
            if let Some(lap) = patch.lap_time.filter(|&t| t > 0) {
                if self.best_lap.map_or(true, |best| lap < best) {
                    self.best_lap = Some(lap);
                }
            }
            if let Some(finish) = patch.finish_time {
                self.finish_time = Some(finish);
            }
        }

        if let Some(model) = patch.model_id.as_deref().filter(|m| !m.is_empty()) {
            self.model_id = Some(model.to_string());
        }

        self.last_seen = now;
    }
}

/// Where a name in a patch came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NameSource {
    /// Per-tick telemetry: debounced, placeholders ignored
    #[default]
    Telemetry,
    /// Join event: authoritative
    Join,
}

/// Field-level partial update for a record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntityPatch {
    /// Raw name, color codes included
    pub raw_name: Option<String>,
    /// How much to trust `raw_name`
    pub name_source: NameSource,
    /// Lap count (kept monotonic)
    pub laps: Option<u16>,
    /// Track progress node
    pub node: Option<u16>,
    /// Rank hint
    pub position: Option<u16>,
    /// Elapsed time (ms, kept monotonic)
    pub total_time: Option<u64>,
    /// Completed lap time (ms) to fold into best lap
    pub lap_time: Option<u64>,
    /// Finish time (ms), set once
    pub finish_time: Option<u64>,
    /// Vehicle model identifier
    pub model_id: Option<String>,
}
