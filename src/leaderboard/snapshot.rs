//! Snapshot Wire Types
//!
//! The immutable view pushed to subscribers and served by the pull endpoint.
//! Field names are camelCase on the wire.

use serde::{Serialize, Deserialize};

use crate::enrichment::{DriveType, VehicleInfo};
use crate::leaderboard::entity::EntityId;
use crate::leaderboard::ranking::{FastestLap, Standing};
use crate::leaderboard::session::{FinalResult, SessionKind};

/// Leader summary shown in the header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderSummary {
    /// Player id
    pub plid: EntityId,
    /// Display name
    pub name: String,
    /// Vehicle image
    pub car_image: Option<String>,
    /// Stock car code
    pub car_abbrev: Option<String>,
    /// Mod attachment id
    pub mod_attachment_id: Option<String>,
}

/// Fastest lap summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FastestSummary {
    /// Holder
    pub plid: EntityId,
    /// Lap time (ms)
    pub time_ms: u64,
}

impl From<FastestLap> for FastestSummary {
    fn from(f: FastestLap) -> Self {
        Self { plid: f.id, time_ms: f.time_ms }
    }
}

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// Player id
    pub plid: EntityId,
    /// Display name
    pub name: String,
    /// Name with color codes
    pub raw_name: String,
    /// Accent color
    pub color: Option<String>,
    /// Reported rank hint
    pub position: u16,
    /// Lap count
    pub laps: u16,
    /// Laps behind the leader
    pub laps_behind: i32,
    /// Track progress node
    pub node: u16,
    /// Finish time if frozen, else elapsed (ms)
    pub total_time: Option<u64>,
    /// Rendered gap
    pub gap: String,
    /// Best lap (ms)
    pub fastest_lap_ms: Option<u64>,
    /// Drivetrain
    pub drive_type: Option<DriveType>,
    /// Vehicle image
    pub car_image: Option<String>,
    /// Stock car code
    pub car_abbrev: Option<String>,
    /// Mod attachment id
    pub mod_attachment_id: Option<String>,
}

impl LeaderboardEntry {
    /// Merge a ranked row with its vehicle metadata.
    pub fn new(row: &Standing, vehicle: Option<&VehicleInfo>) -> Self {
        Self {
            plid: row.id,
            name: row.name.clone(),
            raw_name: row.raw_name.clone(),
            color: row.color.map(str::to_string),
            position: row.position,
            laps: row.laps,
            laps_behind: row.laps_behind,
            node: row.node,
            total_time: row.display_time,
            gap: row.gap.clone(),
            fastest_lap_ms: row.best_lap,
            drive_type: vehicle.and_then(|v| v.drive_type),
            car_image: vehicle.map(|v| v.image_url.clone()),
            car_abbrev: vehicle.and_then(|v| v.abbrev.clone()),
            mod_attachment_id: vehicle.and_then(|v| v.mod_attachment_id.clone()),
        }
    }

    /// Header summary for this row.
    pub fn summary(&self) -> LeaderSummary {
        LeaderSummary {
            plid: self.plid,
            name: self.name.clone(),
            car_image: self.car_image.clone(),
            car_abbrev: self.car_abbrev.clone(),
            mod_attachment_id: self.mod_attachment_id.clone(),
        }
    }
}

/// Full leaderboard state at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardSnapshot {
    /// Build time (ms since epoch)
    pub timestamp: u64,
    /// Session kind
    pub session_type: SessionKind,
    /// Leader lap in a race, 0 otherwise
    pub lap: u16,
    /// Configured laps
    pub total_laps: u16,
    /// Lap counter text
    pub lap_text: String,
    /// Leader summary
    pub leader: Option<LeaderSummary>,
    /// Ranked rows
    pub leaderboard: Vec<LeaderboardEntry>,
    /// Fastest lap holder
    pub fastest: Option<FastestSummary>,
    /// Session finished
    pub race_finished: bool,
    /// Frozen results, present exactly when finished
    pub final_results: Option<Vec<FinalResult>>,
    /// This snapshot is the first one after finishing
    pub became_finished: bool,
    /// Session elapsed time (ms)
    pub race_elapsed_ms: u64,
    /// Vehicle images of the top three results when finished
    pub podium_images: Option<Vec<Option<String>>>,
}

impl LeaderboardSnapshot {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Top three car images of frozen results.
    pub fn podium_from(results: &[FinalResult]) -> Vec<Option<String>> {
        results.iter().take(3).map(|r| r.car_image.clone()).collect()
    }
}

/// A snapshot annotated with one subscriber's focus target.
#[derive(Debug, Serialize)]
pub struct FocusedSnapshot<'a> {
    /// Shared snapshot
    #[serde(flatten)]
    pub base: &'a LeaderboardSnapshot,
    /// Focus target of the receiving subscriber
    #[serde(rename = "focusedPLID")]
    pub focused_plid: EntityId,
}
