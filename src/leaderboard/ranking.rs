//! Ranking & Gaps
//!
//! Orders the reconciled field, picks the leader and the fastest-lap holder,
//! and renders a gap string per entry.
//!
//! ## Ordering
//!
//! - Qualifying: best lap ascending (no lap last), then rank hint, then name.
//! - Race: laps desc, node desc, rank hint asc, then name.

use std::cmp::Ordering;

use crate::core::timefmt::{approximate_gap_from_nodes, format_gap_ms};
use crate::leaderboard::entity::{EntityId, EntityRecord};
use crate::leaderboard::session::SessionKind;

/// Gap label of the race leader.
pub const LEADER_LABEL: &str = "LEADER";
/// Gap label of the qualifying leader.
pub const POLE_LABEL: &str = "P1";

/// One ranked row, detached from the registry.
#[derive(Clone, Debug, PartialEq)]
pub struct Standing {
    /// Player id
    pub id: EntityId,
    /// Display name
    pub name: String,
    /// Raw name
    pub raw_name: String,
    /// Accent color
    pub color: Option<&'static str>,
    /// Reported rank hint
    pub position: u16,
    /// Lap count
    pub laps: u16,
    /// Laps behind the leader (race only)
    pub laps_behind: i32,
    /// Track progress node
    pub node: u16,
    /// Finish time if frozen, else elapsed time (ms)
    pub display_time: Option<u64>,
    /// Best lap (ms)
    pub best_lap: Option<u64>,
    /// Vehicle model
    pub model_id: Option<String>,
    /// Rendered gap
    pub gap: String,
}

/// Fastest lap of the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FastestLap {
    /// Holder
    pub id: EntityId,
    /// Lap time (ms)
    pub time_ms: u64,
}

/// Ranked field with leader and fastest lap.
#[derive(Clone, Debug, PartialEq)]
pub struct Standings {
    /// Rows in leaderboard order
    pub rows: Vec<Standing>,
    /// Index of the leader in `rows`
    pub leader: usize,
    /// Fastest lap holder
    pub fastest: Option<FastestLap>,
}

impl Standings {
    /// The leader row.
    pub fn leader(&self) -> &Standing {
        &self.rows[self.leader]
    }
}

fn best_lap_key(r: &EntityRecord) -> u64 {
    r.best_lap.unwrap_or(u64::MAX)
}

/// Ordering used by the pre-dedup pass (no name tie-break).
pub(crate) fn compare_progress(kind: SessionKind, a: &EntityRecord, b: &EntityRecord) -> Ordering {
    match kind {
        SessionKind::Qualifying => best_lap_key(a).cmp(&best_lap_key(b)),
        SessionKind::Race => b.laps.cmp(&a.laps)
            .then_with(|| b.node.cmp(&a.node))
            .then_with(|| a.position.cmp(&b.position)),
    }
}

/// Full leaderboard ordering.
pub fn compare_standing(kind: SessionKind, a: &EntityRecord, b: &EntityRecord) -> Ordering {
    let primary = match kind {
        SessionKind::Qualifying => best_lap_key(a).cmp(&best_lap_key(b)),
        SessionKind::Race => b.laps.cmp(&a.laps).then_with(|| b.node.cmp(&a.node)),
    };
    primary
        .then_with(|| a.position.cmp(&b.position))
        .then_with(|| a.name.cmp(&b.name))
}

/// Pick the leader from an ordered field.
///
/// Race: first entry with a plausible rank hint that has started moving.
/// Qualifying: first entry with a best lap. Falls back to the first entry.
pub fn select_leader(kind: SessionKind, ordered: &[&EntityRecord]) -> usize {
    let found = match kind {
        SessionKind::Qualifying => ordered.iter().position(|r| r.best_lap.is_some()),
        SessionKind::Race => ordered.iter()
            .position(|r| r.has_plausible_position() && r.has_started()),
    };
    found.unwrap_or(0)
}

/// Smallest known best lap. Earlier entries win ties.
pub fn fastest_lap(ordered: &[&EntityRecord]) -> Option<FastestLap> {
    let mut fastest: Option<FastestLap> = None;
    for r in ordered {
        if let Some(time_ms) = r.best_lap {
            if fastest.map_or(true, |f| time_ms < f.time_ms) {
                fastest = Some(FastestLap { id: r.id, time_ms });
            }
        }
    }
    fastest
}

fn race_gap(
    index: usize,
    record: &EntityRecord,
    laps_behind: i32,
    leader: &EntityRecord,
    ordered: &[&EntityRecord],
) -> String {
    if record.id == leader.id {
        return LEADER_LABEL.to_string();
    }
    if laps_behind > 0 {
        return format!("+{}L", laps_behind);
    }

    let ahead = if index > 0 { ordered[index - 1] } else { leader };
    match (record.display_time(), ahead.display_time()) {
        (Some(mine), Some(theirs)) => format_gap_ms(mine, theirs),
        _ => approximate_gap_from_nodes(ahead.node, record.node).unwrap_or_default(),
    }
}

fn qualifying_gap(record: &EntityRecord, leader: &EntityRecord) -> String {
    if record.id == leader.id {
        return POLE_LABEL.to_string();
    }
    match (record.best_lap, leader.best_lap) {
        (Some(mine), Some(pole)) => format_gap_ms(mine, pole),
        _ => String::new(),
    }
}

/// Rank an already-ordered, deduplicated field.
///
/// Returns `None` for an empty field.
pub fn rank(kind: SessionKind, ordered: &[&EntityRecord]) -> Option<Standings> {
    if ordered.is_empty() {
        return None;
    }

    let leader_idx = select_leader(kind, ordered);
    let leader = ordered[leader_idx];

    let rows = ordered.iter()
        .enumerate()
        .map(|(index, record)| {
            let laps_behind = match kind {
                SessionKind::Race => i32::from(leader.laps) - i32::from(record.laps),
                SessionKind::Qualifying => 0,
            };
            let gap = match kind {
                SessionKind::Race => race_gap(index, record, laps_behind, leader, ordered),
                SessionKind::Qualifying => qualifying_gap(record, leader),
            };

            Standing {
                id: record.id,
                name: record.name.clone(),
                raw_name: record.raw_name.clone(),
                color: record.color,
                position: record.position,
                laps: record.laps,
                laps_behind,
                node: record.node,
                display_time: record.display_time(),
                best_lap: record.best_lap,
                model_id: record.model_id.clone(),
                gap,
            }
        })
        .collect();

    Some(Standings {
        rows,
        leader: leader_idx,
        fastest: fastest_lap(ordered),
    })
}
