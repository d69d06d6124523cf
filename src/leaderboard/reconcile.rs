//! Identity Reconciliation
//!
//! The simulation can report several live rows for one real competitor: an AI
//! substitute next to a bare `PLID n` row for the same grid slot, or a
//! placeholder row that has not caught up with a join event yet. This pass
//! collapses them to one row per driver.
//!
//! 1. Group by (rank hint, node). AI rows beat PLID shadows, otherwise
//!    [`choose_better_entry`] decides. Rows still at the unplaced defaults
//!    (no rank hint, node 0) have no slot and are kept apart.
//! 2. Group by normalized display name. Unnamed rows stay separate.
//! 3. Sort into final leaderboard order.

use std::collections::BTreeMap;

use crate::core::names::{is_ai_name, is_placeholder_name, is_plid_shadow, normalize_key};
use crate::leaderboard::entity::{EntityId, EntityRecord, UNKNOWN_POSITION};
use crate::leaderboard::ranking::{compare_progress, compare_standing};
use crate::leaderboard::session::SessionKind;

/// Pick the more informative of two rows for the same driver.
///
/// Precedence: real name over placeholder, then plausible rank hint (the
/// smaller of two plausible ones), then known elapsed time. Ties keep `a`.
pub fn choose_better_entry<'a>(a: &'a EntityRecord, b: &'a EntityRecord) -> &'a EntityRecord {
    let a_placeholder = is_placeholder_name(&a.name);
    let b_placeholder = is_placeholder_name(&b.name);
    if a_placeholder && !b_placeholder {
        return b;
    }
    if b_placeholder && !a_placeholder {
        return a;
    }

    match (a.has_plausible_position(), b.has_plausible_position()) {
        (true, true) => return if a.position <= b.position { a } else { b },
        (true, false) => return a,
        (false, true) => return b,
        (false, false) => {}
    }

    match (a.total_time.is_some(), b.total_time.is_some()) {
        (false, true) => b,
        _ => a,
    }
}

/// Insertion-ordered grouping: later rows are folded into the first row
/// seen for their key.
struct Groups<'a, K> {
    index: BTreeMap<K, usize>,
    rows: Vec<&'a EntityRecord>,
}

impl<'a, K: Ord> Groups<'a, K> {
    fn new() -> Self {
        Self { index: BTreeMap::new(), rows: Vec::new() }
    }

    fn fold<F>(&mut self, key: K, row: &'a EntityRecord, pick: F)
    where
        F: FnOnce(&'a EntityRecord, &'a EntityRecord) -> &'a EntityRecord,
    {
        match self.index.get(&key) {
            Some(&slot) => self.rows[slot] = pick(self.rows[slot], row),
            None => {
                self.index.insert(key, self.rows.len());
                self.rows.push(row);
            }
        }
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum SlotKey {
    Placed(u16, u16),
    Unplaced(EntityId),
}

impl SlotKey {
    fn of(row: &EntityRecord) -> Self {
        if row.position == UNKNOWN_POSITION && row.node == 0 {
            SlotKey::Unplaced(row.id)
        } else {
            SlotKey::Placed(row.position, row.node)
        }
    }
}

fn dedup_by_slot(rows: Vec<&EntityRecord>) -> Vec<&EntityRecord> {
    let mut groups = Groups::new();
    for row in rows {
        groups.fold(SlotKey::of(row), row, |existing, incoming| {
            if is_ai_name(&existing.name) && is_plid_shadow(&incoming.name) {
                existing
            } else if is_ai_name(&incoming.name) && is_plid_shadow(&existing.name) {
                incoming
            } else {
                choose_better_entry(existing, incoming)
            }
        });
    }
    groups.rows
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum NameKey {
    Name(String),
    Unnamed(EntityId),
}

fn dedup_by_name(rows: Vec<&EntityRecord>) -> Vec<&EntityRecord> {
    let mut groups = Groups::new();
    for row in rows {
        let key = match normalize_key(&row.name) {
            k if k.is_empty() => NameKey::Unnamed(row.id),
            k => NameKey::Name(k),
        };
        groups.fold(key, row, choose_better_entry);
    }
    groups.rows
}

/// Collapse shadow rows and return one row per driver in leaderboard order.
pub fn reconcile<'a, I>(kind: SessionKind, records: I) -> Vec<&'a EntityRecord>
where
    I: IntoIterator<Item = &'a EntityRecord>,
{
    let mut rows: Vec<&EntityRecord> = records.into_iter().collect();
    rows.sort_by(|a, b| compare_progress(kind, a, b));

    let mut by_slot = dedup_by_slot(rows);
    by_slot.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.name.cmp(&b.name)));

    let mut field = dedup_by_name(by_slot);
    field.sort_by(|a, b| compare_standing(kind, a, b));
    field
}
