//! Entity Registry
//!
//! Owns every known [`EntityRecord`]. Uses BTreeMap so iteration order (and
//! therefore every tie the reconciler has to break) is deterministic.

use std::collections::BTreeMap;

use crate::leaderboard::entity::{EntityId, EntityPatch, EntityRecord};

/// Map from player id to reconciled record.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    records: BTreeMap<EntityId, EntityRecord>,
    name_grace_ms: u64,
}

impl EntityRegistry {
    /// Create an empty registry.
    ///
    /// `name_grace_ms` is the debounce window for telemetry name changes.
    pub fn new(name_grace_ms: u64) -> Self {
        Self {
            records: BTreeMap::new(),
            name_grace_ms,
        }
    }

    /// Create the record if absent, then merge the patch into it.
    pub fn upsert(&mut self, id: EntityId, patch: &EntityPatch, now: u64) -> &mut EntityRecord {
        let grace = self.name_grace_ms;
        let record = self.records
            .entry(id)
            .or_insert_with(|| EntityRecord::new(id, now));
        record.merge(patch, now, grace);
        record
    }

    /// Remove a record. Returns it if it existed.
    pub fn remove(&mut self, id: EntityId) -> Option<EntityRecord> {
        self.records.remove(&id)
    }

    /// Drop every record not seen within `max_age_ms`. Returns removed ids.
    pub fn sweep_stale(&mut self, now: u64, max_age_ms: u64) -> Vec<EntityId> {
        let stale: Vec<EntityId> = self.records.values()
            .filter(|r| now.saturating_sub(r.last_seen) > max_age_ms)
            .map(|r| r.id)
            .collect();

        for id in &stale {
            self.records.remove(id);
        }
        stale
    }

    /// Get a record.
    pub fn get(&self, id: EntityId) -> Option<&EntityRecord> {
        self.records.get(&id)
    }

    /// Get a record mutably.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut EntityRecord> {
        self.records.get_mut(&id)
    }

    /// Whether a record exists.
    pub fn contains(&self, id: EntityId) -> bool {
        self.records.contains_key(&id)
    }

    /// Iterate records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityRecord> {
        self.records.values()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether any record still waits for a real name.
    pub fn has_placeholders(&self) -> bool {
        self.records.values().any(|r| r.has_placeholder_name())
    }

    /// Reset race progress on every record (identity is kept).
    pub fn reset_race_fields(&mut self, now: u64) {
        for record in self.records.values_mut() {
            record.reset_race_fields(now);
        }
    }

    /// Freeze the time fields of every record.
    pub fn freeze_all(&mut self, fallback_ms: u64) {
        for record in self.records.values_mut() {
            record.freeze(fallback_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch_node(node: u16) -> EntityPatch {
        EntityPatch { node: Some(node), ..Default::default() }
    }

    #[test]
    fn test_upsert_creates_then_merges() {
        let mut registry = EntityRegistry::new(2_000);
        registry.upsert(EntityId(1), &patch_node(10), 100);
        assert_eq!(registry.len(), 1);

        let record = registry.upsert(EntityId(1), &EntityPatch {
            laps: Some(2),
            ..Default::default()
        }, 200);
        assert_eq!(record.node, 10);
        assert_eq!(record.laps, 2);
        assert_eq!(record.last_seen, 200);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut registry = EntityRegistry::new(2_000);
        registry.upsert(EntityId(1), &patch_node(1), 0);
        assert!(registry.remove(EntityId(1)).is_some());
        assert!(registry.remove(EntityId(1)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sweep_stale() {
        let mut registry = EntityRegistry::new(2_000);
        registry.upsert(EntityId(1), &patch_node(1), 0);
        registry.upsert(EntityId(2), &patch_node(1), 20_000);
        registry.upsert(EntityId(3), &patch_node(1), 31_000);

        let removed = registry.sweep_stale(40_000, 30_000);
        assert_eq!(removed, vec![EntityId(1)]);
        assert!(registry.contains(EntityId(2)));
        assert!(registry.contains(EntityId(3)));
    }

    #[test]
    fn test_reset_and_placeholders() {
        let mut registry = EntityRegistry::new(2_000);
        registry.upsert(EntityId(1), &EntityPatch {
            laps: Some(3),
            total_time: Some(1_000),
            ..Default::default()
        }, 0);
        assert!(registry.has_placeholders());

        registry.freeze_all(0);
        assert_eq!(registry.get(EntityId(1)).unwrap().finish_time, Some(1_000));

        registry.reset_race_fields(5);
        let r = registry.get(EntityId(1)).unwrap();
        assert_eq!(r.laps, 0);
        assert_eq!(r.finish_time, None);
    }
}
