use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::zones::Zone;

/// An immutable view of the zone set, cheap to clone and safe to hold for a
/// whole frame. A worker takes one snapshot per frame so every feature and
/// the evaluator see the same zone set even if an operator edits mid-flight.
#[derive(Clone, Default)]
pub struct ZoneSnapshot {
    zones: Arc<HashMap<String, Arc<Zone>>>,
}

impl ZoneSnapshot {
    pub fn get(&self, id: &str) -> Option<&Arc<Zone>> {
        self.zones.get(id)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Zones owned by one camera, evaluation order stable by id.
    pub fn for_camera(&self, camera_id: &str) -> Vec<Arc<Zone>> {
        let mut zones: Vec<Arc<Zone>> = self
            .zones
            .values()
            .filter(|z| z.camera_id == camera_id)
            .cloned()
            .collect();
        zones.sort_by(|a, b| a.id.cmp(&b.id));
        zones
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Zone>> {
        self.zones.values()
    }
}

/// Copy-on-write zone cache.
///
/// Mutations build a new map and swap the shared `Arc`, so in-flight readers
/// keep their complete snapshot and never observe a half-updated zone. Keyed
/// by zone id to avoid re-parsing zone records per frame.
#[derive(Default)]
pub struct ZoneCache {
    current: RwLock<ZoneSnapshot>,
}

impl ZoneCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zones(zones: Vec<Zone>) -> Self {
        let cache = Self::new();
        cache.replace_all(zones);
        cache
    }

    /// Current snapshot. Readers hold it as long as they like.
    pub fn snapshot(&self) -> ZoneSnapshot {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Insert or update one zone.
    pub fn upsert(&self, zone: Zone) {
        self.mutate(|map| {
            map.insert(zone.id.clone(), Arc::new(zone));
        });
    }

    /// Remove a zone by id.
    pub fn remove(&self, id: &str) {
        self.mutate(|map| {
            map.remove(id);
        });
    }

    /// Replace the whole zone set (config reload).
    pub fn replace_all(&self, zones: Vec<Zone>) {
        let map: HashMap<String, Arc<Zone>> = zones
            .into_iter()
            .map(|z| (z.id.clone(), Arc::new(z)))
            .collect();
        let snapshot = ZoneSnapshot { zones: Arc::new(map) };
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }

    fn mutate(&self, f: impl FnOnce(&mut HashMap<String, Arc<Zone>>)) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let mut map = (*guard.zones).clone();
        f(&mut map);
        *guard = ZoneSnapshot { zones: Arc::new(map) };
    }
}
