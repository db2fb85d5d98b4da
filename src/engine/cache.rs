use glam::IVec3;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::clock::Clock;
use crate::host::{EntityId, EntitySnapshot, HostError, RegionId, ZoneId};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub zone: ZoneId,
    pub region: RegionId,
    pub block: IVec3,
    pub captured_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
}

/// Memoized zone lookups, bounded by age and by positional drift.
///
/// The store is shared with a background sweeper. The sweeper only removes
/// entries, so a racing lookup sees either the old entry or a miss.
#[derive(Clone)]
pub struct EnvironmentCache {
    entries: Arc<RwLock<HashMap<EntityId, CacheEntry>>>,
    clock: Arc<dyn Clock>,
    ttl_ms: u64,
    max_drift: i32,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl EnvironmentCache {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration, max_drift: i32) -> Self {
        EnvironmentCache {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
            ttl_ms: ttl.as_millis() as u64,
            max_drift,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cached zone for `entity`, or a fresh classification via `classify`.
    ///
    /// A failed classification leaves any previous entry untouched.
    pub fn lookup_zone<F>(&self, entity: &EntitySnapshot, classify: F) -> Result<ZoneId, HostError>
    where
        F: FnOnce(&EntitySnapshot) -> Result<ZoneId, HostError>,
    {
        let now = self.clock.now_ms();
        let block = entity.block_position();

        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(&entity.id) {
                if self.is_valid(entry, &entity.region, block, now) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(entry.zone.clone());
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let zone = classify(entity)?;
        let entry = CacheEntry {
            zone: zone.clone(),
            region: entity.region.clone(),
            block,
            captured_ms: now,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity.id, entry);
        Ok(zone)
    }

    fn is_valid(&self, entry: &CacheEntry, region: &RegionId, block: IVec3, now: u64) -> bool {
        let age = now.saturating_sub(entry.captured_ms);
        age < self.ttl_ms && &entry.region == region && chebyshev(entry.block, block) <= self.max_drift
    }

    pub fn clear_entity(&self, id: EntityId) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub fn clear_all(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counters(&self) -> CacheCounters {
        CacheCounters {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Drop every entry whose TTL has run out. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, e| now.saturating_sub(e.captured_ms) < self.ttl_ms);
        before - entries.len()
    }

    /// Run `sweep_expired` every `interval` on the tokio runtime until the handle is aborted.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.sweep_expired();
                if removed > 0 {
                    debug!(removed, remaining = cache.len(), "Swept expired cache entries");
                }
            }
        })
    }
}

fn chebyshev(a: IVec3, b: IVec3) -> i32 {
    let d = (a - b).abs();
    d.x.max(d.y).max(d.z)
}
