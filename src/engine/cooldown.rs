use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::clock::Clock;
use crate::host::EntityId;

/// Per-entity, per-rule expiry times. Expired records are purged when queried.
pub struct CooldownTracker {
    clock: Arc<dyn Clock>,
    expiries: HashMap<String, HashMap<EntityId, u64>>,
}

impl CooldownTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        CooldownTracker {
            clock,
            expiries: HashMap::new(),
        }
    }

    pub fn set_cooldown(&mut self, entity: EntityId, rule: &str, duration: Duration) {
        let expiry = self.clock.now_ms().saturating_add(duration.as_millis() as u64);
        self.expiries
            .entry(rule.to_string())
            .or_default()
            .insert(entity, expiry);
    }

    pub fn is_on_cooldown(&mut self, entity: EntityId, rule: &str) -> bool {
        !self.remaining(entity, rule).is_zero()
    }

    /// Time left before `rule` may fire again for `entity`. Zero when not cooling down.
    pub fn remaining(&mut self, entity: EntityId, rule: &str) -> Duration {
        let now = self.clock.now_ms();
        let Some(per_rule) = self.expiries.get_mut(rule) else {
            return Duration::ZERO;
        };
        match per_rule.get(&entity) {
            Some(&expiry) if expiry > now => Duration::from_millis(expiry - now),
            Some(_) => {
                per_rule.remove(&entity);
                if per_rule.is_empty() {
                    self.expiries.remove(rule);
                }
                Duration::ZERO
            }
            None => Duration::ZERO,
        }
    }

    /// Active cooldowns for one entity, sorted by rule key.
    pub fn active_for(&mut self, entity: EntityId) -> Vec<(String, Duration)> {
        let mut keys: Vec<String> = self
            .expiries
            .iter()
            .filter(|(_, per_rule)| per_rule.contains_key(&entity))
            .map(|(rule, _)| rule.clone())
            .collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|rule| {
                let left = self.remaining(entity, &rule);
                (!left.is_zero()).then_some((rule, left))
            })
            .collect()
    }

    pub fn clear_entity(&mut self, entity: EntityId) {
        self.expiries.retain(|_, per_rule| {
            per_rule.remove(&entity);
            !per_rule.is_empty()
        });
    }

    pub fn clear_rule(&mut self, rule: &str) {
        self.expiries.remove(rule);
    }

    pub fn clear_all(&mut self) {
        self.expiries.clear();
    }

    /// Bulk purge of everything already expired.
    pub fn sweep(&mut self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;
        self.expiries.retain(|_, per_rule| {
            let before = per_rule.len();
            per_rule.retain(|_, expiry| *expiry > now);
            removed += before - per_rule.len();
            !per_rule.is_empty()
        });
        removed
    }

    /// Number of live records, including not-yet-purged expired ones.
    pub fn len(&self) -> usize {
        self.expiries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
