use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::host::EntityId;

/// Trigger and success counters for one rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuleCounters {
    /// Conditions matched for an entity.
    pub triggers: u64,
    /// Consequences actually applied (not gated by cooldown).
    pub successes: u64,
}

impl RuleCounters {
    /// Fraction of triggers that went on to apply. 0 when never triggered.
    pub fn success_rate(&self) -> f64 {
        if self.triggers == 0 {
            0.0
        } else {
            self.successes as f64 / self.triggers as f64
        }
    }
}

/// In-memory counters, per rule and per entity.
#[derive(Debug, Clone, Default)]
pub struct RuleStatistics {
    per_rule: BTreeMap<String, RuleCounters>,
    per_entity: HashMap<EntityId, BTreeMap<String, RuleCounters>>,
}

impl RuleStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_trigger(&mut self, rule: &str, entity: EntityId) {
        self.bump(rule, entity, |c| c.triggers += 1);
    }

    pub fn record_success(&mut self, rule: &str, entity: EntityId) {
        self.bump(rule, entity, |c| c.successes += 1);
    }

    fn bump(&mut self, rule: &str, entity: EntityId, f: impl Fn(&mut RuleCounters)) {
        match self.per_rule.get_mut(rule) {
            Some(c) => f(c),
            None => f(self.per_rule.entry(rule.to_string()).or_default()),
        }
        f(self
            .per_entity
            .entry(entity)
            .or_default()
            .entry(rule.to_string())
            .or_default());
    }

    pub fn rule(&self, rule: &str) -> RuleCounters {
        self.per_rule.get(rule).copied().unwrap_or_default()
    }

    /// Per-rule counters sorted by rule key.
    pub fn rules(&self) -> &BTreeMap<String, RuleCounters> {
        &self.per_rule
    }

    pub fn entity(&self, entity: EntityId) -> Option<&BTreeMap<String, RuleCounters>> {
        self.per_entity.get(&entity)
    }

    pub fn totals(&self) -> RuleCounters {
        self.per_rule.values().fold(RuleCounters::default(), |acc, c| RuleCounters {
            triggers: acc.triggers + c.triggers,
            successes: acc.successes + c.successes,
        })
    }

    pub fn forget_entity(&mut self, entity: EntityId) {
        self.per_entity.remove(&entity);
    }
}
