pub mod chain;
pub mod condition;
pub mod param;
pub mod rule;
pub mod script;
pub mod template;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub use chain::{ChainAction, ChainDispatcher, ChainEffect, ChainTask};
pub use condition::{ConditionSet, Prerequisite, RegionState, TimeBand};
pub use rule::{ApplyOutcome, EffectRule};

/// One load generation of rules, in load order, indexed by key.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Arc<EffectRule>>,
    index: HashMap<String, usize>,
}

impl RuleSet {
    /// Build a set. A repeated key replaces the earlier rule in place.
    pub fn new(rules: impl IntoIterator<Item = EffectRule>) -> Self {
        let mut set = RuleSet::default();
        for rule in rules {
            match set.index.get(&rule.key) {
                Some(&i) => {
                    warn!(rule = %rule.key, "Duplicate rule key, later definition wins");
                    set.rules[i] = Arc::new(rule);
                }
                None => {
                    set.index.insert(rule.key.clone(), set.rules.len());
                    set.rules.push(Arc::new(rule));
                }
            }
        }
        set
    }

    pub fn get(&self, key: &str) -> Option<&Arc<EffectRule>> {
        self.index.get(key).map(|&i| &self.rules[i])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EffectRule>> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// `(source, target)` pairs whose chain target is not in this set.
    pub fn unresolved_chains(&self) -> Vec<(String, String)> {
        self.rules
            .iter()
            .flat_map(|rule| {
                rule.chains
                    .iter()
                    .filter(|c| !self.contains(&c.target))
                    .map(|c| (rule.key.clone(), c.target.clone()))
            })
            .collect()
    }
}
