use rand::Rng;
use tracing::warn;

use crate::effects::condition::Prerequisite;
use crate::effects::param::Chance;
use crate::host::{EntityId, EntitySnapshot};

/// A probabilistic, optionally delayed link from one rule to another.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainEffect {
    pub chance: Chance,
    /// Key of the rule to re-enter.
    pub target: String,
    /// 0 means re-enter within the same evaluation pass.
    pub delay_ticks: u32,
    pub condition: Option<Prerequisite>,
}

impl ChainEffect {
    /// Draw against the chance, then check the sub-condition.
    pub fn fires<R: Rng + ?Sized>(&self, entity: &EntitySnapshot, rng: &mut R) -> bool {
        self.chance.roll(rng) && self.condition.as_ref().is_none_or(|c| c.holds(entity))
    }
}

/// Deferred re-entry. Holds the entity by identity only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTask {
    pub entity: EntityId,
    pub source: String,
    pub target: String,
    pub depth: u32,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainAction {
    Immediate { target: String, depth: u32 },
    Delayed { delay_ticks: u32, task: ChainTask },
    DepthExceeded,
}

/// Turns a fired chain into an immediate or delayed re-entry, bounded by depth.
#[derive(Debug, Clone, Copy)]
pub struct ChainDispatcher {
    max_depth: u32,
}

impl ChainDispatcher {
    pub fn new(max_depth: u32) -> Self {
        ChainDispatcher { max_depth }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// `depth` is the depth of the invocation whose chain fired; root evaluations are 0.
    pub fn dispatch(
        &self,
        entity: EntityId,
        source: &str,
        chain: &ChainEffect,
        depth: u32,
        generation: u64,
    ) -> ChainAction {
        let next = depth.saturating_add(1);
        if next > self.max_depth {
            warn!(
                entity = %entity,
                rule = source,
                target = %chain.target,
                max_depth = self.max_depth,
                "Chain depth limit reached, dropping link"
            );
            return ChainAction::DepthExceeded;
        }

        if chain.delay_ticks == 0 {
            ChainAction::Immediate {
                target: chain.target.clone(),
                depth: next,
            }
        } else {
            ChainAction::Delayed {
                delay_ticks: chain.delay_ticks,
                task: ChainTask {
                    entity,
                    source: source.to_string(),
                    target: chain.target.clone(),
                    depth: next,
                    generation,
                },
            }
        }
    }
}
