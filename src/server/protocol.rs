use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::engine::cache::CacheCounters;
use crate::engine::statistics::RuleCounters;
use crate::engine::{CycleReport, EffectManager, EngineState, EngineTotals, RuleSummary};
use crate::host::EntityId;

/// Everything the operator endpoints can answer, captured once per published cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorView {
    pub tick: u64,
    pub state: EngineState,
    pub generation: u64,
    pub cache_size: usize,
    pub cache_counters: CacheCounters,
    pub pending_chains: usize,
    pub totals: EngineTotals,
    pub rules: Vec<RuleSummary>,
    pub stats: StatsResponse,
    pub cooldowns: HashMap<EntityId, Vec<CooldownEntry>>,
}

impl OperatorView {
    pub fn empty() -> Self {
        OperatorView {
            tick: 0,
            state: EngineState::Unloaded,
            generation: 0,
            cache_size: 0,
            cache_counters: CacheCounters::default(),
            pending_chains: 0,
            totals: EngineTotals::default(),
            rules: Vec::new(),
            stats: StatsResponse::default(),
            cooldowns: HashMap::new(),
        }
    }

    /// Snapshot `manager`. Cooldowns are collected for `entities` only.
    pub fn capture(manager: &mut EffectManager, entities: &[EntityId]) -> Self {
        let cooldowns = manager
            .cooldown_snapshot(entities)
            .into_iter()
            .map(|(id, list)| {
                let entries = list
                    .into_iter()
                    .map(|(rule, remaining)| CooldownEntry {
                        rule,
                        remaining_ms: remaining.as_millis() as u64,
                    })
                    .collect();
                (id, entries)
            })
            .collect();
        let stats = manager.statistics();
        OperatorView {
            tick: manager.current_tick(),
            state: manager.state(),
            generation: manager.generation(),
            cache_size: manager.cache_size(),
            cache_counters: manager.cache().counters(),
            pending_chains: manager.pending_chains(),
            totals: manager.totals(),
            rules: manager.rule_summaries(),
            stats: StatsResponse {
                totals: stats.totals(),
                rules: stats.rules().clone(),
            },
            cooldowns,
        }
    }

    pub fn status_message(&self) -> StatusMessage {
        StatusMessage {
            message_type: "Status",
            tick: self.tick,
            state: self.state,
            generation: self.generation,
            rule_count: self.rules.len(),
            cache_size: self.cache_size,
            pending_chains: self.pending_chains,
            totals: self.totals,
        }
    }
}

/// Sent once to each WebSocket client on connect.
#[derive(Debug, Clone, Serialize)]
pub struct StatusMessage {
    pub message_type: &'static str,
    pub tick: u64,
    pub state: EngineState,
    pub generation: u64,
    pub rule_count: usize,
    pub cache_size: usize,
    pub pending_chains: usize,
    pub totals: EngineTotals,
}

/// Streamed after every published pass.
#[derive(Debug, Clone, Serialize)]
pub struct CycleMessage<'a> {
    pub message_type: &'static str,
    #[serde(flatten)]
    pub report: &'a CycleReport,
}

impl<'a> CycleMessage<'a> {
    pub fn new(report: &'a CycleReport) -> Self {
        CycleMessage {
            message_type: "Cycle",
            report,
        }
    }
}

/// Health endpoint response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub tick: u64,
    pub state: EngineState,
    pub generation: u64,
    pub rule_count: usize,
    pub cache_size: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cycle_rate: f32,
    pub last_cycle_ms: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsResponse {
    pub totals: RuleCounters,
    pub rules: BTreeMap<String, RuleCounters>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CooldownEntry {
    pub rule: String,
    pub remaining_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CooldownsResponse<'a> {
    pub entity: String,
    pub cooldowns: &'a [CooldownEntry],
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse<'a> {
    pub error: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::effects::rule::StatusSpec;
    use crate::effects::{EffectRule, RuleSet};
    use crate::engine::clock::ManualClock;
    use crate::engine::PassKind;
    use crate::host::{RegionWeather, SimHost, StatusKind};
    use glam::DVec3;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn capture_reflects_manager_state() {
        let id = EntityId(Uuid::from_u128(3));
        let mut host = SimHost::new();
        host.add_region("world", RegionWeather::CLEAR, 0);
        host.spawn_entity(id, "Steve", "world", DVec3::new(0.0, 70.0, 0.0));

        let mut rule = EffectRule::new("haste");
        rule.statuses.push(StatusSpec::fixed(StatusKind::Haste, 1, 40));
        rule.cooldown = Some(Duration::from_secs(10));
        let config = EngineConfig {
            update_interval: 1,
            rng_seed: Some(1),
            ..EngineConfig::default()
        };
        let mut manager = EffectManager::new(config, Arc::new(ManualClock::new(0)));
        manager.load(RuleSet::new(vec![rule])).unwrap();
        manager.start().unwrap();
        manager.on_tick(&mut host);

        let view = OperatorView::capture(&mut manager, &[id]);
        assert_eq!(view.tick, 1);
        assert_eq!(view.state, EngineState::Running);
        assert_eq!(view.rules.len(), 1);
        assert_eq!(view.cache_counters, CacheCounters { hits: 0, misses: 0 });
        assert_eq!(view.stats.rules["haste"].successes, 1);
        assert_eq!(
            view.cooldowns[&id],
            vec![CooldownEntry {
                rule: "haste".into(),
                remaining_ms: 10_000
            }]
        );
        assert_eq!(view.status_message().rule_count, 1);
    }

    #[test]
    fn cycle_message_flattens_report() {
        let report = CycleReport {
            tick: 40,
            kind: PassKind::Cadence,
            regions: 2,
            skipped_regions: 0,
            entities: 3,
            rules_applied: 1,
            cooldown_blocked: 0,
            chains_immediate: 0,
            chains_scheduled: 1,
            chains_dropped: 0,
            statuses_withdrawn: 0,
            duration_ms: 0.5,
        };
        let json = serde_json::to_value(CycleMessage::new(&report)).unwrap();
        assert_eq!(json["message_type"], "Cycle");
        assert_eq!(json["tick"], 40);
        assert_eq!(json["kind"], "cadence");
        assert_eq!(json["chains_scheduled"], 1);
    }
}
