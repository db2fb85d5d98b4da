pub mod cache;
pub mod clock;
pub mod cooldown;
pub mod scheduler;
pub mod statistics;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::{EngineConfig, LoadReport, load_rule_directory};
use crate::effects::script::{PredicateContext, ScriptEngine};
use crate::effects::{ChainAction, ChainDispatcher, ChainEffect, ChainTask, EffectRule, RegionState, RuleSet};
use crate::error::{EngineError, ReferenceKind};
use crate::host::{EntityId, EntitySnapshot, Host, HostError, RegionId, RegionWeather, StatusKind, ZoneId};

use cache::EnvironmentCache;
use clock::Clock;
use cooldown::CooldownTracker;
use scheduler::{Fired, TaskHandle, TickScheduler};
use statistics::RuleStatistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Unloaded,
    Loaded,
    Running,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Unloaded => "unloaded",
            EngineState::Loaded => "loaded",
            EngineState::Running => "running",
            EngineState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// What started an evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    Cadence,
    WeatherChange,
    EntityJoin,
    Manual,
    DelayedChain,
}

/// Result of one evaluation pass, for logs and the status stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub tick: u64,
    pub kind: PassKind,
    pub regions: usize,
    pub skipped_regions: usize,
    pub entities: usize,
    pub rules_applied: usize,
    pub cooldown_blocked: usize,
    pub chains_immediate: usize,
    pub chains_scheduled: usize,
    pub chains_dropped: usize,
    pub statuses_withdrawn: usize,
    pub duration_ms: f32,
}

impl CycleReport {
    fn new(tick: u64, kind: PassKind) -> Self {
        CycleReport {
            tick,
            kind,
            regions: 0,
            skipped_regions: 0,
            entities: 0,
            rules_applied: 0,
            cooldown_blocked: 0,
            chains_immediate: 0,
            chains_scheduled: 0,
            chains_dropped: 0,
            statuses_withdrawn: 0,
            duration_ms: 0.0,
        }
    }
}

/// Running totals since the engine was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineTotals {
    pub cycles: u64,
    pub applications: u64,
    pub chains_immediate: u64,
    pub chains_scheduled: u64,
    pub chains_delayed_fired: u64,
    pub chains_dropped: u64,
}

impl EngineTotals {
    fn absorb(&mut self, report: &CycleReport) {
        self.applications += report.rules_applied as u64;
        self.chains_immediate += report.chains_immediate as u64;
        self.chains_scheduled += report.chains_scheduled as u64;
        self.chains_dropped += report.chains_dropped as u64;
    }
}

/// Operator view of one loaded rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSummary {
    pub key: String,
    pub description: String,
    pub enabled: bool,
    pub statuses: usize,
    pub feedback: usize,
    pub chains: Vec<String>,
    pub cooldown_ms: Option<u64>,
    pub predicate: Option<String>,
}

/// Owns the rule set and all run-time state, and drives evaluation from host ticks.
///
/// Single-threaded: every method is called from the host's tick thread. Only
/// the environment cache is shared with a background sweeper.
pub struct EffectManager {
    config: EngineConfig,
    state: EngineState,
    rules: Arc<RuleSet>,
    generation: u64,
    scripts: ScriptEngine,
    cache: EnvironmentCache,
    cooldowns: CooldownTracker,
    stats: RuleStatistics,
    scheduler: TickScheduler<ChainTask>,
    cadence: Option<TaskHandle>,
    dispatcher: ChainDispatcher,
    region_weather: HashMap<RegionId, RegionWeather>,
    /// Guaranteed statuses each rule granted, per entity, so they can be
    /// withdrawn once the rule stops holding.
    granted: HashMap<EntityId, BTreeMap<String, Vec<StatusKind>>>,
    rng: ChaCha8Rng,
    totals: EngineTotals,
    last_cycle: Option<CycleReport>,
}

impl EffectManager {
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let seed = config.rng_seed.unwrap_or_else(rand::random);
        let cache = EnvironmentCache::new(clock.clone(), config.cache_ttl(), config.cache_max_drift);
        EffectManager {
            state: EngineState::Unloaded,
            rules: Arc::new(RuleSet::default()),
            generation: 0,
            scripts: ScriptEngine::new(),
            cache,
            cooldowns: CooldownTracker::new(clock),
            stats: RuleStatistics::new(),
            scheduler: TickScheduler::new(),
            cadence: None,
            dispatcher: ChainDispatcher::new(config.max_chain_depth),
            region_weather: HashMap::new(),
            granted: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            totals: EngineTotals::default(),
            last_cycle: None,
            config,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn cache(&self) -> &EnvironmentCache {
        &self.cache
    }

    pub fn current_tick(&self) -> u64 {
        self.scheduler.current_tick()
    }

    pub fn pending_chains(&self) -> usize {
        self.scheduler.pending_once()
    }

    pub fn totals(&self) -> EngineTotals {
        self.totals
    }

    pub fn last_cycle(&self) -> Option<&CycleReport> {
        self.last_cycle.as_ref()
    }

    // -- lifecycle ---------------------------------------------------------

    /// Install a rule set. Valid from `Unloaded`, `Loaded` or `Stopped`.
    pub fn load(&mut self, rules: RuleSet) -> Result<(), EngineError> {
        if self.state == EngineState::Running {
            return Err(EngineError::InvalidState {
                action: "load",
                state: self.state,
            });
        }
        self.install(rules);
        self.state = EngineState::Loaded;
        Ok(())
    }

    /// Load every rule file from the configured directory.
    pub fn load_from_directory(&mut self) -> Result<LoadReport, EngineError> {
        let dir = self.config.rule_directory.clone();
        let (rules, report) = load_rule_directory(Path::new(&dir), &self.scripts)?;
        self.load(rules)?;
        Ok(report)
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state != EngineState::Loaded {
            return Err(EngineError::InvalidState {
                action: "start",
                state: self.state,
            });
        }
        let interval = self.config.update_interval;
        self.cadence = Some(self.scheduler.schedule_repeating(interval, interval));
        self.state = EngineState::Running;
        info!(
            rules = self.rules.len(),
            generation = self.generation,
            update_interval = interval,
            max_chain_depth = self.dispatcher.max_depth(),
            "Effect engine running"
        );
        Ok(())
    }

    /// Cancel the cadence and drop cached zones. Already scheduled chain
    /// callbacks still fire and no-op.
    pub fn stop(&mut self) {
        if let Some(handle) = self.cadence.take() {
            self.scheduler.cancel(handle);
        }
        self.cache.clear_all();
        if self.state == EngineState::Running {
            info!(pending_chains = self.scheduler.pending_once(), "Effect engine stopped");
        }
        self.state = EngineState::Stopped;
    }

    /// Swap in a new rule set wholesale, restarting the cadence if it was running.
    pub fn reload(&mut self, rules: RuleSet) -> Result<(), EngineError> {
        let was_running = self.state == EngineState::Running;
        if let Some(handle) = self.cadence.take() {
            self.scheduler.cancel(handle);
        }
        self.state = EngineState::Unloaded;
        self.load(rules)?;
        if was_running {
            self.start()?;
        }
        Ok(())
    }

    pub fn reload_from_directory(&mut self) -> Result<LoadReport, EngineError> {
        let dir = self.config.rule_directory.clone();
        let (rules, report) = load_rule_directory(Path::new(&dir), &self.scripts)?;
        self.reload(rules)?;
        Ok(report)
    }

    fn install(&mut self, rules: RuleSet) {
        for old in self.rules.iter() {
            if !rules.contains(&old.key) {
                self.cooldowns.clear_rule(&old.key);
            }
        }
        self.rules = Arc::new(rules);
        self.generation += 1;
        info!(rules = self.rules.len(), generation = self.generation, "Rule set installed");
    }

    // -- host entry points -------------------------------------------------

    /// Advance one host tick. Returns the report when a cadence pass ran.
    pub fn on_tick(&mut self, host: &mut dyn Host) -> Option<CycleReport> {
        let mut cadence_report = None;
        for fired in self.scheduler.advance() {
            match fired {
                Fired::Repeating(handle) if Some(handle) == self.cadence => {
                    cadence_report = Some(self.run_cycle(host));
                }
                Fired::Repeating(_) => {}
                Fired::Once(task) => self.fire_chain(host, task),
            }
        }
        cadence_report
    }

    /// Region weather changed. Re-evaluates that region immediately when running.
    pub fn on_weather_change(
        &mut self,
        host: &mut dyn Host,
        region: &RegionId,
        weather: RegionWeather,
    ) -> Option<CycleReport> {
        let previous = self.region_weather.insert(region.clone(), weather);
        debug!(region = %region, weather = weather.kind().as_str(), "Weather changed");
        if self.state != EngineState::Running || previous == Some(weather) {
            return None;
        }
        let started = Instant::now();
        let mut report = CycleReport::new(self.current_tick(), PassKind::WeatherChange);
        self.evaluate_region(host, region, false, &mut report);
        Some(self.finish_pass(report, started))
    }

    /// Evaluate a newly arrived entity without waiting for the cadence.
    pub fn on_entity_join(&mut self, host: &mut dyn Host, id: EntityId) -> Option<CycleReport> {
        if self.state != EngineState::Running {
            return None;
        }
        let entity = host.entity(id)?;
        let started = Instant::now();
        let mut report = CycleReport::new(self.current_tick(), PassKind::EntityJoin);
        self.evaluate_single(host, entity, &mut report);
        Some(self.finish_pass(report, started))
    }

    /// Forget cached state for an entity that left the system.
    pub fn on_entity_leave(&mut self, id: EntityId) {
        self.cache.clear_entity(id);
        self.granted.remove(&id);
        self.stats.forget_entity(id);
        debug!(entity = %id, "Entity left");
    }

    /// The entity moved from `from` to another region: withdraw everything it
    /// was granted, then evaluate it where it is now.
    pub fn on_entity_changed_region(
        &mut self,
        host: &mut dyn Host,
        id: EntityId,
        from: &RegionId,
    ) -> Option<CycleReport> {
        self.cache.clear_entity(id);
        let mut withdrawn = CycleReport::new(self.current_tick(), PassKind::EntityJoin);
        self.withdraw_all(host, id, &mut withdrawn);
        debug!(entity = %id, from = %from, withdrawn = withdrawn.statuses_withdrawn, "Entity changed region");
        let mut report = self.on_entity_join(host, id)?;
        report.statuses_withdrawn += withdrawn.statuses_withdrawn;
        Some(report)
    }

    /// Evaluate and apply one rule against one entity right now, regardless of
    /// the cadence. Returns whether it applied.
    pub fn trigger_rule(
        &mut self,
        host: &mut dyn Host,
        key: &str,
        id: EntityId,
    ) -> Result<bool, EngineError> {
        let rule = self
            .rules
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::unresolved("<manual>", ReferenceKind::ChainTarget, key))?;
        let entity = host.entity(id).ok_or(EngineError::StaleEntity(id))?;
        if entity.bypass {
            debug!(entity = %id, rule = key, "Entity bypasses effects");
            return Ok(false);
        }
        let state = self.region_state(host, &entity.region)?;
        let started = Instant::now();
        let mut report = CycleReport::new(self.current_tick(), PassKind::Manual);
        let applied = self.invoke(host, &rule, &entity, &state, 0, &mut report);
        self.finish_pass(report, started);
        Ok(applied)
    }

    // -- queries -----------------------------------------------------------

    pub fn rule_summaries(&self) -> Vec<RuleSummary> {
        self.rules
            .iter()
            .map(|r| RuleSummary {
                key: r.key.clone(),
                description: r.description.clone(),
                enabled: r.enabled,
                statuses: r.statuses.len(),
                feedback: r.feedback.len(),
                chains: r.chains.iter().map(|c| c.target.clone()).collect(),
                cooldown_ms: r.cooldown.map(|d| d.as_millis() as u64),
                predicate: r.predicate.as_ref().map(|p| p.describe()),
            })
            .collect()
    }

    pub fn statistics(&self) -> &RuleStatistics {
        &self.stats
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    pub fn active_cooldowns(&mut self, id: EntityId) -> Vec<(String, Duration)> {
        self.cooldowns.active_for(id)
    }

    /// Every entity that currently has a live cooldown.
    pub fn cooldown_snapshot(&mut self, entities: &[EntityId]) -> Vec<(EntityId, Vec<(String, Duration)>)> {
        entities
            .iter()
            .map(|id| (*id, self.cooldowns.active_for(*id)))
            .filter(|(_, c)| !c.is_empty())
            .collect()
    }

    // -- evaluation --------------------------------------------------------

    fn run_cycle(&mut self, host: &mut dyn Host) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::new(self.current_tick(), PassKind::Cadence);
        for region in host.regions() {
            self.evaluate_region(host, &region, true, &mut report);
        }
        self.cooldowns.sweep();
        self.totals.cycles += 1;
        let report = self.finish_pass(report, started);
        debug!(
            tick = report.tick,
            regions = report.regions,
            entities = report.entities,
            applied = report.rules_applied,
            chains = report.chains_immediate + report.chains_scheduled,
            duration_ms = report.duration_ms,
            "Cycle complete"
        );
        report
    }

    fn finish_pass(&mut self, mut report: CycleReport, started: Instant) -> CycleReport {
        report.duration_ms = started.elapsed().as_secs_f32() * 1000.0;
        self.totals.absorb(&report);
        self.last_cycle = Some(report.clone());
        report
    }

    fn region_enabled(&self, region: &RegionId) -> bool {
        self.config
            .regions
            .get(region.as_str())
            .is_none_or(|s| s.enabled)
    }

    fn rule_allowed_in(&self, rule: &EffectRule, region: &RegionId) -> bool {
        self.config
            .regions
            .get(region.as_str())
            .is_none_or(|s| s.enabled && !s.disabled_rules.iter().any(|k| k == &rule.key))
    }

    /// Region-wide state, using the cached weather unless `refresh` is set.
    fn region_state(&mut self, host: &dyn Host, region: &RegionId) -> Result<RegionState, HostError> {
        let weather = match self.region_weather.get(region) {
            Some(w) => *w,
            None => {
                let w = host.region_weather(region)?;
                self.region_weather.insert(region.clone(), w);
                w
            }
        };
        Ok(RegionState {
            region: region.clone(),
            weather,
            time_of_day: host.region_time_of_day(region)?,
        })
    }

    fn evaluate_region(
        &mut self,
        host: &mut dyn Host,
        region: &RegionId,
        refresh: bool,
        report: &mut CycleReport,
    ) {
        if !self.region_enabled(region) {
            trace!(region = %region, "Region disabled");
            return;
        }
        if refresh {
            match host.region_weather(region) {
                Ok(w) => {
                    self.region_weather.insert(region.clone(), w);
                }
                Err(e) => {
                    debug!(region = %region, "Skipping region: {}", EngineError::TransientHost(e));
                    report.skipped_regions += 1;
                    return;
                }
            }
        }
        let state = match self.region_state(host, region) {
            Ok(s) => s,
            Err(e) => {
                debug!(region = %region, "Skipping region: {}", EngineError::TransientHost(e));
                report.skipped_regions += 1;
                return;
            }
        };
        report.regions += 1;

        let candidates: Vec<Arc<EffectRule>> = self
            .rules
            .iter()
            .filter(|r| r.enabled && self.rule_allowed_in(r, region) && r.conditions.matches_region(&state))
            .cloned()
            .collect();
        if candidates.is_empty() && self.granted.is_empty() {
            return;
        }

        for entity in host.list_entities_in_region(region) {
            report.entities += 1;
            self.evaluate_entity(host, entity, &state, &candidates, report);
        }
    }

    fn evaluate_single(&mut self, host: &mut dyn Host, entity: EntitySnapshot, report: &mut CycleReport) {
        if !self.region_enabled(&entity.region) {
            return;
        }
        let state = match self.region_state(host, &entity.region) {
            Ok(s) => s,
            Err(e) => {
                debug!(entity = %entity.id, "Skipping entity: {}", EngineError::TransientHost(e));
                return;
            }
        };
        let candidates: Vec<Arc<EffectRule>> = self
            .rules
            .iter()
            .filter(|r| {
                r.enabled && self.rule_allowed_in(r, &state.region) && r.conditions.matches_region(&state)
            })
            .cloned()
            .collect();
        report.regions += 1;
        report.entities += 1;
        self.evaluate_entity(host, entity, &state, &candidates, report);
    }

    fn evaluate_entity(
        &mut self,
        host: &mut dyn Host,
        mut entity: EntitySnapshot,
        state: &RegionState,
        candidates: &[Arc<EffectRule>],
        report: &mut CycleReport,
    ) {
        if entity.bypass {
            self.withdraw_all(host, entity.id, report);
            return;
        }
        let lapsed = self.lapsed_grants(&*host, &entity, state);
        if !lapsed.is_empty() {
            self.withdraw(host, entity.id, &lapsed, report);
            if let Some(fresh) = host.entity(entity.id) {
                entity = fresh;
            }
        }
        for rule in candidates {
            if self.invoke(host, rule, &entity, state, 0, report) {
                // Later prerequisites should see what was just applied.
                if let Some(fresh) = host.entity(entity.id) {
                    entity = fresh;
                }
            }
        }
    }

    /// Keys of granted rules that no longer hold for `entity`: removed,
    /// disabled, blocked in this region, or failing their conditions.
    fn lapsed_grants(&self, host: &dyn Host, entity: &EntitySnapshot, state: &RegionState) -> Vec<String> {
        let Some(grants) = self.granted.get(&entity.id) else {
            return Vec::new();
        };
        grants
            .keys()
            .filter(|key| match self.rules.get(key) {
                None => true,
                Some(rule) if !self.rule_allowed_in(rule, &state.region) => true,
                Some(rule) => {
                    let zone = if rule.conditions.needs_zone() || rule.predicate.is_some() {
                        self.zone_for(host, entity)
                    } else {
                        None
                    };
                    let ctx = PredicateContext {
                        entity,
                        zone: zone.as_ref(),
                        region: state,
                    };
                    !rule.is_applicable(&ctx)
                }
            })
            .cloned()
            .collect()
    }

    fn track_grant(&mut self, entity: EntityId, rule: &EffectRule) {
        if rule.statuses.is_empty() {
            return;
        }
        let kinds = rule.statuses.iter().map(|s| s.kind).collect();
        self.granted.entry(entity).or_default().insert(rule.key.clone(), kinds);
    }

    /// Remove what the `lapsed` rules granted to `entity`. A status another
    /// granted rule still provides is left in place.
    fn withdraw(&mut self, host: &mut dyn Host, entity: EntityId, lapsed: &[String], report: &mut CycleReport) {
        let (released, still_held) = {
            let Some(grants) = self.granted.get_mut(&entity) else {
                return;
            };
            let mut released: BTreeSet<StatusKind> = BTreeSet::new();
            for key in lapsed {
                if let Some(kinds) = grants.remove(key) {
                    released.extend(kinds);
                }
            }
            let still_held: BTreeSet<StatusKind> = grants.values().flatten().copied().collect();
            (released, still_held)
        };
        if self.granted.get(&entity).is_some_and(|g| g.is_empty()) {
            self.granted.remove(&entity);
        }
        for kind in released.difference(&still_held) {
            host.remove_status_effect(entity, *kind);
            report.statuses_withdrawn += 1;
        }
        trace!(entity = %entity, rules = ?lapsed, "Grants withdrawn");
    }

    fn withdraw_all(&mut self, host: &mut dyn Host, entity: EntityId, report: &mut CycleReport) {
        let keys: Vec<String> = match self.granted.get(&entity) {
            Some(grants) => grants.keys().cloned().collect(),
            None => return,
        };
        self.withdraw(host, entity, &keys, report);
    }

    fn zone_for(&self, host: &dyn Host, entity: &EntitySnapshot) -> Option<ZoneId> {
        match self
            .cache
            .lookup_zone(entity, |e| host.classify_zone(&e.region, e.position))
        {
            Ok(zone) => Some(zone),
            Err(e) => {
                debug!(entity = %entity.id, "Zone lookup failed: {}", e);
                None
            }
        }
    }

    /// Applicability, cooldown gate, apply, then chain dispatch.
    fn invoke(
        &mut self,
        host: &mut dyn Host,
        rule: &EffectRule,
        entity: &EntitySnapshot,
        state: &RegionState,
        depth: u32,
        report: &mut CycleReport,
    ) -> bool {
        let zone = if rule.conditions.needs_zone() || rule.predicate.is_some() {
            self.zone_for(&*host, entity)
        } else {
            None
        };
        let ctx = PredicateContext {
            entity,
            zone: zone.as_ref(),
            region: state,
        };
        if !rule.is_applicable(&ctx) {
            return false;
        }

        self.stats.record_trigger(&rule.key, entity.id);
        if rule.cooldown.is_some() && self.cooldowns.is_on_cooldown(entity.id, &rule.key) {
            trace!(rule = %rule.key, entity = %entity.id, "On cooldown");
            report.cooldown_blocked += 1;
            return false;
        }

        let outcome = rule.apply(entity, host, &mut self.rng);
        self.stats.record_success(&rule.key, entity.id);
        self.track_grant(entity.id, rule);
        if let Some(cooldown) = rule.cooldown {
            self.cooldowns.set_cooldown(entity.id, &rule.key, cooldown);
        }
        report.rules_applied += 1;
        trace!(
            rule = %rule.key,
            entity = %entity.id,
            depth,
            statuses = outcome.statuses_applied,
            feedback = outcome.feedback_sent,
            commands = outcome.commands_dispatched + outcome.commands_intercepted,
            "Rule applied"
        );

        for chain in &outcome.fired_chains {
            self.dispatch_chain(host, &rule.key, chain, entity.id, depth, report);
        }
        true
    }

    fn dispatch_chain(
        &mut self,
        host: &mut dyn Host,
        source: &str,
        chain: &ChainEffect,
        entity: EntityId,
        depth: u32,
        report: &mut CycleReport,
    ) {
        match self
            .dispatcher
            .dispatch(entity, source, chain, depth, self.generation)
        {
            ChainAction::Immediate { target, depth } => {
                report.chains_immediate += 1;
                self.reenter(host, entity, &target, depth, report);
            }
            ChainAction::Delayed { delay_ticks, task } => {
                report.chains_scheduled += 1;
                self.scheduler.schedule_once(delay_ticks, task);
            }
            ChainAction::DepthExceeded => {
                report.chains_dropped += 1;
            }
        }
    }

    /// Re-enter the pipeline for `target` against a fresh snapshot of `entity`.
    fn reenter(
        &mut self,
        host: &mut dyn Host,
        entity: EntityId,
        target: &str,
        depth: u32,
        report: &mut CycleReport,
    ) {
        let Some(rule) = self.rules.get(target).cloned() else {
            warn!("{}", EngineError::unresolved("<chain>", ReferenceKind::ChainTarget, target));
            return;
        };
        let Some(snapshot) = host.entity(entity) else {
            debug!("{}", EngineError::StaleEntity(entity));
            return;
        };
        if snapshot.bypass {
            return;
        }
        if !self.rule_allowed_in(&rule, &snapshot.region) {
            return;
        }
        let state = match self.region_state(host, &snapshot.region) {
            Ok(s) => s,
            Err(e) => {
                debug!(entity = %entity, rule = target, "Chain skipped: {}", EngineError::TransientHost(e));
                return;
            }
        };
        self.invoke(host, &rule, &snapshot, &state, depth, report);
    }

    fn fire_chain(&mut self, host: &mut dyn Host, task: ChainTask) {
        if self.state != EngineState::Running {
            debug!(entity = %task.entity, rule = %task.target, state = %self.state, "Chain callback after stop, ignoring");
            return;
        }
        if task.generation != self.generation {
            debug!(
                entity = %task.entity,
                rule = %task.target,
                task_generation = task.generation,
                generation = self.generation,
                "Chain callback from replaced rule set, ignoring"
            );
            return;
        }
        self.totals.chains_delayed_fired += 1;
        let started = Instant::now();
        let mut report = CycleReport::new(self.current_tick(), PassKind::DelayedChain);
        self.reenter(host, task.entity, &task.target, task.depth, &mut report);
        self.finish_pass(report, started);
    }
}
