use futures_util::FutureExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::{EngineConfig, LoadReport, load_rule_directory};
use crate::effects::RuleSet;
use crate::effects::script::ScriptEngine;
use crate::engine::clock::{Clock, ManualClock, SystemClock};
use crate::engine::{EffectManager, EngineTotals};
use crate::host::{EntityId, Host, SimHost};
use crate::server::protocol::OperatorView;
use crate::server::{self, ServerState};

/// Load and validate a rule directory, printing one line per rule.
pub fn check_rules(config: &EngineConfig, dir: Option<&str>) -> Result<(RuleSet, LoadReport), String> {
    let dir = dir.unwrap_or(&config.rule_directory);
    let scripts = ScriptEngine::new();
    let (rules, report) =
        load_rule_directory(Path::new(dir), &scripts).map_err(|e| e.to_string())?;

    println!(
        "{:<28} {:>7} {:>8} {:>8} {:>9}  {}",
        "Rule", "Enabled", "Statuses", "Feedback", "Cooldown", "Chains"
    );
    println!("{}", "-".repeat(80));
    for rule in rules.iter() {
        let chains: Vec<&str> = rule.chains.iter().map(|c| c.target.as_str()).collect();
        let cooldown = rule
            .cooldown
            .map(|d| format!("{}ms", d.as_millis()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<28} {:>7} {:>8} {:>8} {:>9}  {}",
            rule.key,
            if rule.enabled { "yes" } else { "no" },
            rule.statuses.len(),
            rule.feedback.len(),
            cooldown,
            chains.join(", ")
        );
    }

    println!(
        "\n{} rule(s) from {} file(s), {} skipped, {} issue(s)",
        report.loaded,
        report.files,
        report.skipped,
        report.issues.len()
    );
    for issue in &report.issues {
        println!("  ! {}", issue);
    }
    Ok((rules, report))
}

/// Outcome of a headless run.
#[derive(Debug, Clone)]
pub struct SimulationSummary {
    pub ticks: u64,
    pub entities: usize,
    pub weather_changes: usize,
    pub totals: EngineTotals,
}

/// Drive the engine against a seeded in-memory world for `ticks` ticks.
///
/// Time is simulated: the clock advances one tick period per tick, so
/// cooldowns and cache expiry follow world time rather than wall time.
pub fn simulate(config: &EngineConfig, ticks: u64, entities: usize) -> Result<SimulationSummary, String> {
    let seed = config.rng_seed.unwrap_or(0);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut host = SimHost::demo(entities, &mut rng);

    let clock = Arc::new(ManualClock::new(0));
    let mut manager = EffectManager::new(config.clone(), clock.clone());
    let report = manager.load_from_directory().map_err(|e| e.to_string())?;
    info!(rules = report.loaded, issues = report.issues.len(), seed, "Simulation starting");
    manager.start().map_err(|e| e.to_string())?;

    for id in all_entity_ids(&host) {
        manager.on_entity_join(&mut host, id);
    }

    let tick_period = Duration::from_secs_f32(1.0 / config.tick_rate_hz);
    let mut weather_changes = 0;
    for _ in 0..ticks {
        clock.advance(tick_period);
        for (region, weather) in host.step(&mut rng) {
            weather_changes += 1;
            manager.on_weather_change(&mut host, &region, weather);
        }
        manager.on_tick(&mut host);
    }
    manager.stop();

    print_statistics(&manager);
    Ok(SimulationSummary {
        ticks,
        entities: host.entity_count(),
        weather_changes,
        totals: manager.totals(),
    })
}

fn print_statistics(manager: &EffectManager) {
    let stats = manager.statistics();
    println!(
        "{:<28} {:>10} {:>10} {:>8}",
        "Rule", "Triggers", "Applied", "Rate"
    );
    println!("{}", "-".repeat(60));
    for (key, counters) in stats.rules() {
        println!(
            "{:<28} {:>10} {:>10} {:>7.1}%",
            key,
            counters.triggers,
            counters.successes,
            counters.success_rate() * 100.0
        );
    }
    let totals = manager.totals();
    println!(
        "\n{} cycle(s), {} application(s), {} chain(s) immediate, {} delayed, {} dropped at depth limit",
        totals.cycles,
        totals.applications,
        totals.chains_immediate,
        totals.chains_delayed_fired,
        totals.chains_dropped
    );
}

fn all_entity_ids(host: &dyn Host) -> Vec<EntityId> {
    host.regions()
        .iter()
        .flat_map(|r| host.list_entities_in_region(r))
        .map(|e| e.id)
        .collect()
}

/// Poll the shutdown signal once without waiting, for ticks that overran
/// their interval.
fn shutdown_requested<F: Future + Unpin>(signal: &mut F) -> bool {
    signal.now_or_never().is_some()
}

/// Run the engine in real time against the in-memory world, serving the
/// operator surface, until Ctrl-C.
pub async fn run_engine(config: &EngineConfig, entities: usize) -> Result<(), String> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.rng_seed.unwrap_or_else(rand::random));
    let mut host = SimHost::demo(entities, &mut rng);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let mut manager = EffectManager::new(config.clone(), clock);
    let report = manager
        .load_from_directory()
        .map_err(|e| format!("Failed to load rules: {}", e))?;
    info!(
        rules = report.loaded,
        skipped = report.skipped,
        issues = report.issues.len(),
        dir = %config.rule_directory,
        "Rules loaded"
    );
    manager.start().map_err(|e| e.to_string())?;

    let sweeper = manager.cache().spawn_sweeper(config.cache_sweep_interval());

    let state = Arc::new(ServerState::new(OperatorView::capture(&mut manager, &[])));
    let addr: SocketAddr = format!("{}:{}", config.status_bind, config.status_port)
        .parse()
        .map_err(|e| format!("Invalid bind address: {}", e))?;
    let server_state = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = server::start_server(server_state, addr).await {
            warn!("Server error: {}", e);
        }
    });

    for id in all_entity_ids(&host) {
        manager.on_entity_join(&mut host, id);
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let tick_interval = Duration::from_secs_f32(1.0 / config.tick_rate_hz);
    info!(tick_rate_hz = config.tick_rate_hz, %addr, "Engine running");

    loop {
        let tick_start = Instant::now();

        let mut report = None;
        for (region, weather) in host.step(&mut rng) {
            report = manager.on_weather_change(&mut host, &region, weather).or(report);
        }
        if let Some(cycle) = manager.on_tick(&mut host) {
            report = Some(cycle);
        }

        if let Some(cycle) = &report {
            let ids = all_entity_ids(&host);
            state
                .publish(OperatorView::capture(&mut manager, &ids), Some(cycle))
                .await;
            if cycle.tick % 1200 == 0 {
                info!(
                    tick = cycle.tick,
                    applied = manager.totals().applications,
                    cache = manager.cache_size(),
                    "Engine milestone"
                );
            }
        }

        let elapsed = tick_start.elapsed();
        if elapsed < tick_interval {
            tokio::select! {
                _ = tokio::time::sleep(tick_interval - elapsed) => {}
                _ = &mut shutdown => break,
            }
        } else if shutdown_requested(&mut shutdown) {
            break;
        }
    }

    info!("Shutdown signal received");
    manager.stop();
    sweeper.abort();
    state.publish(OperatorView::capture(&mut manager, &[]), None).await;
    info!(tick = manager.current_tick(), "Engine stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const RULES: &str = r#"
        [rules.daylight-speed]
        enabled = true
        description = "Swiftness in daylight"
        potion-effects = [{ type = "SPEED", level = 0, duration = 40 }]
        chain-effects = [{ effect-id = "afterglow", chance = 1.0, delay = 5 }]

        [rules.daylight-speed.conditions]
        min-height = 0

        [rules.afterglow]
        enabled = true
        potion-effects = [{ type = "GLOWING", level = 0, duration = 20 }]
        cooldown-ms = 10000
    "#;

    fn config_for(dir: &TempDir) -> EngineConfig {
        EngineConfig {
            rule_directory: dir.path().to_string_lossy().into_owned(),
            rng_seed: Some(7),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn check_rules_loads_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("default.toml"), RULES).unwrap();
        let (rules, report) = check_rules(&config_for(&dir), None).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(report.loaded, 2);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn check_rules_reports_dangling_chain() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("bad.toml"),
            "[rules.a]\nenabled = true\nchain-effects = [{ effect-id = \"ghost\", chance = 1.0 }]\n",
        )
        .unwrap();
        let (_, report) = check_rules(&config_for(&dir), None).unwrap();
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].to_string().contains("ghost"));
    }

    #[test]
    fn check_rules_missing_directory_fails() {
        let config = EngineConfig::default();
        assert!(check_rules(&config, Some("/nonexistent/rules")).is_err());
    }

    #[test]
    fn simulate_runs_cycles_and_chains() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("default.toml"), RULES).unwrap();
        let summary = simulate(&config_for(&dir), 100, 3).unwrap();

        assert_eq!(summary.ticks, 100);
        assert_eq!(summary.entities, 3);
        assert_eq!(summary.totals.cycles, 5);
        assert!(summary.totals.applications > 0);
        assert!(summary.totals.chains_scheduled > 0);
        assert!(summary.totals.chains_delayed_fired > 0);
    }

    #[test]
    fn overrun_tick_does_not_wait_for_shutdown() {
        let mut idle = std::future::pending::<()>();
        assert!(!shutdown_requested(&mut idle));
        let mut signalled = std::future::ready(());
        assert!(shutdown_requested(&mut signalled));
    }

    #[test]
    fn simulate_is_deterministic_for_a_seed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("default.toml"), RULES).unwrap();
        let a = simulate(&config_for(&dir), 60, 4).unwrap();
        let b = simulate(&config_for(&dir), 60, 4).unwrap();
        assert_eq!(a.totals, b.totals);
        assert_eq!(a.weather_changes, b.weather_changes);
    }
}
