use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::effects::chain::ChainEffect;
use crate::effects::condition::{ConditionSet, Prerequisite, TimeBand};
use crate::effects::param::{Chance, FloatParam, IntParam, RawFloat, RawInt};
use crate::effects::rule::{
    CommandPool, EffectRule, FeedbackDirective, FeedbackSpec, RandomPool, StatusSpec,
};
use crate::effects::script::ScriptEngine;
use crate::effects::template::{DEFAULT_FADE_IN, DEFAULT_FADE_OUT, DEFAULT_STAY};
use crate::effects::RuleSet;
use crate::error::{EngineError, ReferenceKind};
use crate::host::{StatusKind, WeatherKind};

const DEFAULT_LEVEL: i64 = 0;
const DEFAULT_DURATION: i64 = 100;

// ---------------------------------------------------------------------------
// File schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct RawRule {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub conditions: Option<RawConditions>,
    #[serde(default)]
    pub predicate: Option<String>,
    #[serde(default)]
    pub cooldown_ms: Option<u64>,
    #[serde(default, alias = "status-effects")]
    pub potion_effects: Option<RawStatusList>,
    #[serde(default)]
    pub random_effects: Option<RawRandomPool>,
    #[serde(default)]
    pub commands: Option<RawCommandPool>,
    #[serde(default)]
    pub title: Option<RawTitle>,
    #[serde(default)]
    pub action_bar: Option<RawText>,
    #[serde(default)]
    pub sound: Option<RawSound>,
    #[serde(default, alias = "chat")]
    pub message: Option<RawText>,
    #[serde(default)]
    pub chain_effects: Option<RawChainList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct RawConditions {
    #[serde(default, alias = "zones")]
    pub biomes: Vec<String>,
    #[serde(default, alias = "min-altitude")]
    pub min_height: Option<i32>,
    #[serde(default, alias = "max-altitude")]
    pub max_height: Option<i32>,
    #[serde(default)]
    pub min_light: Option<u8>,
    #[serde(default)]
    pub max_light: Option<u8>,
    #[serde(default, alias = "weather")]
    pub weather_types: Vec<String>,
    #[serde(default)]
    pub time_range: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStatus {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub level: Option<RawInt>,
    #[serde(default)]
    pub duration: Option<RawInt>,
}

/// `potion-effects` in any of its accepted shapes.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawStatusList {
    List(Vec<RawStatus>),
    Wrapped { effects: Vec<RawStatus> },
    Keyed(BTreeMap<String, RawStatus>),
}

impl RawStatusList {
    fn entries(&self) -> Vec<(String, &RawStatus)> {
        match self {
            RawStatusList::List(list) | RawStatusList::Wrapped { effects: list } => list
                .iter()
                .enumerate()
                .map(|(i, s)| (format!("#{}", i), s))
                .collect(),
            RawStatusList::Keyed(map) => map.iter().map(|(k, s)| (k.clone(), s)).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPrerequisite {
    #[serde(rename = "type", default = "default_prerequisite_type")]
    pub kind: String,
    pub effect_type: String,
    #[serde(default)]
    pub level: Option<u8>,
}

fn default_prerequisite_type() -> String {
    "has_potion_effect".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRandomPool {
    #[serde(default)]
    pub chance: f64,
    #[serde(default)]
    pub prerequisites: Option<RawPrerequisite>,
    #[serde(default)]
    pub effects: Vec<RawStatus>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCommandPool {
    #[serde(default)]
    pub chance: f64,
    #[serde(default)]
    pub list: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct RawTitle {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default = "default_fade_in", alias = "fadeIn")]
    pub fade_in: u32,
    #[serde(default = "default_stay")]
    pub stay: u32,
    #[serde(default = "default_fade_out", alias = "fadeOut")]
    pub fade_out: u32,
    #[serde(default = "default_chance")]
    pub chance: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawText {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default = "default_chance")]
    pub chance: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSound {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub resource: String,
    #[serde(default)]
    pub volume: Option<RawFloat>,
    #[serde(default)]
    pub pitch: Option<RawFloat>,
    #[serde(default = "default_chance")]
    pub chance: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct RawChain {
    #[serde(default)]
    pub chance: f64,
    pub effect_id: String,
    #[serde(default)]
    pub delay: u32,
    #[serde(default)]
    pub conditions: Option<RawPrerequisite>,
}

/// `chain-effects` as a list or as keyed sections.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawChainList {
    List(Vec<RawChain>),
    Keyed(BTreeMap<String, RawChain>),
}

impl RawChainList {
    fn entries(&self) -> Vec<&RawChain> {
        match self {
            RawChainList::List(list) => list.iter().collect(),
            RawChainList::Keyed(map) => map.values().collect(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_chance() -> f64 {
    1.0
}
fn default_fade_in() -> u32 {
    DEFAULT_FADE_IN
}
fn default_stay() -> u32 {
    DEFAULT_STAY
}
fn default_fade_out() -> u32 {
    DEFAULT_FADE_OUT
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// What a load produced besides the rules themselves.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub files: usize,
    pub loaded: usize,
    pub skipped: usize,
    /// Every problem found, in discovery order. Each has already been logged.
    pub issues: Vec<EngineError>,
}

impl LoadReport {
    fn issue(&mut self, error: EngineError) {
        warn!("{}", error);
        self.issues.push(error);
    }
}

/// Load every `*.toml` file in `dir`, in filename order.
pub fn load_rule_directory(
    dir: &Path,
    scripts: &ScriptEngine,
) -> Result<(RuleSet, LoadReport), EngineError> {
    let read_dir = std::fs::read_dir(dir).map_err(|e| EngineError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut paths: Vec<PathBuf> = read_dir
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    let mut report = LoadReport::default();
    let mut rules = Vec::new();
    for path in &paths {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                report.issue(EngineError::Io {
                    path: path.clone(),
                    source: e,
                });
                continue;
            }
        };
        report.files += 1;
        rules.extend(parse_rules(&content, &path.display().to_string(), scripts, &mut report));
    }

    let set = finish(rules, &mut report);
    info!(
        directory = %dir.display(),
        files = report.files,
        rules = set.len(),
        skipped = report.skipped,
        "Rules loaded"
    );
    Ok((set, report))
}

/// Parse rules from a single document.
pub fn load_rule_str(
    content: &str,
    source: &str,
    scripts: &ScriptEngine,
) -> (RuleSet, LoadReport) {
    let mut report = LoadReport {
        files: 1,
        ..Default::default()
    };
    let rules = parse_rules(content, source, scripts, &mut report);
    let set = finish(rules, &mut report);
    (set, report)
}

fn finish(rules: Vec<EffectRule>, report: &mut LoadReport) -> RuleSet {
    let set = RuleSet::new(rules);
    for (source, target) in set.unresolved_chains() {
        report.issue(EngineError::unresolved(&source, ReferenceKind::ChainTarget, &target));
    }
    set
}

fn parse_rules(
    content: &str,
    source: &str,
    scripts: &ScriptEngine,
    report: &mut LoadReport,
) -> Vec<EffectRule> {
    let table = match content.parse::<toml::Table>() {
        Ok(t) => t,
        Err(e) => {
            report.issue(EngineError::config(source, e.to_string()));
            return Vec::new();
        }
    };

    for key in table.keys().filter(|k| k.as_str() != "rules") {
        report.issue(EngineError::config(
            source,
            format!("unknown top-level key '{}', rules go under [rules.<name>]", key),
        ));
    }

    let Some(rules) = table.get("rules") else {
        debug!(source, "No [rules] table");
        return Vec::new();
    };
    let Some(rules) = rules.as_table() else {
        report.issue(EngineError::config(source, "'rules' must be a table"));
        return Vec::new();
    };

    let mut built = Vec::new();
    for (key, value) in rules {
        let location = format!("{} [rules.{}]", source, key);
        let raw: RawRule = match value.clone().try_into() {
            Ok(raw) => raw,
            Err(e) => {
                report.skipped += 1;
                report.issue(EngineError::config(location, e.to_string()));
                continue;
            }
        };
        match build_rule(key, raw, scripts, report) {
            Ok(rule) => {
                report.loaded += 1;
                built.push(rule);
            }
            Err(reason) => {
                report.skipped += 1;
                report.issue(EngineError::config(location, reason));
            }
        }
    }
    built
}

/// Validate one raw block into a rule.
///
/// Structural problems reject the whole rule. Unresolvable names only drop the
/// consequence that used them and are recorded in `report`.
pub fn build_rule(
    key: &str,
    raw: RawRule,
    scripts: &ScriptEngine,
    report: &mut LoadReport,
) -> Result<EffectRule, String> {
    let mut rule = EffectRule::new(key);
    rule.enabled = raw.enabled;
    rule.description = raw.description;
    rule.conditions = build_conditions(raw.conditions.unwrap_or_default())?;
    rule.cooldown = raw.cooldown_ms.filter(|ms| *ms > 0).map(Duration::from_millis);

    if let Some(source) = raw.predicate.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        rule.predicate = Some(Arc::new(scripts.compile(key, source)?));
    }

    if let Some(list) = &raw.potion_effects {
        for (label, status) in list.entries() {
            if let Some(spec) = build_status(key, &label, status, report) {
                rule.statuses.push(spec);
            }
        }
    }

    if let Some(pool) = &raw.random_effects {
        let candidates: Vec<StatusSpec> = pool
            .effects
            .iter()
            .enumerate()
            .filter_map(|(i, s)| build_status(key, &format!("random #{}", i), s, report))
            .collect();
        if !candidates.is_empty() {
            rule.random = Some(RandomPool {
                chance: Chance::new(pool.chance),
                prerequisite: pool
                    .prerequisites
                    .as_ref()
                    .and_then(|p| build_prerequisite(key, p, report)),
                candidates,
            });
        }
    }

    if let Some(pool) = &raw.commands {
        if !pool.list.is_empty() {
            rule.commands = Some(CommandPool {
                chance: Chance::new(pool.chance),
                commands: pool.list.clone(),
            });
        }
    }

    if let Some(t) = &raw.title {
        let prefix = color_prefix(key, t.color.as_deref(), report);
        rule.feedback.push(FeedbackDirective {
            enabled: t.enabled,
            chance: Chance::new(t.chance),
            spec: FeedbackSpec::Title {
                title: format!("{}{}", prefix, t.text),
                subtitle: t.subtitle.clone(),
                fade_in: t.fade_in,
                stay: t.stay,
                fade_out: t.fade_out,
            },
        });
    }
    if let Some(a) = &raw.action_bar {
        let prefix = color_prefix(key, a.color.as_deref(), report);
        rule.feedback.push(FeedbackDirective {
            enabled: a.enabled,
            chance: Chance::new(a.chance),
            spec: FeedbackSpec::ActionBar {
                text: format!("{}{}", prefix, a.text),
            },
        });
    }
    if let Some(s) = &raw.sound {
        let float = |p: &Option<RawFloat>, name: &str| -> Result<FloatParam, String> {
            match p {
                Some(raw) => FloatParam::try_from(raw).map_err(|e| format!("sound {}: {}", name, e)),
                None => Ok(FloatParam::Fixed(1.0)),
            }
        };
        rule.feedback.push(FeedbackDirective {
            enabled: s.enabled,
            chance: Chance::new(s.chance),
            spec: FeedbackSpec::Sound {
                resource: s.resource.clone(),
                volume: float(&s.volume, "volume")?,
                pitch: float(&s.pitch, "pitch")?,
            },
        });
    }
    if let Some(m) = &raw.message {
        let prefix = color_prefix(key, m.color.as_deref(), report);
        rule.feedback.push(FeedbackDirective {
            enabled: m.enabled,
            chance: Chance::new(m.chance),
            spec: FeedbackSpec::Chat {
                text: format!("{}{}", prefix, m.text),
            },
        });
    }

    if let Some(chains) = &raw.chain_effects {
        for chain in chains.entries() {
            let target = chain.effect_id.trim();
            if target.is_empty() {
                return Err("chain-effects entry has an empty effect-id".to_string());
            }
            rule.chains.push(ChainEffect {
                chance: Chance::new(chain.chance),
                target: target.to_string(),
                delay_ticks: chain.delay,
                condition: chain
                    .conditions
                    .as_ref()
                    .and_then(|p| build_prerequisite(key, p, report)),
            });
        }
    }

    Ok(rule)
}

fn build_conditions(raw: RawConditions) -> Result<ConditionSet, String> {
    let mut weather = Vec::with_capacity(raw.weather_types.len());
    for name in &raw.weather_types {
        match WeatherKind::parse(name) {
            Some(kind) if !weather.contains(&kind) => weather.push(kind),
            Some(_) => {}
            None => {
                return Err(format!(
                    "unknown weather type '{}'. Example: weather-types = [\"rain\", \"thunder\"]",
                    name
                ));
            }
        }
    }

    if let (Some(min), Some(max)) = (raw.min_height, raw.max_height) {
        if min > max {
            return Err(format!("min-height {} is above max-height {}", min, max));
        }
    }
    if let (Some(min), Some(max)) = (raw.min_light, raw.max_light) {
        if min > max {
            return Err(format!("min-light {} is above max-light {}", min, max));
        }
    }

    let time = raw
        .time_range
        .as_deref()
        .map(TimeBand::from_values)
        .transpose()?;

    Ok(ConditionSet {
        zones: raw.biomes.iter().map(|b| b.trim().to_ascii_lowercase()).collect(),
        min_altitude: raw.min_height,
        max_altitude: raw.max_height,
        min_light: raw.min_light,
        max_light: raw.max_light,
        weather,
        time,
    })
}

fn build_status(
    rule: &str,
    label: &str,
    raw: &RawStatus,
    report: &mut LoadReport,
) -> Option<StatusSpec> {
    let Some(kind) = StatusKind::parse(&raw.kind) else {
        report.issue(EngineError::unresolved(rule, ReferenceKind::StatusEffect, &raw.kind));
        return None;
    };
    let param = |value: &Option<RawInt>, default: i64, field: &str| match value {
        Some(v) => IntParam::try_from(v).map_err(|e| format!("{} {}: {}", label, field, e)),
        None => Ok(IntParam::Fixed(default)),
    };
    match (
        param(&raw.level, DEFAULT_LEVEL, "level"),
        param(&raw.duration, DEFAULT_DURATION, "duration"),
    ) {
        (Ok(magnitude), Ok(duration)) => Some(StatusSpec {
            kind,
            magnitude,
            duration,
        }),
        (Err(e), _) | (_, Err(e)) => {
            report.issue(EngineError::config(format!("rule '{}'", rule), e));
            None
        }
    }
}

fn build_prerequisite(
    rule: &str,
    raw: &RawPrerequisite,
    report: &mut LoadReport,
) -> Option<Prerequisite> {
    match raw.kind.as_str() {
        "has_potion_effect" | "has_status" => {}
        other => {
            report.issue(EngineError::config(
                format!("rule '{}'", rule),
                format!("unknown prerequisite type '{}', ignoring it", other),
            ));
            return None;
        }
    }
    match StatusKind::parse(&raw.effect_type) {
        Some(kind) => Some(Prerequisite::HasStatus {
            kind,
            magnitude: raw.level,
        }),
        None => {
            report.issue(EngineError::unresolved(
                rule,
                ReferenceKind::StatusEffect,
                &raw.effect_type,
            ));
            None
        }
    }
}

/// Legacy formatting code for a named chat color.
fn color_prefix(rule: &str, color: Option<&str>, report: &mut LoadReport) -> &'static str {
    let Some(name) = color else {
        return "";
    };
    let code = match name.trim().to_ascii_lowercase().as_str() {
        "black" => "§0",
        "dark_blue" => "§1",
        "dark_green" => "§2",
        "dark_aqua" => "§3",
        "dark_red" => "§4",
        "dark_purple" => "§5",
        "gold" => "§6",
        "gray" | "grey" => "§7",
        "dark_gray" | "dark_grey" => "§8",
        "blue" => "§9",
        "green" => "§a",
        "aqua" => "§b",
        "red" => "§c",
        "light_purple" => "§d",
        "yellow" => "§e",
        "white" => "",
        other => {
            report.issue(EngineError::config(
                format!("rule '{}'", rule),
                format!("unknown color '{}', using default", other),
            ));
            ""
        }
    };
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::condition::TimeBand;
    use rand::SeedableRng;
    use std::io::Write;
    use tempfile::TempDir;

    fn load(content: &str) -> (RuleSet, LoadReport) {
        load_rule_str(content, "test.toml", &ScriptEngine::new())
    }

    const FULL_RULE: &str = r#"
        [rules.rain-rule]
        enabled = true
        description = "Rain slows you down"
        cooldown-ms = 2000
        predicate = "entity.health > 1.0"

        [rules.rain-rule.conditions]
        biomes = ["Plains", "forest"]
        min-height = 0
        max-height = 100
        min-light = 0
        max-light = 10
        weather-types = ["rain"]
        time-range = [0, 1000, 13000, 24000]

        [[rules.rain-rule.potion-effects]]
        type = "SLOW"
        level = 0
        duration = 100

        [[rules.rain-rule.potion-effects]]
        type = "WEAKNESS"
        level = [0, 1]
        duration = "20 * 5"

        [rules.rain-rule.random-effects]
        chance = 0.3
        prerequisites = { type = "has_potion_effect", effect_type = "SLOW", level = 0 }
        effects = [{ type = "BLINDNESS", level = 0, duration = [40, 80] }]

        [rules.rain-rule.commands]
        chance = 0.1
        list = ["say %player% is soaked"]

        [rules.rain-rule.title]
        text = "Rain"
        subtitle = "Take cover"
        color = "aqua"
        fadeIn = 5

        [rules.rain-rule.action-bar]
        text = "Wet"
        chance = 0.5

        [rules.rain-rule.sound]
        resource = "weather.rain"
        volume = [0.5, 1.0]

        [rules.rain-rule.message]
        text = "You are wet"
        enabled = false

        [[rules.rain-rule.chain-effects]]
        chance = 0.2
        effect-id = "lightning"
        delay = 40
        conditions = { effect_type = "SLOW" }

        [rules.lightning]
        enabled = true
    "#;

    #[test]
    fn full_rule_parses_every_section() {
        let (set, report) = load(FULL_RULE);
        assert!(report.issues.is_empty(), "issues: {:?}", report.issues);
        assert_eq!(report.loaded, 2);

        let rule = set.get("rain-rule").unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.cooldown, Some(Duration::from_millis(2000)));
        assert!(rule.predicate.is_some());
        assert_eq!(rule.conditions.zones, vec!["plains", "forest"]);
        assert_eq!(rule.conditions.weather, vec![WeatherKind::Rain]);
        assert_eq!(
            rule.conditions.time,
            Some(TimeBand::Split {
                s1: 0,
                e1: 1000,
                s2: 13000,
                e2: 24000
            })
        );

        assert_eq!(rule.statuses.len(), 2);
        assert_eq!(rule.statuses[0], StatusSpec::fixed(StatusKind::Slowness, 0, 100));
        assert_eq!(rule.statuses[1].magnitude, IntParam::Range { min: 0, max: 1 });
        assert_eq!(rule.statuses[1].duration, IntParam::Fixed(100));

        let random = rule.random.as_ref().unwrap();
        assert_eq!(random.chance, Chance::new(0.3));
        assert_eq!(
            random.prerequisite,
            Some(Prerequisite::HasStatus {
                kind: StatusKind::Slowness,
                magnitude: Some(0)
            })
        );

        assert_eq!(rule.commands.as_ref().unwrap().commands.len(), 1);
        assert_eq!(rule.feedback.len(), 4);
        match &rule.feedback[0].spec {
            FeedbackSpec::Title { title, fade_in, stay, .. } => {
                assert_eq!(title, "§bRain");
                assert_eq!(*fade_in, 5);
                assert_eq!(*stay, DEFAULT_STAY);
            }
            other => panic!("expected title, got {:?}", other),
        }
        assert!(!rule.feedback[3].enabled);

        assert_eq!(
            rule.chains,
            vec![ChainEffect {
                chance: Chance::new(0.2),
                target: "lightning".into(),
                delay_ticks: 40,
                condition: Some(Prerequisite::HasStatus {
                    kind: StatusKind::Slowness,
                    magnitude: None
                }),
            }]
        );
    }

    #[test]
    fn keyed_forms_are_accepted() {
        let (set, report) = load(
            r#"
            [rules.a]
            enabled = true
            [rules.a.potion-effects.slow]
            type = "SLOWNESS"
            [rules.a.potion-effects.dark]
            type = "DARKNESS"
            duration = 20
            [rules.a.chain-effects.first]
            chance = 1.0
            effect-id = "a"

            [rules.b]
            enabled = true
            potion-effects = { effects = [{ type = "SPEED", level = 1 }] }
            "#,
        );
        assert!(report.issues.is_empty(), "issues: {:?}", report.issues);
        let a = set.get("a").unwrap();
        assert_eq!(a.statuses.len(), 2);
        assert_eq!(a.chains.len(), 1);
        let b = set.get("b").unwrap();
        assert_eq!(b.statuses, vec![StatusSpec::fixed(StatusKind::Speed, 1, DEFAULT_DURATION)]);
    }

    #[test]
    fn malformed_block_is_skipped_and_others_load() {
        let (set, report) = load(
            r#"
            [rules.good]
            enabled = true

            [rules.typo]
            enabeld = true

            [rules.bad-weather]
            enabled = true
            conditions = { weather-types = ["snow"] }

            [rules.bad-time]
            conditions = { time-range = [1, 2, 3] }

            [rules.bad-script]
            predicate = "entity.y >"
            "#,
        );
        assert_eq!(set.len(), 1);
        assert!(set.contains("good"));
        assert_eq!(report.skipped, 4);
        assert_eq!(report.issues.len(), 4);
    }

    #[test]
    fn unknown_status_skips_only_that_effect() {
        let (set, report) = load(
            r#"
            [rules.r]
            enabled = true
            potion-effects = [{ type = "FLYING" }, { type = "SPEED", level = "nope" }, { type = "GLOWING" }]
            "#,
        );
        let rule = set.get("r").unwrap();
        assert_eq!(rule.statuses, vec![StatusSpec::fixed(StatusKind::Glowing, 0, 100)]);
        assert!(matches!(
            report.issues[0],
            EngineError::UnresolvedReference {
                kind: ReferenceKind::StatusEffect,
                ..
            }
        ));
        assert_eq!(report.issues.len(), 2);
    }

    #[test]
    fn probabilities_are_clamped_and_enabled_defaults_off() {
        let (set, _) = load(
            r#"
            [rules.r]
            commands = { chance = 3.5, list = ["say hi"] }
            chain-effects = [{ chance = -1.0, effect-id = "r" }]
            "#,
        );
        let rule = set.get("r").unwrap();
        assert!(!rule.enabled);
        assert_eq!(rule.commands.as_ref().unwrap().chance, Chance::ALWAYS);
        assert_eq!(rule.chains[0].chance, Chance::NEVER);
    }

    #[test]
    fn unresolved_chain_targets_are_reported() {
        let (set, report) = load(
            r#"
            [rules.r]
            enabled = true
            chain-effects = [{ chance = 1.0, effect-id = "missing" }]
            "#,
        );
        assert_eq!(set.len(), 1);
        assert!(matches!(
            &report.issues[0],
            EngineError::UnresolvedReference { kind: ReferenceKind::ChainTarget, name, .. } if name == "missing"
        ));
    }

    #[test]
    fn unknown_prerequisite_effect_leaves_pool_ungated() {
        let (set, report) = load(
            r#"
            [rules.r]
            enabled = true
            random-effects = { chance = 1.0, prerequisites = { effect_type = "MYSTERY" }, effects = [{ type = "SPEED" }] }
            "#,
        );
        let pool = set.get("r").unwrap().random.clone().unwrap();
        assert_eq!(pool.prerequisite, None);
        assert_eq!(report.issues.len(), 1);
        assert!(matches!(
            &report.issues[0],
            EngineError::UnresolvedReference { kind: ReferenceKind::StatusEffect, name, .. } if name == "MYSTERY"
        ));

        let mut host = crate::host::SimHost::new();
        host.add_region("world", crate::host::RegionWeather::CLEAR, 0);
        let entity = host.spawn_entity(
            crate::host::EntityId(uuid::Uuid::from_u128(1)),
            "Steve",
            "world",
            glam::DVec3::new(0.0, 64.0, 0.0),
        );
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);
        let outcome = set.get("r").unwrap().apply(&entity, &mut host, &mut rng);
        assert!(outcome.random_fired);
    }

    #[test]
    fn directory_loads_in_filename_order_later_wins() {
        let dir = TempDir::new().unwrap();
        let write = |name: &str, body: &str| {
            let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
            f.write_all(body.as_bytes()).unwrap();
        };
        write("10-base.toml", "[rules.a]\nenabled = true\ndescription = \"base\"\n");
        write("20-override.toml", "[rules.a]\nenabled = true\ndescription = \"override\"\n");
        write("notes.txt", "not a rule file");
        write("30-broken.toml", "[rules.b\n");

        let (set, report) = load_rule_directory(dir.path(), &ScriptEngine::new()).unwrap();
        assert_eq!(report.files, 3);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("a").unwrap().description, "override");
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let err = load_rule_directory(Path::new("/nonexistent/rules"), &ScriptEngine::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
        assert!(err.to_string().contains("cannot read"));
    }

    #[test]
    fn shipped_rule_file_loads_cleanly() {
        let (set, report) = load(include_str!("../../rules/default.toml"));
        assert!(report.issues.is_empty(), "issues: {:?}", report.issues);
        assert_eq!(set.len(), 6);
        assert!(set.unresolved_chains().is_empty());
        assert!(set.get("thunderstruck").unwrap().predicate.is_some());
    }
}
