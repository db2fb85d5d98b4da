use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_tick_rate")]
    pub tick_rate_hz: f32,
    #[serde(default = "default_update_interval")]
    pub update_interval: u32,
    #[serde(default = "default_rule_directory")]
    pub rule_directory: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    #[serde(default = "default_cache_max_drift")]
    pub cache_max_drift: i32,
    #[serde(default = "default_cache_sweep_interval_ms")]
    pub cache_sweep_interval_ms: u64,
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: u32,
    #[serde(default)]
    pub rng_seed: Option<u64>,
    #[serde(default = "default_status_port")]
    pub status_port: u16,
    #[serde(default = "default_status_bind")]
    pub status_bind: String,
    #[serde(default)]
    pub regions: BTreeMap<String, RegionSettings>,
}

/// Per-region overrides.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct RegionSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub disabled_rules: Vec<String>,
}

impl Default for RegionSettings {
    fn default() -> Self {
        RegionSettings {
            enabled: true,
            disabled_rules: Vec::new(),
        }
    }
}

fn default_tick_rate() -> f32 {
    20.0
}
fn default_update_interval() -> u32 {
    20
}
fn default_rule_directory() -> String {
    "./rules".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_cache_ttl_ms() -> u64 {
    5000
}
fn default_cache_max_drift() -> i32 {
    4
}
fn default_cache_sweep_interval_ms() -> u64 {
    60_000
}
fn default_max_chain_depth() -> u32 {
    8
}
fn default_status_port() -> u16 {
    8119
}
fn default_status_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tick_rate_hz: default_tick_rate(),
            update_interval: default_update_interval(),
            rule_directory: default_rule_directory(),
            log_level: default_log_level(),
            cache_ttl_ms: default_cache_ttl_ms(),
            cache_max_drift: default_cache_max_drift(),
            cache_sweep_interval_ms: default_cache_sweep_interval_ms(),
            max_chain_depth: default_max_chain_depth(),
            rng_seed: None,
            status_port: default_status_port(),
            status_bind: default_status_bind(),
            regions: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
        Self::from_toml_str(&content, path)
    }

    pub fn from_toml_str(content: &str, source_path: &Path) -> Result<Self, String> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| format!("{}: {}", source_path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sweep_interval_ms)
    }

    /// Settings for `region`, falling back to defaults.
    pub fn region(&self, region: &str) -> RegionSettings {
        self.regions.get(region).cloned().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut errors = Vec::new();

        if self.tick_rate_hz <= 0.0 {
            errors.push(format!(
                "tick_rate_hz must be > 0.0, got {}. Example: tick_rate_hz = 20.0",
                self.tick_rate_hz
            ));
        }

        if self.update_interval == 0 {
            errors.push(format!(
                "update_interval must be > 0, got {}. Example: update_interval = 20",
                self.update_interval
            ));
        }

        if self.cache_ttl_ms == 0 {
            errors.push(format!(
                "cache_ttl_ms must be > 0, got {}. Example: cache_ttl_ms = 5000",
                self.cache_ttl_ms
            ));
        }

        if self.cache_max_drift < 0 {
            errors.push(format!(
                "cache_max_drift must be >= 0, got {}. Example: cache_max_drift = 4",
                self.cache_max_drift
            ));
        }

        if self.cache_sweep_interval_ms < self.cache_ttl_ms {
            errors.push(format!(
                "cache_sweep_interval_ms must be >= cache_ttl_ms ({}), got {}. Example: cache_sweep_interval_ms = 60000",
                self.cache_ttl_ms, self.cache_sweep_interval_ms
            ));
        }

        if !(1..=64).contains(&self.max_chain_depth) {
            errors.push(format!(
                "max_chain_depth must be 1-64, got {}. Example: max_chain_depth = 8",
                self.max_chain_depth
            ));
        }

        if !(1024..=65535).contains(&self.status_port) {
            errors.push(format!(
                "status_port must be 1024-65535, got {}. Example: status_port = 8119",
                self.status_port
            ));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            errors.push(format!(
                "log_level must be one of {:?}, got '{}'. Example: log_level = \"info\"",
                valid_levels, self.log_level
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("\n"))
        }
    }
}
