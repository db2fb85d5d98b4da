pub mod engine;
pub mod rules;

pub use engine::{EngineConfig, RegionSettings};
pub use rules::{LoadReport, load_rule_directory, load_rule_str};
