pub mod sim;

use glam::{DVec3, IVec3};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub use sim::SimHost;

/// Stable identity of an entity. Captured by value wherever work outlives a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityId(pub Uuid);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(EntityId)
    }
}

/// A top-level environment instance with its own weather and time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RegionId(pub String);

impl RegionId {
    pub fn new(name: impl Into<String>) -> Self {
        RegionId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Zone (biome) classification of a position inside a region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ZoneId(pub String);

impl ZoneId {
    pub fn new(name: impl Into<String>) -> Self {
        ZoneId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Region-wide weather flags as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RegionWeather {
    pub precipitation: bool,
    pub electrical_storm: bool,
}

impl RegionWeather {
    pub const CLEAR: RegionWeather = RegionWeather {
        precipitation: false,
        electrical_storm: false,
    };
    pub const RAIN: RegionWeather = RegionWeather {
        precipitation: true,
        electrical_storm: false,
    };
    pub const THUNDER: RegionWeather = RegionWeather {
        precipitation: true,
        electrical_storm: true,
    };

    /// A storm outranks plain precipitation.
    pub fn kind(&self) -> WeatherKind {
        if self.electrical_storm {
            WeatherKind::Thunder
        } else if self.precipitation {
            WeatherKind::Rain
        } else {
            WeatherKind::Clear
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherKind {
    Clear,
    Rain,
    Thunder,
}

impl WeatherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeatherKind::Clear => "clear",
            WeatherKind::Rain => "rain",
            WeatherKind::Thunder => "thunder",
        }
    }

    pub fn parse(s: &str) -> Option<WeatherKind> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clear" | "sun" | "sunny" => Some(WeatherKind::Clear),
            "rain" => Some(WeatherKind::Rain),
            "thunder" | "thunderstorm" | "storm" => Some(WeatherKind::Thunder),
            _ => None,
        }
    }
}

/// Status effect types the host understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    Speed,
    Slowness,
    Haste,
    MiningFatigue,
    Strength,
    InstantHealth,
    InstantDamage,
    JumpBoost,
    Nausea,
    Regeneration,
    Resistance,
    FireResistance,
    WaterBreathing,
    Invisibility,
    Blindness,
    NightVision,
    Hunger,
    Weakness,
    Poison,
    Wither,
    HealthBoost,
    Absorption,
    Saturation,
    Glowing,
    Levitation,
    Luck,
    Unluck,
    SlowFalling,
    ConduitPower,
    DolphinsGrace,
    Darkness,
}

impl StatusKind {
    /// Resolve a configured name. Case-insensitive; legacy aliases accepted.
    pub fn parse(name: &str) -> Option<StatusKind> {
        let normalized = name.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        let kind = match normalized.as_str() {
            "SPEED" => StatusKind::Speed,
            "SLOW" | "SLOWNESS" => StatusKind::Slowness,
            "FAST_DIGGING" | "HASTE" => StatusKind::Haste,
            "SLOW_DIGGING" | "MINING_FATIGUE" => StatusKind::MiningFatigue,
            "INCREASE_DAMAGE" | "STRENGTH" => StatusKind::Strength,
            "HEAL" | "INSTANT_HEALTH" => StatusKind::InstantHealth,
            "HARM" | "INSTANT_DAMAGE" => StatusKind::InstantDamage,
            "JUMP" | "JUMP_BOOST" => StatusKind::JumpBoost,
            "CONFUSION" | "NAUSEA" => StatusKind::Nausea,
            "REGENERATION" => StatusKind::Regeneration,
            "DAMAGE_RESISTANCE" | "RESISTANCE" => StatusKind::Resistance,
            "FIRE_RESISTANCE" => StatusKind::FireResistance,
            "WATER_BREATHING" => StatusKind::WaterBreathing,
            "INVISIBILITY" => StatusKind::Invisibility,
            "BLINDNESS" => StatusKind::Blindness,
            "NIGHT_VISION" => StatusKind::NightVision,
            "HUNGER" => StatusKind::Hunger,
            "WEAKNESS" => StatusKind::Weakness,
            "POISON" => StatusKind::Poison,
            "WITHER" => StatusKind::Wither,
            "HEALTH_BOOST" => StatusKind::HealthBoost,
            "ABSORPTION" => StatusKind::Absorption,
            "SATURATION" => StatusKind::Saturation,
            "GLOWING" => StatusKind::Glowing,
            "LEVITATION" => StatusKind::Levitation,
            "LUCK" => StatusKind::Luck,
            "UNLUCK" | "BAD_LUCK" => StatusKind::Unluck,
            "SLOW_FALLING" => StatusKind::SlowFalling,
            "CONDUIT_POWER" => StatusKind::ConduitPower,
            "DOLPHINS_GRACE" => StatusKind::DolphinsGrace,
            "DARKNESS" => StatusKind::Darkness,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            StatusKind::Speed => "SPEED",
            StatusKind::Slowness => "SLOWNESS",
            StatusKind::Haste => "HASTE",
            StatusKind::MiningFatigue => "MINING_FATIGUE",
            StatusKind::Strength => "STRENGTH",
            StatusKind::InstantHealth => "INSTANT_HEALTH",
            StatusKind::InstantDamage => "INSTANT_DAMAGE",
            StatusKind::JumpBoost => "JUMP_BOOST",
            StatusKind::Nausea => "NAUSEA",
            StatusKind::Regeneration => "REGENERATION",
            StatusKind::Resistance => "RESISTANCE",
            StatusKind::FireResistance => "FIRE_RESISTANCE",
            StatusKind::WaterBreathing => "WATER_BREATHING",
            StatusKind::Invisibility => "INVISIBILITY",
            StatusKind::Blindness => "BLINDNESS",
            StatusKind::NightVision => "NIGHT_VISION",
            StatusKind::Hunger => "HUNGER",
            StatusKind::Weakness => "WEAKNESS",
            StatusKind::Poison => "POISON",
            StatusKind::Wither => "WITHER",
            StatusKind::HealthBoost => "HEALTH_BOOST",
            StatusKind::Absorption => "ABSORPTION",
            StatusKind::Saturation => "SATURATION",
            StatusKind::Glowing => "GLOWING",
            StatusKind::Levitation => "LEVITATION",
            StatusKind::Luck => "LUCK",
            StatusKind::Unluck => "UNLUCK",
            StatusKind::SlowFalling => "SLOW_FALLING",
            StatusKind::ConduitPower => "CONDUIT_POWER",
            StatusKind::DolphinsGrace => "DOLPHINS_GRACE",
            StatusKind::Darkness => "DARKNESS",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A status effect currently carried by an entity, or one about to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusEffect {
    pub kind: StatusKind,
    /// Zero-based amplifier.
    pub magnitude: u8,
    pub duration_ticks: u32,
}

/// Point-in-time view of an entity, as returned by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub name: String,
    pub position: DVec3,
    pub region: RegionId,
    pub health: f64,
    pub food_level: i32,
    /// Light level (0..=15) at the entity's position.
    pub light_level: u8,
    /// Exempt from every environmental effect; anything already granted is withdrawn.
    pub bypass: bool,
    pub status_effects: Vec<StatusEffect>,
}

impl EntitySnapshot {
    /// Coarse (block) position used for drift checks.
    pub fn block_position(&self) -> IVec3 {
        self.position.floor().as_ivec3()
    }

    pub fn altitude(&self) -> i32 {
        self.position.y.floor() as i32
    }

    pub fn status(&self, kind: StatusKind) -> Option<&StatusEffect> {
        self.status_effects.iter().find(|s| s.kind == kind)
    }
}

/// Feedback delivered straight to an entity's client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Feedback {
    Title {
        title: String,
        subtitle: String,
        fade_in: u32,
        stay: u32,
        fade_out: u32,
    },
    ActionBar {
        text: String,
    },
    Sound {
        sound: String,
        volume: f32,
        pitch: f32,
    },
    Chat {
        text: String,
    },
}

impl Feedback {
    pub fn kind(&self) -> FeedbackKind {
        match self {
            Feedback::Title { .. } => FeedbackKind::Title,
            Feedback::ActionBar { .. } => FeedbackKind::ActionBar,
            Feedback::Sound { .. } => FeedbackKind::Sound,
            Feedback::Chat { .. } => FeedbackKind::Chat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedbackKind {
    Title,
    ActionBar,
    Sound,
    Chat,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    #[error("unknown region '{0}'")]
    UnknownRegion(RegionId),
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error("host query failed: {0}")]
    QueryFailed(String),
    #[error("command rejected: {0}")]
    CommandRejected(String),
}

/// Everything the engine needs from the game runtime.
///
/// Queries are assumed cheap and local. Mutations are fire-and-forget except
/// command dispatch, whose rejection is reported so it can be logged.
pub trait Host {
    fn regions(&self) -> Vec<RegionId>;

    fn list_entities_in_region(&self, region: &RegionId) -> Vec<EntitySnapshot>;

    /// Fresh snapshot of a single entity, or `None` if it has left.
    fn entity(&self, id: EntityId) -> Option<EntitySnapshot>;

    fn region_weather(&self, region: &RegionId) -> Result<RegionWeather, HostError>;

    /// Position within the day cycle, 0..24000.
    fn region_time_of_day(&self, region: &RegionId) -> Result<i64, HostError>;

    fn classify_zone(&self, region: &RegionId, position: DVec3) -> Result<ZoneId, HostError>;

    fn apply_status_effect(&mut self, entity: EntityId, effect: StatusEffect);

    fn remove_status_effect(&mut self, entity: EntityId, kind: StatusKind);

    fn dispatch_command(&mut self, command: &str) -> Result<(), HostError>;

    fn send_feedback(&mut self, entity: EntityId, feedback: Feedback);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storm_outranks_precipitation() {
        assert_eq!(RegionWeather::CLEAR.kind(), WeatherKind::Clear);
        assert_eq!(RegionWeather::RAIN.kind(), WeatherKind::Rain);
        assert_eq!(RegionWeather::THUNDER.kind(), WeatherKind::Thunder);
        let odd = RegionWeather {
            precipitation: false,
            electrical_storm: true,
        };
        assert_eq!(odd.kind(), WeatherKind::Thunder);
    }

    #[test]
    fn weather_names_parse_storm_as_thunder() {
        assert_eq!(WeatherKind::parse(" Rain "), Some(WeatherKind::Rain));
        assert_eq!(WeatherKind::parse("storm"), Some(WeatherKind::Thunder));
        assert_eq!(WeatherKind::parse("thunderstorm"), Some(WeatherKind::Thunder));
        assert_eq!(WeatherKind::parse("drizzle"), None);
    }

    #[test]
    fn status_names_resolve_with_aliases() {
        assert_eq!(StatusKind::parse("slow"), Some(StatusKind::Slowness));
        assert_eq!(StatusKind::parse("SLOWNESS"), Some(StatusKind::Slowness));
        assert_eq!(StatusKind::parse("fast_digging"), Some(StatusKind::Haste));
        assert_eq!(StatusKind::parse("night vision"), Some(StatusKind::NightVision));
        assert_eq!(StatusKind::parse("FLYING_PIGS"), None);
    }

    #[test]
    fn block_position_floors_negative_coordinates() {
        let snapshot = EntitySnapshot {
            id: EntityId(Uuid::from_u128(1)),
            name: "steve".into(),
            position: DVec3::new(-0.5, 64.9, 3.2),
            region: RegionId::new("world"),
            health: 20.0,
            food_level: 20,
            light_level: 15,
            bypass: false,
            status_effects: vec![],
        };
        assert_eq!(snapshot.block_position(), IVec3::new(-1, 64, 3));
        assert_eq!(snapshot.altitude(), 64);
    }
}
