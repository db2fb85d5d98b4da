use crate::host::{EntitySnapshot, RegionId, RegionWeather, StatusKind, WeatherKind, ZoneId};

/// Length of one day cycle in ticks.
pub const DAY_LENGTH: i64 = 24_000;

/// Region-wide state a rule is filtered against before any entity is looked at.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionState {
    pub region: RegionId,
    pub weather: RegionWeather,
    pub time_of_day: i64,
}

/// Time-of-day band. Bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBand {
    /// `[start, end]`. When `start > end` the band wraps past the end of the day.
    Single { start: i64, end: i64 },
    /// `[s1, e1] ∪ [s2, e2]`.
    Split { s1: i64, e1: i64, s2: i64, e2: i64 },
}

impl TimeBand {
    pub fn from_values(values: &[i64]) -> Result<TimeBand, String> {
        match *values {
            [start, end] => Ok(TimeBand::Single { start, end }),
            [s1, e1, s2, e2] => Ok(TimeBand::Split { s1, e1, s2, e2 }),
            _ => Err(format!(
                "time-range needs 2 or 4 values, got {}. Example: time-range = [13000, 23000]",
                values.len()
            )),
        }
    }

    pub fn contains(&self, time: i64) -> bool {
        let t = time.rem_euclid(DAY_LENGTH);
        match *self {
            TimeBand::Single { start, end } if start <= end => (start..=end).contains(&t),
            TimeBand::Single { start, end } => t >= start || t <= end,
            TimeBand::Split { s1, e1, s2, e2 } => (s1..=e1).contains(&t) || (s2..=e2).contains(&t),
        }
    }
}

/// Declarative applicability constraints. Every `None`/empty field is "no constraint".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionSet {
    /// Lowercased zone names.
    pub zones: Vec<String>,
    pub min_altitude: Option<i32>,
    pub max_altitude: Option<i32>,
    pub min_light: Option<u8>,
    pub max_light: Option<u8>,
    pub weather: Vec<WeatherKind>,
    pub time: Option<TimeBand>,
}

impl ConditionSet {
    pub fn is_empty(&self) -> bool {
        *self == ConditionSet::default()
    }

    /// Whether evaluating these conditions requires a zone classification.
    pub fn needs_zone(&self) -> bool {
        !self.zones.is_empty()
    }

    /// Region-wide part: weather then time.
    pub fn matches_region(&self, region: &RegionState) -> bool {
        if !self.weather.is_empty() && !self.weather.contains(&region.weather.kind()) {
            return false;
        }
        match self.time {
            Some(band) => band.contains(region.time_of_day),
            None => true,
        }
    }

    /// Entity-sensitive part: zone, altitude, light.
    ///
    /// A zone constraint with no zone available fails, since the lookup that
    /// should have produced it did not succeed this cycle.
    pub fn matches_entity(&self, entity: &EntitySnapshot, zone: Option<&ZoneId>) -> bool {
        if !self.zones.is_empty() {
            let Some(zone) = zone else {
                return false;
            };
            if !self.zones.iter().any(|z| z.eq_ignore_ascii_case(zone.as_str())) {
                return false;
            }
        }

        let altitude = entity.altitude();
        if self.min_altitude.is_some_and(|min| altitude < min)
            || self.max_altitude.is_some_and(|max| altitude > max)
        {
            return false;
        }

        let light = entity.light_level;
        if self.min_light.is_some_and(|min| light < min)
            || self.max_light.is_some_and(|max| light > max)
        {
            return false;
        }

        true
    }
}

/// Full evaluation in fixed order: zone, altitude, light, weather, time.
/// Short-circuits on the first failing constraint.
pub fn matches(
    conditions: &ConditionSet,
    entity: &EntitySnapshot,
    zone: Option<&ZoneId>,
    region: &RegionState,
) -> bool {
    conditions.matches_entity(entity, zone) && conditions.matches_region(region)
}

/// Gate on a status the entity already carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prerequisite {
    HasStatus {
        kind: StatusKind,
        /// Exact magnitude required; `None` accepts any.
        magnitude: Option<u8>,
    },
}

impl Prerequisite {
    pub fn holds(&self, entity: &EntitySnapshot) -> bool {
        match self {
            Prerequisite::HasStatus { kind, magnitude } => match entity.status(*kind) {
                Some(active) => magnitude.is_none_or(|m| active.magnitude == m),
                None => false,
            },
        }
    }
}
