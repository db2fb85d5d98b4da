use glam::DVec3;
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use crate::effects::condition::DAY_LENGTH;
use crate::host::{
    EntityId, EntitySnapshot, Feedback, Host, HostError, RegionId, RegionWeather, StatusEffect,
    StatusKind, ZoneId,
};

#[derive(Debug, Clone)]
struct SimRegion {
    weather: RegionWeather,
    time_of_day: i64,
    /// `(max_x, zone)` bands in ascending order; the last band catches the rest.
    zone_bands: Vec<(f64, ZoneId)>,
}

/// In-memory host. Keeps a small world and records every call the engine makes.
#[derive(Debug, Default)]
pub struct SimHost {
    regions: BTreeMap<RegionId, SimRegion>,
    entities: BTreeMap<EntityId, EntitySnapshot>,
    applied: Vec<(EntityId, StatusEffect)>,
    removed: Vec<(EntityId, StatusKind)>,
    commands: Vec<String>,
    feedback: Vec<(EntityId, Feedback)>,
    classify_calls: AtomicUsize,
    rejected_commands: Vec<String>,
    failing_regions: HashSet<RegionId>,
}

impl SimHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// A two-region world with `entity_count` wandering entities in the overworld.
    pub fn demo<R: Rng + ?Sized>(entity_count: usize, rng: &mut R) -> Self {
        let mut host = SimHost::new();
        host.add_region("world", RegionWeather::CLEAR, 0);
        host.set_zone_bands(
            "world",
            vec![
                (-200.0, ZoneId::new("desert")),
                (200.0, ZoneId::new("plains")),
                (f64::MAX, ZoneId::new("swamp")),
            ],
        );
        host.add_region("world_nether", RegionWeather::CLEAR, 18_000);
        host.set_zone_bands("world_nether", vec![(f64::MAX, ZoneId::new("nether_wastes"))]);

        for i in 0..entity_count {
            let position = DVec3::new(
                rng.gen_range(-400.0..400.0),
                rng.gen_range(40.0..110.0),
                rng.gen_range(-400.0..400.0),
            );
            host.spawn_entity(
                EntityId(Uuid::from_u128(rng.r#gen::<u128>())),
                &format!("player{}", i + 1),
                "world",
                position,
            );
        }
        host
    }

    pub fn add_region(&mut self, name: &str, weather: RegionWeather, time_of_day: i64) {
        self.regions.insert(
            RegionId::new(name),
            SimRegion {
                weather,
                time_of_day,
                zone_bands: vec![(f64::MAX, ZoneId::new("plains"))],
            },
        );
    }

    pub fn set_zone_bands(&mut self, region: &str, bands: Vec<(f64, ZoneId)>) {
        if let Some(r) = self.regions.get_mut(&RegionId::new(region)) {
            r.zone_bands = bands;
        }
    }

    /// Add an entity with full health and food and return its snapshot.
    pub fn spawn_entity(
        &mut self,
        id: EntityId,
        name: &str,
        region: &str,
        position: DVec3,
    ) -> EntitySnapshot {
        let snapshot = EntitySnapshot {
            id,
            name: name.to_string(),
            position,
            region: RegionId::new(region),
            health: 20.0,
            food_level: 20,
            light_level: light_at(position),
            bypass: false,
            status_effects: Vec::new(),
        };
        self.entities.insert(id, snapshot.clone());
        snapshot
    }

    pub fn despawn_entity(&mut self, id: EntityId) -> Option<EntitySnapshot> {
        self.entities.remove(&id)
    }

    pub fn move_entity(&mut self, id: EntityId, position: DVec3) {
        if let Some(e) = self.entities.get_mut(&id) {
            e.position = position;
            e.light_level = light_at(position);
        }
    }

    pub fn set_light(&mut self, id: EntityId, light: u8) {
        if let Some(e) = self.entities.get_mut(&id) {
            e.light_level = light;
        }
    }

    pub fn set_bypass(&mut self, id: EntityId, bypass: bool) {
        if let Some(e) = self.entities.get_mut(&id) {
            e.bypass = bypass;
        }
    }

    pub fn transfer_entity(&mut self, id: EntityId, region: &str) {
        if let Some(e) = self.entities.get_mut(&id) {
            e.region = RegionId::new(region);
        }
    }

    pub fn set_weather(&mut self, region: &str, weather: RegionWeather) {
        if let Some(r) = self.regions.get_mut(&RegionId::new(region)) {
            r.weather = weather;
        }
    }

    pub fn set_time(&mut self, region: &str, time_of_day: i64) {
        if let Some(r) = self.regions.get_mut(&RegionId::new(region)) {
            r.time_of_day = time_of_day.rem_euclid(DAY_LENGTH);
        }
    }

    /// Make weather queries for `region` fail until cleared.
    pub fn fail_region_queries(&mut self, region: &str, failing: bool) {
        let id = RegionId::new(region);
        if failing {
            self.failing_regions.insert(id);
        } else {
            self.failing_regions.remove(&id);
        }
    }

    /// Reject any dispatched command containing `needle`.
    pub fn reject_commands_containing(&mut self, needle: &str) {
        self.rejected_commands.push(needle.to_string());
    }

    pub fn applied(&self) -> &[(EntityId, StatusEffect)] {
        &self.applied
    }

    pub fn removed(&self) -> &[(EntityId, StatusKind)] {
        &self.removed
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn feedback(&self) -> &[(EntityId, Feedback)] {
        &self.feedback
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::Relaxed)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn clear_log(&mut self) {
        self.applied.clear();
        self.removed.clear();
        self.commands.clear();
        self.feedback.clear();
        self.classify_calls.store(0, Ordering::Relaxed);
    }

    /// Advance the world by one tick.
    ///
    /// Returns the regions whose weather changed so the caller can notify the engine.
    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Vec<(RegionId, RegionWeather)> {
        let mut changes = Vec::new();
        for (id, region) in self.regions.iter_mut() {
            region.time_of_day = (region.time_of_day + 1).rem_euclid(DAY_LENGTH);
            if id.as_str().ends_with("_nether") {
                continue;
            }
            // Roughly one weather change every ten in-game minutes.
            if rng.gen_bool(1.0 / 12_000.0) {
                region.weather = match region.weather.kind() {
                    crate::host::WeatherKind::Clear if rng.gen_bool(0.25) => RegionWeather::THUNDER,
                    crate::host::WeatherKind::Clear => RegionWeather::RAIN,
                    _ => RegionWeather::CLEAR,
                };
                changes.push((id.clone(), region.weather));
            }
        }

        for entity in self.entities.values_mut() {
            entity.status_effects.retain_mut(|s| {
                s.duration_ticks = s.duration_ticks.saturating_sub(1);
                s.duration_ticks > 0
            });
            let drift = DVec3::new(rng.gen_range(-0.2..0.2), 0.0, rng.gen_range(-0.2..0.2));
            entity.position += drift;
            entity.light_level = light_at(entity.position);
        }
        changes
    }
}

/// Crude light model: open sky above sea level, dim below.
fn light_at(position: DVec3) -> u8 {
    if position.y >= 62.0 { 15 } else { 4 }
}

impl Host for SimHost {
    fn regions(&self) -> Vec<RegionId> {
        self.regions.keys().cloned().collect()
    }

    fn list_entities_in_region(&self, region: &RegionId) -> Vec<EntitySnapshot> {
        self.entities
            .values()
            .filter(|e| &e.region == region)
            .cloned()
            .collect()
    }

    fn entity(&self, id: EntityId) -> Option<EntitySnapshot> {
        self.entities.get(&id).cloned()
    }

    fn region_weather(&self, region: &RegionId) -> Result<RegionWeather, HostError> {
        if self.failing_regions.contains(region) {
            return Err(HostError::QueryFailed(format!("weather of {}", region)));
        }
        self.regions
            .get(region)
            .map(|r| r.weather)
            .ok_or_else(|| HostError::UnknownRegion(region.clone()))
    }

    fn region_time_of_day(&self, region: &RegionId) -> Result<i64, HostError> {
        self.regions
            .get(region)
            .map(|r| r.time_of_day)
            .ok_or_else(|| HostError::UnknownRegion(region.clone()))
    }

    fn classify_zone(&self, region: &RegionId, position: DVec3) -> Result<ZoneId, HostError> {
        self.classify_calls.fetch_add(1, Ordering::Relaxed);
        let r = self
            .regions
            .get(region)
            .ok_or_else(|| HostError::UnknownRegion(region.clone()))?;
        r.zone_bands
            .iter()
            .find(|(max_x, _)| position.x <= *max_x)
            .or(r.zone_bands.last())
            .map(|(_, zone)| zone.clone())
            .ok_or_else(|| HostError::QueryFailed(format!("no zones in {}", region)))
    }

    fn apply_status_effect(&mut self, entity: EntityId, effect: StatusEffect) {
        self.applied.push((entity, effect));
        if let Some(e) = self.entities.get_mut(&entity) {
            e.status_effects.retain(|s| s.kind != effect.kind);
            e.status_effects.push(effect);
        }
    }

    fn remove_status_effect(&mut self, entity: EntityId, kind: StatusKind) {
        self.removed.push((entity, kind));
        if let Some(e) = self.entities.get_mut(&entity) {
            e.status_effects.retain(|s| s.kind != kind);
        }
    }

    fn dispatch_command(&mut self, command: &str) -> Result<(), HostError> {
        if self.rejected_commands.iter().any(|n| command.contains(n.as_str())) {
            return Err(HostError::CommandRejected(command.to_string()));
        }
        self.commands.push(command.to_string());
        Ok(())
    }

    fn send_feedback(&mut self, entity: EntityId, feedback: Feedback) {
        self.feedback.push((entity, feedback));
    }
}
