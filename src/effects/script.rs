use rhai::{Dynamic, Engine, Map, Scope, AST};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::effects::condition::RegionState;
use crate::host::{EntitySnapshot, ZoneId};

/// What an applicability check gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct PredicateContext<'a> {
    pub entity: &'a EntitySnapshot,
    pub zone: Option<&'a ZoneId>,
    pub region: &'a RegionState,
}

/// Applicability beyond the declarative conditions.
///
/// Runs only after the declarative conditions have passed. Implementations must
/// be side-effect free; a `false` result simply means "not this cycle".
pub trait ApplicabilityCheck: Send + Sync {
    fn is_applicable(&self, ctx: &PredicateContext<'_>) -> bool;

    /// Short label for logs and operator output.
    fn describe(&self) -> String {
        "native".to_string()
    }
}

impl<F> ApplicabilityCheck for F
where
    F: Fn(&PredicateContext<'_>) -> bool + Send + Sync,
{
    fn is_applicable(&self, ctx: &PredicateContext<'_>) -> bool {
        self(ctx)
    }
}

/// Sandboxed Rhai engine shared by every compiled predicate of a rule set.
#[derive(Clone)]
pub struct ScriptEngine {
    engine: Arc<Engine>,
}

impl ScriptEngine {
    pub fn new() -> Self {
        let mut engine = Engine::new();

        // Predicates are single expressions; keep them small and cheap.
        engine.set_max_operations(10_000);
        engine.set_max_string_size(1024);
        engine.set_max_array_size(256);
        engine.set_max_map_size(128);
        engine.set_max_expr_depths(32, 16);

        engine.register_fn("log", |msg: &str| {
            debug!(target: "weatherfx::script", "{}", msg);
        });
        engine.register_fn("clamp", |v: f64, min: f64, max: f64| -> f64 { v.clamp(min, max) });

        ScriptEngine {
            engine: Arc::new(engine),
        }
    }

    /// Compile a predicate expression. Syntax errors are returned as text.
    pub fn compile(&self, rule: &str, source: &str) -> Result<ScriptPredicate, String> {
        let ast = self
            .engine
            .compile_expression(source)
            .map_err(|e| format!("predicate for rule '{}' does not compile: {}", rule, e))?;
        Ok(ScriptPredicate {
            rule: rule.to_string(),
            source: source.to_string(),
            engine: Arc::clone(&self.engine),
            ast,
        })
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// A compiled Rhai predicate expression.
#[derive(Clone)]
pub struct ScriptPredicate {
    rule: String,
    source: String,
    engine: Arc<Engine>,
    ast: AST,
}

impl fmt::Debug for ScriptPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptPredicate")
            .field("rule", &self.rule)
            .field("source", &self.source)
            .finish()
    }
}

impl ApplicabilityCheck for ScriptPredicate {
    fn is_applicable(&self, ctx: &PredicateContext<'_>) -> bool {
        let mut scope = Scope::new();
        scope.push("entity", entity_to_rhai_map(ctx.entity));
        match ctx.zone {
            Some(zone) => scope.push("zone", zone.as_str().to_string()),
            None => scope.push("zone", Dynamic::UNIT),
        };
        scope.push("weather", ctx.region.weather.kind().as_str().to_string());
        scope.push("time", ctx.region.time_of_day);

        match self
            .engine
            .eval_ast_with_scope::<bool>(&mut scope, &self.ast)
        {
            Ok(result) => result,
            Err(e) => {
                debug!(rule = %self.rule, entity = %ctx.entity.id, "predicate failed: {}", e);
                false
            }
        }
    }

    fn describe(&self) -> String {
        format!("script: {}", self.source)
    }
}

fn entity_to_rhai_map(entity: &EntitySnapshot) -> Map {
    let mut map = Map::new();
    map.insert("name".into(), Dynamic::from(entity.name.clone()));
    map.insert("x".into(), Dynamic::from(entity.position.x));
    map.insert("y".into(), Dynamic::from(entity.position.y));
    map.insert("z".into(), Dynamic::from(entity.position.z));
    map.insert("health".into(), Dynamic::from(entity.health));
    map.insert("food".into(), Dynamic::from(entity.food_level as i64));
    map.insert("light".into(), Dynamic::from(entity.light_level as i64));
    map.insert("region".into(), Dynamic::from(entity.region.as_str().to_string()));

    let mut statuses = Map::new();
    for status in &entity.status_effects {
        statuses.insert(status.kind.name().into(), Dynamic::from(status.magnitude as i64));
    }
    map.insert("statuses".into(), Dynamic::from_map(statuses));
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{EntityId, RegionId, RegionWeather, StatusEffect, StatusKind};
    use glam::DVec3;
    use uuid::Uuid;

    fn entity() -> EntitySnapshot {
        EntitySnapshot {
            id: EntityId(Uuid::from_u128(3)),
            name: "alex".into(),
            position: DVec3::new(0.0, 72.0, 0.0),
            region: RegionId::new("world"),
            health: 8.0,
            food_level: 20,
            light_level: 4,
            bypass: false,
            status_effects: vec![StatusEffect {
                kind: StatusKind::Slowness,
                magnitude: 1,
                duration_ticks: 40,
            }],
        }
    }

    fn region() -> RegionState {
        RegionState {
            region: RegionId::new("world"),
            weather: RegionWeather::RAIN,
            time_of_day: 18_000,
        }
    }

    fn eval(source: &str, zone: Option<&ZoneId>) -> bool {
        let engine = ScriptEngine::new();
        let predicate = engine.compile("test", source).unwrap();
        let e = entity();
        let r = region();
        predicate.is_applicable(&PredicateContext {
            entity: &e,
            zone,
            region: &r,
        })
    }

    #[test]
    fn predicate_sees_entity_zone_weather_and_time() {
        let desert = ZoneId::new("desert");
        assert!(eval("entity.y > 60.0 && zone == \"desert\"", Some(&desert)));
        assert!(eval("weather == \"rain\" && time > 13000", None));
        assert!(eval("entity.health < 10.0 && entity.light <= 4", None));
        assert!(!eval("entity.food < 10", None));
    }

    #[test]
    fn predicate_can_inspect_statuses() {
        assert!(eval("\"SLOWNESS\" in entity.statuses", None));
        assert!(eval("entity.statuses.SLOWNESS == 1", None));
        assert!(!eval("\"BLINDNESS\" in entity.statuses", None));
    }

    #[test]
    fn non_boolean_or_failing_predicate_is_not_applicable() {
        assert!(!eval("42", None));
        assert!(!eval("undefined_variable > 3", None));
    }

    #[test]
    fn syntax_error_is_reported_at_compile_time() {
        let engine = ScriptEngine::new();
        let err = engine.compile("broken", "entity.y >").unwrap_err();
        assert!(err.contains("broken"), "got: {}", err);
    }

    fn named_like_alex(ctx: &PredicateContext<'_>) -> bool {
        ctx.entity.name.starts_with('a')
    }

    #[test]
    fn functions_work_as_native_checks() {
        let check: &dyn ApplicabilityCheck = &named_like_alex;
        let e = entity();
        let r = region();
        assert!(check.is_applicable(&PredicateContext {
            entity: &e,
            zone: None,
            region: &r,
        }));
        assert_eq!(check.describe(), "native");
    }
}
