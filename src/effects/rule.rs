use rand::Rng;
use rand::seq::SliceRandom;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::effects::chain::ChainEffect;
use crate::effects::condition::{self, ConditionSet, Prerequisite};
use crate::effects::param::{Chance, FloatParam, IntParam};
use crate::effects::script::{ApplicabilityCheck, PredicateContext};
use crate::effects::template::{self, substitute};
use crate::host::{EntitySnapshot, Feedback, Host, StatusEffect, StatusKind};

/// One status effect a rule can grant. Magnitude and duration may be ranged.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSpec {
    pub kind: StatusKind,
    pub magnitude: IntParam,
    pub duration: IntParam,
}

impl StatusSpec {
    pub fn fixed(kind: StatusKind, magnitude: i64, duration: i64) -> Self {
        StatusSpec {
            kind,
            magnitude: IntParam::Fixed(magnitude),
            duration: IntParam::Fixed(duration),
        }
    }

    /// Draw concrete values. Out-of-range draws saturate to what the host accepts.
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> StatusEffect {
        StatusEffect {
            kind: self.kind,
            magnitude: self.magnitude.resolve(rng).clamp(0, u8::MAX as i64) as u8,
            duration_ticks: self.duration.resolve(rng).clamp(0, u32::MAX as i64) as u32,
        }
    }
}

/// Chance-gated pool; one candidate is picked uniformly when it fires.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomPool {
    pub chance: Chance,
    pub prerequisite: Option<Prerequisite>,
    pub candidates: Vec<StatusSpec>,
}

/// Chance-gated list of command templates; the whole list runs on a hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPool {
    pub chance: Chance,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackSpec {
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
        resource: String,
        volume: FloatParam,
        pitch: FloatParam,
    },
    Chat {
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackDirective {
    pub enabled: bool,
    pub chance: Chance,
    pub spec: FeedbackSpec,
}

impl FeedbackDirective {
    fn render<R: Rng + ?Sized>(&self, entity: &EntitySnapshot, rng: &mut R) -> Feedback {
        match &self.spec {
            FeedbackSpec::Title {
                title,
                subtitle,
                fade_in,
                stay,
                fade_out,
            } => Feedback::Title {
                title: substitute(title, entity),
                subtitle: substitute(subtitle, entity),
                fade_in: *fade_in,
                stay: *stay,
                fade_out: *fade_out,
            },
            FeedbackSpec::ActionBar { text } => Feedback::ActionBar {
                text: substitute(text, entity),
            },
            FeedbackSpec::Sound {
                resource,
                volume,
                pitch,
            } => Feedback::Sound {
                sound: resource.clone(),
                volume: volume.resolve(rng) as f32,
                pitch: pitch.resolve(rng) as f32,
            },
            FeedbackSpec::Chat { text } => Feedback::Chat {
                text: substitute(text, entity),
            },
        }
    }
}

/// One condition + consequence unit. Immutable once built; replaced wholesale on reload.
#[derive(Clone)]
pub struct EffectRule {
    pub key: String,
    pub description: String,
    pub enabled: bool,
    pub conditions: ConditionSet,
    pub predicate: Option<Arc<dyn ApplicabilityCheck>>,
    pub cooldown: Option<Duration>,
    pub statuses: Vec<StatusSpec>,
    pub random: Option<RandomPool>,
    pub commands: Option<CommandPool>,
    pub feedback: Vec<FeedbackDirective>,
    pub chains: Vec<ChainEffect>,
}

impl fmt::Debug for EffectRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectRule")
            .field("key", &self.key)
            .field("enabled", &self.enabled)
            .field("conditions", &self.conditions)
            .field("predicate", &self.predicate.as_ref().map(|p| p.describe()))
            .field("cooldown", &self.cooldown)
            .field("statuses", &self.statuses)
            .field("random", &self.random)
            .field("commands", &self.commands)
            .field("feedback", &self.feedback)
            .field("chains", &self.chains)
            .finish()
    }
}

/// Observable result of one `apply`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOutcome {
    pub statuses_applied: usize,
    pub random_fired: bool,
    pub feedback_sent: usize,
    pub commands_dispatched: usize,
    pub commands_intercepted: usize,
    /// Chains whose draw fired and whose sub-condition held, in rule order.
    pub fired_chains: Vec<ChainEffect>,
}

impl EffectRule {
    /// An enabled rule with no conditions and no consequences.
    pub fn new(key: impl Into<String>) -> Self {
        EffectRule {
            key: key.into(),
            description: String::new(),
            enabled: true,
            conditions: ConditionSet::default(),
            predicate: None,
            cooldown: None,
            statuses: Vec::new(),
            random: None,
            commands: None,
            feedback: Vec::new(),
            chains: Vec::new(),
        }
    }

    pub fn with_predicate(mut self, check: impl ApplicabilityCheck + 'static) -> Self {
        self.predicate = Some(Arc::new(check));
        self
    }

    /// Enabled, declarative conditions pass, then the predicate (if any) agrees.
    pub fn is_applicable(&self, ctx: &PredicateContext<'_>) -> bool {
        self.enabled
            && condition::matches(&self.conditions, ctx.entity, ctx.zone, ctx.region)
            && self
                .predicate
                .as_ref()
                .is_none_or(|p| p.is_applicable(ctx))
    }

    /// Run every consequence against `entity`.
    ///
    /// The caller is responsible for the applicability check; this never
    /// re-evaluates conditions. Chains are returned rather than dispatched so
    /// the caller can route them through its scheduler.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        entity: &EntitySnapshot,
        host: &mut dyn Host,
        rng: &mut R,
    ) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        for spec in &self.statuses {
            host.apply_status_effect(entity.id, spec.resolve(rng));
            outcome.statuses_applied += 1;
        }

        if let Some(pool) = &self.random {
            let gated = pool.prerequisite.as_ref().is_some_and(|p| !p.holds(entity));
            if !gated && pool.chance.roll(rng) {
                if let Some(spec) = pool.candidates.choose(rng) {
                    host.apply_status_effect(entity.id, spec.resolve(rng));
                    outcome.statuses_applied += 1;
                    outcome.random_fired = true;
                }
            }
        }

        for directive in &self.feedback {
            if !directive.enabled || !directive.chance.roll(rng) {
                continue;
            }
            host.send_feedback(entity.id, directive.render(entity, rng));
            outcome.feedback_sent += 1;
        }

        if let Some(pool) = &self.commands {
            if pool.chance.roll(rng) {
                self.run_commands(pool, entity, host, &mut outcome);
            }
        }

        for chain in &self.chains {
            if chain.fires(entity, rng) {
                outcome.fired_chains.push(chain.clone());
            }
        }

        outcome
    }

    fn run_commands(
        &self,
        pool: &CommandPool,
        entity: &EntitySnapshot,
        host: &mut dyn Host,
        outcome: &mut ApplyOutcome,
    ) {
        for raw in &pool.commands {
            let command = substitute(raw, entity);
            let command = command.trim().trim_start_matches('/');
            if command.is_empty() {
                warn!(rule = %self.key, template = %raw, "Skipping empty command");
                continue;
            }

            if let Some(feedback) = template::intercept_command(command, entity) {
                host.send_feedback(entity.id, feedback);
                outcome.commands_intercepted += 1;
                continue;
            }

            match host.dispatch_command(command) {
                Ok(()) => {
                    debug!(rule = %self.key, entity = %entity.id, "Dispatched: {}", command);
                    outcome.commands_dispatched += 1;
                }
                Err(e) => {
                    warn!(rule = %self.key, entity = %entity.id, command, "Command failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::condition::RegionState;
    use crate::host::{EntityId, FeedbackKind, RegionId, RegionWeather, SimHost, WeatherKind, ZoneId};
    use glam::DVec3;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use uuid::Uuid;

    fn setup() -> (SimHost, EntitySnapshot) {
        let mut host = SimHost::new();
        host.add_region("world", RegionWeather::RAIN, 6000);
        let entity = host.spawn_entity(EntityId(Uuid::from_u128(1)), "Steve", "world", DVec3::new(0.5, 64.0, 0.5));
        (host, entity)
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(2024)
    }

    #[test]
    fn guaranteed_statuses_always_apply() {
        let (mut host, entity) = setup();
        let mut rule = EffectRule::new("rain-rule");
        rule.statuses.push(StatusSpec::fixed(StatusKind::Slowness, 0, 100));

        let outcome = rule.apply(&entity, &mut host, &mut rng());
        assert_eq!(outcome.statuses_applied, 1);
        assert_eq!(
            host.applied(),
            &[(
                entity.id,
                StatusEffect {
                    kind: StatusKind::Slowness,
                    magnitude: 0,
                    duration_ticks: 100
                }
            )]
        );
        assert!(outcome.fired_chains.is_empty());
    }

    #[test]
    fn random_pool_trigger_rate_tracks_chance() {
        let (mut host, entity) = setup();
        let mut rule = EffectRule::new("fog");
        rule.random = Some(RandomPool {
            chance: Chance::new(0.3),
            prerequisite: None,
            candidates: vec![
                StatusSpec::fixed(StatusKind::Blindness, 0, 40),
                StatusSpec::fixed(StatusKind::Darkness, 0, 40),
            ],
        });

        let mut rng = rng();
        let n = 10_000;
        let fired = (0..n)
            .filter(|_| rule.apply(&entity, &mut host, &mut rng).random_fired)
            .count();
        let rate = fired as f64 / n as f64;
        assert!((rate - 0.3).abs() < 0.03, "observed rate {}", rate);

        let kinds: std::collections::HashSet<_> = host.applied().iter().map(|(_, s)| s.kind).collect();
        assert_eq!(kinds.len(), 2, "both candidates should be picked eventually");
    }

    #[test]
    fn random_pool_prerequisite_gates_before_the_draw() {
        let (mut host, entity) = setup();
        let mut rule = EffectRule::new("worse");
        rule.random = Some(RandomPool {
            chance: Chance::ALWAYS,
            prerequisite: Some(Prerequisite::HasStatus {
                kind: StatusKind::Slowness,
                magnitude: Some(1),
            }),
            candidates: vec![StatusSpec::fixed(StatusKind::Slowness, 2, 60)],
        });

        assert!(!rule.apply(&entity, &mut host, &mut rng()).random_fired);

        let mut slowed = entity.clone();
        slowed.status_effects.push(StatusEffect {
            kind: StatusKind::Slowness,
            magnitude: 1,
            duration_ticks: 20,
        });
        assert!(rule.apply(&slowed, &mut host, &mut rng()).random_fired);
    }

    #[test]
    fn ranged_parameters_draw_fresh_each_application() {
        let (mut host, entity) = setup();
        let mut rule = EffectRule::new("ranged");
        rule.statuses.push(StatusSpec {
            kind: StatusKind::Speed,
            magnitude: IntParam::Range { min: 0, max: 2 },
            duration: IntParam::Range { min: 10, max: 20 },
        });
        let mut rng = rng();
        for _ in 0..200 {
            rule.apply(&entity, &mut host, &mut rng);
        }
        let durations: std::collections::HashSet<u32> =
            host.applied().iter().map(|(_, s)| s.duration_ticks).collect();
        assert!(durations.len() > 1);
        assert!(durations.iter().all(|d| (10..=20).contains(d)));
    }

    #[test]
    fn command_pool_runs_every_command_and_intercepts_known_forms() {
        let (mut host, entity) = setup();
        let mut rule = EffectRule::new("thunder");
        rule.commands = Some(CommandPool {
            chance: Chance::ALWAYS,
            commands: vec![
                "say %player% got struck".into(),
                "title %player% title Thunder!".into(),
                "   ".into(),
                "playsound entity.lightning_bolt.thunder %player% 0 64 0 2.0".into(),
                "/give %player% stick".into(),
            ],
        });

        let outcome = rule.apply(&entity, &mut host, &mut rng());
        assert_eq!(outcome.commands_dispatched, 2);
        assert_eq!(outcome.commands_intercepted, 2);
        assert_eq!(host.commands(), &["say Steve got struck", "give Steve stick"]);
        let kinds: Vec<FeedbackKind> = host.feedback().iter().map(|(_, f)| f.kind()).collect();
        assert_eq!(kinds, vec![FeedbackKind::Title, FeedbackKind::Sound]);
    }

    #[test]
    fn rejected_command_does_not_abort_the_pool() {
        let (mut host, entity) = setup();
        host.reject_commands_containing("kill");
        let mut rule = EffectRule::new("mixed");
        rule.commands = Some(CommandPool {
            chance: Chance::ALWAYS,
            commands: vec!["kill %player%".into(), "say after".into()],
        });
        let outcome = rule.apply(&entity, &mut host, &mut rng());
        assert_eq!(outcome.commands_dispatched, 1);
        assert_eq!(host.commands(), &["say after"]);
    }

    #[test]
    fn feedback_directives_are_independent() {
        let (mut host, entity) = setup();
        let mut rule = EffectRule::new("fb");
        rule.feedback = vec![
            FeedbackDirective {
                enabled: true,
                chance: Chance::ALWAYS,
                spec: FeedbackSpec::Chat {
                    text: "Rain soaks %player_name%".into(),
                },
            },
            FeedbackDirective {
                enabled: false,
                chance: Chance::ALWAYS,
                spec: FeedbackSpec::ActionBar { text: "off".into() },
            },
            FeedbackDirective {
                enabled: true,
                chance: Chance::NEVER,
                spec: FeedbackSpec::ActionBar { text: "never".into() },
            },
        ];
        let outcome = rule.apply(&entity, &mut host, &mut rng());
        assert_eq!(outcome.feedback_sent, 1);
        assert_eq!(
            host.feedback(),
            &[(
                entity.id,
                Feedback::Chat {
                    text: "Rain soaks Steve".into()
                }
            )]
        );
    }

    #[test]
    fn chains_fire_per_probability_and_sub_condition() {
        let (mut host, entity) = setup();
        let mut rule = EffectRule::new("src");
        rule.chains = vec![
            ChainEffect {
                chance: Chance::ALWAYS,
                target: "a".into(),
                delay_ticks: 0,
                condition: None,
            },
            ChainEffect {
                chance: Chance::NEVER,
                target: "b".into(),
                delay_ticks: 0,
                condition: None,
            },
            ChainEffect {
                chance: Chance::ALWAYS,
                target: "c".into(),
                delay_ticks: 20,
                condition: Some(Prerequisite::HasStatus {
                    kind: StatusKind::Poison,
                    magnitude: None,
                }),
            },
        ];
        let outcome = rule.apply(&entity, &mut host, &mut rng());
        let targets: Vec<&str> = outcome.fired_chains.iter().map(|c| c.target.as_str()).collect();
        assert_eq!(targets, vec!["a"]);
    }

    fn implausibly_healthy(ctx: &PredicateContext<'_>) -> bool {
        ctx.entity.health > 100.0
    }

    #[test]
    fn applicability_combines_enabled_conditions_and_predicate() {
        let (_, entity) = setup();
        let region = RegionState {
            region: RegionId::new("world"),
            weather: RegionWeather::THUNDER,
            time_of_day: 0,
        };
        let zone = ZoneId::new("plains");
        let ctx = PredicateContext {
            entity: &entity,
            zone: Some(&zone),
            region: &region,
        };

        let mut rule = EffectRule::new("r");
        assert!(rule.is_applicable(&ctx));

        rule.conditions.weather = vec![WeatherKind::Rain];
        assert!(!rule.is_applicable(&ctx));

        rule.conditions.weather = vec![WeatherKind::Thunder];
        let rule = rule.with_predicate(implausibly_healthy);
        assert!(!rule.is_applicable(&ctx));

        let mut disabled = EffectRule::new("off");
        disabled.enabled = false;
        assert!(!disabled.is_applicable(&ctx));
    }
}
