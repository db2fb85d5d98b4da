use crate::host::{EntitySnapshot, Feedback};

pub const DEFAULT_FADE_IN: u32 = 10;
pub const DEFAULT_STAY: u32 = 70;
pub const DEFAULT_FADE_OUT: u32 = 20;

/// Replace `%key%` placeholders with live entity attributes.
/// Unknown keys are left as written.
pub fn substitute(template: &str, entity: &EntitySnapshot) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(open) = rest.find('%') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('%') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = &after[..close];
        match resolve(key, entity) {
            Some(value) => {
                out.push_str(&value);
                rest = &after[close + 1..];
            }
            None => {
                // Keep the leading '%' and rescan from the closing one, which
                // may open a real placeholder.
                out.push('%');
                out.push_str(key);
                rest = &after[close..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve(key: &str, entity: &EntitySnapshot) -> Option<String> {
    let value = match key {
        "player" | "player_name" | "name" => entity.name.clone(),
        "player_x" | "x" => format!("{:.2}", entity.position.x),
        "player_y" | "y" => format!("{:.2}", entity.position.y),
        "player_z" | "z" => format!("{:.2}", entity.position.z),
        "player_health" | "health" => format!("{:.1}", entity.health),
        "player_food" | "food" => entity.food_level.to_string(),
        "world" | "region" => entity.region.to_string(),
        "uuid" => entity.id.to_string(),
        _ => return None,
    };
    Some(value)
}

/// Recognize command forms that are cheaper to deliver as direct feedback.
///
/// Only commands aimed at `entity` itself are intercepted.
pub fn intercept_command(command: &str, entity: &EntitySnapshot) -> Option<Feedback> {
    let parts: Vec<&str> = command.split_whitespace().collect();
    match parts.as_slice() {
        ["title", target, "title", ..] if *target == entity.name => {
            let text = command
                .splitn(4, char::is_whitespace)
                .nth(3)
                .unwrap_or_default()
                .trim()
                .to_string();
            Some(Feedback::Title {
                title: text,
                subtitle: String::new(),
                fade_in: DEFAULT_FADE_IN,
                stay: DEFAULT_STAY,
                fade_out: DEFAULT_FADE_OUT,
            })
        }
        ["playsound", sound, target, _, _, _, tail @ ..] if *target == entity.name => {
            let number = |i: usize| {
                tail.get(i)
                    .and_then(|s| s.parse::<f32>().ok())
                    .filter(|v| v.is_finite())
                    .unwrap_or(1.0)
            };
            Some(Feedback::Sound {
                sound: sound.to_string(),
                volume: number(0),
                pitch: number(1),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{EntityId, RegionId};
    use glam::DVec3;
    use uuid::Uuid;

    fn steve() -> EntitySnapshot {
        EntitySnapshot {
            id: EntityId(Uuid::from_u128(7)),
            name: "Steve".into(),
            position: DVec3::new(1.0, 64.5, -2.25),
            region: RegionId::new("overworld"),
            health: 17.5,
            food_level: 12,
            light_level: 15,
            bypass: false,
            status_effects: vec![],
        }
    }

    #[test]
    fn substitutes_known_placeholders() {
        let s = substitute(
            "%player% at %player_x%,%player_y%,%player_z% hp=%health% food=%food% in %world%",
            &steve(),
        );
        assert_eq!(s, "Steve at 1.00,64.50,-2.25 hp=17.5 food=12 in overworld");
    }

    #[test]
    fn unknown_placeholders_survive_and_do_not_swallow_neighbours() {
        assert_eq!(substitute("100%% sure %name%", &steve()), "100%% sure Steve");
        assert_eq!(substitute("%bogus% %name%", &steve()), "%bogus% Steve");
        assert_eq!(substitute("50% off", &steve()), "50% off");
    }

    #[test]
    fn title_command_for_self_becomes_feedback() {
        let fb = intercept_command("title Steve title {\"text\":\"Storm!\"}", &steve());
        assert_eq!(
            fb,
            Some(Feedback::Title {
                title: "{\"text\":\"Storm!\"}".into(),
                subtitle: String::new(),
                fade_in: 10,
                stay: 70,
                fade_out: 20,
            })
        );
    }

    #[test]
    fn playsound_reads_optional_volume_and_pitch() {
        let fb = intercept_command(
            "playsound entity.lightning_bolt.thunder Steve 1 64 -2 0.5 1.5",
            &steve(),
        );
        assert_eq!(
            fb,
            Some(Feedback::Sound {
                sound: "entity.lightning_bolt.thunder".into(),
                volume: 0.5,
                pitch: 1.5,
            })
        );

        let defaults = intercept_command("playsound ambient.cave Steve 0 0 0", &steve());
        assert_eq!(
            defaults,
            Some(Feedback::Sound {
                sound: "ambient.cave".into(),
                volume: 1.0,
                pitch: 1.0,
            })
        );
    }

    #[test]
    fn other_targets_and_forms_pass_through() {
        assert_eq!(intercept_command("title Alex title hi", &steve()), None);
        assert_eq!(intercept_command("playsound a.b Steve 0 0", &steve()), None);
        assert_eq!(intercept_command("effect give Steve slowness 5", &steve()), None);
        assert_eq!(intercept_command("title Steve subtitle hi", &steve()), None);
    }
}
