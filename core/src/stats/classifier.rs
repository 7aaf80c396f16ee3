use crate::game_log::{Combatant, KillKind};

/// Decide the kill kind. Rules apply in order:
/// 1. no killer, or the killer is the victim: suicide
/// 2. killer and victim on the same team: team-kill
/// 3. anything else: regular
pub fn classify(killer: Option<&Combatant>, victim: &Combatant) -> KillKind {
    let Some(killer) = killer else {
        return KillKind::Suicide;
    };
    if killer.same_as(victim) {
        return KillKind::Suicide;
    }
    if killer.team.is_some() && killer.team == victim.team {
        return KillKind::TeamKill;
    }
    KillKind::Regular
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_table() {
        let alpha = Combatant::player("Alpha", "1", 0);
        let bravo = Combatant::player("Bravo", "2", 1);
        let charlie = Combatant::player("Charlie", "3", 0);
        let bot = Combatant::bot("Insurgent", 1);
        let teamless = Combatant {
            name: "Spectator".to_string(),
            player_id: Some("4".into()),
            team: None,
        };

        let cases: &[(Option<&Combatant>, &Combatant, KillKind)] = &[
            (Some(&alpha), &bravo, KillKind::Regular),
            (Some(&alpha), &charlie, KillKind::TeamKill),
            (Some(&alpha), &alpha, KillKind::Suicide),
            (None, &bravo, KillKind::Suicide),
            // Absent killer wins over any team comparison.
            (None, &charlie, KillKind::Suicide),
            (Some(&bot), &bravo, KillKind::TeamKill),
            (Some(&bot), &bot, KillKind::Suicide),
            (Some(&bravo), &alpha, KillKind::Regular),
            // Unknown teams never match each other.
            (Some(&teamless), &Combatant { team: None, ..bravo.clone() }, KillKind::Regular),
        ];

        for (killer, victim, expected) in cases {
            assert_eq!(
                classify(*killer, victim),
                *expected,
                "killer {:?} victim {:?}",
                killer.map(|k| &k.name),
                victim.name
            );
        }
    }
}
