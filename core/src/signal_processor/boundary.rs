//! Predicate deciding whether a map load ends the active match.

use std::fmt::Debug;
use std::sync::Arc;

use sitrep_types::MatchBoundaryMode;

use crate::storage::MatchRecord;

/// The map load being considered.
#[derive(Debug, Clone, Copy)]
pub struct MapTransition<'a> {
    pub map: &'a str,
    pub scenario: Option<&'a str>,
    pub mode: Option<&'a str>,
}

pub trait MatchBoundary: Send + Sync + Debug {
    /// `true` if `next` should close `active` and open a new match rather
    /// than a new round of the same match.
    fn starts_new_match(&self, active: &MatchRecord, next: &MapTransition<'_>) -> bool;
}

/// A known scenario that differs from the active match's scenario.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScenarioChange;

impl MatchBoundary for ScenarioChange {
    fn starts_new_match(&self, active: &MatchRecord, next: &MapTransition<'_>) -> bool {
        match (active.scenario.as_deref(), next.scenario) {
            (Some(current), Some(next)) => !current.eq_ignore_ascii_case(next),
            _ => false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EveryMapLoad;

impl MatchBoundary for EveryMapLoad {
    fn starts_new_match(&self, _active: &MatchRecord, _next: &MapTransition<'_>) -> bool {
        true
    }
}

/// Matches only end on game over.
#[derive(Debug, Default, Clone, Copy)]
pub struct Never;

impl MatchBoundary for Never {
    fn starts_new_match(&self, _active: &MatchRecord, _next: &MapTransition<'_>) -> bool {
        false
    }
}

pub fn boundary_for(mode: MatchBoundaryMode) -> Arc<dyn MatchBoundary> {
    match mode {
        MatchBoundaryMode::ScenarioChange => Arc::new(ScenarioChange),
        MatchBoundaryMode::EveryMapLoad => Arc::new(EveryMapLoad),
        MatchBoundaryMode::Never => Arc::new(Never),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MatchId, ServerId};
    use chrono::NaiveDate;

    fn active(scenario: Option<&str>) -> MatchRecord {
        MatchRecord {
            id: MatchId(1),
            server: ServerId::from("s1"),
            map: "Town".to_string(),
            scenario: scenario.map(str::to_string),
            mode: None,
            start_time: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            end_time: None,
            winning_team: None,
            start_offset: 0,
        }
    }

    fn next(scenario: Option<&str>) -> MapTransition<'_> {
        MapTransition {
            map: "Farmhouse",
            scenario,
            mode: None,
        }
    }

    #[test]
    fn test_scenario_change_needs_both_scenarios() {
        let b = ScenarioChange;
        assert!(b.starts_new_match(&active(Some("Scenario_Town_Push")), &next(Some("Scenario_Farmhouse_Push"))));
        assert!(!b.starts_new_match(&active(Some("Scenario_Town_Push")), &next(Some("scenario_town_push"))));
        assert!(!b.starts_new_match(&active(None), &next(Some("Scenario_Farmhouse_Push"))));
        assert!(!b.starts_new_match(&active(Some("Scenario_Town_Push")), &next(None)));
    }

    #[test]
    fn test_fixed_policies() {
        assert!(EveryMapLoad.starts_new_match(&active(None), &next(None)));
        assert!(!Never.starts_new_match(&active(Some("a")), &next(Some("b"))));
    }
}
