//! Difficulty adaptation
//!
//! Derives a difficulty suggestion from the running scores and the weather
//! blob. Deterministic thresholds; the record is advisory and consumed by
//! whatever front end drives the scenario.

use crate::db::{Database, DifficultyAdaptation, ScenarioState};
use crate::error::{EngineError, Result};

/// Suggested direction plus the reasoning behind it
pub fn suggest_adaptation(
    state: &ScenarioState,
    weather: Option<&serde_json::Value>,
) -> (&'static str, String) {
    let average =
        (state.safety_score + state.efficiency_score + state.passenger_comfort) / 3.0;

    let severe_cells = weather
        .and_then(|w| w.get("cells"))
        .and_then(serde_json::Value::as_array)
        .map(|cells| {
            cells
                .iter()
                .filter(|c| {
                    matches!(
                        c.get("intensity").and_then(serde_json::Value::as_str),
                        Some("heavy") | Some("severe")
                    )
                })
                .count()
        })
        .unwrap_or(0);

    if average < 40.0 {
        let reason = format!(
            "Scores are low (average {:.0}); reduce workload to keep the session instructive.",
            average
        );
        ("decrease", reason)
    } else if average > 85.0 && severe_cells == 0 {
        let reason = format!(
            "Scores are high (average {:.0}) with benign weather; raise the challenge.",
            average
        );
        ("increase", reason)
    } else {
        let reason = if severe_cells > 0 {
            format!(
                "Average {:.0} with {} severe weather cell(s) in play; current difficulty is appropriate.",
                average, severe_cells
            )
        } else {
            format!("Average {:.0}; current difficulty is appropriate.", average)
        };
        ("maintain", reason)
    }
}

/// Compute and persist an adaptation for a scenario's current state.
pub fn record_adaptation(db: &Database, scenario_id: i32) -> Result<DifficultyAdaptation> {
    let state = db.current_state(scenario_id)?.ok_or_else(|| {
        EngineError::NotFound(format!("state for scenario {}", scenario_id))
    })?;
    let weather = db
        .get_weather(scenario_id)?
        .and_then(|w| serde_json::from_str::<serde_json::Value>(&w.conditions_json).ok());

    let (action, reason) = suggest_adaptation(&state, weather.as_ref());
    db.create_adaptation(scenario_id, action, &reason)?;

    let rows = db.list_adaptations(scenario_id)?;
    rows.into_iter().next_back().ok_or_else(|| {
        EngineError::Storage(crate::db::DbError::Validation(
            "adaptation vanished after insert".to_string(),
        ))
    })
}
