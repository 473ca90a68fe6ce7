//! Decision impact calculator
//!
//! Asks the generator what a chosen option does to the running scores, then
//! folds the deltas into a new state snapshot. Snapshots are append-only;
//! a parse failure leaves state untouched.

use crate::db::{Database, ScenarioState};
use crate::error::{EngineError, Result};
use crate::extract;
use crate::generator::{ChatMessage, TextGenerator};

/// Numeric deltas attributed to one decision/option pair
#[derive(Debug, Clone, PartialEq)]
pub struct ImpactValues {
    /// Score deltas, clamped to [-10, 10]
    pub safety: f64,
    pub efficiency: f64,
    pub passenger_comfort: f64,
    /// Minutes added to (positive) or recovered from (negative) the plan
    pub time: f64,
    /// Pounds of fuel consumed beyond the running burn
    pub fuel: f64,
    pub description: String,
}

/// Parse a generated impact response. Score impacts outside [-10, 10] are
/// clamped rather than rejected; a response with no extractable JSON fails.
pub fn parse_impact(text: &str) -> Result<ImpactValues> {
    let value = extract::extract_json(text).ok_or_else(|| {
        EngineError::GenerationParse(format!(
            "no JSON object in impact response ({} chars)",
            text.len()
        ))
    })?;

    let num = |key: &str| value.get(key).and_then(serde_json::Value::as_f64);
    let score = |key: &str| num(key).unwrap_or(0.0).clamp(-10.0, 10.0);

    Ok(ImpactValues {
        safety: score("safety_impact"),
        efficiency: score("efficiency_impact"),
        passenger_comfort: score("passenger_comfort_impact"),
        time: num("time_impact").unwrap_or(0.0),
        fuel: num("fuel_impact").unwrap_or(0.0),
        description: value
            .get("description")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
            .to_string(),
    })
}

/// Fold an impact into the previous state. Scores clamp to [0, 100]; time
/// deviation accumulates; fuel impact is subtracted from remaining fuel.
pub fn fold_impact(prev: &ScenarioState, impact: &ImpactValues) -> (f64, f64, f64, f64, f64) {
    (
        (prev.safety_score + impact.safety).clamp(0.0, 100.0),
        (prev.efficiency_score + impact.efficiency).clamp(0.0, 100.0),
        (prev.passenger_comfort + impact.passenger_comfort).clamp(0.0, 100.0),
        prev.time_deviation + impact.time,
        prev.fuel_remaining - impact.fuel,
    )
}

fn impact_prompt(
    db: &Database,
    scenario_id: i32,
    decision_id: i32,
    option_id: i32,
    state: &ScenarioState,
) -> Result<Vec<ChatMessage>> {
    let decision = db.get_decision(decision_id)?;
    let option = db.get_option(option_id)?;
    let options = db.list_options(decision_id)?;
    let params = db.get_parameters(scenario_id)?;

    let mut context = format!(
        "Decision: {}\n{}\n\nAvailable options were:\n",
        decision.title, decision.description
    );
    for opt in &options {
        context.push_str(&format!(
            "- {}{}\n",
            opt.text,
            if opt.is_recommended { " (recommended)" } else { "" }
        ));
    }
    context.push_str(&format!("\nThe pilot chose: {}\n", option.text));
    if let Some(consequence) = &option.consequence {
        context.push_str(&format!("Stated consequence: {}\n", consequence));
    }
    context.push_str(&format!(
        "\nCurrent scores: safety {:.0}, efficiency {:.0}, passenger comfort {:.0}.\n\
         Time deviation: {:.1} minutes. Fuel remaining: {:.0} lbs.\n",
        state.safety_score, state.efficiency_score, state.passenger_comfort,
        state.time_deviation, state.fuel_remaining
    ));
    if let Some(p) = &params {
        context.push_str(&format!(
            "Aircraft: altitude {} ft, heading {}, speed {} kts.\n",
            p.altitude.map(|v| format!("{:.0}", v)).unwrap_or_else(|| "unknown".into()),
            p.heading.map(|v| format!("{:.0}", v)).unwrap_or_else(|| "unknown".into()),
            p.speed.map(|v| format!("{:.0}", v)).unwrap_or_else(|| "unknown".into()),
        ));
    }
    context.push_str(
        "\nRespond with a JSON object: {\"safety_impact\": number in [-10,10], \
         \"efficiency_impact\": number in [-10,10], \"passenger_comfort_impact\": number in [-10,10], \
         \"time_impact\": minutes, \"fuel_impact\": pounds, \"description\": string}.",
    );

    Ok(vec![
        ChatMessage::system(
            "You are an airline training evaluator scoring a pilot's decision in a flight \
             scenario. Respond only with the requested JSON object.",
        ),
        ChatMessage::user(context),
    ])
}

/// Compute and apply the impact of one chosen option: generate deltas,
/// record the DecisionImpact, append a new state snapshot. No partial state
/// update occurs on failure.
pub fn apply_decision_impact(
    db: &Database,
    generator: &dyn TextGenerator,
    scenario_id: i32,
    decision_id: i32,
    option_id: i32,
) -> Result<ScenarioState> {
    let prev = db.current_state(scenario_id)?.ok_or_else(|| {
        EngineError::NotFound(format!("state for scenario {}", scenario_id))
    })?;

    let messages = impact_prompt(db, scenario_id, decision_id, option_id, &prev)?;
    let text = generator.generate(&messages)?;
    let impact = parse_impact(&text).map_err(|e| {
        eprintln!(
            "Impact parse failed (scenario {}, decision {}, option {}): {}",
            scenario_id, decision_id, option_id, e
        );
        e
    })?;

    db.create_decision_impact(
        scenario_id,
        decision_id,
        option_id,
        impact.safety,
        impact.efficiency,
        impact.passenger_comfort,
        impact.time,
        impact.fuel,
        &impact.description,
    )?;

    let (safety, efficiency, comfort, time_dev, fuel) = fold_impact(&prev, &impact);
    db.push_state(scenario_id, safety, efficiency, comfort, time_dev, fuel)?;

    db.current_state(scenario_id)?.ok_or_else(|| {
        EngineError::Storage(crate::db::DbError::Validation(
            "state snapshot vanished after insert".to_string(),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn state(safety: f64, efficiency: f64, comfort: f64) -> ScenarioState {
        ScenarioState {
            id: 1,
            scenario_id: 1,
            safety_score: safety,
            efficiency_score: efficiency,
            passenger_comfort: comfort,
            time_deviation: 2.0,
            fuel_remaining: 14000.0,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_parse_impact_plain_json() {
        let imp = parse_impact(
            r#"{"safety_impact": 4, "efficiency_impact": -2, "passenger_comfort_impact": 1,
                "time_impact": 6, "fuel_impact": 250, "description": "Safe deviation"}"#,
        )
        .unwrap();
        assert_eq!(imp.safety, 4.0);
        assert_eq!(imp.efficiency, -2.0);
        assert_eq!(imp.time, 6.0);
        assert_eq!(imp.fuel, 250.0);
        assert_eq!(imp.description, "Safe deviation");
    }

    #[test]
    fn test_parse_impact_clamps_scores() {
        let imp = parse_impact(r#"{"safety_impact": 99, "efficiency_impact": -40}"#).unwrap();
        assert_eq!(imp.safety, 10.0);
        assert_eq!(imp.efficiency, -10.0);
        // time/fuel are unconstrained, missing keys default to zero
        assert_eq!(imp.time, 0.0);
    }

    #[test]
    fn test_parse_impact_fenced() {
        let imp = parse_impact("Sure!\n```json\n{\"safety_impact\": -3}\n```").unwrap();
        assert_eq!(imp.safety, -3.0);
    }

    #[test]
    fn test_parse_impact_rejects_prose() {
        assert!(matches!(
            parse_impact("the decision seems fine to me"),
            Err(EngineError::GenerationParse(_))
        ));
    }

    #[test]
    fn test_fold_clamps_high() {
        let imp = ImpactValues {
            safety: 10.0,
            efficiency: 10.0,
            passenger_comfort: 10.0,
            time: -1.0,
            fuel: -100.0,
            description: String::new(),
        };
        let (s, e, c, t, f) = fold_impact(&state(95.0, 99.0, 100.0), &imp);
        assert_eq!((s, e, c), (100.0, 100.0, 100.0));
        assert_eq!(t, 1.0);
        assert_eq!(f, 14100.0);
    }

    #[test]
    fn test_fold_clamps_low() {
        let imp = ImpactValues {
            safety: -10.0,
            efficiency: -10.0,
            passenger_comfort: -10.0,
            time: 4.0,
            fuel: 500.0,
            description: String::new(),
        };
        let (s, e, c, t, f) = fold_impact(&state(5.0, 0.0, 50.0), &imp);
        assert_eq!((s, e, c), (0.0, 0.0, 40.0));
        assert_eq!(t, 6.0);
        assert_eq!(f, 13500.0);
    }

    proptest! {
        #[test]
        fn prop_scores_stay_in_range(
            safety in 0.0f64..=100.0,
            efficiency in 0.0f64..=100.0,
            comfort in 0.0f64..=100.0,
            ds in -10.0f64..=10.0,
            de in -10.0f64..=10.0,
            dc in -10.0f64..=10.0,
        ) {
            let imp = ImpactValues {
                safety: ds,
                efficiency: de,
                passenger_comfort: dc,
                time: 0.0,
                fuel: 0.0,
                description: String::new(),
            };
            let (s, e, c, _, _) = fold_impact(&state(safety, efficiency, comfort), &imp);
            prop_assert!((0.0..=100.0).contains(&s));
            prop_assert!((0.0..=100.0).contains(&e));
            prop_assert!((0.0..=100.0).contains(&c));
        }
    }
}
