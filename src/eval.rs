//! Scenario evaluator
//!
//! Aggregates state, decision and communication history for a finished
//! scenario, asks the generator for a scored evaluation, and persists it.
//! The free-text performance report is presentation content and is returned
//! to the caller without being stored.

use crate::db::{Database, ScenarioEvaluation};
use crate::error::{EngineError, Result};
use crate::extract;
use crate::generator::{ChatMessage, TextGenerator};
use serde::Serialize;

/// One answered decision, joined with its text and recommended flag
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub decision_title: String,
    pub option_text: String,
    pub is_recommended: bool,
    pub responded_at: String,
}

/// Full response history for a scenario, in answer order
pub fn decision_history(db: &Database, scenario_id: i32) -> Result<Vec<HistoryEntry>> {
    let responses = db.list_decision_responses(scenario_id)?;
    let mut entries = Vec::with_capacity(responses.len());
    for resp in responses {
        let decision = db.get_decision(resp.decision_id)?;
        let option = db.get_option(resp.option_id)?;
        entries.push(HistoryEntry {
            decision_title: decision.title,
            option_text: option.text,
            is_recommended: option.is_recommended,
            responded_at: resp.responded_at,
        });
    }
    Ok(entries)
}

/// Share of choices that matched the recommended option. Zero when no
/// decisions were answered.
pub fn recommended_ratio(history: &[HistoryEntry]) -> f64 {
    if history.is_empty() {
        return 0.0;
    }
    let recommended = history.iter().filter(|h| h.is_recommended).count();
    recommended as f64 / history.len() as f64
}

fn evaluation_prompt(db: &Database, scenario_id: i32) -> Result<Vec<ChatMessage>> {
    let scenario = db.get_scenario(scenario_id)?;
    let state = db.current_state(scenario_id)?.ok_or_else(|| {
        EngineError::NotFound(format!("state for scenario {}", scenario_id))
    })?;
    let history = decision_history(db, scenario_id)?;
    let comms = db.list_communications(scenario_id)?;
    let ratio = recommended_ratio(&history);

    let mut context = format!(
        "Evaluate the pilot's performance in the scenario \"{}\" ({} from {} to {}).\n\n\
         Final state: safety {:.0}, efficiency {:.0}, passenger comfort {:.0}; \
         time deviation {:.1} minutes; fuel remaining {:.0} lbs.\n\n",
        scenario.title,
        scenario.aircraft_type,
        scenario.departure_airport,
        scenario.arrival_airport,
        state.safety_score,
        state.efficiency_score,
        state.passenger_comfort,
        state.time_deviation,
        state.fuel_remaining,
    );

    context.push_str(&format!(
        "Decisions answered: {}. Recommended-choice ratio: {:.2}\n",
        history.len(),
        ratio
    ));
    for entry in &history {
        context.push_str(&format!(
            "- \"{}\" -> chose \"{}\"{}\n",
            entry.decision_title,
            entry.option_text,
            if entry.is_recommended { " (recommended)" } else { "" }
        ));
    }

    context.push_str(&format!("\nRadio traffic received: {} messages.\n", comms.len()));
    context.push_str(
        "\nRespond with a JSON object: {\"safety_score\": 0-100, \"efficiency_score\": 0-100, \
         \"passenger_comfort_score\": 0-100, \"overall_score\": 0-100, \
         \"strengths\": [strings], \"improvements\": [strings], \"recommendations\": [strings]}.",
    );

    Ok(vec![
        ChatMessage::system(
            "You are a senior flight instructor writing a debrief for a completed training \
             scenario. Respond only with the requested JSON object.",
        ),
        ChatMessage::user(context),
    ])
}

fn string_list(value: &serde_json::Value, key: &str) -> String {
    let list: Vec<String> = value
        .get(key)
        .and_then(serde_json::Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(serde_json::Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    serde_json::to_string(&list).unwrap_or_else(|_| "[]".to_string())
}

/// Evaluate a scenario and persist one ScenarioEvaluation.
pub fn evaluate_scenario(
    db: &Database,
    generator: &dyn TextGenerator,
    scenario_id: i32,
) -> Result<ScenarioEvaluation> {
    let messages = evaluation_prompt(db, scenario_id)?;
    let text = generator.generate(&messages)?;
    let value = extract::extract_json(&text).ok_or_else(|| {
        EngineError::GenerationParse(format!(
            "no JSON object in evaluation response for scenario {}",
            scenario_id
        ))
    })?;

    let score = |key: &str| {
        value
            .get(key)
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 100.0)
    };
    let safety = score("safety_score");
    let efficiency = score("efficiency_score");
    let comfort = score("passenger_comfort_score");
    let overall = if value.get("overall_score").is_some() {
        score("overall_score")
    } else {
        (safety + efficiency + comfort) / 3.0
    };

    db.create_evaluation(
        scenario_id,
        safety,
        efficiency,
        comfort,
        overall,
        &string_list(&value, "strengths"),
        &string_list(&value, "improvements"),
        &string_list(&value, "recommendations"),
    )?;

    db.get_evaluation(scenario_id)?.ok_or_else(|| {
        EngineError::Storage(crate::db::DbError::Validation(
            "evaluation vanished after insert".to_string(),
        ))
    })
}

/// Free-text markdown debrief. Reads the stored evaluation and history;
/// the result is returned, not persisted.
pub fn generate_performance_report(
    db: &Database,
    generator: &dyn TextGenerator,
    scenario_id: i32,
) -> Result<String> {
    let evaluation = db.get_evaluation(scenario_id)?.ok_or_else(|| {
        EngineError::NotFound(format!("evaluation for scenario {}", scenario_id))
    })?;
    let scenario = db.get_scenario(scenario_id)?;
    let history = decision_history(db, scenario_id)?;

    let mut context = format!(
        "Write a markdown performance report for the pilot who flew \"{}\".\n\
         Scores: safety {:.0}, efficiency {:.0}, passenger comfort {:.0}, overall {:.0}.\n\
         Strengths: {}\nAreas to improve: {}\nRecommendations: {}\n\nDecisions:\n",
        scenario.title,
        evaluation.safety_score,
        evaluation.efficiency_score,
        evaluation.passenger_comfort_score,
        evaluation.overall_score,
        evaluation.strengths,
        evaluation.improvements,
        evaluation.recommendations,
    );
    for entry in &history {
        context.push_str(&format!(
            "- \"{}\": {}\n",
            entry.decision_title, entry.option_text
        ));
    }
    context.push_str(
        "\nStructure it with sections for summary, decision analysis and next steps. \
         Markdown only, no JSON.",
    );

    let text = generator.generate(&[
        ChatMessage::system(
            "You are a senior flight instructor writing a post-scenario debrief in markdown.",
        ),
        ChatMessage::user(context),
    ])?;
    Ok(text)
}
