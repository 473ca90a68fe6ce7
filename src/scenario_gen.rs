//! Scenario generation
//!
//! Asks the generator to write a complete scenario bundle from a short
//! brief. This is the one path that degrades gracefully: when the model
//! output cannot be parsed (or the call fails outright), a hardcoded
//! minimal scenario is created instead of surfacing the error.

use crate::db::{
    CommunicationInput, Database, DecisionInput, OptionInput, ScenarioBundle, ScenarioInput,
    WaypointInput,
};
use crate::error::Result;
use crate::extract;
use crate::generator::{ChatMessage, TextGenerator};
use serde::Serialize;

/// Outcome of scenario generation. `used_fallback` is true when the bundle
/// came from hardcoded defaults rather than a clean parse.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedScenario {
    pub scenario_id: i32,
    pub used_fallback: bool,
}

fn generation_prompt(brief: &str) -> Vec<ChatMessage> {
    let context = format!(
        "Create a flight-training scenario for this brief: {}\n\n\
         Respond with a JSON object:\n\
         {{\"scenario\": {{\"title\", \"description\", \"aircraft_type\", \
         \"departure_airport\" (ICAO), \"arrival_airport\" (ICAO), \"initial_altitude\" ft, \
         \"initial_heading\" deg, \"initial_fuel\" lbs, \"max_fuel\" lbs, \
         \"fuel_burn_rate\" lbs/min}},\n\
         \"waypoints\": [{{\"name\", \"position_x\" in [-1,1], \"position_y\" in [-1,1], \
         \"sequence\"}}],\n\
         \"decisions\": [{{\"title\", \"description\", \"time_limit\" seconds, \"is_urgent\", \
         \"options\": [{{\"text\", \"consequence\", \"is_recommended\"}}]}}],\n\
         \"communications\": [{{\"type\": \"atc\"|\"crew\"|\"system\", \"sender\", \"message\", \
         \"is_important\", \"trigger_time\" seconds}}],\n\
         \"weather\": {{\"cells\": [{{\"intensity\", \"x\", \"y\", \"size\"}}]}}}}",
        brief
    );
    vec![
        ChatMessage::system(
            "You design realistic airline training scenarios. Respond only with the requested \
             JSON object.",
        ),
        ChatMessage::user(context),
    ]
}

/// Minimal scenario used when generation fails
pub fn fallback_bundle(brief: &str) -> ScenarioBundle {
    let title = if brief.trim().is_empty() {
        "Standard Approach".to_string()
    } else {
        brief.trim().to_string()
    };
    ScenarioBundle {
        scenario: ScenarioInput {
            title,
            description: "Routine sector with a weather decision on the arrival.".to_string(),
            aircraft_type: "B737".to_string(),
            departure_airport: "KJFK".to_string(),
            arrival_airport: "KBOS".to_string(),
            initial_altitude: 28000.0,
            initial_heading: 40.0,
            initial_fuel: 12000.0,
            max_fuel: 18000.0,
            fuel_burn_rate: 45.0,
        },
        waypoints: vec![
            WaypointInput {
                name: "MERIT".to_string(),
                position_x: -0.5,
                position_y: -0.2,
                sequence: 0,
                eta: None,
            },
            WaypointInput {
                name: "ROBUC".to_string(),
                position_x: 0.3,
                position_y: 0.5,
                sequence: 1,
                eta: None,
            },
        ],
        decisions: vec![DecisionInput {
            title: "Weather ahead".to_string(),
            description: "A cell is building along the arrival route.".to_string(),
            time_limit: Some(60),
            is_urgent: false,
            trigger_condition: None,
            options: vec![
                OptionInput {
                    text: "Request deviation around the cell".to_string(),
                    consequence: Some("Adds a few minutes to the arrival".to_string()),
                    is_recommended: true,
                },
                OptionInput {
                    text: "Continue through the area".to_string(),
                    consequence: Some("Expect moderate turbulence".to_string()),
                    is_recommended: false,
                },
            ],
        }],
        communications: vec![CommunicationInput {
            comm_type: "atc".to_string(),
            sender: "Boston Center".to_string(),
            message: "Expect the ROBUC3 arrival".to_string(),
            is_important: false,
            trigger_condition: None,
            trigger_time: Some(45.0),
        }],
        weather: Some(serde_json::json!({
            "cells": [{"intensity": "moderate", "x": 0.25, "y": 0.4, "size": 0.2}]
        })),
    }
}

fn parse_bundle(text: &str) -> Option<ScenarioBundle> {
    let value = extract::extract_json(text)?;
    serde_json::from_value(value).ok()
}

/// Generate and persist a scenario from a brief.
pub fn generate_scenario(
    db: &Database,
    generator: &dyn TextGenerator,
    brief: &str,
) -> Result<GeneratedScenario> {
    let (bundle, used_fallback) = match generator.generate(&generation_prompt(brief)) {
        Ok(text) => match parse_bundle(&text) {
            Some(bundle) => (bundle, false),
            None => {
                eprintln!("Scenario generation: unparseable response, using defaults");
                (fallback_bundle(brief), true)
            }
        },
        Err(e) => {
            eprintln!("Scenario generation call failed, using defaults: {}", e);
            (fallback_bundle(brief), true)
        }
    };

    let scenario_id = db.create_scenario_bundle(&bundle)?;
    Ok(GeneratedScenario {
        scenario_id,
        used_fallback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::CannedGenerator;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(dir.path().join("gen.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_clean_generation() {
        let (_dir, db) = test_db();
        let gen = CannedGenerator::new(vec![
            r#"{"scenario": {"title": "Icing Climb", "aircraft_type": "DHC-8",
                "departure_airport": "ENBR", "arrival_airport": "ENGM",
                "initial_fuel": 6000, "fuel_burn_rate": 25},
                "waypoints": [{"name": "VEMUN", "position_x": 0.1, "position_y": -0.3, "sequence": 0}],
                "decisions": [], "communications": []}"#,
        ]);
        let result = generate_scenario(&db, &gen, "icing on departure").unwrap();
        assert!(!result.used_fallback);
        let detail = db.get_scenario_detail(result.scenario_id).unwrap();
        assert_eq!(detail.scenario.title, "Icing Climb");
        assert_eq!(detail.waypoints.len(), 1);
        // max_fuel unset falls back to initial fuel
        assert_eq!(detail.scenario.max_fuel, 6000.0);
    }

    #[test]
    fn test_unparseable_uses_fallback() {
        let (_dir, db) = test_db();
        let gen = CannedGenerator::new(vec!["I cannot produce JSON today."]);
        let result = generate_scenario(&db, &gen, "engine failure drill").unwrap();
        assert!(result.used_fallback);
        let detail = db.get_scenario_detail(result.scenario_id).unwrap();
        assert_eq!(detail.scenario.title, "engine failure drill");
        assert_eq!(detail.decisions.len(), 1);
        assert_eq!(detail.options.len(), 2);
    }

    #[test]
    fn test_call_failure_uses_fallback() {
        let (_dir, db) = test_db();
        let gen = CannedGenerator::new(vec![]); // no responses queued -> error
        let result = generate_scenario(&db, &gen, "").unwrap();
        assert!(result.used_fallback);
        let detail = db.get_scenario_detail(result.scenario_id).unwrap();
        assert_eq!(detail.scenario.title, "Standard Approach");
    }
}
