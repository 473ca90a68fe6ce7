//! Scenario tick processor
//!
//! Advances one scenario's clock by a caller-supplied number of seconds.
//! Pacing is external - a client polls roughly once per second; nothing in
//! this process owns a timer. Every step after the timing update is
//! logged-but-non-fatal: a simulator or trigger failure must not halt the
//! scenario clock.

use crate::advancer;
use crate::db::Database;
use crate::error::{EngineError, Result};
use crate::sim;
use serde::Serialize;

/// What one tick did
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub scenario_id: i32,
    /// Elapsed scenario seconds after this tick
    pub elapsed_seconds: f64,
    pub paused: bool,
    /// False when there was no timing record or the scenario is paused
    pub ticked: bool,
    pub parameters_updated: bool,
    pub activated_nodes: Vec<i32>,
    pub sent_communications: Vec<i32>,
}

impl TickReport {
    fn noop(scenario_id: i32, elapsed_seconds: f64, paused: bool) -> Self {
        Self {
            scenario_id,
            elapsed_seconds,
            paused,
            ticked: false,
            parameters_updated: false,
            activated_nodes: Vec::new(),
            sent_communications: Vec::new(),
        }
    }
}

/// Advance one scenario by `seconds` of simulated time.
pub fn process_tick(db: &Database, scenario_id: i32, seconds: f64) -> Result<TickReport> {
    if seconds < 0.0 || !seconds.is_finite() {
        return Err(EngineError::Validation(format!(
            "tick seconds must be a non-negative number, got {}",
            seconds
        )));
    }

    // 1. No timing record or paused: no-op
    let Some(timing) = db.get_timing(scenario_id)? else {
        return Ok(TickReport::noop(scenario_id, 0.0, false));
    };
    if timing.is_paused {
        return Ok(TickReport::noop(scenario_id, timing.elapsed_seconds, true));
    }

    // 2. Advance the clock. A failure here is fatal to the tick.
    let elapsed = timing.elapsed_seconds + seconds;
    db.update_timing(scenario_id, elapsed, false)?;

    let mut report = TickReport {
        scenario_id,
        elapsed_seconds: elapsed,
        paused: false,
        ticked: true,
        parameters_updated: false,
        activated_nodes: Vec::new(),
        sent_communications: Vec::new(),
    };

    // 3. Simulate parameters. Non-fatal: the clock keeps running even when
    // the simulator cannot.
    match sim::simulate_scenario(db, scenario_id, seconds) {
        Ok(_) => report.parameters_updated = true,
        Err(e) => {
            eprintln!("Tick {}: parameter simulation failed: {}", scenario_id, e);
        }
    }

    // 4. Time-triggered decision nodes
    match db.due_decision_nodes(scenario_id, elapsed) {
        Ok(nodes) => {
            for node in nodes {
                match advancer::activate_node(db, &node) {
                    Ok(true) => report.activated_nodes.push(node.id),
                    Ok(false) => {}
                    Err(e) => {
                        eprintln!(
                            "Tick {}: activating node {} failed: {}",
                            scenario_id, node.id, e
                        );
                    }
                }
            }
        }
        Err(e) => eprintln!("Tick {}: querying due nodes failed: {}", scenario_id, e),
    }

    // 5. Time-triggered communications
    match db.due_queue_items(scenario_id, elapsed) {
        Ok(items) => {
            for item in items {
                match db.send_queue_item(item.id) {
                    Ok(true) => report.sent_communications.push(item.id),
                    Ok(false) => {}
                    Err(e) => {
                        eprintln!(
                            "Tick {}: sending communication {} failed: {}",
                            scenario_id, item.id, e
                        );
                    }
                }
            }
        }
        Err(e) => eprintln!("Tick {}: querying due communications failed: {}", scenario_id, e),
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        CommunicationInput, DecisionInput, OptionInput, ScenarioBundle, ScenarioInput,
    };

    fn setup() -> (tempfile::TempDir, Database, i32) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(dir.path().join("tick.db")).unwrap();
        let bundle = ScenarioBundle {
            scenario: ScenarioInput {
                title: "Storm Approach".to_string(),
                description: String::new(),
                aircraft_type: "B737".to_string(),
                departure_airport: "EGLL".to_string(),
                arrival_airport: "EGCC".to_string(),
                initial_altitude: 34000.0,
                initial_heading: 330.0,
                initial_fuel: 15000.0,
                max_fuel: 20000.0,
                fuel_burn_rate: 50.0,
            },
            waypoints: vec![],
            decisions: vec![],
            communications: vec![CommunicationInput {
                comm_type: "atc".to_string(),
                sender: "London Control".to_string(),
                message: "Contact Scottish on 134.775".to_string(),
                is_important: false,
                trigger_condition: None,
                trigger_time: Some(30.0),
            }],
            weather: None,
        };
        let id = db.create_scenario_bundle(&bundle).unwrap();
        db.activate_scenario(id).unwrap();
        (dir, db, id)
    }

    #[test]
    fn test_sixty_second_tick_burns_fuel() {
        let (_dir, db, id) = setup();
        let report = process_tick(&db, id, 60.0).unwrap();
        assert!(report.ticked);
        assert!(report.parameters_updated);
        assert_eq!(report.elapsed_seconds, 60.0);

        let params = db.get_parameters(id).unwrap().unwrap();
        assert!((params.fuel_remaining - 14950.0).abs() < 1e-9);
    }

    #[test]
    fn test_due_communication_sent_once() {
        let (_dir, db, id) = setup();
        let report = process_tick(&db, id, 31.0).unwrap();
        assert_eq!(report.sent_communications.len(), 1);
        assert_eq!(db.list_communications(id).unwrap().len(), 1);

        // next tick must not re-send
        let report = process_tick(&db, id, 1.0).unwrap();
        assert!(report.sent_communications.is_empty());
        assert_eq!(db.list_communications(id).unwrap().len(), 1);
    }

    #[test]
    fn test_communication_not_sent_before_trigger() {
        let (_dir, db, id) = setup();
        let report = process_tick(&db, id, 10.0).unwrap();
        assert!(report.sent_communications.is_empty());
        assert!(db.list_communications(id).unwrap().is_empty());
    }

    #[test]
    fn test_elapsed_monotone_and_frozen_while_paused() {
        let (_dir, db, id) = setup();
        process_tick(&db, id, 5.0).unwrap();
        process_tick(&db, id, 7.0).unwrap();
        let timing = db.get_timing(id).unwrap().unwrap();
        assert_eq!(timing.elapsed_seconds, 12.0);

        db.set_paused(id, true).unwrap();
        let report = process_tick(&db, id, 30.0).unwrap();
        assert!(!report.ticked);
        assert!(report.paused);
        assert_eq!(db.get_timing(id).unwrap().unwrap().elapsed_seconds, 12.0);

        db.set_paused(id, false).unwrap();
        process_tick(&db, id, 3.0).unwrap();
        assert_eq!(db.get_timing(id).unwrap().unwrap().elapsed_seconds, 15.0);
    }

    #[test]
    fn test_tick_without_timing_is_noop() {
        let (_dir, db, id) = setup();
        db.deactivate_scenario(id).unwrap();
        let report = process_tick(&db, id, 60.0).unwrap();
        assert!(!report.ticked);
    }

    #[test]
    fn test_negative_seconds_rejected() {
        let (_dir, db, id) = setup();
        assert!(matches!(
            process_tick(&db, id, -1.0),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_due_node_activates_decision() {
        let (_dir, db, id) = setup();
        let decision_id = db
            .create_decision(
                id,
                &DecisionInput {
                    title: "Divert?".to_string(),
                    description: "Weather below minimums".to_string(),
                    time_limit: Some(60),
                    is_urgent: true,
                    trigger_condition: None,
                    options: vec![OptionInput {
                        text: "Divert to alternate".to_string(),
                        consequence: None,
                        is_recommended: true,
                    }],
                },
            )
            .unwrap();
        let node_id = db
            .create_decision_node(id, Some(decision_id), None, None, false, Some(45.0), None, None)
            .unwrap();

        // before the trigger time: nothing happens
        let report = process_tick(&db, id, 40.0).unwrap();
        assert!(report.activated_nodes.is_empty());
        assert!(!db.get_decision(decision_id).unwrap().is_active);

        // crossing it: node and decision both activate
        let report = process_tick(&db, id, 10.0).unwrap();
        assert_eq!(report.activated_nodes, vec![node_id]);
        assert!(db.get_decision_node(node_id).unwrap().is_active);
        assert!(db.get_decision(decision_id).unwrap().is_active);
    }
}
