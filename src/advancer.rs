//! Decision tree advancer
//!
//! Each DecisionNode is a position in the branching history; the edge taken
//! is the chosen option. Responding to a decision either activates a
//! pre-materialized child node (no generation call) or synthesizes a new
//! branch through the [`TextGenerator`] seam and caches it as rows.

use crate::db::{Database, CommunicationInput, DecisionNode, OptionInput};
use crate::error::{EngineError, Result};
use crate::extract;
use crate::generator::{ChatMessage, TextGenerator};
use serde::{Deserialize, Serialize};

/// The decision a synthesized branch presents next, if any
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextDecision {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub time_limit: Option<i32>,
    #[serde(default)]
    pub is_urgent: bool,
    /// Seconds of scenario time before the decision appears. Zero or absent
    /// means immediately.
    #[serde(default)]
    pub trigger_time: Option<f64>,
    #[serde(default)]
    pub options: Vec<OptionInput>,
}

/// Structured branch response from the generator
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BranchOutcome {
    #[serde(default)]
    pub parameter_changes: Option<serde_json::Value>,
    #[serde(default)]
    pub communications: Vec<CommunicationInput>,
    #[serde(default)]
    pub next_decision: Option<NextDecision>,
}

/// What process_decision did, for the caller and the API envelope
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub response_id: i32,
    /// Node now active (or waiting on its trigger time), if the branch continues
    pub node_id: Option<i32>,
    /// True when the branch was synthesized rather than found cached
    pub synthesized: bool,
    /// Decision activated or scheduled by the branch, if any
    pub next_decision_id: Option<i32>,
}

/// Parse a generated branch response
pub fn parse_branch(text: &str) -> Result<BranchOutcome> {
    let value = extract::extract_json(text).ok_or_else(|| {
        EngineError::GenerationParse(format!(
            "no JSON object in branch response ({} chars)",
            text.len()
        ))
    })?;
    serde_json::from_value(value)
        .map_err(|e| EngineError::GenerationParse(format!("branch response shape: {}", e)))
}

/// Activate a node: flip its flag (clearing any sibling), fire its attached
/// communications, apply its parameter-change payload, and activate its
/// decision. Re-activating an already-active node is a no-op - no duplicate
/// history entries.
pub fn activate_node(db: &Database, node: &DecisionNode) -> Result<bool> {
    let newly_active = db.activate_decision_node(node.scenario_id, node.id)?;
    if !newly_active {
        return Ok(false);
    }

    if let Some(ids_json) = &node.communication_ids {
        let ids: Vec<i32> = serde_json::from_str(ids_json).unwrap_or_default();
        for id in ids {
            // send_queue_item dedupes on the is_sent flag
            db.send_queue_item(id)?;
        }
    }

    if let Some(changes_json) = &node.parameter_changes {
        if let Ok(changes) = serde_json::from_str::<serde_json::Value>(changes_json) {
            if changes.is_object() {
                db.apply_parameter_changes(node.scenario_id, &changes)?;
            }
        }
    }

    if let Some(decision_id) = node.decision_id {
        db.activate_decision(decision_id)?;
    }

    Ok(true)
}

fn branch_prompt(
    db: &Database,
    scenario_id: i32,
    decision_id: i32,
    option_id: i32,
) -> Result<Vec<ChatMessage>> {
    let scenario = db.get_scenario(scenario_id)?;
    let decision = db.get_decision(decision_id)?;
    let option = db.get_option(option_id)?;
    let state = db.current_state(scenario_id)?;
    let params = db.get_parameters(scenario_id)?;

    let mut context = format!(
        "Flight scenario: {} ({} from {} to {}).\n{}\n\n\
         The pilot just resolved the decision \"{}\" by choosing: {}\n",
        scenario.title,
        scenario.aircraft_type,
        scenario.departure_airport,
        scenario.arrival_airport,
        scenario.description,
        decision.title,
        option.text,
    );
    if let Some(consequence) = &option.consequence {
        context.push_str(&format!("Stated consequence: {}\n", consequence));
    }
    if let Some(s) = &state {
        context.push_str(&format!(
            "Scores: safety {:.0}, efficiency {:.0}, comfort {:.0}; time deviation {:.1} min; \
             fuel {:.0} lbs.\n",
            s.safety_score, s.efficiency_score, s.passenger_comfort, s.time_deviation,
            s.fuel_remaining
        ));
    }
    if let Some(p) = &params {
        context.push_str(&format!(
            "Aircraft now: altitude {} ft, heading {}, speed {} kts.\n",
            p.altitude.map(|v| format!("{:.0}", v)).unwrap_or_else(|| "unknown".into()),
            p.heading.map(|v| format!("{:.0}", v)).unwrap_or_else(|| "unknown".into()),
            p.speed.map(|v| format!("{:.0}", v)).unwrap_or_else(|| "unknown".into()),
        ));
    }
    context.push_str(
        "\nWrite what happens next. Respond with a JSON object:\n\
         {\"parameter_changes\": {optional numeric fields: altitude, heading, speed, \
         vertical_speed, fuel_remaining},\n\
         \"communications\": [{\"type\": \"atc\"|\"crew\"|\"system\", \"sender\": string, \
         \"message\": string, \"is_important\": bool, \"trigger_time\": optional seconds}],\n\
         \"next_decision\": optional {\"title\": string, \"description\": string, \
         \"time_limit\": optional seconds, \"is_urgent\": bool, \"trigger_time\": optional \
         seconds until it appears, \"options\": [{\"text\": string, \"consequence\": string, \
         \"is_recommended\": bool}]}}\n\
         Omit next_decision if the scenario should continue without further choices.",
    );

    Ok(vec![
        ChatMessage::system(
            "You are the scenario director of a flight-training simulator. Invent realistic \
             consequences and follow-on decisions. Respond only with the requested JSON object.",
        ),
        ChatMessage::user(context),
    ])
}

/// Persist a synthesized branch and activate or schedule it.
fn materialize_branch(
    db: &Database,
    scenario_id: i32,
    parent_node_id: Option<i32>,
    option_id: i32,
    branch: &BranchOutcome,
) -> Result<(i32, Option<i32>)> {
    // Communications with their own trigger time go to the timed queue; the
    // rest ride on the node and fire at activation.
    let mut attached_ids = Vec::new();
    for comm in &branch.communications {
        let id = db.create_queue_item(scenario_id, comm)?;
        if comm.trigger_time.is_none() {
            attached_ids.push(id);
        }
    }

    let next_decision_id = match &branch.next_decision {
        Some(next) => Some(db.create_decision(
            scenario_id,
            &crate::db::DecisionInput {
                title: next.title.clone(),
                description: next.description.clone(),
                time_limit: next.time_limit,
                is_urgent: next.is_urgent,
                trigger_condition: None,
                options: next.options.clone(),
            },
        )?),
        None => None,
    };

    let trigger_time = branch.next_decision.as_ref().and_then(|n| n.trigger_time);
    let comm_ids_json = serde_json::to_string(&attached_ids).unwrap_or_else(|_| "[]".to_string());
    let changes_json = branch.parameter_changes.as_ref().map(|v| v.to_string());

    let node_id = db.create_decision_node(
        scenario_id,
        next_decision_id,
        parent_node_id,
        Some(option_id),
        false,
        trigger_time,
        Some(&comm_ids_json),
        changes_json.as_deref(),
    )?;

    // Parameter changes take effect immediately, before any trigger delay
    if let Some(changes) = &branch.parameter_changes {
        if changes.is_object() {
            db.apply_parameter_changes(scenario_id, changes)?;
        }
    }

    Ok((node_id, next_decision_id))
}

/// Process a decision response: record it, complete the decision, and move
/// the scenario to the next node - cached if one exists, synthesized
/// otherwise. The recorded response survives even when a later step fails.
pub fn process_decision(
    db: &Database,
    generator: &dyn TextGenerator,
    scenario_id: i32,
    decision_id: i32,
    option_id: i32,
) -> Result<ProcessOutcome> {
    let decision = db.get_decision(decision_id)?;
    if decision.scenario_id != scenario_id {
        return Err(EngineError::Validation(format!(
            "decision {} does not belong to scenario {}",
            decision_id, scenario_id
        )));
    }
    if decision.is_completed {
        return Err(EngineError::Validation(format!(
            "decision {} was already answered",
            decision_id
        )));
    }
    let option = db.get_option(option_id)?;
    if option.decision_id != decision_id {
        return Err(EngineError::Validation(format!(
            "option {} does not belong to decision {}",
            option_id, decision_id
        )));
    }

    let response_id = db.create_decision_response(scenario_id, decision_id, option_id)?;
    db.complete_decision(decision_id)?;

    let current = db.active_decision_node(scenario_id)?;
    if let Some(node) = &current {
        db.deactivate_decision_node(node.id).map_err(|e| {
            EngineError::DecisionProcessing(format!(
                "deactivating node {} (scenario {}): {}",
                node.id, scenario_id, e
            ))
        })?;
    }

    // Cached child: pure state transition, no generation call
    if let Some(parent) = &current {
        if let Some(child) = db.find_child_node(parent.id, option_id)? {
            activate_node(db, &child).map_err(|e| {
                EngineError::DecisionProcessing(format!(
                    "activating cached node {} (scenario {}): {}",
                    child.id, scenario_id, e
                ))
            })?;
            return Ok(ProcessOutcome {
                response_id,
                node_id: Some(child.id),
                synthesized: false,
                next_decision_id: child.decision_id,
            });
        }
    }

    // No cached child: ask the generator to invent the branch
    let messages = branch_prompt(db, scenario_id, decision_id, option_id)?;
    let text = generator.generate(&messages).map_err(|e| {
        EngineError::DecisionProcessing(format!(
            "branch generation (scenario {}, decision {}, option {}): {}",
            scenario_id, decision_id, option_id, e
        ))
    })?;
    let branch = parse_branch(&text).map_err(|e| {
        EngineError::DecisionProcessing(format!(
            "branch parse (scenario {}, decision {}, option {}): {}",
            scenario_id, decision_id, option_id, e
        ))
    })?;

    let parent_id = current.as_ref().map(|n| n.id);
    let (node_id, next_decision_id) =
        materialize_branch(db, scenario_id, parent_id, option_id, &branch).map_err(|e| {
            EngineError::DecisionProcessing(format!(
                "persisting branch (scenario {}, decision {}): {}",
                scenario_id, decision_id, e
            ))
        })?;

    // Immediate trigger: activate now. Delayed: the tick processor owns it.
    let immediate = branch
        .next_decision
        .as_ref()
        .and_then(|n| n.trigger_time)
        .map(|t| t <= 0.0)
        .unwrap_or(true);
    if immediate {
        let node = db.get_decision_node(node_id)?;
        activate_node(db, &node).map_err(|e| {
            EngineError::DecisionProcessing(format!(
                "activating synthesized node {} (scenario {}): {}",
                node_id, scenario_id, e
            ))
        })?;
    }

    Ok(ProcessOutcome {
        response_id,
        node_id: Some(node_id),
        synthesized: true,
        next_decision_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_branch_full() {
        let text = r#"{
            "parameter_changes": {"altitude": 9000, "speed": 210},
            "communications": [
                {"type": "atc", "sender": "Approach", "message": "Descend and maintain 9000", "is_important": true},
                {"type": "crew", "sender": "Cabin", "message": "Secured for landing", "trigger_time": 90}
            ],
            "next_decision": {
                "title": "Runway change",
                "description": "Wind shifted",
                "time_limit": 45,
                "is_urgent": true,
                "trigger_time": 120,
                "options": [
                    {"text": "Accept 23L", "is_recommended": true},
                    {"text": "Request 05R", "consequence": "Longer taxi"}
                ]
            }
        }"#;
        let branch = parse_branch(text).unwrap();
        assert_eq!(branch.communications.len(), 2);
        assert_eq!(branch.communications[0].comm_type, "atc");
        let next = branch.next_decision.unwrap();
        assert_eq!(next.options.len(), 2);
        assert_eq!(next.trigger_time, Some(120.0));
        assert_eq!(
            branch.parameter_changes.unwrap()["altitude"],
            serde_json::json!(9000)
        );
    }

    #[test]
    fn test_parse_branch_leaf() {
        let branch = parse_branch(r#"{"communications": []}"#).unwrap();
        assert!(branch.next_decision.is_none());
        assert!(branch.parameter_changes.is_none());
    }

    #[test]
    fn test_parse_branch_rejects_prose() {
        assert!(matches!(
            parse_branch("and then the flight continued uneventfully"),
            Err(EngineError::GenerationParse(_))
        ));
    }
}
