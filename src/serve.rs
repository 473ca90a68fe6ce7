//! HTTP API for the scenario engine
//!
//! `checkride serve` → JSON endpoints under /scenarios, polled by the
//! training front end roughly once per second. Every response is a
//! `{success, data, error}` envelope; 400 for validation problems, 404 for
//! unresolved ids, 500 for everything else. Handlers are stateless: each
//! request opens the store, does its work and returns.

use crate::advancer;
use crate::db::{CommunicationInput, Database, ScenarioBundle};
use crate::error::{EngineError, Result as EngineResult};
use crate::eval;
use crate::generator::TextGenerator;
use crate::impact;
use crate::scenario_gen;
use crate::tick;
use serde::{Deserialize, Serialize};
use tiny_http::{Header, Method, Request, Response, Server};

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn failure(message: String) -> ApiResponse<T> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Start the scenario API server
pub fn start_server(port: u16, generator: &dyn TextGenerator) -> std::io::Result<()> {
    let addr = format!("127.0.0.1:{}", port);
    let server = Server::http(&addr)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    eprintln!("\n\x1b[1;32m✈ Checkride\x1b[0m");
    eprintln!("   Scenario API: http://localhost:{}/scenarios", port);
    eprintln!("   Press Ctrl+C to stop\n");

    for request in server.incoming_requests() {
        if let Err(e) = handle_request(request, generator) {
            eprintln!("Error: {}", e);
        }
    }

    Ok(())
}

fn json_header() -> Header {
    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap()
}

fn respond<T: Serialize>(
    request: Request,
    result: EngineResult<T>,
) -> std::io::Result<()> {
    let (json, status) = match result {
        Ok(data) => (
            serde_json::to_string(&ApiResponse::success(data))?,
            200u16,
        ),
        Err(e) => {
            let status = e.status_code();
            (
                serde_json::to_string(&ApiResponse::<T>::failure(e.to_string()))?,
                status,
            )
        }
    };
    let response = Response::from_string(json)
        .with_status_code(status)
        .with_header(json_header());
    request.respond(response)
}

fn read_body(request: &mut Request) -> EngineResult<String> {
    let mut body = String::new();
    request
        .as_reader()
        .read_to_string(&mut body)
        .map_err(|e| EngineError::Validation(format!("Failed to read body: {}", e)))?;
    Ok(body)
}

fn parse_body<T: for<'de> Deserialize<'de>>(request: &mut Request) -> EngineResult<T> {
    let body = read_body(request)?;
    serde_json::from_str(&body).map_err(|e| EngineError::Validation(format!("Invalid JSON: {}", e)))
}

#[derive(Deserialize)]
struct ScenarioQuery {
    #[serde(rename = "scenarioId")]
    scenario_id: Option<i32>,
}

/// Pull the required scenarioId out of the query string
fn scenario_id_param(url: &str) -> EngineResult<i32> {
    let query = url.split('?').nth(1).unwrap_or("");
    let parsed: ScenarioQuery = serde_urlencoded::from_str(query)
        .map_err(|e| EngineError::Validation(format!("Bad query string: {}", e)))?;
    parsed
        .scenario_id
        .ok_or_else(|| EngineError::Validation("scenarioId is required".to_string()))
}

fn open_db() -> EngineResult<Database> {
    Database::open().map_err(EngineError::from)
}

fn handle_request(mut request: Request, generator: &dyn TextGenerator) -> std::io::Result<()> {
    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or("/").to_string();
    let method = request.method().clone();

    match (&method, path.as_str()) {
        (&Method::Get, "/scenarios") => {
            let result = open_db().and_then(|db| db.list_scenarios().map_err(EngineError::from));
            respond(request, result)
        }

        (&Method::Post, "/scenarios") => {
            let result = parse_body::<ScenarioBundle>(&mut request).and_then(|bundle| {
                let db = open_db()?;
                let id = db.create_scenario_bundle(&bundle)?;
                db.get_scenario(id).map_err(EngineError::from)
            });
            respond(request, result)
        }

        (&Method::Patch, "/scenarios") => handle_scenario_patch(request),

        (&Method::Post, "/scenarios/generate") => {
            let result = parse_body::<GenerateRequest>(&mut request).and_then(|req| {
                let db = open_db()?;
                scenario_gen::generate_scenario(&db, generator, &req.brief)
            });
            respond(request, result)
        }

        (&Method::Get, "/scenarios/parameters") => {
            let result = scenario_id_param(&url).and_then(|id| {
                let db = open_db()?;
                db.get_parameters(id)?
                    .ok_or_else(|| EngineError::NotFound(format!("parameters for scenario {}", id)))
            });
            respond(request, result)
        }

        (&Method::Patch, "/scenarios/parameters") => {
            let result = scenario_id_param(&url).and_then(|id| {
                let changes = parse_body::<serde_json::Value>(&mut request)?;
                if !changes.is_object() {
                    return Err(EngineError::Validation(
                        "parameter changes must be a JSON object".to_string(),
                    ));
                }
                let db = open_db()?;
                db.apply_parameter_changes(id, &changes)?;
                db.get_parameters(id)?
                    .ok_or_else(|| EngineError::NotFound(format!("parameters for scenario {}", id)))
            });
            respond(request, result)
        }

        (&Method::Get, "/scenarios/timing") => {
            let result = scenario_id_param(&url).and_then(|id| {
                let db = open_db()?;
                db.get_timing(id)?
                    .ok_or_else(|| EngineError::NotFound(format!("timing for scenario {}", id)))
            });
            respond(request, result)
        }

        (&Method::Patch, "/scenarios/timing") => {
            let result = scenario_id_param(&url).and_then(|id| {
                let req = parse_body::<TimingRequest>(&mut request)?;
                let db = open_db()?;
                if let Some(paused) = req.paused {
                    db.set_paused(id, paused)?;
                }
                match req.seconds {
                    Some(seconds) => tick::process_tick(&db, id, seconds),
                    // pause/resume only: report current timing as a no-tick
                    None => tick::process_tick(&db, id, 0.0),
                }
            });
            respond(request, result)
        }

        (&Method::Get, "/scenarios/communications") => {
            let result = scenario_id_param(&url).and_then(|id| {
                let db = open_db()?;
                db.list_communications(id).map_err(EngineError::from)
            });
            respond(request, result)
        }

        (&Method::Post, "/scenarios/communications") => {
            // Immediate send: queue the item and push it straight to history
            let result = parse_body::<PostCommunication>(&mut request).and_then(|req| {
                let db = open_db()?;
                db.get_scenario(req.scenario_id)?;
                let id = db.create_queue_item(req.scenario_id, &req.communication)?;
                db.send_queue_item(id)?;
                db.list_communications(req.scenario_id)
                    .map_err(EngineError::from)
            });
            respond(request, result)
        }

        (&Method::Get, "/scenarios/communications/queue") => {
            let result = scenario_id_param(&url).and_then(|id| {
                let db = open_db()?;
                db.list_queue(id).map_err(EngineError::from)
            });
            respond(request, result)
        }

        (&Method::Get, "/scenarios/decisions") => {
            let result = scenario_id_param(&url).and_then(|id| {
                let db = open_db()?;
                let decisions = db.list_decisions(id)?;
                let mut out = Vec::with_capacity(decisions.len());
                for decision in decisions {
                    let options = db.list_options(decision.id)?;
                    out.push(DecisionWithOptions { decision, options });
                }
                Ok(out)
            });
            respond(request, result)
        }

        (&Method::Get, "/scenarios/decisions/responses") => {
            let result = scenario_id_param(&url).and_then(|id| {
                let db = open_db()?;
                db.list_decision_responses(id).map_err(EngineError::from)
            });
            respond(request, result)
        }

        (&Method::Post, "/scenarios/decisions/responses") => {
            // Raw log write; the decision lifecycle is not touched
            let result = parse_body::<RespondRequest>(&mut request).and_then(|req| {
                let db = open_db()?;
                db.get_decision(req.decision_id)?;
                db.get_option(req.option_id)?;
                let id =
                    db.create_decision_response(req.scenario_id, req.decision_id, req.option_id)?;
                Ok(id)
            });
            respond(request, result)
        }

        (&Method::Get, "/scenarios/decision-nodes") => {
            let result = scenario_id_param(&url).and_then(|id| {
                let db = open_db()?;
                db.list_decision_nodes(id).map_err(EngineError::from)
            });
            respond(request, result)
        }

        (&Method::Patch, "/scenarios/decision-nodes") => {
            let result = parse_body::<ActivateNodeRequest>(&mut request).and_then(|req| {
                let db = open_db()?;
                let node = db.get_decision_node(req.node_id)?;
                advancer::activate_node(&db, &node)?;
                db.get_decision_node(req.node_id).map_err(EngineError::from)
            });
            respond(request, result)
        }

        (&Method::Get, "/scenarios/adaptations") => {
            let result = scenario_id_param(&url).and_then(|id| {
                let db = open_db()?;
                db.list_adaptations(id).map_err(EngineError::from)
            });
            respond(request, result)
        }

        (&Method::Post, "/scenarios/adaptations") => {
            let result = parse_body::<ScenarioIdBody>(&mut request).and_then(|req| {
                let db = open_db()?;
                crate::adapt::record_adaptation(&db, req.scenario_id)
            });
            respond(request, result)
        }

        (&Method::Get, "/scenarios/state") => {
            let result = scenario_id_param(&url).and_then(|id| {
                let db = open_db()?;
                let current = db.current_state(id)?;
                let history = db.list_states(id)?;
                Ok(StateView { current, history })
            });
            respond(request, result)
        }

        (&Method::Post, "/scenarios/state") => {
            // Apply the impact of a chosen option to the running state
            let result = parse_body::<RespondRequest>(&mut request).and_then(|req| {
                let db = open_db()?;
                impact::apply_decision_impact(
                    &db,
                    generator,
                    req.scenario_id,
                    req.decision_id,
                    req.option_id,
                )
            });
            respond(request, result)
        }

        (&Method::Get, "/scenarios/evaluation") => {
            let result = scenario_id_param(&url).and_then(|id| {
                let db = open_db()?;
                db.get_evaluation(id)?
                    .ok_or_else(|| EngineError::NotFound(format!("evaluation for scenario {}", id)))
            });
            respond(request, result)
        }

        (&Method::Post, "/scenarios/evaluate") => {
            let result = scenario_id_param(&url).and_then(|id| {
                let db = open_db()?;
                eval::evaluate_scenario(&db, generator, id)
            });
            respond(request, result)
        }

        (&Method::Get, "/scenarios/report") => {
            let result = scenario_id_param(&url).and_then(|id| {
                let db = open_db()?;
                eval::generate_performance_report(&db, generator, id)
            });
            respond(request, result)
        }

        _ => handle_dynamic(request, &method, &path, generator),
    }
}

/// Routes with an id segment in the path
fn handle_dynamic(
    mut request: Request,
    method: &Method,
    path: &str,
    generator: &dyn TextGenerator,
) -> std::io::Result<()> {
    // PATCH /scenarios/communications/queue/{id} -> mark sent
    if let Some(rest) = path.strip_prefix("/scenarios/communications/queue/") {
        if *method == Method::Patch {
            let result = parse_path_id(rest).and_then(|id| {
                let db = open_db()?;
                let item = db.get_queue_item(id)?;
                db.send_queue_item(id)?;
                db.get_queue_item(item.id).map_err(EngineError::from)
            });
            return respond(request, result);
        }
    }

    // PATCH /scenarios/decisions/{id} -> respond with an option (advancer)
    if let Some(rest) = path.strip_prefix("/scenarios/decisions/") {
        if *method == Method::Patch {
            let result = parse_path_id(rest).and_then(|decision_id| {
                let req = parse_body::<DecisionPatch>(&mut request)?;
                let db = open_db()?;
                advancer::process_decision(
                    &db,
                    generator,
                    req.scenario_id,
                    decision_id,
                    req.option_id,
                )
            });
            return respond(request, result);
        }
        if *method == Method::Get {
            let result = parse_path_id(rest).and_then(|decision_id| {
                let db = open_db()?;
                let decision = db.get_decision(decision_id)?;
                let options = db.list_options(decision_id)?;
                Ok(DecisionWithOptions { decision, options })
            });
            return respond(request, result);
        }
    }

    // GET /scenarios/{id} -> full bundle detail
    if let Some(rest) = path.strip_prefix("/scenarios/") {
        if *method == Method::Get {
            let result = parse_path_id(rest).and_then(|id| {
                let db = open_db()?;
                db.get_scenario_detail(id).map_err(EngineError::from)
            });
            return respond(request, result);
        }
    }

    let response = Response::from_string(
        serde_json::to_string(&ApiResponse::<()>::failure("Not found".to_string()))?,
    )
    .with_status_code(404)
    .with_header(json_header());
    request.respond(response)
}

fn parse_path_id(segment: &str) -> EngineResult<i32> {
    segment
        .parse::<i32>()
        .map_err(|_| EngineError::Validation(format!("Bad id in path: {}", segment)))
}

fn handle_scenario_patch(mut request: Request) -> std::io::Result<()> {
    let result = parse_body::<ScenarioAction>(&mut request).and_then(|req| {
        let db = open_db()?;
        match req.action.as_str() {
            "activate" => db.activate_scenario(req.id)?,
            "deactivate" => db.deactivate_scenario(req.id)?,
            other => {
                return Err(EngineError::Validation(format!(
                    "Unknown action '{}' (expected activate or deactivate)",
                    other
                )))
            }
        }
        db.get_scenario(req.id).map_err(EngineError::from)
    });
    respond(request, result)
}

// ============================================================================
// Request/response bodies
// ============================================================================

#[derive(Deserialize)]
struct GenerateRequest {
    #[serde(default)]
    brief: String,
}

#[derive(Deserialize)]
struct ScenarioAction {
    id: i32,
    action: String,
}

#[derive(Deserialize)]
struct TimingRequest {
    #[serde(default)]
    seconds: Option<f64>,
    #[serde(default)]
    paused: Option<bool>,
}

#[derive(Deserialize)]
struct PostCommunication {
    scenario_id: i32,
    #[serde(flatten)]
    communication: CommunicationInput,
}

#[derive(Deserialize)]
struct RespondRequest {
    scenario_id: i32,
    decision_id: i32,
    option_id: i32,
}

#[derive(Deserialize)]
struct DecisionPatch {
    scenario_id: i32,
    option_id: i32,
}

#[derive(Deserialize)]
struct ScenarioIdBody {
    scenario_id: i32,
}

#[derive(Deserialize)]
struct ActivateNodeRequest {
    node_id: i32,
}

#[derive(Serialize)]
struct DecisionWithOptions {
    decision: crate::db::Decision,
    options: Vec<crate::db::DecisionOption>,
}

#[derive(Serialize)]
struct StateView {
    current: Option<crate::db::ScenarioState>,
    history: Vec<crate::db::ScenarioState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    // === ApiResponse Tests ===

    #[test]
    fn test_api_response_success() {
        let response: ApiResponse<String> = ApiResponse::success("hello".to_string());
        assert!(response.success);
        assert_eq!(response.data, Some("hello".to_string()));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_api_response_serializes_to_json() {
        let response: ApiResponse<String> = ApiResponse::success("test".to_string());
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"data\":\"test\""));
        assert!(json.contains("\"error\":null"));
    }

    #[test]
    fn test_api_response_failure_envelope() {
        let response: ApiResponse<()> = ApiResponse::failure("scenarioId is required".to_string());
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("scenarioId is required"));
    }

    // === Query/path parsing ===

    #[test]
    fn test_scenario_id_param() {
        assert_eq!(scenario_id_param("/scenarios/timing?scenarioId=7").unwrap(), 7);
        assert!(matches!(
            scenario_id_param("/scenarios/timing"),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            scenario_id_param("/scenarios/timing?scenarioId=abc"),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_path_id() {
        assert_eq!(parse_path_id("42").unwrap(), 42);
        assert!(parse_path_id("42/extra").is_err());
        assert!(parse_path_id("").is_err());
    }

    #[test]
    fn test_timing_request_shapes() {
        let tick: TimingRequest = serde_json::from_str(r#"{"seconds": 1.0}"#).unwrap();
        assert_eq!(tick.seconds, Some(1.0));
        assert!(tick.paused.is_none());

        let pause: TimingRequest = serde_json::from_str(r#"{"paused": true}"#).unwrap();
        assert!(pause.seconds.is_none());
        assert_eq!(pause.paused, Some(true));
    }

    #[test]
    fn test_post_communication_flatten() {
        let req: PostCommunication = serde_json::from_str(
            r#"{"scenario_id": 3, "type": "crew", "sender": "Purser", "message": "Cabin ready"}"#,
        )
        .unwrap();
        assert_eq!(req.scenario_id, 3);
        assert_eq!(req.communication.comm_type, "crew");
        assert_eq!(req.communication.sender, "Purser");
    }
}
