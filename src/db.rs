//! SQLite database with Diesel ORM
//!
//! Stores scenarios, their child records (waypoints, decisions, options,
//! communications, weather), the branching decision-node forest, and the
//! append-only state/response/communication history logs.

use crate::schema::*;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Walk up directory tree to find .checkride folder (like git finds .git)
/// Can be overridden with CHECKRIDE_DB_PATH env var
fn get_db_path() -> std::path::PathBuf {
    // Check env var first - always takes priority
    if let Ok(path) = std::env::var("CHECKRIDE_DB_PATH") {
        return std::path::PathBuf::from(path);
    }

    // Walk up directory tree to find .checkride folder
    if let Ok(current_dir) = std::env::current_dir() {
        let mut dir = current_dir.as_path();
        loop {
            let checkride_dir = dir.join(".checkride");
            if checkride_dir.exists() && checkride_dir.is_dir() {
                return checkride_dir.join("checkride.db");
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break, // Reached filesystem root
            }
        }
    }

    // No .checkride found - default to current directory
    // (checkride init will create it here)
    std::path::PathBuf::from(".checkride/checkride.db")
}

// ============================================================================
// Diesel Models
// ============================================================================

/// Insertable scenario
#[derive(Insertable)]
#[diesel(table_name = scenarios)]
pub struct NewScenario<'a> {
    pub change_id: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub aircraft_type: &'a str,
    pub departure_airport: &'a str,
    pub arrival_airport: &'a str,
    pub initial_altitude: f64,
    pub initial_heading: f64,
    pub initial_fuel: f64,
    pub max_fuel: f64,
    pub fuel_burn_rate: f64,
    pub is_active: bool,
    pub created_at: &'a str,
}

/// Queryable scenario
#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = scenarios)]
pub struct Scenario {
    pub id: i32,
    pub change_id: String,
    pub title: String,
    pub description: String,
    pub aircraft_type: String,
    pub departure_airport: String,
    pub arrival_airport: String,
    pub initial_altitude: f64,
    pub initial_heading: f64,
    pub initial_fuel: f64,
    pub max_fuel: f64,
    pub fuel_burn_rate: f64,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = waypoints)]
pub struct NewWaypoint<'a> {
    pub scenario_id: i32,
    pub name: &'a str,
    pub position_x: f64,
    pub position_y: f64,
    pub sequence: i32,
    pub is_active: bool,
    pub is_passed: bool,
    pub eta: Option<&'a str>,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = waypoints)]
pub struct Waypoint {
    pub id: i32,
    pub scenario_id: i32,
    pub name: String,
    pub position_x: f64,
    pub position_y: f64,
    pub sequence: i32,
    pub is_active: bool,
    pub is_passed: bool,
    pub eta: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = weather_conditions)]
pub struct NewWeatherCondition<'a> {
    pub scenario_id: i32,
    pub conditions_json: &'a str,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = weather_conditions)]
pub struct WeatherCondition {
    pub id: i32,
    pub scenario_id: i32,
    pub conditions_json: String,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = decisions)]
pub struct NewDecision<'a> {
    pub scenario_id: i32,
    pub title: &'a str,
    pub description: &'a str,
    pub time_limit: Option<i32>,
    pub is_urgent: bool,
    pub trigger_condition: Option<&'a str>,
    pub is_active: bool,
    pub is_completed: bool,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = decisions)]
pub struct Decision {
    pub id: i32,
    pub scenario_id: i32,
    pub title: String,
    pub description: String,
    pub time_limit: Option<i32>,
    pub is_urgent: bool,
    pub trigger_condition: Option<String>,
    pub is_active: bool,
    pub is_completed: bool,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = decision_options)]
pub struct NewDecisionOption<'a> {
    pub decision_id: i32,
    pub text: &'a str,
    pub consequence: Option<&'a str>,
    pub is_recommended: bool,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = decision_options)]
pub struct DecisionOption {
    pub id: i32,
    pub decision_id: i32,
    pub text: String,
    pub consequence: Option<String>,
    pub is_recommended: bool,
}

#[derive(Insertable)]
#[diesel(table_name = decision_nodes)]
pub struct NewDecisionNode<'a> {
    pub scenario_id: i32,
    pub decision_id: Option<i32>,
    pub parent_node_id: Option<i32>,
    pub option_id: Option<i32>,
    pub is_active: bool,
    pub trigger_time: Option<f64>,
    pub communication_ids: Option<&'a str>,
    pub parameter_changes: Option<&'a str>,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = decision_nodes)]
pub struct DecisionNode {
    pub id: i32,
    pub scenario_id: i32,
    pub decision_id: Option<i32>,
    pub parent_node_id: Option<i32>,
    pub option_id: Option<i32>,
    pub is_active: bool,
    pub trigger_time: Option<f64>,
    pub communication_ids: Option<String>,
    pub parameter_changes: Option<String>,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = decision_responses)]
pub struct NewDecisionResponse<'a> {
    pub scenario_id: i32,
    pub decision_id: i32,
    pub option_id: i32,
    pub responded_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = decision_responses)]
pub struct DecisionResponse {
    pub id: i32,
    pub scenario_id: i32,
    pub decision_id: i32,
    pub option_id: i32,
    pub responded_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = decision_impacts)]
pub struct NewDecisionImpact<'a> {
    pub scenario_id: i32,
    pub decision_id: i32,
    pub option_id: i32,
    pub safety_impact: f64,
    pub efficiency_impact: f64,
    pub passenger_comfort_impact: f64,
    pub time_impact: f64,
    pub fuel_impact: f64,
    pub description: &'a str,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = decision_impacts)]
pub struct DecisionImpact {
    pub id: i32,
    pub scenario_id: i32,
    pub decision_id: i32,
    pub option_id: i32,
    pub safety_impact: f64,
    pub efficiency_impact: f64,
    pub passenger_comfort_impact: f64,
    pub time_impact: f64,
    pub fuel_impact: f64,
    pub description: String,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = communication_queue)]
pub struct NewQueueItem<'a> {
    pub scenario_id: i32,
    pub comm_type: &'a str,
    pub sender: &'a str,
    pub message: &'a str,
    pub is_important: bool,
    pub trigger_condition: Option<&'a str>,
    pub trigger_time: Option<f64>,
    pub is_sent: bool,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = communication_queue)]
pub struct QueueItem {
    pub id: i32,
    pub scenario_id: i32,
    pub comm_type: String,
    pub sender: String,
    pub message: String,
    pub is_important: bool,
    pub trigger_condition: Option<String>,
    pub trigger_time: Option<f64>,
    pub is_sent: bool,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = communications)]
pub struct NewCommunication<'a> {
    pub scenario_id: i32,
    pub comm_type: &'a str,
    pub sender: &'a str,
    pub message: &'a str,
    pub is_important: bool,
    pub sent_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = communications)]
pub struct Communication {
    pub id: i32,
    pub scenario_id: i32,
    pub comm_type: String,
    pub sender: String,
    pub message: String,
    pub is_important: bool,
    pub sent_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = scenario_states)]
pub struct NewScenarioState<'a> {
    pub scenario_id: i32,
    pub safety_score: f64,
    pub efficiency_score: f64,
    pub passenger_comfort: f64,
    pub time_deviation: f64,
    pub fuel_remaining: f64,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = scenario_states)]
pub struct ScenarioState {
    pub id: i32,
    pub scenario_id: i32,
    pub safety_score: f64,
    pub efficiency_score: f64,
    pub passenger_comfort: f64,
    pub time_deviation: f64,
    pub fuel_remaining: f64,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = scenario_parameters)]
pub struct NewScenarioParameters<'a> {
    pub scenario_id: i32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub vertical_speed: Option<f64>,
    pub fuel_remaining: f64,
    pub fuel_burn_rate: f64,
    pub updated_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = scenario_parameters)]
pub struct ScenarioParameters {
    pub id: i32,
    pub scenario_id: i32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub vertical_speed: Option<f64>,
    pub fuel_remaining: f64,
    pub fuel_burn_rate: f64,
    pub updated_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = scenario_timing)]
pub struct NewScenarioTiming<'a> {
    pub scenario_id: i32,
    pub started_at: &'a str,
    pub last_update: &'a str,
    pub is_paused: bool,
    pub elapsed_seconds: f64,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = scenario_timing)]
pub struct ScenarioTiming {
    pub id: i32,
    pub scenario_id: i32,
    pub started_at: String,
    pub last_update: String,
    pub is_paused: bool,
    pub elapsed_seconds: f64,
}

#[derive(Insertable)]
#[diesel(table_name = scenario_evaluations)]
pub struct NewScenarioEvaluation<'a> {
    pub scenario_id: i32,
    pub safety_score: f64,
    pub efficiency_score: f64,
    pub passenger_comfort_score: f64,
    pub overall_score: f64,
    pub strengths: &'a str,
    pub improvements: &'a str,
    pub recommendations: &'a str,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = scenario_evaluations)]
pub struct ScenarioEvaluation {
    pub id: i32,
    pub scenario_id: i32,
    pub safety_score: f64,
    pub efficiency_score: f64,
    pub passenger_comfort_score: f64,
    pub overall_score: f64,
    pub strengths: String,
    pub improvements: String,
    pub recommendations: String,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = difficulty_adaptations)]
pub struct NewDifficultyAdaptation<'a> {
    pub scenario_id: i32,
    pub action: &'a str,
    pub reason: &'a str,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = difficulty_adaptations)]
pub struct DifficultyAdaptation {
    pub id: i32,
    pub scenario_id: i32,
    pub action: String,
    pub reason: String,
    pub created_at: String,
}

// ============================================================================
// Bundle input types (owned; deserialized from the API or the generator)
// ============================================================================

/// Scenario fields supplied by a caller (generator output or POST body).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub aircraft_type: String,
    pub departure_airport: String,
    pub arrival_airport: String,
    #[serde(default)]
    pub initial_altitude: f64,
    #[serde(default)]
    pub initial_heading: f64,
    pub initial_fuel: f64,
    #[serde(default)]
    pub max_fuel: f64,
    pub fuel_burn_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaypointInput {
    pub name: String,
    pub position_x: f64,
    pub position_y: f64,
    pub sequence: i32,
    #[serde(default)]
    pub eta: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionInput {
    pub text: String,
    #[serde(default)]
    pub consequence: Option<String>,
    #[serde(default)]
    pub is_recommended: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub time_limit: Option<i32>,
    #[serde(default)]
    pub is_urgent: bool,
    #[serde(default)]
    pub trigger_condition: Option<String>,
    #[serde(default)]
    pub options: Vec<OptionInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationInput {
    #[serde(default = "default_comm_type", alias = "type")]
    pub comm_type: String,
    pub sender: String,
    pub message: String,
    #[serde(default)]
    pub is_important: bool,
    #[serde(default)]
    pub trigger_condition: Option<String>,
    #[serde(default)]
    pub trigger_time: Option<f64>,
}

fn default_comm_type() -> String {
    "atc".to_string()
}

/// A scenario together with all of its child records, created as one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioBundle {
    pub scenario: ScenarioInput,
    #[serde(default)]
    pub waypoints: Vec<WaypointInput>,
    #[serde(default)]
    pub decisions: Vec<DecisionInput>,
    #[serde(default)]
    pub communications: Vec<CommunicationInput>,
    #[serde(default)]
    pub weather: Option<serde_json::Value>,
}

/// Everything the client needs to render one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioDetail {
    pub scenario: Scenario,
    pub waypoints: Vec<Waypoint>,
    pub decisions: Vec<Decision>,
    pub options: Vec<DecisionOption>,
    pub communication_queue: Vec<QueueItem>,
    pub weather: Option<WeatherCondition>,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

/// Error type for database operations
#[derive(Debug)]
pub enum DbError {
    Connection(String),
    Query(diesel::result::Error),
    Pool(diesel::r2d2::Error),
    Validation(String),
    NotFound(String),
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::Connection(msg) => write!(f, "Connection error: {}", msg),
            DbError::Query(e) => write!(f, "Query error: {}", e),
            DbError::Pool(e) => write!(f, "Pool error: {}", e),
            DbError::Validation(msg) => write!(f, "{}", msg),
            DbError::NotFound(msg) => write!(f, "Not found: {}", msg),
        }
    }
}

impl std::error::Error for DbError {}

impl From<diesel::result::Error> for DbError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => DbError::NotFound("record".to_string()),
            other => DbError::Query(other),
        }
    }
}

impl From<diesel::r2d2::Error> for DbError {
    fn from(e: diesel::r2d2::Error) -> Self {
        DbError::Pool(e)
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

fn now_rfc3339() -> String {
    chrono::Local::now().to_rfc3339()
}

fn last_insert_id(conn: &mut SqliteConnection) -> QueryResult<i32> {
    diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>(
        "last_insert_rowid()",
    ))
    .first(conn)
}

impl Database {
    /// Get the database path that will be used
    pub fn db_path() -> std::path::PathBuf {
        get_db_path()
    }

    /// Create a new database at a custom path
    pub fn new(path: &str) -> Result<Self> {
        Self::open_at(path)
    }

    /// Open database at default path (respects CHECKRIDE_DB_PATH env var)
    pub fn open() -> Result<Self> {
        let path = get_db_path();
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        Self::open_at(&path)
    }

    /// Open database at specified path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(5)
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool
            .get()
            .map_err(|e| DbError::Connection(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS scenarios (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                change_id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                aircraft_type TEXT NOT NULL,
                departure_airport TEXT NOT NULL,
                arrival_airport TEXT NOT NULL,
                initial_altitude REAL NOT NULL DEFAULT 0,
                initial_heading REAL NOT NULL DEFAULT 0,
                initial_fuel REAL NOT NULL DEFAULT 0,
                max_fuel REAL NOT NULL DEFAULT 0,
                fuel_burn_rate REAL NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS waypoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                scenario_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                position_x REAL NOT NULL DEFAULT 0,
                position_y REAL NOT NULL DEFAULT 0,
                sequence INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 0,
                is_passed INTEGER NOT NULL DEFAULT 0,
                eta TEXT,
                FOREIGN KEY (scenario_id) REFERENCES scenarios(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS weather_conditions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                scenario_id INTEGER NOT NULL,
                conditions_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (scenario_id) REFERENCES scenarios(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                scenario_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                time_limit INTEGER,
                is_urgent INTEGER NOT NULL DEFAULT 0,
                trigger_condition TEXT,
                is_active INTEGER NOT NULL DEFAULT 0,
                is_completed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (scenario_id) REFERENCES scenarios(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS decision_options (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                decision_id INTEGER NOT NULL,
                text TEXT NOT NULL,
                consequence TEXT,
                is_recommended INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (decision_id) REFERENCES decisions(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS decision_nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                scenario_id INTEGER NOT NULL,
                decision_id INTEGER,
                parent_node_id INTEGER,
                option_id INTEGER,
                is_active INTEGER NOT NULL DEFAULT 0,
                trigger_time REAL,
                communication_ids TEXT,
                parameter_changes TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (scenario_id) REFERENCES scenarios(id),
                FOREIGN KEY (decision_id) REFERENCES decisions(id),
                FOREIGN KEY (parent_node_id) REFERENCES decision_nodes(id),
                FOREIGN KEY (option_id) REFERENCES decision_options(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS decision_responses (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                scenario_id INTEGER NOT NULL,
                decision_id INTEGER NOT NULL,
                option_id INTEGER NOT NULL,
                responded_at TEXT NOT NULL,
                FOREIGN KEY (scenario_id) REFERENCES scenarios(id),
                FOREIGN KEY (decision_id) REFERENCES decisions(id),
                FOREIGN KEY (option_id) REFERENCES decision_options(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS decision_impacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                scenario_id INTEGER NOT NULL,
                decision_id INTEGER NOT NULL,
                option_id INTEGER NOT NULL,
                safety_impact REAL NOT NULL DEFAULT 0,
                efficiency_impact REAL NOT NULL DEFAULT 0,
                passenger_comfort_impact REAL NOT NULL DEFAULT 0,
                time_impact REAL NOT NULL DEFAULT 0,
                fuel_impact REAL NOT NULL DEFAULT 0,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                FOREIGN KEY (scenario_id) REFERENCES scenarios(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS communication_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                scenario_id INTEGER NOT NULL,
                comm_type TEXT NOT NULL DEFAULT 'atc',
                sender TEXT NOT NULL,
                message TEXT NOT NULL,
                is_important INTEGER NOT NULL DEFAULT 0,
                trigger_condition TEXT,
                trigger_time REAL,
                is_sent INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (scenario_id) REFERENCES scenarios(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS communications (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                scenario_id INTEGER NOT NULL,
                comm_type TEXT NOT NULL DEFAULT 'atc',
                sender TEXT NOT NULL,
                message TEXT NOT NULL,
                is_important INTEGER NOT NULL DEFAULT 0,
                sent_at TEXT NOT NULL,
                FOREIGN KEY (scenario_id) REFERENCES scenarios(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS scenario_states (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                scenario_id INTEGER NOT NULL,
                safety_score REAL NOT NULL DEFAULT 100,
                efficiency_score REAL NOT NULL DEFAULT 100,
                passenger_comfort REAL NOT NULL DEFAULT 100,
                time_deviation REAL NOT NULL DEFAULT 0,
                fuel_remaining REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (scenario_id) REFERENCES scenarios(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS scenario_parameters (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                scenario_id INTEGER NOT NULL UNIQUE,
                latitude REAL,
                longitude REAL,
                altitude REAL,
                heading REAL,
                speed REAL,
                vertical_speed REAL,
                fuel_remaining REAL NOT NULL DEFAULT 0,
                fuel_burn_rate REAL NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (scenario_id) REFERENCES scenarios(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS scenario_timing (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                scenario_id INTEGER NOT NULL UNIQUE,
                started_at TEXT NOT NULL,
                last_update TEXT NOT NULL,
                is_paused INTEGER NOT NULL DEFAULT 0,
                elapsed_seconds REAL NOT NULL DEFAULT 0,
                FOREIGN KEY (scenario_id) REFERENCES scenarios(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS scenario_evaluations (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                scenario_id INTEGER NOT NULL,
                safety_score REAL NOT NULL DEFAULT 0,
                efficiency_score REAL NOT NULL DEFAULT 0,
                passenger_comfort_score REAL NOT NULL DEFAULT 0,
                overall_score REAL NOT NULL DEFAULT 0,
                strengths TEXT NOT NULL DEFAULT '[]',
                improvements TEXT NOT NULL DEFAULT '[]',
                recommendations TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                FOREIGN KEY (scenario_id) REFERENCES scenarios(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS difficulty_adaptations (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                scenario_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                reason TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                FOREIGN KEY (scenario_id) REFERENCES scenarios(id)
            )
        "#).execute(&mut conn)?;

        // Create indexes
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_waypoints_scenario ON waypoints(scenario_id, sequence)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_decisions_scenario ON decisions(scenario_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_options_decision ON decision_options(decision_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_nodes_scenario ON decision_nodes(scenario_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_nodes_parent ON decision_nodes(parent_node_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_queue_scenario ON communication_queue(scenario_id, is_sent)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_comms_scenario ON communications(scenario_id, sent_at)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_states_scenario ON scenario_states(scenario_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_responses_scenario ON decision_responses(scenario_id)").execute(&mut conn)?;

        Ok(())
    }

    // ========================================================================
    // Scenario Operations
    // ========================================================================

    /// Create a bare scenario row
    pub fn create_scenario(&self, input: &ScenarioInput) -> Result<i32> {
        let mut conn = self.get_conn()?;
        Self::insert_scenario(&mut conn, input)
    }

    fn insert_scenario(conn: &mut SqliteConnection, input: &ScenarioInput) -> Result<i32> {
        if input.title.trim().is_empty() {
            return Err(DbError::Validation("Scenario title is required".to_string()));
        }
        let now = now_rfc3339();
        let change_id = Uuid::new_v4().to_string();
        let max_fuel = if input.max_fuel > 0.0 {
            input.max_fuel
        } else {
            input.initial_fuel
        };

        let new_scenario = NewScenario {
            change_id: &change_id,
            title: &input.title,
            description: &input.description,
            aircraft_type: &input.aircraft_type,
            departure_airport: &input.departure_airport,
            arrival_airport: &input.arrival_airport,
            initial_altitude: input.initial_altitude,
            initial_heading: input.initial_heading,
            initial_fuel: input.initial_fuel,
            max_fuel,
            fuel_burn_rate: input.fuel_burn_rate,
            is_active: false,
            created_at: &now,
        };

        diesel::insert_into(scenarios::table)
            .values(&new_scenario)
            .execute(conn)?;

        Ok(last_insert_id(conn)?)
    }

    /// Create a scenario together with its waypoints, decisions, options,
    /// queued communications and weather in one transaction. Partial insert
    /// failure rolls the whole bundle back.
    pub fn create_scenario_bundle(&self, bundle: &ScenarioBundle) -> Result<i32> {
        let mut conn = self.get_conn()?;
        let scenario_id = conn.transaction::<i32, DbError, _>(|conn| {
            let scenario_id = Self::insert_scenario(conn, &bundle.scenario)?;
            let now = now_rfc3339();

            for wp in &bundle.waypoints {
                let new_wp = NewWaypoint {
                    scenario_id,
                    name: &wp.name,
                    position_x: wp.position_x.clamp(-1.0, 1.0),
                    position_y: wp.position_y.clamp(-1.0, 1.0),
                    sequence: wp.sequence,
                    is_active: wp.sequence == 0,
                    is_passed: false,
                    eta: wp.eta.as_deref(),
                };
                diesel::insert_into(waypoints::table)
                    .values(&new_wp)
                    .execute(conn)?;
            }

            for dec in &bundle.decisions {
                let new_dec = NewDecision {
                    scenario_id,
                    title: &dec.title,
                    description: &dec.description,
                    time_limit: dec.time_limit,
                    is_urgent: dec.is_urgent,
                    trigger_condition: dec.trigger_condition.as_deref(),
                    is_active: false,
                    is_completed: false,
                    created_at: &now,
                };
                diesel::insert_into(decisions::table)
                    .values(&new_dec)
                    .execute(conn)?;
                let decision_id = last_insert_id(conn)?;

                for opt in &dec.options {
                    let new_opt = NewDecisionOption {
                        decision_id,
                        text: &opt.text,
                        consequence: opt.consequence.as_deref(),
                        is_recommended: opt.is_recommended,
                    };
                    diesel::insert_into(decision_options::table)
                        .values(&new_opt)
                        .execute(conn)?;
                }
            }

            for comm in &bundle.communications {
                let new_item = NewQueueItem {
                    scenario_id,
                    comm_type: &comm.comm_type,
                    sender: &comm.sender,
                    message: &comm.message,
                    is_important: comm.is_important,
                    trigger_condition: comm.trigger_condition.as_deref(),
                    trigger_time: comm.trigger_time,
                    is_sent: false,
                    created_at: &now,
                };
                diesel::insert_into(communication_queue::table)
                    .values(&new_item)
                    .execute(conn)?;
            }

            if let Some(weather) = &bundle.weather {
                let json = weather.to_string();
                let new_weather = NewWeatherCondition {
                    scenario_id,
                    conditions_json: &json,
                    created_at: &now,
                };
                diesel::insert_into(weather_conditions::table)
                    .values(&new_weather)
                    .execute(conn)?;
            }

            Ok(scenario_id)
        })?;
        Ok(scenario_id)
    }

    /// Fetch one scenario, NotFound if the id does not resolve
    pub fn get_scenario(&self, id: i32) -> Result<Scenario> {
        let mut conn = self.get_conn()?;
        scenarios::table
            .filter(scenarios::id.eq(id))
            .first::<Scenario>(&mut conn)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => {
                    DbError::NotFound(format!("scenario {}", id))
                }
                other => DbError::Query(other),
            })
    }

    pub fn list_scenarios(&self) -> Result<Vec<Scenario>> {
        let mut conn = self.get_conn()?;
        let rows = scenarios::table
            .order(scenarios::created_at.desc())
            .load::<Scenario>(&mut conn)?;
        Ok(rows)
    }

    /// Fetch a scenario with all of its child records
    pub fn get_scenario_detail(&self, id: i32) -> Result<ScenarioDetail> {
        let scenario = self.get_scenario(id)?;
        let waypoints = self.list_waypoints(id)?;
        let decisions = self.list_decisions(id)?;
        let mut options = Vec::new();
        for dec in &decisions {
            options.extend(self.list_options(dec.id)?);
        }
        let communication_queue = self.list_queue(id)?;
        let weather = self.get_weather(id)?;
        Ok(ScenarioDetail {
            scenario,
            waypoints,
            decisions,
            options,
            communication_queue,
            weather,
        })
    }

    /// Activate a scenario: flip the flag, reset timing, seed parameters
    /// from the scenario's initial values, and seed the first state snapshot
    /// if none exists yet.
    pub fn activate_scenario(&self, id: i32) -> Result<()> {
        let scenario = self.get_scenario(id)?;
        let mut conn = self.get_conn()?;
        let now = now_rfc3339();

        conn.transaction::<(), DbError, _>(|conn| {
            diesel::update(scenarios::table.filter(scenarios::id.eq(id)))
                .set(scenarios::is_active.eq(true))
                .execute(conn)?;

            diesel::delete(scenario_timing::table.filter(scenario_timing::scenario_id.eq(id)))
                .execute(conn)?;
            let timing = NewScenarioTiming {
                scenario_id: id,
                started_at: &now,
                last_update: &now,
                is_paused: false,
                elapsed_seconds: 0.0,
            };
            diesel::insert_into(scenario_timing::table)
                .values(&timing)
                .execute(conn)?;

            diesel::delete(
                scenario_parameters::table.filter(scenario_parameters::scenario_id.eq(id)),
            )
            .execute(conn)?;
            let params = NewScenarioParameters {
                scenario_id: id,
                latitude: None,
                longitude: None,
                altitude: Some(scenario.initial_altitude),
                heading: Some(scenario.initial_heading),
                speed: None,
                vertical_speed: None,
                fuel_remaining: scenario.initial_fuel,
                fuel_burn_rate: scenario.fuel_burn_rate,
                updated_at: &now,
            };
            diesel::insert_into(scenario_parameters::table)
                .values(&params)
                .execute(conn)?;

            let existing: i64 = scenario_states::table
                .filter(scenario_states::scenario_id.eq(id))
                .count()
                .get_result(conn)?;
            if existing == 0 {
                let state = NewScenarioState {
                    scenario_id: id,
                    safety_score: 100.0,
                    efficiency_score: 100.0,
                    passenger_comfort: 100.0,
                    time_deviation: 0.0,
                    fuel_remaining: scenario.initial_fuel,
                    created_at: &now,
                };
                diesel::insert_into(scenario_states::table)
                    .values(&state)
                    .execute(conn)?;
            }
            Ok(())
        })
    }

    /// Deactivate a scenario and clear its timing record
    pub fn deactivate_scenario(&self, id: i32) -> Result<()> {
        self.get_scenario(id)?;
        let mut conn = self.get_conn()?;
        diesel::update(scenarios::table.filter(scenarios::id.eq(id)))
            .set(scenarios::is_active.eq(false))
            .execute(&mut conn)?;
        diesel::delete(scenario_timing::table.filter(scenario_timing::scenario_id.eq(id)))
            .execute(&mut conn)?;
        Ok(())
    }

    // ========================================================================
    // Waypoint / Weather Operations
    // ========================================================================

    pub fn list_waypoints(&self, scenario_id: i32) -> Result<Vec<Waypoint>> {
        let mut conn = self.get_conn()?;
        let rows = waypoints::table
            .filter(waypoints::scenario_id.eq(scenario_id))
            .order(waypoints::sequence.asc())
            .load::<Waypoint>(&mut conn)?;
        Ok(rows)
    }

    pub fn get_weather(&self, scenario_id: i32) -> Result<Option<WeatherCondition>> {
        let mut conn = self.get_conn()?;
        let row = weather_conditions::table
            .filter(weather_conditions::scenario_id.eq(scenario_id))
            .first::<WeatherCondition>(&mut conn)
            .optional()?;
        Ok(row)
    }

    // ========================================================================
    // Decision Operations
    // ========================================================================

    pub fn get_decision(&self, id: i32) -> Result<Decision> {
        let mut conn = self.get_conn()?;
        decisions::table
            .filter(decisions::id.eq(id))
            .first::<Decision>(&mut conn)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => {
                    DbError::NotFound(format!("decision {}", id))
                }
                other => DbError::Query(other),
            })
    }

    pub fn list_decisions(&self, scenario_id: i32) -> Result<Vec<Decision>> {
        let mut conn = self.get_conn()?;
        let rows = decisions::table
            .filter(decisions::scenario_id.eq(scenario_id))
            .order(decisions::id.asc())
            .load::<Decision>(&mut conn)?;
        Ok(rows)
    }

    pub fn create_decision(&self, scenario_id: i32, input: &DecisionInput) -> Result<i32> {
        let mut conn = self.get_conn()?;
        let now = now_rfc3339();
        conn.transaction::<i32, DbError, _>(|conn| {
            let new_dec = NewDecision {
                scenario_id,
                title: &input.title,
                description: &input.description,
                time_limit: input.time_limit,
                is_urgent: input.is_urgent,
                trigger_condition: input.trigger_condition.as_deref(),
                is_active: false,
                is_completed: false,
                created_at: &now,
            };
            diesel::insert_into(decisions::table)
                .values(&new_dec)
                .execute(conn)?;
            let decision_id = last_insert_id(conn)?;

            for opt in &input.options {
                let new_opt = NewDecisionOption {
                    decision_id,
                    text: &opt.text,
                    consequence: opt.consequence.as_deref(),
                    is_recommended: opt.is_recommended,
                };
                diesel::insert_into(decision_options::table)
                    .values(&new_opt)
                    .execute(conn)?;
            }
            Ok(decision_id)
        })
    }

    pub fn activate_decision(&self, id: i32) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::update(
            decisions::table
                .filter(decisions::id.eq(id))
                .filter(decisions::is_completed.eq(false)),
        )
        .set(decisions::is_active.eq(true))
        .execute(&mut conn)?;
        Ok(())
    }

    /// Mark a decision answered: inactive and completed. Never reactivated.
    pub fn complete_decision(&self, id: i32) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::update(decisions::table.filter(decisions::id.eq(id)))
            .set((
                decisions::is_active.eq(false),
                decisions::is_completed.eq(true),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn get_option(&self, id: i32) -> Result<DecisionOption> {
        let mut conn = self.get_conn()?;
        decision_options::table
            .filter(decision_options::id.eq(id))
            .first::<DecisionOption>(&mut conn)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => {
                    DbError::NotFound(format!("decision option {}", id))
                }
                other => DbError::Query(other),
            })
    }

    pub fn list_options(&self, decision_id: i32) -> Result<Vec<DecisionOption>> {
        let mut conn = self.get_conn()?;
        let rows = decision_options::table
            .filter(decision_options::decision_id.eq(decision_id))
            .order(decision_options::id.asc())
            .load::<DecisionOption>(&mut conn)?;
        Ok(rows)
    }

    // ========================================================================
    // Decision Node Operations
    // ========================================================================

    pub fn create_decision_node(
        &self,
        scenario_id: i32,
        decision_id: Option<i32>,
        parent_node_id: Option<i32>,
        option_id: Option<i32>,
        is_active: bool,
        trigger_time: Option<f64>,
        communication_ids: Option<&str>,
        parameter_changes: Option<&str>,
    ) -> Result<i32> {
        let mut conn = self.get_conn()?;
        let now = now_rfc3339();
        let new_node = NewDecisionNode {
            scenario_id,
            decision_id,
            parent_node_id,
            option_id,
            is_active,
            trigger_time,
            communication_ids,
            parameter_changes,
            created_at: &now,
        };
        diesel::insert_into(decision_nodes::table)
            .values(&new_node)
            .execute(&mut conn)?;
        Ok(last_insert_id(&mut conn)?)
    }

    pub fn get_decision_node(&self, id: i32) -> Result<DecisionNode> {
        let mut conn = self.get_conn()?;
        decision_nodes::table
            .filter(decision_nodes::id.eq(id))
            .first::<DecisionNode>(&mut conn)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => {
                    DbError::NotFound(format!("decision node {}", id))
                }
                other => DbError::Query(other),
            })
    }

    pub fn list_decision_nodes(&self, scenario_id: i32) -> Result<Vec<DecisionNode>> {
        let mut conn = self.get_conn()?;
        let rows = decision_nodes::table
            .filter(decision_nodes::scenario_id.eq(scenario_id))
            .order(decision_nodes::id.asc())
            .load::<DecisionNode>(&mut conn)?;
        Ok(rows)
    }

    /// The at-most-one active node for a scenario
    pub fn active_decision_node(&self, scenario_id: i32) -> Result<Option<DecisionNode>> {
        let mut conn = self.get_conn()?;
        let node = decision_nodes::table
            .filter(decision_nodes::scenario_id.eq(scenario_id))
            .filter(decision_nodes::is_active.eq(true))
            .first::<DecisionNode>(&mut conn)
            .optional()?;
        Ok(node)
    }

    /// Find the pre-materialized child reached from (parent, option), if any
    pub fn find_child_node(
        &self,
        parent_node_id: i32,
        option_id: i32,
    ) -> Result<Option<DecisionNode>> {
        let mut conn = self.get_conn()?;
        let node = decision_nodes::table
            .filter(decision_nodes::parent_node_id.eq(parent_node_id))
            .filter(decision_nodes::option_id.eq(option_id))
            .first::<DecisionNode>(&mut conn)
            .optional()?;
        Ok(node)
    }

    /// Make `node_id` the single active node for its scenario. Clears every
    /// sibling flag in the same statement sequence so the one-active-node
    /// invariant holds after each call. Returns false if the node was
    /// already active (idempotent re-activation).
    pub fn activate_decision_node(&self, scenario_id: i32, node_id: i32) -> Result<bool> {
        let mut conn = self.get_conn()?;
        conn.transaction::<bool, DbError, _>(|conn| {
            let already: Option<DecisionNode> = decision_nodes::table
                .filter(decision_nodes::id.eq(node_id))
                .filter(decision_nodes::is_active.eq(true))
                .first::<DecisionNode>(conn)
                .optional()?;
            if already.is_some() {
                return Ok(false);
            }
            diesel::update(
                decision_nodes::table
                    .filter(decision_nodes::scenario_id.eq(scenario_id))
                    .filter(decision_nodes::is_active.eq(true)),
            )
            .set(decision_nodes::is_active.eq(false))
            .execute(conn)?;
            diesel::update(decision_nodes::table.filter(decision_nodes::id.eq(node_id)))
                .set(decision_nodes::is_active.eq(true))
                .execute(conn)?;
            Ok(true)
        })
    }

    pub fn deactivate_decision_node(&self, node_id: i32) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::update(decision_nodes::table.filter(decision_nodes::id.eq(node_id)))
            .set(decision_nodes::is_active.eq(false))
            .execute(&mut conn)?;
        Ok(())
    }

    /// Inactive nodes whose trigger time has arrived. A node whose decision
    /// was already answered never re-triggers, and nodes without a trigger
    /// time only activate through the advancer.
    pub fn due_decision_nodes(&self, scenario_id: i32, elapsed: f64) -> Result<Vec<DecisionNode>> {
        let mut conn = self.get_conn()?;
        let rows = decision_nodes::table
            .filter(decision_nodes::scenario_id.eq(scenario_id))
            .filter(decision_nodes::is_active.eq(false))
            .filter(decision_nodes::trigger_time.le(elapsed))
            .order(decision_nodes::trigger_time.asc())
            .load::<DecisionNode>(&mut conn)?;

        let mut due = Vec::new();
        for node in rows {
            if let Some(decision_id) = node.decision_id {
                let completed: bool = decisions::table
                    .filter(decisions::id.eq(decision_id))
                    .select(decisions::is_completed)
                    .first(&mut conn)?;
                if completed {
                    continue;
                }
            }
            due.push(node);
        }
        Ok(due)
    }

    // ========================================================================
    // Decision Response / Impact Logs
    // ========================================================================

    pub fn create_decision_response(
        &self,
        scenario_id: i32,
        decision_id: i32,
        option_id: i32,
    ) -> Result<i32> {
        let mut conn = self.get_conn()?;
        let now = now_rfc3339();
        let new_resp = NewDecisionResponse {
            scenario_id,
            decision_id,
            option_id,
            responded_at: &now,
        };
        diesel::insert_into(decision_responses::table)
            .values(&new_resp)
            .execute(&mut conn)?;
        Ok(last_insert_id(&mut conn)?)
    }

    pub fn list_decision_responses(&self, scenario_id: i32) -> Result<Vec<DecisionResponse>> {
        let mut conn = self.get_conn()?;
        let rows = decision_responses::table
            .filter(decision_responses::scenario_id.eq(scenario_id))
            .order(decision_responses::id.asc())
            .load::<DecisionResponse>(&mut conn)?;
        Ok(rows)
    }

    pub fn create_decision_impact(
        &self,
        scenario_id: i32,
        decision_id: i32,
        option_id: i32,
        safety: f64,
        efficiency: f64,
        comfort: f64,
        time: f64,
        fuel: f64,
        description: &str,
    ) -> Result<i32> {
        let mut conn = self.get_conn()?;
        let now = now_rfc3339();
        let new_impact = NewDecisionImpact {
            scenario_id,
            decision_id,
            option_id,
            safety_impact: safety,
            efficiency_impact: efficiency,
            passenger_comfort_impact: comfort,
            time_impact: time,
            fuel_impact: fuel,
            description,
            created_at: &now,
        };
        diesel::insert_into(decision_impacts::table)
            .values(&new_impact)
            .execute(&mut conn)?;
        Ok(last_insert_id(&mut conn)?)
    }

    // ========================================================================
    // Communication Operations
    // ========================================================================

    pub fn create_queue_item(&self, scenario_id: i32, input: &CommunicationInput) -> Result<i32> {
        let mut conn = self.get_conn()?;
        let now = now_rfc3339();
        let new_item = NewQueueItem {
            scenario_id,
            comm_type: &input.comm_type,
            sender: &input.sender,
            message: &input.message,
            is_important: input.is_important,
            trigger_condition: input.trigger_condition.as_deref(),
            trigger_time: input.trigger_time,
            is_sent: false,
            created_at: &now,
        };
        diesel::insert_into(communication_queue::table)
            .values(&new_item)
            .execute(&mut conn)?;
        Ok(last_insert_id(&mut conn)?)
    }

    pub fn get_queue_item(&self, id: i32) -> Result<QueueItem> {
        let mut conn = self.get_conn()?;
        communication_queue::table
            .filter(communication_queue::id.eq(id))
            .first::<QueueItem>(&mut conn)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => {
                    DbError::NotFound(format!("communication queue item {}", id))
                }
                other => DbError::Query(other),
            })
    }

    pub fn list_queue(&self, scenario_id: i32) -> Result<Vec<QueueItem>> {
        let mut conn = self.get_conn()?;
        let rows = communication_queue::table
            .filter(communication_queue::scenario_id.eq(scenario_id))
            .order(communication_queue::id.asc())
            .load::<QueueItem>(&mut conn)?;
        Ok(rows)
    }

    /// Unsent queue items whose trigger time has arrived
    pub fn due_queue_items(&self, scenario_id: i32, elapsed: f64) -> Result<Vec<QueueItem>> {
        let mut conn = self.get_conn()?;
        let rows = communication_queue::table
            .filter(communication_queue::scenario_id.eq(scenario_id))
            .filter(communication_queue::is_sent.eq(false))
            .filter(communication_queue::trigger_time.le(elapsed))
            .order(communication_queue::trigger_time.asc())
            .load::<QueueItem>(&mut conn)?;
        Ok(rows)
    }

    /// Mark a queue item sent and append it to the communication history.
    /// Returns false (and writes nothing) if it was already sent - a second
    /// send attempt must not duplicate the history row.
    pub fn send_queue_item(&self, id: i32) -> Result<bool> {
        let mut conn = self.get_conn()?;
        conn.transaction::<bool, DbError, _>(|conn| {
            let flipped = diesel::update(
                communication_queue::table
                    .filter(communication_queue::id.eq(id))
                    .filter(communication_queue::is_sent.eq(false)),
            )
            .set(communication_queue::is_sent.eq(true))
            .execute(conn)?;
            if flipped == 0 {
                return Ok(false);
            }

            let item: QueueItem = communication_queue::table
                .filter(communication_queue::id.eq(id))
                .first(conn)?;
            let now = now_rfc3339();
            let new_comm = NewCommunication {
                scenario_id: item.scenario_id,
                comm_type: &item.comm_type,
                sender: &item.sender,
                message: &item.message,
                is_important: item.is_important,
                sent_at: &now,
            };
            diesel::insert_into(communications::table)
                .values(&new_comm)
                .execute(conn)?;
            Ok(true)
        })
    }

    pub fn list_communications(&self, scenario_id: i32) -> Result<Vec<Communication>> {
        let mut conn = self.get_conn()?;
        let rows = communications::table
            .filter(communications::scenario_id.eq(scenario_id))
            .order((communications::sent_at.asc(), communications::id.asc()))
            .load::<Communication>(&mut conn)?;
        Ok(rows)
    }

    // ========================================================================
    // State / Parameters / Timing
    // ========================================================================

    /// The current state is the most recent snapshot
    pub fn current_state(&self, scenario_id: i32) -> Result<Option<ScenarioState>> {
        let mut conn = self.get_conn()?;
        let row = scenario_states::table
            .filter(scenario_states::scenario_id.eq(scenario_id))
            .order(scenario_states::id.desc())
            .first::<ScenarioState>(&mut conn)
            .optional()?;
        Ok(row)
    }

    pub fn list_states(&self, scenario_id: i32) -> Result<Vec<ScenarioState>> {
        let mut conn = self.get_conn()?;
        let rows = scenario_states::table
            .filter(scenario_states::scenario_id.eq(scenario_id))
            .order(scenario_states::id.asc())
            .load::<ScenarioState>(&mut conn)?;
        Ok(rows)
    }

    /// Append a new state snapshot. Prior snapshots are never mutated.
    pub fn push_state(
        &self,
        scenario_id: i32,
        safety: f64,
        efficiency: f64,
        comfort: f64,
        time_deviation: f64,
        fuel_remaining: f64,
    ) -> Result<i32> {
        let mut conn = self.get_conn()?;
        let now = now_rfc3339();
        let state = NewScenarioState {
            scenario_id,
            safety_score: safety,
            efficiency_score: efficiency,
            passenger_comfort: comfort,
            time_deviation,
            fuel_remaining,
            created_at: &now,
        };
        diesel::insert_into(scenario_states::table)
            .values(&state)
            .execute(&mut conn)?;
        Ok(last_insert_id(&mut conn)?)
    }

    pub fn get_parameters(&self, scenario_id: i32) -> Result<Option<ScenarioParameters>> {
        let mut conn = self.get_conn()?;
        let row = scenario_parameters::table
            .filter(scenario_parameters::scenario_id.eq(scenario_id))
            .first::<ScenarioParameters>(&mut conn)
            .optional()?;
        Ok(row)
    }

    /// Replace the single parameter row for a scenario
    pub fn upsert_parameters(
        &self,
        scenario_id: i32,
        latitude: Option<f64>,
        longitude: Option<f64>,
        altitude: Option<f64>,
        heading: Option<f64>,
        speed: Option<f64>,
        vertical_speed: Option<f64>,
        fuel_remaining: f64,
        fuel_burn_rate: f64,
    ) -> Result<()> {
        let mut conn = self.get_conn()?;
        let now = now_rfc3339();
        conn.transaction::<(), DbError, _>(|conn| {
            diesel::delete(
                scenario_parameters::table
                    .filter(scenario_parameters::scenario_id.eq(scenario_id)),
            )
            .execute(conn)?;
            let params = NewScenarioParameters {
                scenario_id,
                latitude,
                longitude,
                altitude,
                heading,
                speed,
                vertical_speed,
                fuel_remaining,
                fuel_burn_rate,
                updated_at: &now,
            };
            diesel::insert_into(scenario_parameters::table)
                .values(&params)
                .execute(conn)?;
            Ok(())
        })
    }

    /// Apply a node's parameter-change payload. Keys are absolute targets;
    /// missing keys leave the current value alone.
    pub fn apply_parameter_changes(
        &self,
        scenario_id: i32,
        changes: &serde_json::Value,
    ) -> Result<()> {
        let current = self
            .get_parameters(scenario_id)?
            .ok_or_else(|| DbError::NotFound(format!("parameters for scenario {}", scenario_id)))?;

        let num = |key: &str| changes.get(key).and_then(serde_json::Value::as_f64);
        self.upsert_parameters(
            scenario_id,
            num("latitude").or(current.latitude),
            num("longitude").or(current.longitude),
            num("altitude").or(current.altitude),
            num("heading").or(current.heading),
            num("speed").or(current.speed),
            num("vertical_speed").or(current.vertical_speed),
            num("fuel_remaining").unwrap_or(current.fuel_remaining),
            num("fuel_burn_rate").unwrap_or(current.fuel_burn_rate),
        )
    }

    pub fn get_timing(&self, scenario_id: i32) -> Result<Option<ScenarioTiming>> {
        let mut conn = self.get_conn()?;
        let row = scenario_timing::table
            .filter(scenario_timing::scenario_id.eq(scenario_id))
            .first::<ScenarioTiming>(&mut conn)
            .optional()?;
        Ok(row)
    }

    pub fn update_timing(&self, scenario_id: i32, elapsed_seconds: f64, is_paused: bool) -> Result<()> {
        let mut conn = self.get_conn()?;
        let now = now_rfc3339();
        let updated = diesel::update(
            scenario_timing::table.filter(scenario_timing::scenario_id.eq(scenario_id)),
        )
        .set((
            scenario_timing::elapsed_seconds.eq(elapsed_seconds),
            scenario_timing::is_paused.eq(is_paused),
            scenario_timing::last_update.eq(&now),
        ))
        .execute(&mut conn)?;
        if updated == 0 {
            return Err(DbError::NotFound(format!(
                "timing for scenario {}",
                scenario_id
            )));
        }
        Ok(())
    }

    pub fn set_paused(&self, scenario_id: i32, paused: bool) -> Result<()> {
        let timing = self
            .get_timing(scenario_id)?
            .ok_or_else(|| DbError::NotFound(format!("timing for scenario {}", scenario_id)))?;
        self.update_timing(scenario_id, timing.elapsed_seconds, paused)
    }

    // ========================================================================
    // Evaluation / Adaptation
    // ========================================================================

    pub fn create_evaluation(
        &self,
        scenario_id: i32,
        safety: f64,
        efficiency: f64,
        comfort: f64,
        overall: f64,
        strengths: &str,
        improvements: &str,
        recommendations: &str,
    ) -> Result<i32> {
        let mut conn = self.get_conn()?;
        let now = now_rfc3339();
        let eval = NewScenarioEvaluation {
            scenario_id,
            safety_score: safety,
            efficiency_score: efficiency,
            passenger_comfort_score: comfort,
            overall_score: overall,
            strengths,
            improvements,
            recommendations,
            created_at: &now,
        };
        diesel::insert_into(scenario_evaluations::table)
            .values(&eval)
            .execute(&mut conn)?;
        Ok(last_insert_id(&mut conn)?)
    }

    pub fn get_evaluation(&self, scenario_id: i32) -> Result<Option<ScenarioEvaluation>> {
        let mut conn = self.get_conn()?;
        let row = scenario_evaluations::table
            .filter(scenario_evaluations::scenario_id.eq(scenario_id))
            .order(scenario_evaluations::id.desc())
            .first::<ScenarioEvaluation>(&mut conn)
            .optional()?;
        Ok(row)
    }

    pub fn create_adaptation(&self, scenario_id: i32, action: &str, reason: &str) -> Result<i32> {
        let mut conn = self.get_conn()?;
        let now = now_rfc3339();
        let row = NewDifficultyAdaptation {
            scenario_id,
            action,
            reason,
            created_at: &now,
        };
        diesel::insert_into(difficulty_adaptations::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(last_insert_id(&mut conn)?)
    }

    pub fn list_adaptations(&self, scenario_id: i32) -> Result<Vec<DifficultyAdaptation>> {
        let mut conn = self.get_conn()?;
        let rows = difficulty_adaptations::table
            .filter(difficulty_adaptations::scenario_id.eq(scenario_id))
            .order(difficulty_adaptations::id.asc())
            .load::<DifficultyAdaptation>(&mut conn)?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn sample_bundle() -> ScenarioBundle {
        ScenarioBundle {
            scenario: ScenarioInput {
                title: "Storm Approach".to_string(),
                description: "Thunderstorms over the arrival airport".to_string(),
                aircraft_type: "B737".to_string(),
                departure_airport: "EGLL".to_string(),
                arrival_airport: "EGCC".to_string(),
                initial_altitude: 34000.0,
                initial_heading: 330.0,
                initial_fuel: 15000.0,
                max_fuel: 20000.0,
                fuel_burn_rate: 50.0,
            },
            waypoints: vec![
                WaypointInput {
                    name: "BNN".to_string(),
                    position_x: -0.4,
                    position_y: 0.2,
                    sequence: 0,
                    eta: None,
                },
                WaypointInput {
                    name: "TNT".to_string(),
                    position_x: 0.1,
                    position_y: 0.6,
                    sequence: 1,
                    eta: Some("2026-08-30T12:40:00Z".to_string()),
                },
            ],
            decisions: vec![DecisionInput {
                title: "Weather deviation".to_string(),
                description: "Cell ahead on the arrival".to_string(),
                time_limit: Some(60),
                is_urgent: true,
                trigger_condition: None,
                options: vec![
                    OptionInput {
                        text: "Request deviation 20 degrees left".to_string(),
                        consequence: Some("Adds 6 minutes".to_string()),
                        is_recommended: true,
                    },
                    OptionInput {
                        text: "Continue on present heading".to_string(),
                        consequence: Some("Moderate turbulence likely".to_string()),
                        is_recommended: false,
                    },
                ],
            }],
            communications: vec![CommunicationInput {
                comm_type: "atc".to_string(),
                sender: "London Control".to_string(),
                message: "Expect vectors for the ILS".to_string(),
                is_important: false,
                trigger_condition: None,
                trigger_time: Some(30.0),
            }],
            weather: Some(serde_json::json!({
                "cells": [{"intensity": "heavy", "x": 0.2, "y": 0.5, "size": 0.15}]
            })),
        }
    }

    #[test]
    fn test_bundle_round_trip() {
        let (_dir, db) = test_db();
        let id = db.create_scenario_bundle(&sample_bundle()).unwrap();

        let detail = db.get_scenario_detail(id).unwrap();
        assert_eq!(detail.scenario.title, "Storm Approach");
        assert_eq!(detail.waypoints.len(), 2);
        assert_eq!(detail.waypoints[0].name, "BNN");
        assert_eq!(detail.waypoints[1].sequence, 1);
        assert_eq!(detail.decisions.len(), 1);
        assert_eq!(detail.options.len(), 2);
        assert_eq!(detail.options[0].text, "Request deviation 20 degrees left");
        assert!(detail.options[0].is_recommended);
        assert_eq!(detail.communication_queue.len(), 1);
        assert!(detail.weather.is_some());
    }

    #[test]
    fn test_get_scenario_not_found() {
        let (_dir, db) = test_db();
        match db.get_scenario(999) {
            Err(DbError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other.map(|s| s.id)),
        }
    }

    #[test]
    fn test_bundle_requires_title() {
        let (_dir, db) = test_db();
        let mut bundle = sample_bundle();
        bundle.scenario.title = "  ".to_string();
        assert!(matches!(
            db.create_scenario_bundle(&bundle),
            Err(DbError::Validation(_))
        ));
        // rollback: nothing left behind
        assert!(db.list_scenarios().unwrap().is_empty());
    }

    #[test]
    fn test_activate_scenario_seeds_state() {
        let (_dir, db) = test_db();
        let id = db.create_scenario_bundle(&sample_bundle()).unwrap();
        db.activate_scenario(id).unwrap();

        let timing = db.get_timing(id).unwrap().unwrap();
        assert!(!timing.is_paused);
        assert_eq!(timing.elapsed_seconds, 0.0);

        let params = db.get_parameters(id).unwrap().unwrap();
        assert_eq!(params.fuel_remaining, 15000.0);
        assert_eq!(params.fuel_burn_rate, 50.0);
        assert_eq!(params.altitude, Some(34000.0));

        let state = db.current_state(id).unwrap().unwrap();
        assert_eq!(state.safety_score, 100.0);
        assert_eq!(state.fuel_remaining, 15000.0);

        db.deactivate_scenario(id).unwrap();
        assert!(db.get_timing(id).unwrap().is_none());
        assert!(!db.get_scenario(id).unwrap().is_active);
    }

    #[test]
    fn test_send_queue_item_idempotent() {
        let (_dir, db) = test_db();
        let id = db.create_scenario_bundle(&sample_bundle()).unwrap();
        let item = &db.list_queue(id).unwrap()[0];

        assert!(db.send_queue_item(item.id).unwrap());
        assert!(!db.send_queue_item(item.id).unwrap());
        assert_eq!(db.list_communications(id).unwrap().len(), 1);
    }

    #[test]
    fn test_single_active_node_invariant() {
        let (_dir, db) = test_db();
        let id = db.create_scenario_bundle(&sample_bundle()).unwrap();

        let a = db
            .create_decision_node(id, None, None, None, true, None, None, None)
            .unwrap();
        let b = db
            .create_decision_node(id, None, Some(a), None, false, None, None, None)
            .unwrap();

        assert!(db.activate_decision_node(id, b).unwrap());
        let nodes = db.list_decision_nodes(id).unwrap();
        let active: Vec<_> = nodes.iter().filter(|n| n.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b);

        // re-activating the active node is a no-op
        assert!(!db.activate_decision_node(id, b).unwrap());
        assert_eq!(
            db.list_decision_nodes(id)
                .unwrap()
                .iter()
                .filter(|n| n.is_active)
                .count(),
            1
        );
    }

    #[test]
    fn test_states_append_only() {
        let (_dir, db) = test_db();
        let id = db.create_scenario_bundle(&sample_bundle()).unwrap();
        db.activate_scenario(id).unwrap();
        db.push_state(id, 92.0, 88.0, 95.0, 4.0, 14500.0).unwrap();

        let states = db.list_states(id).unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].safety_score, 100.0);
        let current = db.current_state(id).unwrap().unwrap();
        assert_eq!(current.safety_score, 92.0);
    }

    #[test]
    fn test_apply_parameter_changes_partial() {
        let (_dir, db) = test_db();
        let id = db.create_scenario_bundle(&sample_bundle()).unwrap();
        db.activate_scenario(id).unwrap();

        db.apply_parameter_changes(id, &serde_json::json!({"altitude": 28000.0, "speed": 280.0}))
            .unwrap();
        let params = db.get_parameters(id).unwrap().unwrap();
        assert_eq!(params.altitude, Some(28000.0));
        assert_eq!(params.speed, Some(280.0));
        assert_eq!(params.heading, Some(330.0));
        assert_eq!(params.fuel_remaining, 15000.0);
    }
}
