//! Checkride - a flight-training scenario engine
//!
//! Runs time-driven training scenarios for airline pilots: branching
//! decision trees, scheduled ATC/crew communications, simulated flight
//! parameters, and a scored evaluation at the end. Narrative content is
//! produced by a chat-completions model; everything stateful lives in a
//! local SQLite database.
//!
//! # Pieces
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`db`] | SQLite store: scenarios, decisions, queues, states |
//! | [`tick`] | Advance a scenario clock; fire due events |
//! | [`advancer`] | Process a decision response; grow the tree |
//! | [`impact`] | Score the consequences of a chosen option |
//! | [`eval`] | End-of-scenario evaluation and report |
//! | [`scenario_gen`] | Generate a scenario bundle from a brief |
//! | [`serve`] | JSON API over HTTP |
//!
//! # Quick Start
//!
//! ```no_run
//! use checkride::{Database, scenario_gen};
//!
//! let db = Database::open().unwrap();
//! let bundle = scenario_gen::fallback_bundle("engine fire after V1");
//! let id = db.create_scenario_bundle(&bundle).unwrap();
//! db.activate_scenario(id).unwrap();
//!
//! // One second of simulated time
//! let report = checkride::tick::process_tick(&db, id, 1.0).unwrap();
//! println!("elapsed: {}s", report.elapsed_seconds);
//! ```

pub mod adapt;
pub mod advancer;
pub mod config;
pub mod db;
pub mod error;
pub mod eval;
pub mod extract;
pub mod generator;
pub mod impact;
pub mod scenario_gen;
pub mod schema;
pub mod serve;
pub mod sim;
pub mod tick;

pub use config::Config;
pub use db::{
    Communication, Database, DbError, Decision, DecisionNode, DecisionOption, QueueItem,
    Scenario, ScenarioBundle, ScenarioDetail, ScenarioParameters, ScenarioState, ScenarioTiming,
};
pub use error::{EngineError, Result};
pub use generator::{CannedGenerator, ChatMessage, HttpGenerator, TextGenerator};
pub use tick::TickReport;
