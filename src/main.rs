use checkride::{
    adapt, advancer, eval, impact, scenario_gen, serve, tick, Config, Database, HttpGenerator,
};
use clap::{Parser, Subcommand};
use colored::Colorize;

#[derive(Parser, Debug)]
#[command(name = "checkride")]
#[command(author, version, about = "Flight-training scenario engine")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the scenario database and config directory
    Init,

    /// Start the JSON API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3001")]
        port: u16,
    },

    /// Generate a new scenario from a short brief
    Generate {
        /// What the scenario should exercise, e.g. "engine fire after V1"
        #[arg(default_value = "")]
        brief: String,
    },

    /// List all scenarios
    List,

    /// Show one scenario with its waypoints and decisions
    Show { scenario_id: i32 },

    /// Activate a scenario (resets its clock and parameters)
    Activate { scenario_id: i32 },

    /// Deactivate a scenario
    Deactivate { scenario_id: i32 },

    /// Advance a scenario's clock by N seconds
    Tick {
        scenario_id: i32,
        #[arg(default_value = "1.0")]
        seconds: f64,
    },

    /// Answer an active decision with one of its options
    Decide {
        scenario_id: i32,
        decision_id: i32,
        option_id: i32,
    },

    /// Apply the scored impact of a chosen option to the running state
    Impact {
        scenario_id: i32,
        decision_id: i32,
        option_id: i32,
    },

    /// Show the current state and state history
    State { scenario_id: i32 },

    /// Record a difficulty adaptation for the current state
    Adapt { scenario_id: i32 },

    /// Score a finished scenario
    Evaluate { scenario_id: i32 },

    /// Print a markdown debrief for an evaluated scenario
    Report { scenario_id: i32 },
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args.command) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> checkride::Result<()> {
    match command {
        Command::Init => {
            let db = Database::open()?;
            drop(db);
            println!(
                "{} Database ready at {}",
                "✓".green(),
                Database::db_path().display()
            );
            Ok(())
        }

        Command::Serve { port } => {
            let config = Config::load();
            let generator = HttpGenerator::new(config.generator);
            serve::start_server(port, &generator).map_err(|e| {
                checkride::EngineError::Validation(format!("Server error: {}", e))
            })
        }

        Command::Generate { brief } => {
            let db = Database::open()?;
            let config = Config::load();
            let generator = HttpGenerator::new(config.generator);
            let result = scenario_gen::generate_scenario(&db, &generator, &brief)?;
            if result.used_fallback {
                println!(
                    "{} Generation fell back to a default scenario",
                    "!".yellow()
                );
            }
            let detail = db.get_scenario_detail(result.scenario_id)?;
            println!(
                "{} Created scenario {} \"{}\" ({} waypoints, {} decisions)",
                "✓".green(),
                result.scenario_id,
                detail.scenario.title.bold(),
                detail.waypoints.len(),
                detail.decisions.len()
            );
            Ok(())
        }

        Command::List => {
            let db = Database::open()?;
            let scenarios = db.list_scenarios()?;
            if scenarios.is_empty() {
                println!("No scenarios. Run {} first.", "checkride generate".cyan());
                return Ok(());
            }
            for s in scenarios {
                let marker = if s.is_active {
                    "●".green().to_string()
                } else {
                    "○".to_string()
                };
                println!(
                    "{} [{}] {} — {} {} → {}",
                    marker, s.id, s.title.bold(), s.aircraft_type, s.departure_airport,
                    s.arrival_airport
                );
            }
            Ok(())
        }

        Command::Show { scenario_id } => {
            let db = Database::open()?;
            let detail = db.get_scenario_detail(scenario_id)?;
            let s = &detail.scenario;
            println!("{} ({})", s.title.bold(), s.aircraft_type);
            println!("  {} → {}", s.departure_airport, s.arrival_airport);
            println!(
                "  fuel {:.0}/{:.0} lbs, burn {:.0} lbs/min, FL{:.0}",
                s.initial_fuel,
                s.max_fuel,
                s.fuel_burn_rate,
                s.initial_altitude / 100.0
            );
            if !detail.waypoints.is_empty() {
                println!("  {}", "Waypoints:".cyan());
                for w in &detail.waypoints {
                    println!("    {}. {}", w.sequence, w.name);
                }
            }
            if !detail.decisions.is_empty() {
                println!("  {}", "Decisions:".cyan());
                for d in &detail.decisions {
                    let status = if d.is_completed {
                        "done".to_string()
                    } else if d.is_active {
                        "active".green().to_string()
                    } else {
                        "pending".to_string()
                    };
                    println!("    [{}] {} ({})", d.id, d.title, status);
                    for o in detail.options.iter().filter(|o| o.decision_id == d.id) {
                        let flag = if o.is_recommended { " *" } else { "" };
                        println!("      [{}] {}{}", o.id, o.text, flag);
                    }
                }
            }
            Ok(())
        }

        Command::Activate { scenario_id } => {
            let db = Database::open()?;
            db.activate_scenario(scenario_id)?;
            println!("{} Scenario {} active", "✓".green(), scenario_id);
            Ok(())
        }

        Command::Deactivate { scenario_id } => {
            let db = Database::open()?;
            db.deactivate_scenario(scenario_id)?;
            println!("{} Scenario {} deactivated", "✓".green(), scenario_id);
            Ok(())
        }

        Command::Tick {
            scenario_id,
            seconds,
        } => {
            let db = Database::open()?;
            let report = tick::process_tick(&db, scenario_id, seconds)?;
            if !report.ticked {
                println!("Clock did not advance (paused or not activated)");
                return Ok(());
            }
            println!(
                "t={:.1}s  nodes activated: {}  communications sent: {}",
                report.elapsed_seconds,
                report.activated_nodes.len(),
                report.sent_communications.len()
            );
            Ok(())
        }

        Command::Decide {
            scenario_id,
            decision_id,
            option_id,
        } => {
            let db = Database::open()?;
            let config = Config::load();
            let generator = HttpGenerator::new(config.generator);
            let outcome =
                advancer::process_decision(&db, &generator, scenario_id, decision_id, option_id)?;
            let source = if outcome.synthesized {
                "synthesized"
            } else {
                "cached branch"
            };
            match outcome.next_decision_id {
                Some(next) => println!(
                    "{} Decision {} answered; next decision {} ({})",
                    "✓".green(),
                    decision_id,
                    next,
                    source
                ),
                None => println!("{} Decision {} answered ({})", "✓".green(), decision_id, source),
            }
            Ok(())
        }

        Command::Impact {
            scenario_id,
            decision_id,
            option_id,
        } => {
            let db = Database::open()?;
            let config = Config::load();
            let generator = HttpGenerator::new(config.generator);
            let state =
                impact::apply_decision_impact(&db, &generator, scenario_id, decision_id, option_id)?;
            println!(
                "safety {:.0}  efficiency {:.0}  comfort {:.0}  fuel {:.0} lbs",
                state.safety_score,
                state.efficiency_score,
                state.passenger_comfort,
                state.fuel_remaining
            );
            Ok(())
        }

        Command::State { scenario_id } => {
            let db = Database::open()?;
            match db.current_state(scenario_id)? {
                Some(state) => {
                    println!(
                        "safety {:.0}  efficiency {:.0}  comfort {:.0}  time dev {:+.1} min  fuel {:.0} lbs",
                        state.safety_score,
                        state.efficiency_score,
                        state.passenger_comfort,
                        state.time_deviation,
                        state.fuel_remaining
                    );
                    let history = db.list_states(scenario_id)?;
                    println!("{} snapshot(s) recorded", history.len());
                }
                None => println!("No state yet (activate the scenario first)"),
            }
            Ok(())
        }

        Command::Adapt { scenario_id } => {
            let db = Database::open()?;
            let adaptation = adapt::record_adaptation(&db, scenario_id)?;
            println!(
                "{} {}: {}",
                "✓".green(),
                adaptation.action.bold(),
                adaptation.reason
            );
            Ok(())
        }

        Command::Evaluate { scenario_id } => {
            let db = Database::open()?;
            let config = Config::load();
            let generator = HttpGenerator::new(config.generator);
            let evaluation = eval::evaluate_scenario(&db, &generator, scenario_id)?;
            println!(
                "{} overall {:.0} (safety {:.0}, efficiency {:.0}, comfort {:.0})",
                "✓".green(),
                evaluation.overall_score,
                evaluation.safety_score,
                evaluation.efficiency_score,
                evaluation.passenger_comfort_score
            );
            Ok(())
        }

        Command::Report { scenario_id } => {
            let db = Database::open()?;
            let config = Config::load();
            let generator = HttpGenerator::new(config.generator);
            let report = eval::generate_performance_report(&db, &generator, scenario_id)?;
            println!("{}", report);
            Ok(())
        }
    }
}
