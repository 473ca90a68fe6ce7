//! Parameter simulator
//!
//! Closed-form extrapolation of aircraft parameters over elapsed seconds.
//! Position uses a flat-earth approximation (heading decomposed into
//! lat/lon components at a fixed knots-to-degrees rate), not great-circle
//! navigation. Good enough for a training display.

use crate::db::{Database, ScenarioParameters};

/// Aircraft parameters as a plain value, independent of storage
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub vertical_speed: Option<f64>,
    pub fuel_remaining: f64,
    pub fuel_burn_rate: f64,
}

impl From<&ScenarioParameters> for Parameters {
    fn from(row: &ScenarioParameters) -> Self {
        Self {
            latitude: row.latitude,
            longitude: row.longitude,
            altitude: row.altitude,
            heading: row.heading,
            speed: row.speed,
            vertical_speed: row.vertical_speed,
            fuel_remaining: row.fuel_remaining,
            fuel_burn_rate: row.fuel_burn_rate,
        }
    }
}

/// Error type for simulation
#[derive(Debug)]
pub enum SimError {
    /// No parameter record exists yet; the caller must seed defaults first
    NoCurrentState(i32),
    Storage(crate::db::DbError),
}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimError::NoCurrentState(id) => {
                write!(f, "No current parameters for scenario {}", id)
            }
            SimError::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for SimError {}

impl From<crate::db::DbError> for SimError {
    fn from(e: crate::db::DbError) -> Self {
        SimError::Storage(e)
    }
}

/// Advance parameters by `elapsed_seconds`. Pure and deterministic.
pub fn advance(p: &Parameters, elapsed_seconds: f64) -> Parameters {
    let elapsed = elapsed_seconds.max(0.0);
    let mut next = p.clone();

    // burn rate is lbs/minute
    next.fuel_remaining = (p.fuel_remaining - p.fuel_burn_rate / 60.0 * elapsed).max(0.0);

    if let (Some(speed), Some(lat), Some(lon)) = (p.speed, p.latitude, p.longitude) {
        // knots to degrees per second
        let rate = speed / 3600.0 / 60.0;
        let heading_rad = p.heading.unwrap_or(0.0).to_radians();
        next.latitude = Some(lat + heading_rad.cos() * rate * elapsed);
        next.longitude = Some(lon + heading_rad.sin() * rate * elapsed);
    }

    if let (Some(vs), Some(alt)) = (p.vertical_speed, p.altitude) {
        // vertical speed is ft/minute
        next.altitude = Some(alt + vs / 60.0 * elapsed);
    }

    next
}

/// Load, advance and persist the parameter row for one scenario.
pub fn simulate_scenario(
    db: &Database,
    scenario_id: i32,
    elapsed_seconds: f64,
) -> Result<Parameters, SimError> {
    let row = db
        .get_parameters(scenario_id)?
        .ok_or(SimError::NoCurrentState(scenario_id))?;
    let next = advance(&Parameters::from(&row), elapsed_seconds);
    db.upsert_parameters(
        scenario_id,
        next.latitude,
        next.longitude,
        next.altitude,
        next.heading,
        next.speed,
        next.vertical_speed,
        next.fuel_remaining,
        next.fuel_burn_rate,
    )?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn base_params() -> Parameters {
        Parameters {
            latitude: Some(51.47),
            longitude: Some(-0.45),
            altitude: Some(34000.0),
            heading: Some(0.0),
            speed: Some(420.0),
            vertical_speed: None,
            fuel_remaining: 15000.0,
            fuel_burn_rate: 50.0,
        }
    }

    #[test]
    fn test_fuel_burn_sixty_seconds() {
        // burn 50 lbs/min for 60s -> exactly 50 lbs gone
        let next = advance(&base_params(), 60.0);
        assert!((next.fuel_remaining - 14950.0).abs() < 1e-9);
    }

    #[test]
    fn test_fuel_floor_at_zero() {
        let mut p = base_params();
        p.fuel_remaining = 10.0;
        let next = advance(&p, 3600.0);
        assert_eq!(next.fuel_remaining, 0.0);
    }

    #[test]
    fn test_heading_north_moves_latitude_only() {
        let next = advance(&base_params(), 60.0);
        // heading 000: all motion in latitude
        assert!(next.latitude.unwrap() > 51.47);
        assert!((next.longitude.unwrap() - (-0.45)).abs() < 1e-9);
    }

    #[test]
    fn test_heading_east_moves_longitude_only() {
        let mut p = base_params();
        p.heading = Some(90.0);
        let next = advance(&p, 60.0);
        assert!((next.latitude.unwrap() - 51.47).abs() < 1e-9);
        assert!(next.longitude.unwrap() > -0.45);
    }

    #[test]
    fn test_position_rate() {
        // 420 kts = 420/3600/60 deg/s; over 60s heading north
        let next = advance(&base_params(), 60.0);
        let expected = 51.47 + 420.0 / 3600.0 / 60.0 * 60.0;
        assert!((next.latitude.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_descent() {
        let mut p = base_params();
        p.vertical_speed = Some(-1800.0);
        let next = advance(&p, 60.0);
        assert!((next.altitude.unwrap() - 32200.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_speed_freezes_position() {
        let mut p = base_params();
        p.speed = None;
        let next = advance(&p, 60.0);
        assert_eq!(next.latitude, p.latitude);
        assert_eq!(next.longitude, p.longitude);
    }

    #[test]
    fn test_zero_elapsed_is_identity() {
        let p = base_params();
        assert_eq!(advance(&p, 0.0), p);
    }

    proptest! {
        #[test]
        fn prop_fuel_never_negative(
            fuel in 0.0f64..50000.0,
            burn in 0.0f64..500.0,
            elapsed in 0.0f64..100_000.0,
        ) {
            let mut p = base_params();
            p.fuel_remaining = fuel;
            p.fuel_burn_rate = burn;
            let next = advance(&p, elapsed);
            prop_assert!(next.fuel_remaining >= 0.0);
            prop_assert!(next.fuel_remaining <= fuel);
        }

        #[test]
        fn prop_fuel_matches_closed_form(
            fuel in 0.0f64..50000.0,
            burn in 0.0f64..500.0,
            elapsed in 0.0f64..10_000.0,
        ) {
            let mut p = base_params();
            p.fuel_remaining = fuel;
            p.fuel_burn_rate = burn;
            let next = advance(&p, elapsed);
            let expected = (fuel - burn / 60.0 * elapsed).max(0.0);
            prop_assert!((next.fuel_remaining - expected).abs() < 1e-6);
        }
    }
}
