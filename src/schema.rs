// Checkride schema - scenario engine tables for Diesel ORM

diesel::table! {
    scenarios (id) {
        id -> Integer,
        change_id -> Text,
        title -> Text,
        description -> Text,
        aircraft_type -> Text,
        departure_airport -> Text,
        arrival_airport -> Text,
        initial_altitude -> Double,
        initial_heading -> Double,
        initial_fuel -> Double,
        max_fuel -> Double,
        fuel_burn_rate -> Double,
        is_active -> Bool,
        created_at -> Text,
    }
}

diesel::table! {
    waypoints (id) {
        id -> Integer,
        scenario_id -> Integer,
        name -> Text,
        position_x -> Double,
        position_y -> Double,
        sequence -> Integer,
        is_active -> Bool,
        is_passed -> Bool,
        eta -> Nullable<Text>,
    }
}

diesel::table! {
    weather_conditions (id) {
        id -> Integer,
        scenario_id -> Integer,
        conditions_json -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    decisions (id) {
        id -> Integer,
        scenario_id -> Integer,
        title -> Text,
        description -> Text,
        time_limit -> Nullable<Integer>,
        is_urgent -> Bool,
        trigger_condition -> Nullable<Text>,
        is_active -> Bool,
        is_completed -> Bool,
        created_at -> Text,
    }
}

diesel::table! {
    decision_options (id) {
        id -> Integer,
        decision_id -> Integer,
        text -> Text,
        consequence -> Nullable<Text>,
        is_recommended -> Bool,
    }
}

diesel::table! {
    decision_nodes (id) {
        id -> Integer,
        scenario_id -> Integer,
        decision_id -> Nullable<Integer>,
        parent_node_id -> Nullable<Integer>,
        option_id -> Nullable<Integer>,
        is_active -> Bool,
        trigger_time -> Nullable<Double>,
        communication_ids -> Nullable<Text>,
        parameter_changes -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    decision_responses (id) {
        id -> Integer,
        scenario_id -> Integer,
        decision_id -> Integer,
        option_id -> Integer,
        responded_at -> Text,
    }
}

diesel::table! {
    decision_impacts (id) {
        id -> Integer,
        scenario_id -> Integer,
        decision_id -> Integer,
        option_id -> Integer,
        safety_impact -> Double,
        efficiency_impact -> Double,
        passenger_comfort_impact -> Double,
        time_impact -> Double,
        fuel_impact -> Double,
        description -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    communication_queue (id) {
        id -> Integer,
        scenario_id -> Integer,
        comm_type -> Text,
        sender -> Text,
        message -> Text,
        is_important -> Bool,
        trigger_condition -> Nullable<Text>,
        trigger_time -> Nullable<Double>,
        is_sent -> Bool,
        created_at -> Text,
    }
}

diesel::table! {
    communications (id) {
        id -> Integer,
        scenario_id -> Integer,
        comm_type -> Text,
        sender -> Text,
        message -> Text,
        is_important -> Bool,
        sent_at -> Text,
    }
}

diesel::table! {
    scenario_states (id) {
        id -> Integer,
        scenario_id -> Integer,
        safety_score -> Double,
        efficiency_score -> Double,
        passenger_comfort -> Double,
        time_deviation -> Double,
        fuel_remaining -> Double,
        created_at -> Text,
    }
}

diesel::table! {
    scenario_parameters (id) {
        id -> Integer,
        scenario_id -> Integer,
        latitude -> Nullable<Double>,
        longitude -> Nullable<Double>,
        altitude -> Nullable<Double>,
        heading -> Nullable<Double>,
        speed -> Nullable<Double>,
        vertical_speed -> Nullable<Double>,
        fuel_remaining -> Double,
        fuel_burn_rate -> Double,
        updated_at -> Text,
    }
}

diesel::table! {
    scenario_timing (id) {
        id -> Integer,
        scenario_id -> Integer,
        started_at -> Text,
        last_update -> Text,
        is_paused -> Bool,
        elapsed_seconds -> Double,
    }
}

diesel::table! {
    scenario_evaluations (id) {
        id -> Integer,
        scenario_id -> Integer,
        safety_score -> Double,
        efficiency_score -> Double,
        passenger_comfort_score -> Double,
        overall_score -> Double,
        strengths -> Text,
        improvements -> Text,
        recommendations -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    difficulty_adaptations (id) {
        id -> Integer,
        scenario_id -> Integer,
        action -> Text,
        reason -> Text,
        created_at -> Text,
    }
}
