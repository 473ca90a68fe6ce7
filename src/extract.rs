//! JSON extraction from messy model output
//!
//! Generated text is supposed to be JSON but often arrives wrapped in prose
//! or fenced code blocks. One shared ladder lives here:
//!
//! 1. direct parse
//! 2. fenced code block scrape
//! 3. brace-balanced scan (largest top-level object)
//! 4. best-effort key/value scrape over explicit defaults - opt-in only,
//!    via [`scrape_fields`], so callers can tell a clean parse from a guess.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced block regex");
    static ref NUMBER_FIELD: Regex =
        Regex::new(r#""?([A-Za-z_][A-Za-z0-9_]*)"?\s*:\s*(-?\d+(?:\.\d+)?)"#)
            .expect("number field regex");
    static ref STRING_FIELD: Regex =
        Regex::new(r#""?([A-Za-z_][A-Za-z0-9_]*)"?\s*:\s*"((?:[^"\\]|\\.)*)""#)
            .expect("string field regex");
}

/// Extract the first JSON object from possibly-messy text. Returns None when
/// nothing brace-balanced parses; no defaults are invented here.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    // 1. The whole thing is JSON
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    // 2. A fenced ```json block
    if let Some(caps) = FENCED_BLOCK.captures(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&caps[1]) {
            if value.is_object() {
                return Some(value);
            }
        }
    }

    // 3. Largest brace-balanced span
    if let Some(span) = largest_balanced_object(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(span) {
            if value.is_object() {
                return Some(value);
            }
        }
    }

    None
}

/// Full ladder plus the degraded last resort: scrape `key: value` pairs out
/// of the raw text and lay them over the caller's defaults. Every key in
/// `defaults` is guaranteed present in the result.
pub fn scrape_fields(text: &str, defaults: &Value) -> Value {
    if let Some(parsed) = extract_json(text) {
        return merge_over(defaults, &parsed);
    }

    let mut result = defaults.clone();
    if let Some(obj) = result.as_object_mut() {
        for caps in NUMBER_FIELD.captures_iter(text) {
            if obj.contains_key(&caps[1]) {
                if let Ok(n) = caps[2].parse::<f64>() {
                    if let Some(num) = serde_json::Number::from_f64(n) {
                        obj.insert(caps[1].to_string(), Value::Number(num));
                    }
                }
            }
        }
        for caps in STRING_FIELD.captures_iter(text) {
            if obj.get(&caps[1]).map(Value::is_string).unwrap_or(false) {
                obj.insert(caps[1].to_string(), Value::String(caps[2].to_string()));
            }
        }
    }
    result
}

/// Keys from `overlay` win; keys only in `base` survive.
fn merge_over(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut out = base_map.clone();
            for (k, v) in overlay_map {
                out.insert(k.clone(), v.clone());
            }
            Value::Object(out)
        }
        _ => overlay.clone(),
    }
}

/// Find the largest `{...}` span with balanced braces, ignoring braces
/// inside string literals.
fn largest_balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut best: Option<(usize, usize)> = None;
    let mut start = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start {
                            let len = i + 1 - s;
                            if best.map(|(bs, be)| len > be - bs).unwrap_or(true) {
                                best = Some((s, i + 1));
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    best.map(|(s, e)| &text[s..e])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_parse() {
        let v = extract_json(r#"{"safety_impact": -3, "description": "risky"}"#).unwrap();
        assert_eq!(v["safety_impact"], -3);
    }

    #[test]
    fn test_fenced_block() {
        let text = "Here is the result:\n```json\n{\"fuel_impact\": 120.5}\n```\nHope that helps!";
        let v = extract_json(text).unwrap();
        assert_eq!(v["fuel_impact"], 120.5);
    }

    #[test]
    fn test_brace_scan() {
        let text = "The impact is {\"time_impact\": 6} based on the deviation.";
        let v = extract_json(text).unwrap();
        assert_eq!(v["time_impact"], 6);
    }

    #[test]
    fn test_brace_scan_ignores_braces_in_strings() {
        let text = r#"noise {"description": "fly heading {as assigned}", "time_impact": 2} noise"#;
        let v = extract_json(text).unwrap();
        assert_eq!(v["description"], "fly heading {as assigned}");
    }

    #[test]
    fn test_nested_object() {
        let text = "prefix {\"parameter_changes\": {\"altitude\": 10000}, \"x\": 1} suffix";
        let v = extract_json(text).unwrap();
        assert_eq!(v["parameter_changes"]["altitude"], 10000);
    }

    #[test]
    fn test_no_json_returns_none() {
        assert!(extract_json("maintain heading and hold").is_none());
        assert!(extract_json("unbalanced { \"a\": 1").is_none());
    }

    #[test]
    fn test_scrape_fields_uses_defaults() {
        let defaults = json!({"safety_impact": 0.0, "description": "No impact"});
        let out = scrape_fields("totally unparseable", &defaults);
        assert_eq!(out, defaults);
    }

    #[test]
    fn test_scrape_fields_picks_up_loose_pairs() {
        let defaults = json!({"safety_impact": 0.0, "fuel_impact": 0.0, "description": "n/a"});
        let out = scrape_fields(
            "I'd say safety_impact: -4 and \"fuel_impact\": 250, description: unclear",
            &defaults,
        );
        assert_eq!(out["safety_impact"], -4.0);
        assert_eq!(out["fuel_impact"], 250.0);
        // unquoted string values are not scraped; default survives
        assert_eq!(out["description"], "n/a");
    }

    #[test]
    fn test_scrape_prefers_clean_parse() {
        let defaults = json!({"safety_impact": 0.0, "extra": true});
        let out = scrape_fields(r#"{"safety_impact": 5}"#, &defaults);
        assert_eq!(out["safety_impact"], 5);
        assert_eq!(out["extra"], true);
    }
}
