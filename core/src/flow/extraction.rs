//! Turns the extraction specialist's reply into typed session variables.
//!
//! Values the caller did not clearly state stay absent. Without a usable
//! reply nothing is extracted.

use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::graph::{VarKind, VariableSpec};

use super::state::{parse_amount, SessionVariables, VarValue};

const TARGET: &str = "call_flow";

/// Finds the JSON object in a model reply, tolerating code fences and chatter.
pub fn parse_reply(raw: &str) -> Option<Map<String, JsonValue>> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str::<JsonValue>(&raw[start..=end]) {
        Ok(JsonValue::Object(map)) => Some(map),
        _ => None,
    }
}

/// Converts one reply value to the declared type. `None` means "not stated".
pub fn coerce(kind: VarKind, value: &JsonValue) -> Option<VarValue> {
    match (kind, value) {
        (_, JsonValue::Null) => None,
        (VarKind::Number, JsonValue::Number(number)) => number.as_f64().map(VarValue::Number),
        (VarKind::Number, JsonValue::String(text)) => parse_amount(text).map(VarValue::Number),
        (VarKind::Number, _) => None,
        (VarKind::Boolean, JsonValue::Bool(flag)) => Some(VarValue::Bool(*flag)),
        (VarKind::Boolean, JsonValue::String(text)) => {
            match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" => Some(VarValue::Bool(true)),
                "false" | "no" | "n" => Some(VarValue::Bool(false)),
                _ => None,
            }
        }
        (VarKind::Boolean, _) => None,
        (VarKind::String, JsonValue::String(text)) => {
            let text = text.trim();
            if text.is_empty() || text.eq_ignore_ascii_case("null") || text.eq_ignore_ascii_case("unknown") {
                None
            } else {
                Some(VarValue::Text(text.to_string()))
            }
        }
        (VarKind::String, JsonValue::Number(number)) => {
            number.as_f64().map(|value| VarValue::Text(VarValue::Number(value).to_string()))
        }
        (VarKind::String, JsonValue::Bool(flag)) => Some(VarValue::Text(flag.to_string())),
        (VarKind::String, _) => None,
    }
}

/// Reads values for `specs` from the reply and stores them. A missing or
/// unparseable reply changes nothing. Returns the names whose value changed.
pub fn apply_extraction(
    specs: &[VariableSpec],
    reply: Option<&str>,
    vars: &mut SessionVariables,
) -> Vec<String> {
    let values: Vec<(&VariableSpec, VarValue)> = match reply.and_then(parse_reply) {
        Some(map) => specs
            .iter()
            .filter_map(|spec| {
                let value = map.get(&spec.name)?;
                coerce(spec.kind, value).map(|value| (spec, value))
            })
            .collect(),
        None => Vec::new(),
    };

    let mut changed = Vec::new();
    for (spec, value) in values {
        let stored = if spec.overwrite {
            vars.overwrite(spec.name.clone(), value)
        } else {
            vars.set_if_absent(spec.name.clone(), value)
        };
        if stored {
            debug!(target: TARGET, variable = %spec.name, "variable extracted");
            changed.push(spec.name.clone());
        }
    }
    changed
}
