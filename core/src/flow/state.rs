//! Conversation state owned by one call-flow engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A typed session variable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl VarValue {
    /// Numeric view of the value. Text is accepted when it reads as an amount.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            VarValue::Number(value) => Some(*value),
            VarValue::Text(text) => parse_amount(text),
            VarValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            VarValue::Bool(value) => Some(*value),
            VarValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(true),
                "false" | "no" => Some(false),
                _ => None,
            },
            VarValue::Number(_) => None,
        }
    }
}

impl fmt::Display for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarValue::Bool(value) => write!(f, "{value}"),
            VarValue::Number(value) => {
                if value.fract() == 0.0 && value.abs() < 1e15 {
                    write!(f, "{}", *value as i64)
                } else {
                    write!(f, "{value}")
                }
            }
            VarValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for VarValue {
    fn from(value: &str) -> Self {
        VarValue::Text(value.to_string())
    }
}

impl From<String> for VarValue {
    fn from(value: String) -> Self {
        VarValue::Text(value)
    }
}

impl From<f64> for VarValue {
    fn from(value: f64) -> Self {
        VarValue::Number(value)
    }
}

impl From<i64> for VarValue {
    fn from(value: i64) -> Self {
        VarValue::Number(value as f64)
    }
}

impl From<bool> for VarValue {
    fn from(value: bool) -> Self {
        VarValue::Bool(value)
    }
}

/// Parses spoken or written amounts such as `$60,000`, `60k` or `1.5 million`.
pub fn parse_amount(text: &str) -> Option<f64> {
    let lowered = text.trim().to_ascii_lowercase();
    let mut cleaned: String = lowered
        .chars()
        .filter(|ch| !matches!(ch, '$' | '€' | '£' | ',' | ' ' | '_'))
        .collect();

    let mut multiplier = 1.0;
    for (suffix, factor) in [("million", 1e6), ("thousand", 1e3), ("m", 1e6), ("k", 1e3)] {
        if let Some(stripped) = cleaned.strip_suffix(suffix) {
            cleaned = stripped.to_string();
            multiplier = factor;
            break;
        }
    }

    if cleaned.is_empty() {
        return None;
    }

    cleaned
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(|value| value * multiplier)
}

/// Named session variables. Values are only replaced through [`SessionVariables::overwrite`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionVariables(BTreeMap<String, VarValue>);

impl SessionVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&VarValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Stores the value unless the variable is already set. Returns whether it was stored.
    pub fn set_if_absent(&mut self, name: impl Into<String>, value: VarValue) -> bool {
        let name = name.into();
        if self.0.contains_key(&name) {
            return false;
        }
        self.0.insert(name, value);
        true
    }

    /// Explicit overwrite. Returns whether the stored value changed.
    pub fn overwrite(&mut self, name: impl Into<String>, value: VarValue) -> bool {
        let name = name.into();
        match self.0.get(&name) {
            Some(existing) if *existing == value => false,
            _ => {
                self.0.insert(name, value);
                true
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VarValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<VarValue>> FromIterator<(K, V)> for SessionVariables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Agent,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Agent => "agent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
    pub node_id: String,
    pub timestamp_ms: i64,
}

impl ConversationTurn {
    pub fn new(speaker: Speaker, text: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            node_id: node_id.into(),
            timestamp_ms: now_ms(),
        }
    }
}

/// Append-only turn log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory(Vec<ConversationTurn>);

impl ConversationHistory {
    pub fn push(&mut self, turn: ConversationTurn) {
        self.0.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.0
    }

    /// The last `window` turns, used as bounded LLM context.
    pub fn recent(&self, window: usize) -> &[ConversationTurn] {
        let start = self.0.len().saturating_sub(window);
        &self.0[start..]
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub current_node_id: String,
    pub session_variables: SessionVariables,
    pub conversation_history: ConversationHistory,
    pub should_end_call: bool,
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_amount_shapes() {
        assert_eq!(parse_amount("$60,000"), Some(60_000.0));
        assert_eq!(parse_amount("60k"), Some(60_000.0));
        assert_eq!(parse_amount("1.5 million"), Some(1_500_000.0));
        assert_eq!(parse_amount("a lot"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn whole_numbers_render_without_fraction() {
        assert_eq!(VarValue::Number(5000.0).to_string(), "5000");
        assert_eq!(VarValue::Number(12.5).to_string(), "12.5");
    }

    #[test]
    fn set_if_absent_keeps_existing_value() {
        let mut vars = SessionVariables::new();
        assert!(vars.set_if_absent("name", "Mike".into()));
        assert!(!vars.set_if_absent("name", "Other".into()));
        assert_eq!(vars.get("name"), Some(&VarValue::Text("Mike".into())));
        assert!(vars.overwrite("name", "Other".into()));
        assert!(!vars.overwrite("name", "Other".into()));
    }

    #[test]
    fn variables_serialize_as_plain_json_values() {
        let vars: SessionVariables = [
            ("income", VarValue::Number(60_000.0)),
            ("employed", VarValue::Bool(true)),
            ("name", VarValue::Text("Mike".into())),
        ]
        .into_iter()
        .collect();

        let encoded = serde_json::to_string(&vars).expect("encode");
        assert_eq!(encoded, r#"{"employed":true,"income":60000.0,"name":"Mike"}"#);
        let decoded: SessionVariables = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, vars);
    }

    #[test]
    fn recent_window_is_bounded() {
        let mut history = ConversationHistory::default();
        for index in 0..5 {
            history.push(ConversationTurn::new(Speaker::User, format!("t{index}"), "a"));
        }
        let window = history.recent(2);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].text, "t3");
        assert_eq!(history.recent(10).len(), 5);
    }
}
