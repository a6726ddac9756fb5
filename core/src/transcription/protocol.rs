//! Speech-recognition wire format: one JSON config message on connect, then raw
//! binary audio; the server answers with JSON token batches.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::TranscriptionConfig;

/// Final token marking a detected endpoint.
pub const ENDPOINT_TOKEN: &str = "<end>";
/// Final token closing a manual finalize request; treated as an endpoint.
pub const FINALIZE_TOKEN: &str = "<fin>";

#[derive(Debug, Serialize)]
pub struct ConfigMessage<'a> {
    pub api_key: &'a str,
    pub model: &'a str,
    pub audio_format: &'a str,
    pub sample_rate: u32,
    pub num_channels: u16,
    pub enable_endpoint_detection: bool,
    pub language_hints: &'a [String],
}

impl<'a> ConfigMessage<'a> {
    pub fn new(config: &'a TranscriptionConfig, api_key: &'a str) -> Self {
        Self {
            api_key,
            model: &config.model,
            audio_format: &config.audio_format,
            sample_rate: config.sample_rate,
            num_channels: config.num_channels,
            enable_endpoint_detection: config.enable_endpoint_detection,
            language_hints: &config.language_hints,
        }
    }
}

/// Text control frames sent alongside audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Forces outstanding provisional tokens to become final.
    Finalize,
    Keepalive,
}

impl ControlMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Token {
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
}

impl Token {
    pub fn is_endpoint(&self) -> bool {
        matches!(self.text.trim(), ENDPOINT_TOKEN | FINALIZE_TOKEN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Number(i64),
    Text(String),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Number(code) => write!(f, "{code}"),
            ErrorCode::Text(code) => f.write_str(code),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerMessage {
    #[serde(default)]
    pub tokens: Vec<Token>,
    #[serde(default)]
    pub error_code: Option<ErrorCode>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub finished: bool,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn is_error(&self) -> bool {
        self.error_code.is_some() || self.error_message.is_some()
    }
}
