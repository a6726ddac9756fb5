//! Runtime configuration.
//!
//! Defaults are usable as-is. A TOML file named by `CALLFLOW_CONFIG` is layered on
//! top, then a handful of environment overrides. Credentials never live here; they
//! come from a [`crate::specialists::CredentialResolver`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "CALLFLOW_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub llm: LlmSettings,
    pub team: TeamSettings,
    pub session: SessionSettings,
    pub transcription: TranscriptionConfig,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl CoreConfig {
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => {
                let source = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file {path}"))?;
                Self::from_toml_str(&source)
                    .with_context(|| format!("failed to parse config file {path}"))?
            }
            Err(_) => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).context("invalid callflow configuration")
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = lookup("CALLFLOW_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = lookup("CALLFLOW_LLM_MODEL") {
            self.llm.reasoning_model = value;
        }
        if let Some(value) = lookup("CALLFLOW_LLM_FAST_MODEL") {
            self.llm.fast_model = value;
        }
        if let Some(value) = lookup("CALLFLOW_DB_PATH") {
            self.storage.sqlite_path = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("CALLFLOW_LOG_DIR") {
            self.logging.directory = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("CALLFLOW_LOG_FORMAT") {
            match value.trim().to_ascii_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "plain" | "text" => self.logging.format = LogFormat::Plain,
                _ => {}
            }
        }
        if let Some(value) = lookup("CALLFLOW_STT_URL") {
            self.transcription.url = value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub reasoning_model: String,
    pub fast_model: String,
    pub request_timeout_ms: u64,
    pub credential_service: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            reasoning_model: "gpt-4o".into(),
            fast_model: "gpt-4o-mini".into(),
            request_timeout_ms: 10_000,
            credential_service: "llm".into(),
        }
    }
}

impl LlmSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Budgets for the specialist team. Every specialist has its own timeout and a
/// hard-coded default answer used when the timeout expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamSettings {
    pub fast_model: String,
    pub reasoning_model: String,
    pub intent_timeout_ms: u64,
    pub style_timeout_ms: u64,
    pub context_timeout_ms: u64,
    pub tactic_timeout_ms: u64,
    pub transition_timeout_ms: u64,
    pub extraction_timeout_ms: u64,
    pub synthesis_timeout_ms: u64,
    pub label_max_tokens: u32,
    pub yes_no_max_tokens: u32,
    pub extraction_max_tokens: u32,
    pub synthesis_max_tokens: u32,
    pub synthesis_temperature: f32,
    pub retrieval_top_k: usize,
    pub history_window: usize,
}

impl Default for TeamSettings {
    fn default() -> Self {
        Self {
            fast_model: "gpt-4o-mini".into(),
            reasoning_model: "gpt-4o".into(),
            intent_timeout_ms: 900,
            style_timeout_ms: 900,
            context_timeout_ms: 700,
            tactic_timeout_ms: 700,
            transition_timeout_ms: 1_200,
            extraction_timeout_ms: 1_500,
            synthesis_timeout_ms: 3_500,
            label_max_tokens: 6,
            yes_no_max_tokens: 3,
            extraction_max_tokens: 200,
            synthesis_max_tokens: 220,
            synthesis_temperature: 0.4,
            retrieval_top_k: 3,
            history_window: 12,
        }
    }
}

impl TeamSettings {
    /// Copies model names from the LLM section so one place configures them.
    pub fn with_models(mut self, llm: &LlmSettings) -> Self {
        self.fast_model = llm.fast_model.clone();
        self.reasoning_model = llm.reasoning_model.clone();
        self
    }

    pub fn intent_timeout(&self) -> Duration {
        Duration::from_millis(self.intent_timeout_ms)
    }

    pub fn style_timeout(&self) -> Duration {
        Duration::from_millis(self.style_timeout_ms)
    }

    pub fn context_timeout(&self) -> Duration {
        Duration::from_millis(self.context_timeout_ms)
    }

    pub fn tactic_timeout(&self) -> Duration {
        Duration::from_millis(self.tactic_timeout_ms)
    }

    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.transition_timeout_ms)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.extraction_timeout_ms)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub inactivity_window_secs: u64,
    pub cache_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            inactivity_window_secs: 30 * 60,
            cache_capacity: 256,
        }
    }
}

impl SessionSettings {
    pub fn inactivity_window(&self) -> Duration {
        Duration::from_secs(self.inactivity_window_secs)
    }
}

/// Streaming speech-recognition connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub url: String,
    pub model: String,
    pub sample_rate: u32,
    pub audio_format: String,
    pub num_channels: u16,
    pub enable_endpoint_detection: bool,
    pub language_hints: Vec<String>,
    pub credential_service: String,
    pub connect_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub event_buffer: usize,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            url: "wss://stt-rt.soniox.com/transcribe-websocket".into(),
            model: "stt-rt-preview".into(),
            sample_rate: 8_000,
            audio_format: "pcm_s16le".into(),
            num_channels: 1,
            enable_endpoint_detection: true,
            language_hints: vec!["en".into()],
            credential_service: "speech".into(),
            connect_timeout_secs: 10,
            keepalive_interval_secs: 15,
            idle_timeout_secs: 120,
            event_buffer: 64,
        }
    }
}

impl TranscriptionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs.max(1))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// `None` keeps sessions in memory only.
    pub sqlite_path: Option<PathBuf>,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            sqlite_path: None,
            pool_size: 4,
            busy_timeout_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub format: LogFormat,
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Plain,
            directory: None,
            file_prefix: "callflow.log".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = CoreConfig::from_toml_str(
            r#"
            [team]
            transition_timeout_ms = 2000

            [session]
            cache_capacity = 8

            [logging]
            format = "json"
            "#,
        )
        .expect("config parses");

        assert_eq!(config.team.transition_timeout(), Duration::from_secs(2));
        assert_eq!(config.team.intent_timeout_ms, 900);
        assert_eq!(config.session.cache_capacity, 8);
        assert_eq!(config.session.inactivity_window(), Duration::from_secs(1800));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn env_overrides_apply_non_empty_values() {
        let env: HashMap<&str, &str> = [
            ("CALLFLOW_LLM_MODEL", "gpt-test"),
            ("CALLFLOW_DB_PATH", "/tmp/callflow.db"),
            ("CALLFLOW_STT_URL", "  "),
            ("CALLFLOW_LOG_FORMAT", "JSON"),
        ]
        .into_iter()
        .collect();

        let mut config = CoreConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.llm.reasoning_model, "gpt-test");
        assert_eq!(config.storage.sqlite_path, Some(PathBuf::from("/tmp/callflow.db")));
        assert_eq!(config.transcription.url, TranscriptionConfig::default().url);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn team_models_follow_llm_section() {
        let mut llm = LlmSettings::default();
        llm.fast_model = "small".into();
        let team = TeamSettings::default().with_models(&llm);
        assert_eq!(team.fast_model, "small");
        assert_eq!(team.reasoning_model, llm.reasoning_model);
    }
}
