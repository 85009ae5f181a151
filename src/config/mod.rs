//! Trace processing configuration
//!
//! Controls OpenInference masking, span naming, metadata size, and logging.
//! Configuration can come from a file (TOML, YAML, JSON), from environment
//! variables, or both, with the environment taking precedence.

use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};
use thiserror::Error;

use crate::telemetry::semconv::{attrs, REDACTED_VALUE};
use crate::telemetry::{Attributes, AttributeValue, LogLevel, LoggingConfig};

pub const ENV_HIDE_INPUTS: &str = "OPENINFERENCE_HIDE_INPUTS";
pub const ENV_HIDE_OUTPUTS: &str = "OPENINFERENCE_HIDE_OUTPUTS";
pub const ENV_HIDE_INPUT_MESSAGES: &str = "OPENINFERENCE_HIDE_INPUT_MESSAGES";
pub const ENV_HIDE_OUTPUT_MESSAGES: &str = "OPENINFERENCE_HIDE_OUTPUT_MESSAGES";
pub const ENV_HIDE_INPUT_TEXT: &str = "OPENINFERENCE_HIDE_INPUT_TEXT";
pub const ENV_HIDE_OUTPUT_TEXT: &str = "OPENINFERENCE_HIDE_OUTPUT_TEXT";
pub const ENV_ROOT_SPAN_NAME: &str = "BEDROCK_TRACE_ROOT_SPAN_NAME";
pub const ENV_LOG_LEVEL: &str = "BEDROCK_TRACE_LOG_LEVEL";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable parsing error: {0}")]
    EnvVarParse(String),
    #[error("File parsing error: {0}")]
    FileParse(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Main configuration for trace reconstruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Replace `input.value` with a redaction marker and drop input messages
    #[serde(default)]
    pub hide_inputs: bool,
    /// Replace `output.value` with a redaction marker and drop output messages
    #[serde(default)]
    pub hide_outputs: bool,
    /// Drop `llm.input_messages.*`
    #[serde(default)]
    pub hide_input_messages: bool,
    /// Drop `llm.output_messages.*`
    #[serde(default)]
    pub hide_output_messages: bool,
    /// Redact the content of input messages
    #[serde(default)]
    pub hide_input_text: bool,
    /// Redact the content of output messages
    #[serde(default)]
    pub hide_output_text: bool,
    /// Name of the span wrapping the whole invocation
    #[serde(default = "default_root_span_name")]
    pub root_span_name: String,
    /// Instrumentation scope name used by the OpenTelemetry sink
    #[serde(default = "default_tracer_name")]
    pub tracer_name: String,
    /// Upper bound on the serialized `metadata` attribute
    #[serde(default = "default_max_metadata_bytes")]
    pub max_metadata_bytes: usize,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            hide_inputs: false,
            hide_outputs: false,
            hide_input_messages: false,
            hide_output_messages: false,
            hide_input_text: false,
            hide_output_text: false,
            root_span_name: default_root_span_name(),
            tracer_name: default_tracer_name(),
            max_metadata_bytes: default_max_metadata_bytes(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TraceConfig {
    /// Load configuration from a file (supports TOML, YAML, JSON)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let extension = path.extension().and_then(|s| s.to_str());

        match extension {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| ConfigError::FileParse(e.to_string()))
            }
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| ConfigError::FileParse(e.to_string()))
            }
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| ConfigError::FileParse(e.to_string()))
            }
            _ => Err(ConfigError::FileParse(
                "Unsupported file format. Use .toml, .yaml, .yml, or .json".to_string(),
            )),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_overrides(|key| env::var(key).ok())
    }

    /// Merge configuration with environment variable overrides
    pub fn merge_with_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup, environment style.
    ///
    /// Only keys the lookup returns are applied; everything else is kept.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flags: [(&str, &mut bool); 6] = [
            (ENV_HIDE_INPUTS, &mut self.hide_inputs),
            (ENV_HIDE_OUTPUTS, &mut self.hide_outputs),
            (ENV_HIDE_INPUT_MESSAGES, &mut self.hide_input_messages),
            (ENV_HIDE_OUTPUT_MESSAGES, &mut self.hide_output_messages),
            (ENV_HIDE_INPUT_TEXT, &mut self.hide_input_text),
            (ENV_HIDE_OUTPUT_TEXT, &mut self.hide_output_text),
        ];
        for (key, flag) in flags {
            if let Some(value) = lookup(key) {
                *flag = parse_bool(key, &value)?;
            }
        }

        if let Some(name) = lookup(ENV_ROOT_SPAN_NAME) {
            self.root_span_name = name;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level
                .parse::<LogLevel>()
                .map_err(|e| ConfigError::EnvVarParse(format!("{}: {}", ENV_LOG_LEVEL, e)))?;
        }

        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_span_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Root span name cannot be empty".to_string(),
            ));
        }
        if self.tracer_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Tracer name cannot be empty".to_string(),
            ));
        }
        if self.max_metadata_bytes == 0 {
            return Err(ConfigError::Validation(
                "max_metadata_bytes must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether any masking flag is set
    pub fn masks_anything(&self) -> bool {
        self.hide_inputs
            || self.hide_outputs
            || self.hide_input_messages
            || self.hide_output_messages
            || self.hide_input_text
            || self.hide_output_text
    }

    /// Apply the masking flags to a span's attributes in place
    pub fn mask(&self, attributes: &mut Attributes) {
        if !self.masks_anything() {
            return;
        }

        let input_messages = format!("{}.", attrs::LLM_INPUT_MESSAGES);
        let output_messages = format!("{}.", attrs::LLM_OUTPUT_MESSAGES);
        let drop_input_messages = self.hide_inputs || self.hide_input_messages;
        let drop_output_messages = self.hide_outputs || self.hide_output_messages;

        attributes.retain(|key, _| {
            !(drop_input_messages && key.starts_with(&input_messages)
                || drop_output_messages && key.starts_with(&output_messages))
        });

        if self.hide_inputs {
            redact(attributes, attrs::INPUT_VALUE);
            attributes.remove(attrs::INPUT_MIME_TYPE);
        }
        if self.hide_outputs {
            redact(attributes, attrs::OUTPUT_VALUE);
            attributes.remove(attrs::OUTPUT_MIME_TYPE);
        }

        let content_suffix = format!(".{}", attrs::MESSAGE_CONTENT);
        for (key, value) in attributes.iter_mut() {
            if !key.ends_with(&content_suffix) {
                continue;
            }
            if self.hide_input_text && key.starts_with(&input_messages)
                || self.hide_output_text && key.starts_with(&output_messages)
            {
                *value = AttributeValue::from(REDACTED_VALUE);
            }
        }
    }
}

fn redact(attributes: &mut Attributes, key: &str) {
    if let Some(value) = attributes.get_mut(key) {
        *value = AttributeValue::from(REDACTED_VALUE);
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(ConfigError::EnvVarParse(format!(
            "{}: expected a boolean, got '{}'",
            key, other
        ))),
    }
}

// Default value functions for serde
fn default_root_span_name() -> String {
    "bedrock_agent.invoke_agent".to_string()
}

fn default_tracer_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_max_metadata_bytes() -> usize {
    64 * 1024
}
