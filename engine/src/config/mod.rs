//! Configuration management
//!
//! This module handles loading, validation, and management of the foreman
//! configuration. Configuration is stored in TOML format at
//! ~/.foreman/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: data directory, log level, sandbox base directory
//! - **http**: bind host and port for the HTTP front-end
//! - **inference**: backend host, timeouts, model preferences per task class
//! - **orchestrator**: worker pool size, workflow deadline, persona matching
//! - **memory**: short-term window size and long-term retention
//! - **personality**: resolved prompt prefix and style descriptor
//!
//! # Precedence
//!
//! Values are resolved in this order: CLI flags, environment variables,
//! the config file, built-in defaults. The recognised environment
//! variables are `INFERENCE_HOST`, `HTTP_HOST`, `HTTP_PORT` and
//! `LOG_LEVEL`.
//!
//! # Path Expansion
//!
//! The configuration system automatically expands `~` to the user's home
//! directory and creates the data directory if it does not exist.

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
///
/// Represents the complete foreman configuration loaded from
/// ~/.foreman/config.toml. Every section falls back to defaults when
/// absent, so an empty file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// HTTP front-end settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Inference backend configuration
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Orchestrator tuning
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Personality configuration (resolved externally, consumed here)
    #[serde(default)]
    pub personality: PersonalityConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Base directory that user-supplied path fields must stay inside
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            base_dir: default_base_dir(),
        }
    }
}

/// HTTP front-end configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Bind host
    #[serde(default = "default_http_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
        }
    }
}

/// Inference backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Base URL of the local model endpoint
    #[serde(default = "default_inference_host")]
    pub host: String,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Total request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Fail startup when the backend is unreachable
    #[serde(default)]
    pub strict_startup: bool,

    /// Model used when no class preference resolves
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Preferred models per task class, in fallback order
    #[serde(default)]
    pub models: ModelPreferences,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            host: default_inference_host(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            strict_startup: false,
            default_model: default_model(),
            models: ModelPreferences::default(),
        }
    }
}

/// Preferred model names per task class, each list in fallback order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPreferences {
    #[serde(default = "default_code_models")]
    pub code: Vec<String>,

    #[serde(default = "default_reasoning_models")]
    pub reasoning: Vec<String>,

    #[serde(default = "default_conversation_models")]
    pub conversation: Vec<String>,

    #[serde(default = "default_general_models")]
    pub general: Vec<String>,
}

impl Default for ModelPreferences {
    fn default() -> Self {
        Self {
            code: default_code_models(),
            reasoning: default_reasoning_models(),
            conversation: default_conversation_models(),
            general: default_general_models(),
        }
    }
}

/// Orchestrator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum concurrent inference requests within a stage
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Per-workflow deadline in seconds
    #[serde(default = "default_workflow_timeout")]
    pub workflow_timeout_secs: u64,

    /// Minimum similarity for reusing a library persona
    #[serde(default = "default_match_threshold")]
    pub persona_match_threshold: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            workflow_timeout_secs: default_workflow_timeout(),
            persona_match_threshold: default_match_threshold(),
        }
    }
}

/// Memory system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Conversation turns retained per session
    #[serde(default = "default_short_term_window")]
    pub short_term_window: usize,

    /// Workflow records kept in memory before archival
    #[serde(default = "default_long_term_max")]
    pub long_term_max_records: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_window: default_short_term_window(),
            long_term_max_records: default_long_term_max(),
        }
    }
}

/// Personality configuration
///
/// The personality itself is resolved by an external tool; the engine only
/// consumes the resulting prompt prefix and style descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersonalityConfig {
    /// Text prepended to every agent system prompt
    #[serde(default)]
    pub prompt_prefix: String,

    /// Style descriptor surfaced to agents (e.g. "concise", "thorough")
    #[serde(default)]
    pub style: String,
}

// Default value functions

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.foreman")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("~/.foreman/workspace")
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_inference_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    120
}

fn default_model() -> String {
    "qwen2.5:latest".to_string()
}

fn default_code_models() -> Vec<String> {
    vec![
        "qwen2.5-coder:latest".to_string(),
        "deepseek-coder:latest".to_string(),
    ]
}

fn default_reasoning_models() -> Vec<String> {
    vec!["deepseek-r1:latest".to_string(), "qwen2.5:32b".to_string()]
}

fn default_conversation_models() -> Vec<String> {
    vec!["llama3.2:3b".to_string(), "qwen2.5:latest".to_string()]
}

fn default_general_models() -> Vec<String> {
    vec!["qwen2.5:latest".to_string(), "llama3.1:latest".to_string()]
}

fn default_max_workers() -> usize {
    4
}

fn default_workflow_timeout() -> u64 {
    600
}

fn default_match_threshold() -> f64 {
    0.7
}

fn default_short_term_window() -> usize {
    20
}

fn default_long_term_max() -> usize {
    10_000
}

impl Config {
    /// Load configuration from the default location (~/.foreman/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default one.
    /// Environment variable overrides are applied after loading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, TOML parsing fails, or
    /// validation fails.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.apply_env();
        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save it to `path`
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.apply_env();
        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.foreman/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".foreman").join("config.toml"))
    }

    /// Apply recognised environment variable overrides
    ///
    /// Env vars sit between the config file and CLI flags in precedence:
    /// `INFERENCE_HOST`, `HTTP_HOST`, `HTTP_PORT`, `LOG_LEVEL`.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("INFERENCE_HOST") {
            if !host.is_empty() {
                self.inference.host = host;
            }
        }
        if let Ok(host) = std::env::var("HTTP_HOST") {
            if !host.is_empty() {
                self.http.host = host;
            }
        }
        if let Ok(port) = std::env::var("HTTP_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.http.port = p,
                Err(_) => tracing::warn!("Ignoring invalid HTTP_PORT value: {}", port),
            }
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            if !level.is_empty() {
                self.core.log_level = level.to_lowercase();
            }
        }
    }

    /// Validate and process configuration
    ///
    /// Validates enumerated fields and numeric ranges, expands `~` in
    /// paths, and creates the data directory if it does not exist.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.orchestrator.max_workers == 0 {
            return Err(EngineError::Config(
                "orchestrator.max_workers must be at least 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.orchestrator.persona_match_threshold) {
            return Err(EngineError::Config(
                "orchestrator.persona_match_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.memory.short_term_window == 0 {
            return Err(EngineError::Config(
                "memory.short_term_window must be at least 1".to_string(),
            ));
        }

        if !self.inference.host.starts_with("http://") && !self.inference.host.starts_with("https://")
        {
            self.inference.host = format!("http://{}", self.inference.host);
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        self.core.base_dir = expand_path(&self.core.base_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.http.host, "0.0.0.0");
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.inference.host, "http://localhost:11434");
        assert_eq!(config.inference.connect_timeout_secs, 5);
        assert_eq!(config.inference.request_timeout_secs, 120);
        assert_eq!(config.orchestrator.max_workers, 4);
        assert_eq!(config.orchestrator.workflow_timeout_secs, 600);
        assert_eq!(config.memory.short_term_window, 20);
        assert_eq!(config.memory.long_term_max_records, 10_000);
    }

    #[test]
    fn test_empty_file_is_valid() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.http.port, 8080);
        assert!((config.orchestrator.persona_match_threshold - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.inference.host, deserialized.inference.host);
        assert_eq!(
            config.orchestrator.max_workers,
            deserialized.orchestrator.max_workers
        );
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = Config::default();
        config.core.log_level = "verbose".to_string();
        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_host_scheme_normalised() {
        let mut config = Config::default();
        config.core.data_dir = std::env::temp_dir();
        config.core.base_dir = std::env::temp_dir();
        config.inference.host = "localhost:11434".to_string();
        config.validate_and_process().unwrap();
        assert_eq!(config.inference.host, "http://localhost:11434");
    }
}
