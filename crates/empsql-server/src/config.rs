//! Configuration system for the empsql server
//!
//! Loads configuration from:
//! 1. config.yaml - operational settings (port, database, model, logging)
//! 2. .env file - secrets (OPENAI_API_KEY, read by the generation runtime)
//!
//! Environment variables always override config.yaml values. A missing
//! config.yaml means defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// DuckDB database file holding the employees tables
    pub path: String,

    /// Open the file read-only
    pub read_only: bool,

    /// Fail queries returning more rows than this
    pub max_rows: Option<u64>,

    pub max_memory_mb: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/employees.duckdb".to_string(),
            read_only: true,
            max_rows: Some(10_000),
            max_memory_mb: None,
        }
    }
}

/// Language model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,

    /// Upper bound on generated tokens
    pub max_tokens: u32,

    /// 0.0 gives reproducible output for identical prompts
    pub temperature: f32,

    /// SQL dialect named in the prompt
    pub dialect: String,

    /// OpenAI-compatible endpoint, e.g. `http://localhost:8000/v1`.
    /// Unset means the public OpenAI API.
    pub api_base: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 500,
            temperature: 0.0,
            dialect: "DuckDB".to_string(),
            api_base: None,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Put each clause of generated SQL on its own line
    pub reindent: bool,

    /// Reject statements whose root is not a query, on top of the denylist
    pub require_query_root: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            return Self::load(path);
        }

        let mut config = Config::default();
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("EMPSQL_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("EMPSQL_SERVER_PORT") {
            if let Ok(port_num) = port.parse() {
                self.server.port = port_num;
            }
        }

        if let Ok(path) = std::env::var("EMPSQL_DATABASE") {
            self.database.path = path;
        }
        if let Ok(max_rows) = std::env::var("EMPSQL_MAX_ROWS") {
            if let Ok(n) = max_rows.parse() {
                self.database.max_rows = Some(n);
            }
        }

        if let Ok(model) = std::env::var("EMPSQL_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(api_base) = std::env::var("EMPSQL_LLM_API_BASE") {
            self.llm.api_base = Some(api_base);
        }
        if let Ok(max_tokens) = std::env::var("EMPSQL_LLM_MAX_TOKENS") {
            if let Ok(n) = max_tokens.parse() {
                self.llm.max_tokens = n;
            }
        }

        if let Ok(reindent) = std::env::var("EMPSQL_REINDENT") {
            self.pipeline.reindent = parse_flag(&reindent);
        }
        if let Ok(strict) = std::env::var("EMPSQL_REQUIRE_QUERY_ROOT") {
            self.pipeline.require_query_root = parse_flag(&strict);
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            self.logging.directory = dir;
        }
    }

    /// Set logging environment variables for the logging module
    pub fn apply_logging_env(&self) {
        std::env::set_var("RUST_LOG", &self.logging.level);
        std::env::set_var("LOG_FORMAT", &self.logging.format);
        std::env::set_var("LOG_OUTPUT", &self.logging.output);
        std::env::set_var("LOG_DIR", &self.logging.directory);
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path, "data/employees.duckdb");
        assert!(config.database.read_only);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.max_tokens, 500);
        assert_eq!(config.llm.temperature, 0.0);
        assert!(!config.pipeline.reindent);
        assert!(!config.pipeline.require_query_root);
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.logging.output, "stdout");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            r#"
llm:
  model: "gpt-4o"
pipeline:
  reindent: true
"#,
        )
        .unwrap();

        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.max_tokens, 500);
        assert!(config.pipeline.reindent);
        assert_eq!(config.database.max_rows, Some(10_000));
    }

    #[test]
    fn test_env_var_override() {
        std::env::set_var("EMPSQL_SERVER_PORT", "9090");
        std::env::set_var("EMPSQL_REQUIRE_QUERY_ROOT", "true");

        let config_yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080
database:
  path: "data/test.duckdb"
"#;
        let temp_file = std::env::temp_dir().join(format!("empsql-config-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&temp_file, config_yaml).unwrap();

        let config = Config::load(&temp_file).unwrap();
        assert_eq!(config.server.port, 9090); // Overridden
        assert!(config.pipeline.require_query_root); // Overridden
        assert_eq!(config.database.path, "data/test.duckdb");

        std::env::remove_var("EMPSQL_SERVER_PORT");
        std::env::remove_var("EMPSQL_REQUIRE_QUERY_ROOT");
        std::fs::remove_file(temp_file).ok();
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let missing = std::env::temp_dir().join(format!("empsql-missing-{}.yaml", uuid::Uuid::new_v4()));

        let config = Config::load_or_default(&missing).unwrap();
        assert_eq!(config.llm.dialect, "DuckDB");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("off"));
        assert!(!parse_flag(""));
    }
}
