//! Logging configuration system
//!
//! Provides configuration options for the logging system, including
//! per-component log levels and output destinations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub global_level: String,

    /// Enable console output
    pub console_output: bool,

    /// Directory for JSON log files (None = no file logging)
    pub log_directory: Option<PathBuf>,

    /// Include file location in logs
    pub include_file_location: bool,

    /// Log level for the run supervisor (process execution)
    pub supervisor_level: String,

    /// Log level for command building and result loading
    pub pipeline_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "info".to_string(),
            console_output: true,
            log_directory: None,
            include_file_location: false,
            supervisor_level: "info".to_string(),
            pipeline_level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Create a development configuration with verbose logging
    pub fn development() -> Self {
        Self {
            global_level: "debug".to_string(),
            console_output: true,
            log_directory: Some(PathBuf::from("logs")),
            include_file_location: true,
            supervisor_level: "trace".to_string(),
            pipeline_level: "debug".to_string(),
        }
    }

    /// Validate the configuration and provide helpful error messages
    pub fn validate(&self) -> Result<(), String> {
        for (name, level) in [
            ("global_level", &self.global_level),
            ("supervisor_level", &self.supervisor_level),
            ("pipeline_level", &self.pipeline_level),
        ] {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(format!(
                    "Invalid {}: {}. Must be one of: {:?}",
                    name, level, VALID_LEVELS
                ));
            }
        }

        if let Some(ref log_dir) = self.log_directory {
            if let Some(parent) = log_dir.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(format!("Log directory parent does not exist: {:?}", parent));
                }
            }
        }

        Ok(())
    }

    /// Get the effective log level for a specific component
    pub fn get_component_level(&self, component: &str) -> &str {
        match component {
            "supervisor" => &self.supervisor_level,
            "pipeline" | "command" | "results" => &self.pipeline_level,
            _ => &self.global_level,
        }
    }

    /// Filter directive string for `tracing_subscriber::EnvFilter`
    pub fn filter_directives(&self) -> String {
        let krate = env!("CARGO_PKG_NAME").replace('-', "_");
        format!(
            "{krate}={},{krate}::supervisor={},{krate}::pipeline={},{krate}::command={},{krate}::results={}",
            self.global_level,
            self.supervisor_level,
            self.pipeline_level,
            self.pipeline_level,
            self.pipeline_level,
        )
    }
}
