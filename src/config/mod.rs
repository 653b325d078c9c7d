use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::LoggingConfig;
use crate::supervisor::ExitCodePolicy;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub executables: ExecutableConfig,
    pub run: RunConfig,
    pub pyramid: PyramidConfig,
    pub display: DisplayConfig,
    pub logging: LoggingConfig,
}

/// Locations of the registration executables. A leading `~/` is expanded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutableConfig {
    pub aladin: String,
    pub f3d: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Parent of the per-run directories (system temp dir when unset).
    pub temp_root: Option<PathBuf>,
    pub exit_code_policy: ExitCodePolicy,
    /// Save the command line and the tool output next to the run files.
    pub save_command_files: bool,
    /// Keep the run directory after the run finishes.
    pub keep_run_directory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PyramidConfig {
    pub min_level_size: usize,
    pub default_highest: usize,
    pub default_lowest: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub overlay_opacity: f64,
}

impl Default for ExecutableConfig {
    fn default() -> Self {
        Self {
            aladin: "~/bin/reg_aladin".to_string(),
            f3d: "~/bin/reg_f3d".to_string(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            temp_root: None,
            exit_code_policy: ExitCodePolicy::Strict,
            save_command_files: true,
            keep_run_directory: true,
        }
    }
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            min_level_size: crate::pyramid::MIN_LEVEL_SIZE,
            default_highest: 3,
            default_lowest: 2,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            overlay_opacity: 0.5,
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}

impl ExecutableConfig {
    pub fn aladin_path(&self) -> PathBuf {
        expand_home(&self.aladin)
    }

    pub fn f3d_path(&self) -> PathBuf {
        expand_home(&self.f3d)
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;

        if content.trim_start().starts_with('{') {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> Result<(), Box<dyn std::error::Error>> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.executables.aladin.trim().is_empty() {
            errors.push("reg_aladin path must not be empty".to_string());
        }

        if self.executables.f3d.trim().is_empty() {
            errors.push("reg_f3d path must not be empty".to_string());
        }

        if self.pyramid.min_level_size < 2 {
            errors.push("Pyramid min_level_size must be at least 2".to_string());
        }

        if self.pyramid.default_lowest > self.pyramid.default_highest {
            errors.push("Pyramid default_lowest must not exceed default_highest".to_string());
        }

        if !(0.0..=1.0).contains(&self.display.overlay_opacity) {
            errors.push("Overlay opacity must be between 0 and 1".to_string());
        }

        if let Err(e) = self.logging.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConfigFormat {
    Json,
    Toml,
}

pub fn load_config_or_default(config_path: Option<&Path>) -> Config {
    match config_path {
        Some(path) => {
            match Config::load_from_file(path) {
                Ok(config) => {
                    if let Err(errors) = config.validate() {
                        eprintln!("Configuration validation errors:");
                        for error in errors {
                            eprintln!("  - {}", error);
                        }
                        eprintln!("Using default configuration instead.");
                        Config::default()
                    } else {
                        config
                    }
                }
                Err(e) => {
                    eprintln!("Failed to load config from '{}': {}", path.display(), e);
                    eprintln!("Using default configuration.");
                    Config::default()
                }
            }
        }
        None => Config::default(),
    }
}
