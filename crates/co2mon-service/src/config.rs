//! Daemon configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::render::GraphWindow;

/// Daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Retention store settings.
    pub storage: StorageConfig,
    /// Graph output settings.
    pub graphs: GraphsConfig,
    /// Sensor settings.
    pub sensor: SensorConfig,
    /// Single-instance guard settings.
    pub guard: GuardConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if it is absent.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// # Example
    ///
    /// ```
    /// use co2mon_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.storage.validate());
        errors.extend(self.graphs.validate());
        errors.extend(self.sensor.validate());
        errors.extend(self.guard.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load the default configuration and validate it.
    pub fn load_validated() -> Result<Self, ConfigError> {
        let config = Self::load_default()?;
        config.validate()?;
        Ok(config)
    }
}

/// Retention store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Store file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: co2mon_store::default_store_path(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "store path cannot be empty".to_string(),
            });
        }
        errors
    }
}

/// Graph output configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphsConfig {
    /// Directory receiving the PNG files.
    pub output_dir: PathBuf,
    /// Window labels, e.g. `8h`, `7d`, `1y`.
    pub windows: Vec<String>,
    /// Plot width in pixels.
    pub width: u32,
    /// Plot height in pixels.
    pub height: u32,
}

impl Default for GraphsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("/usr/share/nginx/html/images"),
            windows: ["8h", "24h", "7d", "1m", "1y"]
                .into_iter()
                .map(String::from)
                .collect(),
            width: 600,
            height: 200,
        }
    }
}

/// Largest accepted plot dimension in pixels.
pub const MAX_GRAPH_DIMENSION: u32 = 8192;

impl GraphsConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.output_dir.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "graphs.output_dir".to_string(),
                message: "output directory cannot be empty".to_string(),
            });
        }

        for (field, value) in [("graphs.width", self.width), ("graphs.height", self.height)] {
            if value == 0 || value > MAX_GRAPH_DIMENSION {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!("{} is outside 1-{}", value, MAX_GRAPH_DIMENSION),
                });
            }
        }

        let mut seen = std::collections::HashSet::new();
        for (i, label) in self.windows.iter().enumerate() {
            match label.parse::<GraphWindow>() {
                Ok(window) => {
                    if !seen.insert(window.label().to_string()) {
                        errors.push(ValidationError {
                            field: format!("graphs.windows[{}]", i),
                            message: format!("duplicate window '{}'", label),
                        });
                    }
                }
                Err(e) => errors.push(ValidationError {
                    field: format!("graphs.windows[{}]", i),
                    message: e.to_string(),
                }),
            }
        }

        errors
    }

    /// Parsed windows. Invalid labels are skipped; `validate` reports them.
    pub fn parsed_windows(&self) -> Vec<GraphWindow> {
        self.windows.iter().filter_map(|w| w.parse().ok()).collect()
    }
}

/// Sensor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// hidraw device node.
    pub device: PathBuf,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/hidraw0"),
        }
    }
}

impl SensorConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.device.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "sensor.device".to_string(),
                message: "device path cannot be empty".to_string(),
            });
        }
        errors
    }
}

/// Single-instance guard configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Abstract socket name (Linux) or lock file name in the temp dir.
    pub name: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            name: "co2mon.lock".to_string(),
        }
    }
}

impl GuardConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.name.is_empty() {
            errors.push(ValidationError {
                field: "guard.name".to_string(),
                message: "guard name cannot be empty".to_string(),
            });
        } else if self.name.contains('/') || self.name.contains('\0') {
            errors.push(ValidationError {
                field: "guard.name".to_string(),
                message: format!("guard name '{}' must not contain '/' or NUL", self.name),
            });
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// The field path (e.g., `graphs.width` or `graphs.windows[2]`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fixed configuration file path.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/co2mon/co2mon.toml")
}
