use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Runtime settings for a spectrogram view and its worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub zoom_px_per_second: f64,
    pub gain: f32,
    pub fft_size: usize,
    pub worker_threads: usize,
    pub request_timeout_ms: u64,
    pub max_init_attempts: u32,
    pub init_backoff_ms: u64,
    pub max_tile_attempts: u32,
    /// `None` keeps every tile for the lifetime of the source.
    pub cache_capacity_tiles: Option<usize>,
    pub channel_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            zoom_px_per_second: 500.0,
            gain: 9.0,
            fft_size: 2048,
            worker_threads: 2,
            request_timeout_ms: 10_000,
            max_init_attempts: 4,
            init_backoff_ms: 250,
            max_tile_attempts: 3,
            cache_capacity_tiles: None,
            channel_capacity: 256,
        }
    }
}

/// Configuration manager for spectrogram settings
/// Separates schema, available options and persisted values. Settings are
/// stored in spectra.json in the working directory by default
pub struct ConfigManager {
    config_path: PathBuf,
    settings: Settings,
    created_at: Option<String>,
}

/// Available configuration options with validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub view: ViewConfigSchema,
    pub worker: WorkerConfigSchema,
    pub scheduling: SchedulingConfigSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfigSchema {
    pub zoom_px_per_second: ConfigOption<f64>,
    pub gain: ConfigOption<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfigSchema {
    pub fft_size: ConfigOption<usize>,
    pub worker_threads: ConfigOption<usize>,
    pub channel_capacity: ConfigOption<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfigSchema {
    pub request_timeout_ms: ConfigOption<u64>,
    pub max_init_attempts: ConfigOption<u32>,
    pub init_backoff_ms: ConfigOption<u64>,
    pub max_tile_attempts: ConfigOption<u32>,
    pub cache_capacity_tiles: ConfigOption<usize>,
}

/// Configuration option with validation and available choices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOption<T> {
    pub default: T,
    pub valid_range: Option<(T, T)>,
    pub valid_choices: Option<Vec<T>>,
    pub description: String,
    pub requires_restart: bool,
}

impl<T: PartialOrd + Copy> ConfigOption<T> {
    fn in_range(&self, value: T) -> bool {
        match self.valid_range {
            Some((min, max)) => value >= min && value <= max,
            None => true,
        }
    }
}

/// Persisted configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub settings: Settings,
    pub created_at: String,
    pub modified_at: String,
}

impl ConfigManager {
    /// Create a new configuration manager
    /// If no path is provided, defaults to 'spectra.json' in the current working directory
    pub fn new(config_path: Option<PathBuf>) -> Self {
        let config_path = config_path.unwrap_or_else(|| PathBuf::from("spectra.json"));

        Self {
            config_path,
            settings: Settings::default(),
            created_at: None,
        }
    }

    /// Load settings from the configuration file
    /// Writes a default file if none exists yet
    pub fn load(&mut self) -> Result<Settings, ConfigError> {
        if !self.config_path.exists() {
            log::info!(
                "No config at {}, writing defaults",
                self.config_path.display()
            );
            self.save()?;
            return Ok(self.settings.clone());
        }

        let content = fs::read_to_string(&self.config_path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config_file: ConfigFile =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if config_file.version != env!("CARGO_PKG_VERSION") {
            log::warn!(
                "Config file version {} doesn't match application version {}. Using defaults for new settings.",
                config_file.version,
                env!("CARGO_PKG_VERSION")
            );
        }

        Self::validate_settings(&config_file.settings)?;

        self.settings = config_file.settings;
        self.created_at = Some(config_file.created_at);
        Ok(self.settings.clone())
    }

    /// Save current settings to the configuration file
    /// Keeps the creation time of a file that already exists
    pub fn save(&mut self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            if parent != Path::new("") && parent != Path::new(".") {
                fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let created_at = self
            .created_at
            .clone()
            .or_else(|| self.existing_created_at())
            .unwrap_or_else(|| now.clone());
        let config_file = ConfigFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            settings: self.settings.clone(),
            created_at: created_at.clone(),
            modified_at: now,
        };

        let content = serde_json::to_string_pretty(&config_file)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(&self.config_path, content)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;

        self.created_at = Some(created_at);
        Ok(())
    }

    /// Creation time recorded in the file on disk, if it can be read
    fn existing_created_at(&self) -> Option<String> {
        let content = fs::read_to_string(&self.config_path).ok()?;
        let config_file: ConfigFile = serde_json::from_str(&content).ok()?;
        Some(config_file.created_at).filter(|at| !at.is_empty())
    }

    /// Validate, then replace and persist the settings
    pub fn update_settings(&mut self, settings: Settings) -> Result<(), ConfigError> {
        Self::validate_settings(&settings)?;
        self.settings = settings;
        self.save()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get configuration schema with available options
    pub fn schema() -> ConfigSchema {
        let defaults = Settings::default();
        ConfigSchema {
            view: ViewConfigSchema {
                zoom_px_per_second: ConfigOption {
                    default: defaults.zoom_px_per_second,
                    valid_range: Some((crate::scheduler::MIN_ZOOM, crate::scheduler::MAX_ZOOM)),
                    valid_choices: None,
                    description: "Horizontal zoom in pixels per second of audio".to_string(),
                    requires_restart: false,
                },
                gain: ConfigOption {
                    default: defaults.gain,
                    valid_range: Some((0.0, 1000.0)),
                    valid_choices: None,
                    description: "Linear gain applied to magnitudes before colorizing".to_string(),
                    requires_restart: false,
                },
            },
            worker: WorkerConfigSchema {
                fft_size: ConfigOption {
                    default: defaults.fft_size,
                    valid_range: None,
                    valid_choices: Some(vec![256, 512, 1024, 2048, 4096, 8192]),
                    description: "FFT window length in samples".to_string(),
                    requires_restart: true,
                },
                worker_threads: ConfigOption {
                    default: defaults.worker_threads,
                    valid_range: Some((1, 64)),
                    valid_choices: None,
                    description: "Tiles rendered concurrently by the worker".to_string(),
                    requires_restart: true,
                },
                channel_capacity: ConfigOption {
                    default: defaults.channel_capacity,
                    valid_range: Some((8, 65536)),
                    valid_choices: None,
                    description: "Capacity of the worker request and response channels"
                        .to_string(),
                    requires_restart: true,
                },
            },
            scheduling: SchedulingConfigSchema {
                request_timeout_ms: ConfigOption {
                    default: defaults.request_timeout_ms,
                    valid_range: Some((100, 600_000)),
                    valid_choices: None,
                    description: "Milliseconds before an unanswered tile request is retried"
                        .to_string(),
                    requires_restart: false,
                },
                max_init_attempts: ConfigOption {
                    default: defaults.max_init_attempts,
                    valid_range: Some((1, 20)),
                    valid_choices: None,
                    description: "Worker initialization attempts before the view degrades"
                        .to_string(),
                    requires_restart: false,
                },
                init_backoff_ms: ConfigOption {
                    default: defaults.init_backoff_ms,
                    valid_range: Some((10, 30_000)),
                    valid_choices: None,
                    description: "Delay before the first initialization retry, doubled each time"
                        .to_string(),
                    requires_restart: false,
                },
                max_tile_attempts: ConfigOption {
                    default: defaults.max_tile_attempts,
                    valid_range: Some((1, 20)),
                    valid_choices: None,
                    description: "Failed computations per tile before it stays a placeholder"
                        .to_string(),
                    requires_restart: false,
                },
                cache_capacity_tiles: ConfigOption {
                    default: 0,
                    valid_range: Some((1, 1_000_000)),
                    valid_choices: None,
                    description: "Optional bound on cached tiles; unset means unbounded"
                        .to_string(),
                    requires_restart: false,
                },
            },
        }
    }

    /// Validate settings against schema
    pub fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
        let schema = Self::schema();
        let mut errors = Vec::new();

        if !settings.zoom_px_per_second.is_finite()
            || !schema.view.zoom_px_per_second.in_range(settings.zoom_px_per_second)
        {
            errors.push(format!(
                "Zoom must be between {} and {} px/s",
                crate::scheduler::MIN_ZOOM,
                crate::scheduler::MAX_ZOOM
            ));
        }

        if !settings.gain.is_finite() || !schema.view.gain.in_range(settings.gain) {
            errors.push("Gain must be a finite value between 0 and 1000".to_string());
        }

        if let Some(ref choices) = schema.worker.fft_size.valid_choices {
            if !choices.contains(&settings.fft_size) {
                errors.push(format!("FFT size must be one of: {:?}", choices));
            }
        }

        if !schema.worker.worker_threads.in_range(settings.worker_threads) {
            errors.push("Worker threads must be between 1 and 64".to_string());
        }

        if !schema
            .worker
            .channel_capacity
            .in_range(settings.channel_capacity)
        {
            errors.push("Channel capacity must be between 8 and 65536".to_string());
        }

        if !schema
            .scheduling
            .request_timeout_ms
            .in_range(settings.request_timeout_ms)
        {
            errors.push("Request timeout must be between 100 and 600000 ms".to_string());
        }

        if !schema
            .scheduling
            .max_init_attempts
            .in_range(settings.max_init_attempts)
        {
            errors.push("Init attempts must be between 1 and 20".to_string());
        }

        if !schema
            .scheduling
            .init_backoff_ms
            .in_range(settings.init_backoff_ms)
        {
            errors.push("Init backoff must be between 10 and 30000 ms".to_string());
        }

        if !schema
            .scheduling
            .max_tile_attempts
            .in_range(settings.max_tile_attempts)
        {
            errors.push("Tile attempts must be between 1 and 20".to_string());
        }

        if let Some(capacity) = settings.cache_capacity_tiles {
            if !schema.scheduling.cache_capacity_tiles.in_range(capacity) {
                errors.push("Cache capacity must be at least 1 tile when set".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError(errors))
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    ReadError(String),
    WriteError(String),
    ParseError(String),
    SerializeError(String),
    ValidationError(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(msg) => write!(f, "Failed to read config: {}", msg),
            ConfigError::WriteError(msg) => write!(f, "Failed to write config: {}", msg),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::SerializeError(msg) => write!(f, "Failed to serialize config: {}", msg),
            ConfigError::ValidationError(errors) => {
                write!(f, "Validation errors: {}", errors.join(", "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}
