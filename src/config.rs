//! Configuration loading helpers.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::gc::BackgroundGcConfig;
use crate::segment::SegmentConfig;
use crate::status::Status;

const ENV_CONFIG_PATH: &str = "F2FS_GC_CONFIG";
const ENV_PREFIX: &str = "F2FS_GC__";

/// Errors returned by configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error while reading config files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error.
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Invalid value for a key.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Raw value string.
        value: String,
    },
    /// Unknown configuration key.
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    /// Segment layout the manager cannot index.
    #[error("invalid segment geometry: {0}")]
    InvalidGeometry(Status),
}

/// Top-level configuration schema.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GcConfigFile {
    /// Segment layout overrides.
    pub segments: Option<SegmentConfigSpec>,
    /// Background GC overrides.
    pub background: Option<BackgroundGcConfigSpec>,
}

impl GcConfigFile {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration from the `F2FS_GC_CONFIG` env var (if set),
    /// then apply `F2FS_GC__section__field` overrides.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let mut config = match env::var(ENV_CONFIG_PATH).ok() {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment overrides in-place.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        for (key, value) in env::vars() {
            let Some(path) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let path = path.to_ascii_lowercase();
            let parts: Vec<&str> = path.split("__").collect();
            let value = value.trim();

            match parts.as_slice() {
                ["segments", "log_blocks_per_seg"] => {
                    self.segments_mut().log_blocks_per_seg = Some(parse_value(&key, value)?);
                }
                ["segments", "segs_per_sec"] => {
                    self.segments_mut().segs_per_sec = Some(parse_value(&key, value)?);
                }
                ["segments", "total_segs"] => {
                    self.segments_mut().total_segs = Some(parse_value(&key, value)?);
                }
                ["segments", "main_blkaddr"] => {
                    self.segments_mut().main_blkaddr = Some(parse_value(&key, value)?);
                }
                ["segments", "reserved_secs"] => {
                    self.segments_mut().reserved_secs = Some(parse_value(&key, value)?);
                }
                ["segments", "max_search_limit"] => {
                    self.segments_mut().max_search_limit = Some(parse_value(&key, value)?);
                }
                ["background", "min_sleep_ms"] => {
                    self.background_mut().min_sleep_ms = Some(parse_value(&key, value)?);
                }
                ["background", "max_sleep_ms"] => {
                    self.background_mut().max_sleep_ms = Some(parse_value(&key, value)?);
                }
                ["background", "no_gc_sleep_ms"] => {
                    self.background_mut().no_gc_sleep_ms = Some(parse_value(&key, value)?);
                }
                ["background", "invalid_threshold_pct"] => {
                    self.background_mut().invalid_threshold_pct = Some(parse_value(&key, value)?);
                }
                ["background", "free_threshold_pct"] => {
                    self.background_mut().free_threshold_pct = Some(parse_value(&key, value)?);
                }
                _ => return Err(ConfigError::UnknownKey(key)),
            }
        }

        Ok(())
    }

    /// Build a `SegmentConfig` using defaults plus overrides, rejecting
    /// layouts the segment manager cannot index.
    pub fn to_segment_config(&self) -> Result<SegmentConfig, ConfigError> {
        let mut config = SegmentConfig::default();
        if let Some(segments) = &self.segments {
            segments.apply_to(&mut config);
        }
        config.geometry().map_err(ConfigError::InvalidGeometry)?;
        Ok(config)
    }

    /// Build a `BackgroundGcConfig` using defaults plus overrides.
    pub fn to_background_config(&self) -> BackgroundGcConfig {
        let mut config = BackgroundGcConfig::default();
        if let Some(background) = &self.background {
            background.apply_to(&mut config);
        }
        config
    }

    fn segments_mut(&mut self) -> &mut SegmentConfigSpec {
        self.segments.get_or_insert_with(SegmentConfigSpec::default)
    }

    fn background_mut(&mut self) -> &mut BackgroundGcConfigSpec {
        self.background
            .get_or_insert_with(BackgroundGcConfigSpec::default)
    }
}

/// Segment layout overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SegmentConfigSpec {
    /// log2 of blocks per segment.
    pub log_blocks_per_seg: Option<u32>,
    /// Segments per section.
    pub segs_per_sec: Option<u32>,
    /// Segments in the main area.
    pub total_segs: Option<u32>,
    /// First block of the main area.
    pub main_blkaddr: Option<u32>,
    /// Sections held back for GC.
    pub reserved_secs: Option<u32>,
    /// Cap on candidates per victim search.
    pub max_search_limit: Option<u32>,
}

impl SegmentConfigSpec {
    fn apply_to(&self, config: &mut SegmentConfig) {
        if let Some(value) = self.log_blocks_per_seg {
            config.log_blocks_per_seg = value;
        }
        if let Some(value) = self.segs_per_sec {
            config.segs_per_sec = value;
        }
        if let Some(value) = self.total_segs {
            config.total_segs = value;
        }
        if let Some(value) = self.main_blkaddr {
            config.main_blkaddr = value;
        }
        if let Some(value) = self.reserved_secs {
            config.reserved_secs = value;
        }
        if let Some(value) = self.max_search_limit {
            config.max_search_limit = value.max(1);
        }
    }
}

/// Background GC overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackgroundGcConfigSpec {
    /// Shortest sleep between rounds in milliseconds.
    pub min_sleep_ms: Option<u64>,
    /// Longest sleep between rounds in milliseconds.
    pub max_sleep_ms: Option<u64>,
    /// Sleep after a round without victims in milliseconds.
    pub no_gc_sleep_ms: Option<u64>,
    /// Invalid block threshold in percent.
    pub invalid_threshold_pct: Option<u32>,
    /// Free block threshold in percent.
    pub free_threshold_pct: Option<u32>,
}

impl BackgroundGcConfigSpec {
    fn apply_to(&self, config: &mut BackgroundGcConfig) {
        if let Some(value) = self.min_sleep_ms {
            config.min_sleep = Duration::from_millis(value);
        }
        if let Some(value) = self.max_sleep_ms {
            config.max_sleep = Duration::from_millis(value);
        }
        if let Some(value) = self.no_gc_sleep_ms {
            config.no_gc_sleep = Duration::from_millis(value);
        }
        if let Some(value) = self.invalid_threshold_pct {
            config.invalid_threshold_pct = value.min(100);
        }
        if let Some(value) = self.free_threshold_pct {
            config.free_threshold_pct = value.min(100);
        }
        if config.max_sleep < config.min_sleep {
            config.max_sleep = config.min_sleep;
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
