// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::redis_queue::DEFAULT_CURSOR_KEY;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 256 * 1024 * 1024;
pub const DEFAULT_BATCH_SIZE: usize = 250;
pub const DEFAULT_BLOCK: Duration = Duration::from_millis(500);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_STALE_THRESHOLD: u32 = 10;
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 8;
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_CYCLE_PAUSE: Duration = Duration::from_secs(1);

/// Archiver settings. Every field has a built-in default; the environment may
/// override them.
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    /// Redis connection URL
    pub redis_url: String,
    /// Stream the events are read from
    pub stream: String,
    /// Key holding the last buffered stream id
    pub cursor_key: String,
    /// Directory receiving the archive files
    pub output_dir: PathBuf,
    /// Soft cap on the compressed size of one archive file
    pub max_file_size: u64,
    /// `COUNT` for each stream read
    pub batch_size: usize,
    /// `BLOCK` for each stream read
    pub block: Duration,
    /// Pause after a failed read
    pub retry_delay: Duration,
    /// Unsuccessful reads tolerated within one file before jumping to the tail
    pub stale_threshold: u32,
    /// zstd level
    pub compression_level: i32,
    pub progress_interval: Duration,
    /// Pause between closing one file and opening the next
    pub cycle_pause: Duration,
    pub log_level: String,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1/".to_string(),
            stream: "filebeat".to_string(),
            cursor_key: DEFAULT_CURSOR_KEY.to_string(),
            output_dir: PathBuf::from("output"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            block: DEFAULT_BLOCK,
            retry_delay: DEFAULT_RETRY_DELAY,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            cycle_pause: DEFAULT_CYCLE_PAUSE,
            log_level: "info".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|val| val.trim().parse::<T>().ok())
}

impl ArchiverConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            redis_url: env::var("BEATLOG_REDIS_URL").unwrap_or(defaults.redis_url),
            stream: env::var("BEATLOG_STREAM").unwrap_or(defaults.stream),
            cursor_key: env::var("BEATLOG_CURSOR_KEY").unwrap_or(defaults.cursor_key),
            output_dir: env::var("BEATLOG_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            max_file_size: env_parse("BEATLOG_MAX_FILE_SIZE").unwrap_or(defaults.max_file_size),
            batch_size: env_parse("BEATLOG_BATCH_SIZE").unwrap_or(defaults.batch_size),
            block: env_parse("BEATLOG_BLOCK_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.block),
            retry_delay: env_parse("BEATLOG_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            stale_threshold: env_parse("BEATLOG_STALE_THRESHOLD")
                .unwrap_or(defaults.stale_threshold),
            compression_level: env_parse("BEATLOG_COMPRESSION_LEVEL")
                .unwrap_or(defaults.compression_level),
            progress_interval: defaults.progress_interval,
            cycle_pause: defaults.cycle_pause,
            log_level: env::var("BEATLOG_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.trim().is_empty() {
            return Err(ConfigError("BEATLOG_STREAM cannot be empty".to_string()));
        }
        if self.cursor_key.trim().is_empty() {
            return Err(ConfigError("BEATLOG_CURSOR_KEY cannot be empty".to_string()));
        }
        if self.max_file_size == 0 {
            return Err(ConfigError(
                "max file size must be greater than 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError(
                "batch size must be greater than 0".to_string(),
            ));
        }
        if self.stale_threshold == 0 {
            return Err(ConfigError(
                "stale threshold must be greater than 0".to_string(),
            ));
        }
        let levels = zstd::compression_level_range();
        if !levels.contains(&self.compression_level) {
            return Err(ConfigError(format!(
                "compression level {} outside {}..={}",
                self.compression_level,
                levels.start(),
                levels.end()
            )));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}
