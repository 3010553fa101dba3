// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use beatlog_archiver::errors::ConfigError;

use crate::dispatch::DEFAULT_WORKERS;
use crate::emitter::RECORD_CHANNEL_CAPACITY;
use crate::influx::{InfluxConfig, RetryStrategy};

pub const DEFAULT_ARCHIVE_GLOB: &str = "output/*.txt.zst";
pub const DEFAULT_INFLUX_BATCH_SIZE: usize = 5000;
pub const DEFAULT_INFLUX_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_INFLUX_RETRY: RetryStrategy = RetryStrategy::LinearBackoff(3, 500);

/// Where emitted points go.
#[derive(Debug, Clone)]
pub enum ReplaySink {
    Influx(InfluxConfig),
    /// Gzip line-protocol file, loaded into InfluxDB later
    Export(PathBuf),
}

/// Replay settings.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Glob selecting the archive files
    pub archive_glob: String,
    /// Number of parallel file workers
    pub workers: usize,
    /// Also extract from the entries still queued in the stream
    pub replay_queue: bool,
    pub redis_url: String,
    pub stream: String,
    pub sink: ReplaySink,
    /// Records buffered between the extractors and the emitter
    pub record_buffer: usize,
    pub log_level: String,
}

impl ReplayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError(format!("{name} must be set")))
        };
        let parsed = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());

        let sink = match lookup("BEATLOG_EXPORT_PATH").filter(|v| !v.trim().is_empty()) {
            Some(path) => ReplaySink::Export(PathBuf::from(path)),
            None => ReplaySink::Influx(InfluxConfig {
                url: required("INFLUX_URL")?,
                org: required("INFLUX_ORG")?,
                bucket: required("INFLUX_BUCKET")?,
                token: required("INFLUX_TOKEN")?,
                batch_size: parsed("BEATLOG_INFLUX_BATCH_SIZE")
                    .and_then(|v| usize::try_from(v).ok())
                    .unwrap_or(DEFAULT_INFLUX_BATCH_SIZE),
                timeout: parsed("BEATLOG_INFLUX_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_INFLUX_TIMEOUT),
                https_proxy: lookup("HTTPS_PROXY").filter(|v| !v.is_empty()),
                retry_strategy: DEFAULT_INFLUX_RETRY,
            }),
        };

        let config = Self {
            archive_glob: lookup("BEATLOG_ARCHIVE_GLOB")
                .unwrap_or_else(|| DEFAULT_ARCHIVE_GLOB.to_string()),
            workers: parsed("BEATLOG_REPLAY_WORKERS")
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(DEFAULT_WORKERS),
            replay_queue: lookup("BEATLOG_REPLAY_QUEUE")
                .map(|val| val.to_lowercase() == "true")
                .unwrap_or(false),
            redis_url: lookup("BEATLOG_REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1/".to_string()),
            stream: lookup("BEATLOG_STREAM").unwrap_or_else(|| "filebeat".to_string()),
            sink,
            record_buffer: parsed("BEATLOG_RECORD_BUFFER")
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(RECORD_CHANNEL_CAPACITY),
            log_level: lookup("BEATLOG_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or_else(|| "info".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError(
                "replay workers must be greater than 0".to_string(),
            ));
        }
        if self.archive_glob.trim().is_empty() {
            return Err(ConfigError(
                "BEATLOG_ARCHIVE_GLOB cannot be empty".to_string(),
            ));
        }
        if self.record_buffer == 0 {
            return Err(ConfigError(
                "BEATLOG_RECORD_BUFFER must be greater than 0".to_string(),
            ));
        }
        if let ReplaySink::Influx(influx) = &self.sink {
            if !influx.url.starts_with("http://") && !influx.url.starts_with("https://") {
                return Err(ConfigError(format!(
                    "INFLUX_URL must be an http(s) URL, got '{}'",
                    influx.url
                )));
            }
            if influx.batch_size == 0 {
                return Err(ConfigError(
                    "influx batch size must be greater than 0".to_string(),
                ));
            }
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
