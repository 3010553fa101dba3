// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::PathBuf;

use reqwest::StatusCode;

/// A file that could not be replayed. The file is left out of the aggregate.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {} after {lines} lines: {source}", path.display())]
    Read {
        path: PathBuf,
        lines: u64,
        #[source]
        source: io::Error,
    },

    #[error("invalid archive glob: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("invalid message pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("replay worker failed: {0}")]
    Worker(String),
}

/// Failures writing points to InfluxDB or to an export file.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("failed to build http client: {0}")]
    Client(String),

    #[error("failed to encode point: {0}")]
    Encode(String),

    #[error("failed to write export {}: {source}", path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The server refused the batch; it is not retried.
    #[error("write rejected with {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("write failed after {attempts} attempts: {message}")]
    Exhausted { attempts: u64, message: String },
}
