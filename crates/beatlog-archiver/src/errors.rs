// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the archiver.

/// A stored cursor value that is neither `$` nor a `<ms>-<seq>` id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid stream cursor: {0:?}")]
pub struct ParseCursorError(pub String);

/// Failures talking to the queue or the cursor key.
///
/// Every variant is treated as transient by the stream reader.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue transport error: {0}")]
    Transport(String),

    #[error("unexpected queue reply: {0}")]
    Protocol(String),

    #[error(transparent)]
    Cursor(#[from] ParseCursorError),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        if err.kind() == redis::ErrorKind::TypeError {
            QueueError::Protocol(err.to_string())
        } else {
            QueueError::Transport(err.to_string())
        }
    }
}

/// Invalid archiver configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Conditions that end an archive cycle and stop the archiver.
#[derive(Debug, thiserror::Error)]
pub enum ArchiverError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open archive file {}: {source}", path.display())]
    OpenFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write archive: {0}")]
    Write(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError("batch size must be greater than 0".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: batch size must be greater than 0"
        );

        let error = ParseCursorError("nope".to_string());
        assert_eq!(error.to_string(), "invalid stream cursor: \"nope\"");
    }

    #[test]
    fn test_redis_error_classification() {
        let err = redis::RedisError::from((redis::ErrorKind::TypeError, "bad reply"));
        assert!(matches!(QueueError::from(err), QueueError::Protocol(_)));

        let err = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(matches!(QueueError::from(err), QueueError::Transport(_)));
    }
}
