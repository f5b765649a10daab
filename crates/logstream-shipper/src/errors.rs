// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Errors returned by a log stream service.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The token presented with an append was not the one the service expected.
    #[error("invalid sequence token: {0}")]
    InvalidSequenceToken(String),

    #[error("service responded with {status} ({code}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by the sequenced uploader.
#[derive(Debug, thiserror::Error)]
pub enum ShipperError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to describe log streams in group '{group}': {source}")]
    DescribeStreams {
        group: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to auto-create stream '{stream}' for group '{group}': {source}")]
    CreateStream {
        group: String,
        stream: String,
        #[source]
        source: ClientError,
    },

    #[error("no log stream called '{stream}' in group '{group}'")]
    StreamNotFound { group: String, stream: String },

    #[error("{matches} log streams called '{stream}' in group '{group}'")]
    AmbiguousStream {
        group: String,
        stream: String,
        matches: usize,
    },

    #[error("failed to put {lost} log events: {source}")]
    PutEvents {
        lost: usize,
        #[source]
        source: ClientError,
    },

    #[error("putting {lost} log events timed out after {after:?}")]
    Timeout { lost: usize, after: Duration },

    #[error("failed to sync during write to full buffer: {0}")]
    SyncOnWrite(#[source] Box<ShipperError>),

    #[error("buffer still full after {attempts} sync-on-write attempts")]
    BufferStillFull { attempts: usize },

    #[error("uploader cancelled while waiting for the sequence token")]
    Cancelled,

    #[error("uploader not started")]
    NotStarted,

    #[error("uploader already started")]
    AlreadyStarted,

    #[error("uploader is closed")]
    Closed,
}

impl ShipperError {
    /// Number of events dropped because of this error.
    pub fn lost_events(&self) -> usize {
        match self {
            ShipperError::PutEvents { lost, .. } | ShipperError::Timeout { lost, .. } => *lost,
            ShipperError::SyncOnWrite(inner) => inner.lost_events(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ShipperError::StreamNotFound {
            group: "app".to_string(),
            stream: "web-1".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "no log stream called 'web-1' in group 'app'"
        );
    }

    #[test]
    fn test_sync_on_write_keeps_source() {
        use std::error::Error;

        let error = ShipperError::SyncOnWrite(Box::new(ShipperError::PutEvents {
            lost: 3,
            source: ClientError::Other("throttled".to_string()),
        }));
        assert_eq!(error.lost_events(), 3);
        let source = error.source().map(ToString::to_string);
        assert_eq!(
            source.as_deref(),
            Some("failed to put 3 log events: throttled")
        );
    }

    #[test]
    fn test_lost_events_defaults_to_zero() {
        assert_eq!(ShipperError::Closed.lost_events(), 0);
        assert_eq!(
            ShipperError::Timeout {
                lost: 7,
                after: Duration::from_secs(1)
            }
            .lost_events(),
            7
        );
    }
}
