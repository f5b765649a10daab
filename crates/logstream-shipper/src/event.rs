// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single log record, timestamped in milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    pub message: String,
}

impl LogEvent {
    pub fn new(timestamp_ms: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            message: message.into(),
        }
    }

    /// Creates an event stamped with the current wall-clock time.
    pub fn now(message: impl Into<String>) -> Self {
        Self::new(now_millis(), message)
    }
}

/// Opaque continuation value handed out by the log stream service. Each append must
/// present the token returned by the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceToken(String);

impl SequenceToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which capacity limit refused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Count,
    ByteSize,
    Span,
}

/// Which timestamp window an event fell outside of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skew {
    TooNew,
    TooOld,
}

/// Outcome of offering an event to the buffer.
///
/// `Full` is recoverable: draining the buffer and pushing the same event again may
/// succeed. `Discarded` is permanent: the event can never be accepted. Both hand the
/// event back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Full { reason: Capacity, event: LogEvent },
    Discarded { reason: Skew, event: LogEvent },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Admission::Full { .. })
    }

    pub fn is_discarded(&self) -> bool {
        matches!(self, Admission::Discarded { .. })
    }
}

pub(crate) fn now_millis() -> i64 {
    // clocks set before the epoch report 0
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
