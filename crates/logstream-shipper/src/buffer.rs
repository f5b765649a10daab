// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event buffer with admission rules.
//!
//! The buffer accumulates events until one of the ingestion limits of the remote service
//! would be exceeded, and hands them out as a timestamp-sorted batch. Producers keep
//! pushing into a fresh buffer while the previous batch is being uploaded.

use crate::errors::ShipperError;
use crate::event::{now_millis, Admission, Capacity, LogEvent, Skew};
use std::mem;
use std::sync::Mutex;

// Limits documented for a single PutLogEvents request.
const DEFAULT_MAX_COUNT: usize = 10_000;
const DEFAULT_MAX_BYTE_SIZE: usize = 1_048_576;
const DEFAULT_MAX_SPAN_MS: i64 = 86_400_000;
// 2 hours minus a second, 14 days plus a second
const DEFAULT_MAX_FUTURE_MS: i64 = 7_199_000;
const DEFAULT_MAX_PAST_MS: i64 = 1_209_999_000;
const DEFAULT_EVENT_OVERHEAD_BYTES: usize = 26;

/// Limits that decide whether an event may enter the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionRules {
    /// Maximum number of events in one batch
    pub max_count: usize,
    /// Maximum accounted size of one batch, in bytes
    pub max_byte_size: usize,
    /// Maximum distance between the earliest and latest event of one batch
    pub max_span_ms: i64,
    /// How far ahead of the local clock an event may be stamped
    pub max_future_ms: i64,
    /// How far behind the local clock an event may be stamped
    pub max_past_ms: i64,
    /// Bytes the service accounts for each event on top of its message
    pub event_overhead_bytes: usize,
}

impl Default for AdmissionRules {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_MAX_COUNT,
            max_byte_size: DEFAULT_MAX_BYTE_SIZE,
            max_span_ms: DEFAULT_MAX_SPAN_MS,
            max_future_ms: DEFAULT_MAX_FUTURE_MS,
            max_past_ms: DEFAULT_MAX_PAST_MS,
            event_overhead_bytes: DEFAULT_EVENT_OVERHEAD_BYTES,
        }
    }
}

impl AdmissionRules {
    pub fn validate(&self) -> Result<(), ShipperError> {
        if self.max_count == 0 {
            return Err(ShipperError::InvalidConfig(
                "max_count must be greater than 0".to_string(),
            ));
        }
        if self.max_byte_size <= self.event_overhead_bytes {
            return Err(ShipperError::InvalidConfig(format!(
                "max_byte_size ({}) must exceed the per-event overhead ({})",
                self.max_byte_size, self.event_overhead_bytes
            )));
        }
        if self.max_span_ms < 0 || self.max_future_ms < 0 || self.max_past_ms < 0 {
            return Err(ShipperError::InvalidConfig(
                "time limits must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    fn accounted_size(&self, event: &LogEvent) -> usize {
        event.message.len() + self.event_overhead_bytes
    }
}

#[derive(Debug, Default)]
struct BufferState {
    events: Vec<LogEvent>,
    // (earliest, latest), None while empty
    span: Option<(i64, i64)>,
    byte_size: usize,
}

/// Thread-safe accumulator of log events.
#[derive(Debug)]
pub struct EventBuffer {
    rules: AdmissionRules,
    state: Mutex<BufferState>,
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new(AdmissionRules::default())
    }
}

impl EventBuffer {
    pub fn new(rules: AdmissionRules) -> Self {
        Self {
            rules,
            state: Mutex::new(BufferState::default()),
        }
    }

    pub fn rules(&self) -> &AdmissionRules {
        &self.rules
    }

    /// Offers an event to the buffer, checked against the local clock.
    pub fn push(&self, event: LogEvent) -> Admission {
        self.push_at(event, now_millis())
    }

    /// Offers an event to the buffer, checked against `now_ms`.
    ///
    /// Capacity limits are evaluated before the timestamp window, so an event that is
    /// both too old and too large reports `Full`.
    pub fn push_at(&self, event: LogEvent, now_ms: i64) -> Admission {
        let mut state = self.lock();

        if state.events.len() >= self.rules.max_count {
            return Admission::Full {
                reason: Capacity::Count,
                event,
            };
        }

        let byte_size = state.byte_size + self.rules.accounted_size(&event);
        if byte_size > self.rules.max_byte_size {
            return Admission::Full {
                reason: Capacity::ByteSize,
                event,
            };
        }

        let ts = event.timestamp_ms;
        let (earliest, latest) = match state.span {
            Some((earliest, latest)) => (earliest.min(ts), latest.max(ts)),
            None => (ts, ts),
        };
        if latest.saturating_sub(earliest) > self.rules.max_span_ms {
            return Admission::Full {
                reason: Capacity::Span,
                event,
            };
        }

        if ts.saturating_sub(now_ms) > self.rules.max_future_ms {
            return Admission::Discarded {
                reason: Skew::TooNew,
                event,
            };
        }
        if now_ms.saturating_sub(ts) > self.rules.max_past_ms {
            return Admission::Discarded {
                reason: Skew::TooOld,
                event,
            };
        }

        state.events.push(event);
        state.span = Some((earliest, latest));
        state.byte_size = byte_size;
        Admission::Admitted
    }

    /// Copy of the buffered events in insertion order.
    pub fn all(&self) -> Vec<LogEvent> {
        self.lock().events.clone()
    }

    /// Detaches every buffered event and resets the buffer. The returned events are
    /// sorted by timestamp; events with equal timestamps keep their insertion order.
    pub fn batch(&self) -> Vec<LogEvent> {
        let detached = mem::take(&mut *self.lock());
        let mut batch = detached.events;
        // sort_by_key is stable
        batch.sort_by_key(|ev| ev.timestamp_ms);
        batch
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accounted size of the buffered events, overhead included.
    pub fn byte_size(&self) -> usize {
        self.lock().byte_size
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, BufferState> {
        self.state.lock().expect("lock poisoned")
    }
}
