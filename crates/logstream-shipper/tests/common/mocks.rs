// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory log stream service for testing

use async_trait::async_trait;
use logstream_shipper::{ClientError, LogEvent, LogStreamClient, SequenceToken, StreamDescription};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct MockStream {
    pub expected_token: Option<SequenceToken>,
    pub batches: Vec<Vec<LogEvent>>,
}

/// Service that validates sequence tokens the way the real one does, and can be told to
/// fail or slow down.
#[derive(Default)]
pub struct MockLogService {
    streams: Mutex<BTreeMap<String, MockStream>>,
    issued: AtomicUsize,
    failing_puts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    put_delay: Option<Duration>,
    describe_error: Option<String>,
    create_error: Option<String>,
}

#[allow(dead_code)]
impl MockLogService {
    pub fn with_streams(names: &[&str]) -> Self {
        let service = Self::default();
        {
            let mut streams = service.streams.lock().unwrap();
            for name in names {
                let token = service.next_token();
                streams.insert(
                    name.to_string(),
                    MockStream {
                        expected_token: Some(token),
                        batches: Vec::new(),
                    },
                );
            }
        }
        service
    }

    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = Some(delay);
        self
    }

    pub fn with_describe_error(mut self, msg: &str) -> Self {
        self.describe_error = Some(msg.to_string());
        self
    }

    pub fn with_create_error(mut self, msg: &str) -> Self {
        self.create_error = Some(msg.to_string());
        self
    }

    /// Makes the next `n` appends fail with a service error.
    pub fn fail_next_puts(&self, n: usize) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    pub fn expected_token(&self, stream: &str) -> Option<SequenceToken> {
        self.streams
            .lock()
            .unwrap()
            .get(stream)
            .and_then(|s| s.expected_token.clone())
    }

    pub fn batches(&self, stream: &str) -> Vec<Vec<LogEvent>> {
        self.streams
            .lock()
            .unwrap()
            .get(stream)
            .map(|s| s.batches.clone())
            .unwrap_or_default()
    }

    pub fn events(&self, stream: &str) -> Vec<LogEvent> {
        self.batches(stream).into_iter().flatten().collect()
    }

    pub fn has_stream(&self, stream: &str) -> bool {
        self.streams.lock().unwrap().contains_key(stream)
    }

    /// Highest number of appends that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_token(&self) -> SequenceToken {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        SequenceToken::new(format!("{n:056}"))
    }
}

#[async_trait]
impl LogStreamClient for MockLogService {
    async fn describe_streams(
        &self,
        _group: &str,
        prefix: &str,
        limit: u32,
    ) -> Result<Vec<StreamDescription>, ClientError> {
        if let Some(msg) = &self.describe_error {
            return Err(ClientError::Other(msg.clone()));
        }
        Ok(self
            .streams
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .take(limit as usize)
            .map(|(name, stream)| StreamDescription {
                name: name.clone(),
                upload_token: stream.expected_token.clone(),
            })
            .collect())
    }

    async fn create_stream(&self, _group: &str, stream: &str) -> Result<(), ClientError> {
        if let Some(msg) = &self.create_error {
            return Err(ClientError::Other(msg.clone()));
        }
        self.streams
            .lock()
            .unwrap()
            .insert(stream.to_string(), MockStream::default());
        Ok(())
    }

    async fn put_events(
        &self,
        _group: &str,
        stream: &str,
        events: &[LogEvent],
        token: Option<&SequenceToken>,
    ) -> Result<Option<SequenceToken>, ClientError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.put_delay {
            tokio::time::sleep(delay).await;
        }

        let result = self.append(stream, events, token);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl MockLogService {
    fn append(
        &self,
        stream: &str,
        events: &[LogEvent],
        token: Option<&SequenceToken>,
    ) -> Result<Option<SequenceToken>, ClientError> {
        let failing = self.failing_puts.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_puts.store(failing - 1, Ordering::SeqCst);
            return Err(ClientError::Service {
                status: 400,
                code: "ThrottlingException".to_string(),
                message: "Rate exceeded".to_string(),
            });
        }

        let next = self.next_token();
        let mut streams = self.streams.lock().unwrap();
        let Some(entry) = streams.get_mut(stream) else {
            return Err(ClientError::Service {
                status: 400,
                code: "ResourceNotFoundException".to_string(),
                message: format!("The specified log stream does not exist: {stream}"),
            });
        };
        if entry.expected_token.as_ref() != token {
            return Err(ClientError::InvalidSequenceToken(
                "The given sequenceToken is invalid.".to_string(),
            ));
        }
        assert!(
            events
                .windows(2)
                .all(|w| w[0].timestamp_ms <= w[1].timestamp_ms),
            "batch must be in chronological order"
        );

        entry.batches.push(events.to_vec());
        entry.expected_token = Some(next.clone());
        Ok(Some(next))
    }
}
