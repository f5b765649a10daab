// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Single-flight, token-sequenced uploads to one log stream.
//!
//! Every append to the stream has to present the token returned by the previous one, so
//! uploads are serialized through a [`TokenSlot`]. Writers push into an [`EventBuffer`]
//! and only sync in place when it refuses an event for capacity reasons.
//!
//! A batch that fails to upload is dropped. The token that was taken for it is put
//! back, so the next sync can go ahead, and the loss is reported in the returned error
//! and in [`UploadStats::events_lost`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::buffer::EventBuffer;
use crate::client::LogStreamClient;
use crate::config::UploaderConfig;
use crate::errors::ShipperError;
use crate::event::{Admission, LogEvent, SequenceToken};
use crate::token_slot::{SlotError, TokenGuard, TokenSlot};

/// How many times `write` offers an event to the buffer, syncing in between.
pub const MAX_WRITE_ATTEMPTS: usize = 4;

/// Page size used when looking the stream up. Other streams sharing the prefix may fill
/// part of the page, so this is kept well above 1.
const DESCRIBE_LIMIT: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploaderState {
    Unstarted,
    Ready,
    /// An upload holds the sequence token
    Uploading,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Unstarted,
    Ready,
    Stopped,
}

/// Counters for events that left the buffer, one way or another.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    /// Events refused for being stamped outside the accepted time window
    pub events_discarded: u64,
    /// Events dropped with a batch that failed to upload
    pub events_lost: u64,
    pub events_uploaded: u64,
    pub batches_uploaded: u64,
}

#[derive(Debug, Default)]
struct Counters {
    events_discarded: AtomicU64,
    events_lost: AtomicU64,
    events_uploaded: AtomicU64,
    batches_uploaded: AtomicU64,
}

pub struct SequencedUploader {
    config: UploaderConfig,
    client: Arc<dyn LogStreamClient>,
    buffer: Arc<EventBuffer>,
    slot: TokenSlot,
    lifecycle: RwLock<Lifecycle>,
    counters: Counters,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for SequencedUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequencedUploader")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SequencedUploader {
    pub fn new(
        config: UploaderConfig,
        client: Arc<dyn LogStreamClient>,
        buffer: Arc<EventBuffer>,
        cancel_token: CancellationToken,
    ) -> Self {
        SequencedUploader {
            config,
            client,
            buffer,
            slot: TokenSlot::new(),
            lifecycle: RwLock::new(Lifecycle::Unstarted),
            counters: Counters::default(),
            cancel_token,
        }
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    pub fn state(&self) -> UploaderState {
        match self.lifecycle() {
            Lifecycle::Unstarted => UploaderState::Unstarted,
            Lifecycle::Stopped => UploaderState::Stopped,
            Lifecycle::Ready if self.slot.is_held() => UploaderState::Uploading,
            Lifecycle::Ready => UploaderState::Ready,
        }
    }

    pub fn stats(&self) -> UploadStats {
        UploadStats {
            events_discarded: self.counters.events_discarded.load(Ordering::Relaxed),
            events_lost: self.counters.events_lost.load(Ordering::Relaxed),
            events_uploaded: self.counters.events_uploaded.load(Ordering::Relaxed),
            batches_uploaded: self.counters.batches_uploaded.load(Ordering::Relaxed),
        }
    }

    /// Looks the stream up and takes its current token, creating the stream first when it
    /// does not exist and auto-creation is enabled.
    pub async fn start(&self) -> Result<(), ShipperError> {
        self.ensure_unstarted()?;
        let (group, stream) = (&self.config.log_group, &self.config.log_stream);

        let described = self
            .client
            .describe_streams(group, stream, DESCRIBE_LIMIT)
            .await
            .map_err(|source| ShipperError::DescribeStreams {
                group: group.clone(),
                source,
            })?;

        let mut matches = described.into_iter().filter(|s| s.name == *stream);
        let token = match (matches.next(), matches.count()) {
            (Some(found), 0) => {
                debug!("Found log stream '{}' in group '{}'", stream, group);
                found.upload_token
            }
            (Some(_), others) => {
                return Err(ShipperError::AmbiguousStream {
                    group: group.clone(),
                    stream: stream.clone(),
                    matches: others + 1,
                });
            }
            (None, _) if self.config.auto_create_stream => {
                self.client
                    .create_stream(group, stream)
                    .await
                    .map_err(|source| ShipperError::CreateStream {
                        group: group.clone(),
                        stream: stream.clone(),
                        source,
                    })?;
                debug!("Created log stream '{}' in group '{}'", stream, group);
                // a new stream accepts its first append without a token
                None
            }
            (None, _) => {
                return Err(ShipperError::StreamNotFound {
                    group: group.clone(),
                    stream: stream.clone(),
                });
            }
        };

        self.start_with_token(token).await
    }

    /// Starts with a token obtained elsewhere, without asking the service.
    pub async fn start_with_token(&self, token: Option<SequenceToken>) -> Result<(), ShipperError> {
        self.ensure_unstarted()?;
        self.slot.seed(token).await.map_err(|e| match e {
            SlotError::Closed => ShipperError::Closed,
            _ => ShipperError::AlreadyStarted,
        })?;
        self.mark_ready()
    }

    /// Buffers an event, syncing in place when the buffer is full.
    ///
    /// Events stamped outside the accepted time window are dropped without an error.
    pub async fn write(&self, event: LogEvent) -> Result<(), ShipperError> {
        let mut event = event;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            match self.push(event)? {
                Admission::Admitted => return Ok(()),
                Admission::Discarded { reason, event } => {
                    self.counters
                        .events_discarded
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Discarding log event stamped {} ({:?}) for stream '{}'",
                        event.timestamp_ms, reason, self.config.log_stream
                    );
                    return Ok(());
                }
                Admission::Full { reason, event: rejected } => {
                    debug!("Buffer full ({:?}), syncing before retrying write", reason);
                    event = rejected;
                    self.sync()
                        .await
                        .map_err(|e| ShipperError::SyncOnWrite(Box::new(e)))?;
                }
            }
        }

        Err(ShipperError::BufferStillFull {
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    /// Uploads everything buffered so far. Cheap when the buffer is empty.
    pub async fn sync(&self) -> Result<(), ShipperError> {
        match self.lifecycle() {
            Lifecycle::Unstarted => return Err(ShipperError::NotStarted),
            Lifecycle::Stopped => return Err(ShipperError::Closed),
            Lifecycle::Ready => {}
        }

        let batch = self.buffer.batch();
        if batch.is_empty() {
            return Ok(());
        }

        let mut guard = match self.acquire().await {
            Ok(guard) => guard,
            Err(e) => {
                self.record_lost(batch.len());
                error!(
                    "Dropping {} log events, no sequence token available: {}",
                    batch.len(),
                    e
                );
                return Err(e);
            }
        };
        self.upload(&mut guard, batch).await
    }

    /// Uploads what is left in the buffer and closes the uploader for good. Waits for
    /// any upload in flight first.
    pub async fn stop(&self) -> Result<(), ShipperError> {
        let mut guard = self.acquire().await?;

        // No push can be in progress once the write lock is held, so the batch below
        // is the last one.
        self.set_lifecycle(Lifecycle::Stopped);
        let batch = self.buffer.batch();
        let result = if batch.is_empty() {
            Ok(())
        } else {
            self.upload(&mut guard, batch).await
        };

        guard.close();
        debug!("Uploader for stream '{}' stopped", self.config.log_stream);
        result
    }

    /// The token the next upload will present. Waits for any upload in flight.
    pub async fn sequence_token(&self) -> Result<Option<SequenceToken>, ShipperError> {
        let guard = self.acquire().await?;
        Ok(guard.token().cloned())
    }

    fn push(&self, event: LogEvent) -> Result<Admission, ShipperError> {
        #[allow(clippy::expect_used)]
        let lifecycle = self.lifecycle.read().expect("lock poisoned");
        if *lifecycle == Lifecycle::Stopped {
            return Err(ShipperError::Closed);
        }
        Ok(self.buffer.push(event))
    }

    async fn acquire(&self) -> Result<TokenGuard<'_>, ShipperError> {
        // A free slot wins over cancellation, so only callers that are still waiting
        // get `Cancelled`.
        tokio::select! {
            biased;
            acquired = self.slot.acquire() => acquired.map_err(|e| match e {
                SlotError::Unseeded => ShipperError::NotStarted,
                SlotError::Closed => ShipperError::Closed,
                SlotError::AlreadySeeded => ShipperError::AlreadyStarted,
            }),
            _ = self.cancel_token.cancelled() => Err(ShipperError::Cancelled),
        }
    }

    async fn upload(
        &self,
        guard: &mut TokenGuard<'_>,
        batch: Vec<LogEvent>,
    ) -> Result<(), ShipperError> {
        let n_events = batch.len();
        let token = guard.token().cloned();
        debug!(
            "Putting {} log events to stream '{}'",
            n_events, self.config.log_stream
        );

        let put = self.client.put_events(
            &self.config.log_group,
            &self.config.log_stream,
            &batch,
            token.as_ref(),
        );
        let result = tokio::time::timeout(self.config.put_timeout, put).await;

        match result {
            Ok(Ok(next)) => {
                guard.advance(next);
                self.counters
                    .events_uploaded
                    .fetch_add(n_events as u64, Ordering::Relaxed);
                self.counters.batches_uploaded.fetch_add(1, Ordering::Relaxed);
                debug!("Successfully put {} log events", n_events);
                Ok(())
            }
            // The guard still holds the token we presented, which stays valid.
            Ok(Err(source)) => {
                self.record_lost(n_events);
                error!("Failed to put log events, {} events dropped: {}", n_events, source);
                Err(ShipperError::PutEvents {
                    lost: n_events,
                    source,
                })
            }
            Err(_) => {
                self.record_lost(n_events);
                error!(
                    "Timed out putting log events after {:?}, {} events dropped",
                    self.config.put_timeout, n_events
                );
                Err(ShipperError::Timeout {
                    lost: n_events,
                    after: self.config.put_timeout,
                })
            }
        }
    }

    fn record_lost(&self, n_events: usize) {
        self.counters
            .events_lost
            .fetch_add(n_events as u64, Ordering::Relaxed);
    }

    fn ensure_unstarted(&self) -> Result<(), ShipperError> {
        match self.lifecycle() {
            Lifecycle::Unstarted => Ok(()),
            Lifecycle::Ready => Err(ShipperError::AlreadyStarted),
            Lifecycle::Stopped => Err(ShipperError::Closed),
        }
    }

    fn lifecycle(&self) -> Lifecycle {
        #[allow(clippy::expect_used)]
        let lifecycle = self.lifecycle.read().expect("lock poisoned");
        *lifecycle
    }

    /// Moves from `Unstarted` to `Ready`. A `stop` that slipped in after the slot was
    /// seeded has already closed it, and stays in effect.
    fn mark_ready(&self) -> Result<(), ShipperError> {
        #[allow(clippy::expect_used)]
        let mut lifecycle = self.lifecycle.write().expect("lock poisoned");
        match *lifecycle {
            Lifecycle::Unstarted => {
                *lifecycle = Lifecycle::Ready;
                Ok(())
            }
            Lifecycle::Ready => Err(ShipperError::AlreadyStarted),
            Lifecycle::Stopped => Err(ShipperError::Closed),
        }
    }

    fn set_lifecycle(&self, next: Lifecycle) {
        #[allow(clippy::expect_used)]
        let mut lifecycle = self.lifecycle.write().expect("lock poisoned");
        *lifecycle = next;
    }
}
