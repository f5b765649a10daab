// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::errors::ShipperError;
use crate::event::LogEvent;
use crate::uploader::SequencedUploader;

/// What a logging framework adapter needs from the shipper: hand over one formatted
/// record at a time, and flush at shutdown or after severe records.
#[async_trait]
pub trait EventWriter: Send + Sync {
    async fn write(&self, timestamp_ms: i64, message: String) -> Result<(), ShipperError>;

    async fn sync(&self) -> Result<(), ShipperError>;
}

#[async_trait]
impl EventWriter for SequencedUploader {
    async fn write(&self, timestamp_ms: i64, message: String) -> Result<(), ShipperError> {
        SequencedUploader::write(self, LogEvent::new(timestamp_ms, message)).await
    }

    async fn sync(&self) -> Result<(), ShipperError> {
        SequencedUploader::sync(self).await
    }
}
