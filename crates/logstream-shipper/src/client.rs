// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::errors::ClientError;
use crate::event::{LogEvent, SequenceToken};

/// A stream as reported by the log stream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescription {
    pub name: String,
    /// Token the next append must present. New streams have none.
    pub upload_token: Option<SequenceToken>,
}

/// The part of the remote log stream service the uploader needs.
#[async_trait]
pub trait LogStreamClient: Send + Sync {
    /// Lists up to `limit` streams in `group` whose name starts with `prefix`.
    async fn describe_streams(
        &self,
        group: &str,
        prefix: &str,
        limit: u32,
    ) -> Result<Vec<StreamDescription>, ClientError>;

    async fn create_stream(&self, group: &str, stream: &str) -> Result<(), ClientError>;

    /// Appends `events` to the stream and returns the token for the next append.
    /// Fails with [`ClientError::InvalidSequenceToken`] when `token` is stale.
    async fn put_events(
        &self,
        group: &str,
        stream: &str,
        events: &[LogEvent],
        token: Option<&SequenceToken>,
    ) -> Result<Option<SequenceToken>, ClientError>;
}
