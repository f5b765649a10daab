// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Buffers structured log events and ships them, in ordered and bounded batches, to an
//! append-only log stream that sequences every append with a continuation token.

pub mod buffer;
pub mod client;
pub mod config;
pub mod errors;
pub mod event;
pub mod http_client;
pub mod token_slot;
pub mod uploader;
pub mod writer;

pub use buffer::{AdmissionRules, EventBuffer};
pub use client::{LogStreamClient, StreamDescription};
pub use config::{HttpClientConfig, UploaderConfig};
pub use errors::{ClientError, ShipperError};
pub use event::{Admission, Capacity, LogEvent, SequenceToken, Skew};
pub use http_client::CloudWatchLogsClient;
pub use uploader::{SequencedUploader, UploadStats, UploaderState};
pub use writer::EventWriter;
