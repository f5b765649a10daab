// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! [`LogStreamClient`] speaking the CloudWatch Logs JSON 1.1 protocol.
//!
//! Every operation is a POST to the service root, selected with the `X-Amz-Target`
//! header. Request signing is left to whatever sits in front of the endpoint (a signing
//! proxy, a local emulator), so no credentials are handled here.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::{LogStreamClient, StreamDescription};
use crate::config::HttpClientConfig;
use crate::errors::ClientError;
use crate::event::{LogEvent, SequenceToken};

const TARGET_PREFIX: &str = "Logs_20140328";
const CONTENT_TYPE_AMZ_JSON: &str = "application/x-amz-json-1.1";

// Error codes that mean the token presented with PutLogEvents was stale.
const STALE_TOKEN_CODES: [&str; 2] = [
    "InvalidSequenceTokenException",
    "DataAlreadyAcceptedException",
];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name_prefix: &'a str,
    limit: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsResponse {
    #[serde(default)]
    log_streams: Vec<LogStreamEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogStreamEntry {
    log_stream_name: String,
    upload_sequence_token: Option<SequenceToken>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogStreamRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
    log_events: &'a [LogEvent],
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_token: Option<&'a SequenceToken>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsResponse {
    next_sequence_token: Option<SequenceToken>,
    rejected_log_events_info: Option<RejectedLogEventsInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectedLogEventsInfo {
    too_new_log_event_start_index: Option<i64>,
    too_old_log_event_end_index: Option<i64>,
    expired_log_event_end_index: Option<i64>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(rename = "__type", default)]
    code: String,
    #[serde(alias = "Message", default)]
    message: String,
}

/// HTTP client for a CloudWatch Logs compatible endpoint.
#[derive(Debug, Clone)]
pub struct CloudWatchLogsClient {
    client: reqwest::Client,
    endpoint: String,
}

impl CloudWatchLogsClient {
    pub fn new(config: &HttpClientConfig) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(proxy) = &config.https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(proxy)?);
        }

        Ok(CloudWatchLogsClient {
            client: builder.build()?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn call<Req, Resp>(&self, operation: &str, body: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body)?;
        let resp = self
            .client
            .post(format!("{}/", self.endpoint))
            .headers(headers(operation))
            .body(payload)
            .send()
            .await?;

        let status = resp.status();
        let bytes = resp.bytes().await?;
        if status.is_success() {
            // some operations answer with an empty body
            let body: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes };
            return Ok(serde_json::from_slice(body)?);
        }

        let error: ErrorResponse = serde_json::from_slice(&bytes).unwrap_or(ErrorResponse {
            code: String::new(),
            message: String::from_utf8_lossy(&bytes).into_owned(),
        });
        // "com.amazonaws.logs#InvalidSequenceTokenException" -> "InvalidSequenceTokenException"
        let code = error.code.rsplit('#').next().unwrap_or_default().to_string();
        debug!("{} failed with {}: {} {}", operation, status, code, error.message);

        if STALE_TOKEN_CODES.contains(&code.as_str()) {
            return Err(ClientError::InvalidSequenceToken(error.message));
        }
        Err(ClientError::Service {
            status: status.as_u16(),
            code,
            message: error.message,
        })
    }
}

fn headers(operation: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(CONTENT_TYPE_AMZ_JSON),
    );
    if let Ok(target) = HeaderValue::from_str(&format!("{TARGET_PREFIX}.{operation}")) {
        headers.insert("X-Amz-Target", target);
    }
    headers
}

#[async_trait]
impl LogStreamClient for CloudWatchLogsClient {
    async fn describe_streams(
        &self,
        group: &str,
        prefix: &str,
        limit: u32,
    ) -> Result<Vec<StreamDescription>, ClientError> {
        let request = DescribeLogStreamsRequest {
            log_group_name: group,
            log_stream_name_prefix: prefix,
            limit,
        };
        let response: DescribeLogStreamsResponse =
            self.call("DescribeLogStreams", &request).await?;

        Ok(response
            .log_streams
            .into_iter()
            .map(|entry| StreamDescription {
                name: entry.log_stream_name,
                upload_token: entry.upload_sequence_token,
            })
            .collect())
    }

    async fn create_stream(&self, group: &str, stream: &str) -> Result<(), ClientError> {
        let request = CreateLogStreamRequest {
            log_group_name: group,
            log_stream_name: stream,
        };
        let _: serde_json::Value = self.call("CreateLogStream", &request).await?;
        Ok(())
    }

    async fn put_events(
        &self,
        group: &str,
        stream: &str,
        events: &[LogEvent],
        token: Option<&SequenceToken>,
    ) -> Result<Option<SequenceToken>, ClientError> {
        let request = PutLogEventsRequest {
            log_group_name: group,
            log_stream_name: stream,
            log_events: events,
            sequence_token: token,
        };
        let response: PutLogEventsResponse = self.call("PutLogEvents", &request).await?;

        if let Some(rejected) = response.rejected_log_events_info {
            warn!(
                "Service rejected part of the batch: too new from {:?}, too old up to {:?}, expired up to {:?}",
                rejected.too_new_log_event_start_index,
                rejected.too_old_log_event_end_index,
                rejected.expired_log_event_end_index
            );
        }
        Ok(response.next_sequence_token)
    }
}
