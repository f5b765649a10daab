// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ShipperError;
use std::env;
use std::time::Duration;

const DEFAULT_PUT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_NAME_LENGTH: usize = 512;

/// Configuration for uploading to a single log stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploaderConfig {
    /// Log group that owns the stream
    pub log_group: String,
    /// Stream the events are appended to
    pub log_stream: String,
    /// Whether `start` creates the stream when it does not exist
    pub auto_create_stream: bool,
    /// Upper bound for a single PutEvents call
    pub put_timeout: Duration,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            log_group: String::new(),
            log_stream: String::new(),
            auto_create_stream: false,
            put_timeout: DEFAULT_PUT_TIMEOUT,
        }
    }
}

impl UploaderConfig {
    pub fn new(log_group: impl Into<String>, log_stream: impl Into<String>) -> Self {
        Self {
            log_group: log_group.into(),
            log_stream: log_stream.into(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ShipperError> {
        let log_group = env::var("LOGSTREAM_GROUP").unwrap_or_default();
        let log_stream = env::var("LOGSTREAM_STREAM").unwrap_or_default();
        let auto_create_stream = env::var("LOGSTREAM_AUTO_CREATE")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(false);
        let put_timeout = env::var("LOGSTREAM_PUT_TIMEOUT_MS")
            .ok()
            .and_then(|ms| ms.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PUT_TIMEOUT);

        let config = Self {
            log_group,
            log_stream,
            auto_create_stream,
            put_timeout,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ShipperError> {
        validate_name("log group", &self.log_group)?;
        if let Some(invalid_char) = self
            .log_group
            .chars()
            .find(|&ch| !ch.is_ascii_alphanumeric() && !"._-/#".contains(ch))
        {
            return Err(ShipperError::InvalidConfig(format!(
                "log group '{}' contains invalid character '{}'",
                self.log_group, invalid_char
            )));
        }

        validate_name("log stream", &self.log_stream)?;
        if self.log_stream.contains([':', '*']) {
            return Err(ShipperError::InvalidConfig(format!(
                "log stream '{}' must not contain ':' or '*'",
                self.log_stream
            )));
        }

        if self.put_timeout.is_zero() {
            return Err(ShipperError::InvalidConfig(
                "put timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_name(kind: &str, name: &str) -> Result<(), ShipperError> {
    if name.trim().is_empty() {
        return Err(ShipperError::InvalidConfig(format!("{kind} cannot be empty")));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(ShipperError::InvalidConfig(format!(
            "{kind} is longer than {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Configuration for the HTTP log stream client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientConfig {
    /// Base URL of the service, e.g. `https://logs.eu-west-1.amazonaws.com`
    pub endpoint: String,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Timeout for each request
    pub timeout: Duration,
}

impl HttpClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            https_proxy: None,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ShipperError> {
        let endpoint = env::var("LOGSTREAM_ENDPOINT").map_err(|_| {
            ShipperError::InvalidConfig("LOGSTREAM_ENDPOINT is not set".to_string())
        })?;
        let https_proxy = env::var("LOGSTREAM_PROXY_HTTPS")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok();

        let config = Self {
            endpoint,
            https_proxy,
            timeout: DEFAULT_HTTP_TIMEOUT,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ShipperError> {
        let endpoint = self.endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ShipperError::InvalidConfig(format!(
                "endpoint '{}' must be an http(s) URL",
                self.endpoint
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> UploaderConfig {
        UploaderConfig::new("/aws/app", "web-1")
    }

    #[test]
    fn test_default_timeout() {
        assert_eq!(valid().put_timeout, DEFAULT_PUT_TIMEOUT);
        assert!(!valid().auto_create_stream);
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_empty_names() {
        let config = UploaderConfig {
            log_group: "   ".to_string(),
            ..valid()
        };
        assert!(config.validate().is_err());

        let config = UploaderConfig {
            log_stream: "".to_string(),
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_characters() {
        let config = UploaderConfig {
            log_group: "my group".to_string(),
            ..valid()
        };
        assert!(config.validate().is_err());

        for stream in ["web:1", "web*"] {
            let config = UploaderConfig {
                log_stream: stream.to_string(),
                ..valid()
            };
            assert!(config.validate().is_err(), "'{stream}' should be invalid");
        }
    }

    #[test]
    fn test_validate_name_length() {
        let config = UploaderConfig {
            log_stream: "s".repeat(513),
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let config = UploaderConfig {
            put_timeout: Duration::ZERO,
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_http_config_validate() {
        assert!(HttpClientConfig::new("http://127.0.0.1:4566")
            .validate()
            .is_ok());
        assert!(HttpClientConfig::new("logs.amazonaws.com")
            .validate()
            .is_err());
    }
}
