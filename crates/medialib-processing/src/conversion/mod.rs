//! External conversion service.
//!
//! Documents and videos are converted by a remote process API. A conversion
//! either succeeds with the output bytes, is rejected because the input cannot
//! be converted (permanent), or fails transiently (network, 5xx, timeout).

mod client;

pub use client::CloudConvertClient;

use async_trait::async_trait;
use bytes::Bytes;
use medialib_core::JobError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConversionError {
    /// The service refused the input (corrupt or unsupported source).
    #[error("Conversion rejected: {0}")]
    Rejected(String),

    #[error("Conversion service unavailable: {0}")]
    Transient(String),

    #[error("Conversion timed out after {0:?}")]
    Timeout(Duration),

    #[error("Conversion service misconfigured: {0}")]
    Config(String),
}

impl ConversionError {
    pub fn is_rejected(&self) -> bool {
        matches!(self, ConversionError::Rejected(_))
    }

    /// Job failure for an error that is not handled as a skipped result.
    pub fn into_job_error(self) -> JobError {
        match self {
            ConversionError::Transient(_) => JobError::transient(self),
            ConversionError::Timeout(_) => JobError::timeout(self),
            ConversionError::Rejected(_) | ConversionError::Config(_) => {
                JobError::unrecoverable(self)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMode {
    /// Convert the input to `output_format`.
    Convert,
    /// Probe the input's streams and render a preview frame.
    Info,
}

/// One conversion of a remotely downloadable source.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    pub mode: ConversionMode,
    pub input_format: String,
    pub output_format: Option<String>,
    /// URL the service downloads the source from.
    pub file_url: String,
    pub converter_options: Map<String, Value>,
}

impl ConversionRequest {
    pub fn convert(
        input_format: impl Into<String>,
        output_format: impl Into<String>,
        file_url: impl Into<String>,
    ) -> Self {
        Self {
            mode: ConversionMode::Convert,
            input_format: input_format.into(),
            output_format: Some(output_format.into()),
            file_url: file_url.into(),
            converter_options: Map::new(),
        }
    }

    pub fn info(input_format: impl Into<String>, file_url: impl Into<String>) -> Self {
        Self {
            mode: ConversionMode::Info,
            input_format: input_format.into(),
            output_format: None,
            file_url: file_url.into(),
            converter_options: Map::new(),
        }
    }

    pub fn option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.converter_options.insert(key.to_string(), value.into());
        self
    }
}

/// Output of a finished conversion. `info` carries the probe result of
/// [`ConversionMode::Info`] requests.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub data: Bytes,
    pub info: Option<Value>,
}

#[async_trait]
pub trait ConversionService: Send + Sync {
    /// Run a conversion to completion and fetch its output. Remote state is
    /// cleaned up on a best-effort basis whether or not the call succeeds.
    async fn convert(&self, request: &ConversionRequest) -> Result<ConversionOutput, ConversionError>;
}

/// One stream reported by an info request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub codec_type: String,
    pub codec_name: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl StreamInfo {
    /// Streams listed under `streams` of an info payload.
    pub fn from_info(info: &Value) -> Vec<StreamInfo> {
        info.get("streams")
            .and_then(Value::as_array)
            .map(|streams| {
                streams
                    .iter()
                    .map(|stream| StreamInfo {
                        codec_type: string_field(stream, "codec_type"),
                        codec_name: string_field(stream, "codec_name").to_lowercase(),
                        width: dimension_field(stream, "width"),
                        height: dimension_field(stream, "height"),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn resolution(&self) -> Option<String> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(format!("{}x{}", w, h)),
            _ => None,
        }
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn dimension_field(value: &Value, key: &str) -> Option<u32> {
    value
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
}
