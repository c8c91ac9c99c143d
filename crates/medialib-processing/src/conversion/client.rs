//! CloudConvert process API client.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::{Duration, Instant};

use medialib_core::Config;

use super::{ConversionError, ConversionMode, ConversionOutput, ConversionRequest, ConversionService};

#[derive(Debug, Deserialize)]
struct ProcessCreated {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ProcessOutput {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ProcessStatus {
    #[serde(default)]
    step: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    output: Option<ProcessOutput>,
    #[serde(default)]
    info: Option<Value>,
}

/// Service URLs come back protocol-relative (`//host/process/id`).
pub(crate) fn absolute_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{}", url)
    } else {
        url.to_string()
    }
}

fn classify_status(status: StatusCode, body: &str) -> ConversionError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").or(v.get("message")).and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string());

    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        ConversionError::Transient(format!("{} - {}", status, message))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ConversionError::Config(format!("{} - {}", status, message))
    } else {
        ConversionError::Rejected(format!("{} - {}", status, message))
    }
}

pub struct CloudConvertClient {
    http_client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl Debug for CloudConvertClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("CloudConvertClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CloudConvertClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client for CloudConvert: {}", e))?;

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Client for the configured account, `None` when no API key is set.
    pub fn from_config(config: &Config) -> anyhow::Result<Option<Self>> {
        match config.cloudconvert_api_key.as_deref() {
            Some(key) if !key.is_empty() => Self::new(
                key,
                config.cloudconvert_base_url.clone(),
                Duration::from_secs(config.cloudconvert_timeout_seconds),
            )
            .map(Some),
            _ => Ok(None),
        }
    }

    fn request_error(&self, err: reqwest::Error) -> ConversionError {
        if err.is_timeout() {
            ConversionError::Timeout(self.timeout)
        } else {
            ConversionError::Transient(err.to_string())
        }
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, ConversionError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(classify_status(status, &body))
    }

    async fn create_process(&self, request: &ConversionRequest) -> Result<String, ConversionError> {
        let mut body = json!({ "inputformat": request.input_format });
        match request.mode {
            ConversionMode::Convert => {
                body["outputformat"] = json!(request.output_format);
            }
            ConversionMode::Info => {
                body["mode"] = json!("info");
            }
        }

        let response = self
            .http_client
            .post(format!("{}/process", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let created: ProcessCreated = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| ConversionError::Transient(format!("Invalid process response: {}", e)))?;

        Ok(absolute_url(&created.url))
    }

    async fn run_process(
        &self,
        process_url: &str,
        request: &ConversionRequest,
    ) -> Result<ProcessStatus, ConversionError> {
        let mut body = json!({
            "input": "download",
            "file": request.file_url,
            "wait": true,
            "converteroptions": request.converter_options,
        });
        match request.mode {
            ConversionMode::Convert => {
                body["outputformat"] = json!(request.output_format);
            }
            ConversionMode::Info => {
                body["mode"] = json!("info");
            }
        }
        body["timeout"] = json!(self.timeout.as_secs());

        let response = self
            .http_client
            .post(process_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status: ProcessStatus = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| ConversionError::Transient(format!("Invalid process status: {}", e)))?;

        if status.step == "error" {
            return Err(ConversionError::Rejected(
                status
                    .message
                    .unwrap_or_else(|| "conversion failed".to_string()),
            ));
        }

        Ok(status)
    }

    async fn download(&self, url: &str) -> Result<Bytes, ConversionError> {
        let response = self
            .http_client
            .get(absolute_url(url))
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        self.check(response)
            .await?
            .bytes()
            .await
            .map_err(|e| self.request_error(e))
    }

    async fn delete_process(&self, process_url: &str) {
        let result = self
            .http_client
            .delete(process_url)
            .bearer_auth(&self.api_key)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!(status = %response.status(), process_url, "Failed to delete conversion process");
            }
            Err(e) => {
                tracing::warn!(error = %e, process_url, "Failed to delete conversion process");
            }
        }
    }

    async fn run_and_fetch(
        &self,
        process_url: &str,
        request: &ConversionRequest,
    ) -> Result<ConversionOutput, ConversionError> {
        let status = self.run_process(process_url, request).await?;
        let output = status
            .output
            .ok_or_else(|| ConversionError::Rejected("conversion produced no output".to_string()))?;
        let data = self.download(&output.url).await?;

        Ok(ConversionOutput {
            data,
            info: status.info,
        })
    }
}

#[async_trait]
impl ConversionService for CloudConvertClient {
    #[tracing::instrument(skip(self, request), fields(mode = ?request.mode, input_format = %request.input_format))]
    async fn convert(&self, request: &ConversionRequest) -> Result<ConversionOutput, ConversionError> {
        let start = Instant::now();
        let process_url = self.create_process(request).await?;

        let result = self.run_and_fetch(&process_url, request).await;
        self.delete_process(&process_url).await;

        match &result {
            Ok(output) => tracing::info!(
                size_bytes = output.data.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Conversion finished"
            ),
            Err(e) => tracing::warn!(
                error = %e,
                duration_ms = start.elapsed().as_millis() as u64,
                "Conversion failed"
            ),
        }

        result
    }
}
