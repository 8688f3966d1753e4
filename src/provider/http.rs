//! HTTP provider speaking an OpenAI-compatible chat-completions API.

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{NetworkErrorCode, ProviderError, ReleaseProvider};
use crate::calendar;
use crate::config::Config;
use crate::errors::AppError;
use crate::models::{Market, ReleaseDataset, WeekRange};

const SYSTEM_PROMPT: &str = "You list entertainment releases. Reply with a single JSON object \
with two arrays, \"ott\" and \"theatrical\"; each item has title, platform, releaseDate, \
language and genre.";

/// Provider backed by a remote LLM search API.
pub struct HttpProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpProvider {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(
            config.provider_url.clone(),
            config.provider_api_key.clone(),
            config.provider_model.clone(),
            config.provider_timeout,
        )
    }

    fn request_body(&self, market: Market, range: &WeekRange) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": format!(
                        "OTT streaming and theatrical releases in {} for ISO week {} ({}).",
                        market.display_name(),
                        calendar::iso_week_number(range.start),
                        calendar::format_range(range)
                    )
                }
            ]
        })
    }
}

#[async_trait]
impl ReleaseProvider for HttpProvider {
    async fn fetch_releases(
        &self,
        market: Market,
        range: &WeekRange,
    ) -> Result<ReleaseDataset, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingCredentials)?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&self.request_body(market, range))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                code: status.as_u16(),
                message: truncate(&message, 200),
            });
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Malformed(e.to_string())
            }
        })?;
        parse_completion(&body)
    }
}

/// Extract the JSON document from the first completion choice.
pub fn parse_completion(body: &Value) -> Result<ReleaseDataset, ProviderError> {
    let content = body
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| ProviderError::Malformed("missing choices[0].message.content".to_string()))?;

    serde_json::from_str(strip_code_fence(content))
        .map(ReleaseDataset)
        .map_err(|e| ProviderError::Malformed(format!("content is not JSON: {}", e)))
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn map_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        return ProviderError::Timeout;
    }
    let message = err.to_string();
    let code = network_code(&err);
    if code == NetworkErrorCode::Other && !err.is_connect() && !err.is_request() {
        return ProviderError::Malformed(message);
    }
    ProviderError::Network { code, message }
}

fn network_code(err: &reqwest::Error) -> NetworkErrorCode {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                    return NetworkErrorCode::ConnectionReset
                }
                std::io::ErrorKind::ConnectionRefused => {
                    return NetworkErrorCode::ConnectionRefused
                }
                _ => {}
            }
        }
        let text = inner.to_string().to_ascii_lowercase();
        if text.contains("dns") || text.contains("lookup address") {
            return NetworkErrorCode::DnsRetry;
        }
        if text.contains("unreachable") {
            return NetworkErrorCode::HostUnreachable;
        }
        source = inner.source();
    }
    if err.is_connect() {
        NetworkErrorCode::ConnectionRefused
    } else {
        NetworkErrorCode::Other
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
