//! Release-data provider boundary.
//!
//! The pipeline calls a [`ReleaseProvider`] and treats the returned dataset as
//! opaque. Failures carry enough detail for the retry policy to classify them.

mod http;
#[cfg(test)]
mod scripted;

pub use http::*;
#[cfg(test)]
pub use scripted::*;

use std::fmt;

use async_trait::async_trait;

use crate::models::{Market, ReleaseDataset, WeekRange};
use crate::retry::{self, Classification};

/// Low-level network failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorCode {
    ConnectionReset,
    ConnectionRefused,
    HostUnreachable,
    /// Temporary DNS failure (`EAI_AGAIN`).
    DnsRetry,
    Other,
}

impl NetworkErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkErrorCode::ConnectionReset => "ECONNRESET",
            NetworkErrorCode::ConnectionRefused => "ECONNREFUSED",
            NetworkErrorCode::HostUnreachable => "EHOSTUNREACH",
            NetworkErrorCode::DnsRetry => "EAI_AGAIN",
            NetworkErrorCode::Other => "ENETWORK",
        }
    }
}

/// A failed provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Non-success HTTP status.
    Status { code: u16, message: String },
    /// Request exceeded the configured timeout.
    Timeout,
    Network {
        code: NetworkErrorCode,
        message: String,
    },
    /// Response arrived but could not be understood.
    Malformed(String),
    /// No API key configured.
    MissingCredentials,
}

impl ProviderError {
    pub fn classify(&self) -> Classification {
        retry::classify(self)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Status { code, message } => write!(f, "HTTP {}: {}", code, message),
            ProviderError::Timeout => write!(f, "request timed out"),
            ProviderError::Network { code, message } => {
                write!(f, "network error {}: {}", code.as_str(), message)
            }
            ProviderError::Malformed(msg) => write!(f, "malformed response: {}", msg),
            ProviderError::MissingCredentials => write!(f, "provider API key is not configured"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Source of weekly release data.
#[async_trait]
pub trait ReleaseProvider: Send + Sync {
    async fn fetch_releases(
        &self,
        market: Market,
        range: &WeekRange,
    ) -> Result<ReleaseDataset, ProviderError>;
}
