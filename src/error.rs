use std::time::Duration;
use thiserror::Error;

/// Fatal at startup: the process refuses to run with a bad basket or env.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid basket: {0}")]
    Basket(String),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },

    #[error("Failed to read basket file {path}: {source}")]
    BasketFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse basket file: {0}")]
    BasketParse(#[from] serde_json::Error),
}

/// Quote feed failures. Always recoverable: the cycle keeps the last known values.
#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("Request error: {0}")]
    Request(String),

    #[error("Retryable status {0}")]
    Retryable(u16),

    #[error("Client error {status}: {preview}")]
    Client { status: u16, preview: String },

    #[error("Non-JSON response: {0}")]
    NonJsonResponse(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No listed expiry for {symbol}")]
    NoExpiry { symbol: String },

    #[error("Option chain for {0} has no usable strikes")]
    EmptyChain(String),

    #[error("Quote request timed out after {0:?}")]
    Timeout(Duration),
}

impl QuoteError {
    /// Transport failures, throttling and exchange-side 5xx are worth another try.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QuoteError::Request(_) | QuoteError::Retryable(_))
    }
}

impl From<reqwest::Error> for QuoteError {
    fn from(err: reqwest::Error) -> Self {
        QuoteError::Request(err.to_string())
    }
}

impl From<serde_json::Error> for QuoteError {
    fn from(err: serde_json::Error) -> Self {
        QuoteError::Parse(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Unknown moneyness level: {0}")]
    UnknownLevel(String),

    #[error("Monitoring is not active")]
    NotActive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_and_throttling_are_retried() {
        assert!(QuoteError::Retryable(503).is_retryable());
        assert!(QuoteError::Request("connection reset".into()).is_retryable());
        assert!(!QuoteError::Client { status: 404, preview: String::new() }.is_retryable());
        assert!(!QuoteError::NonJsonResponse("<html>".into()).is_retryable());
    }
}
