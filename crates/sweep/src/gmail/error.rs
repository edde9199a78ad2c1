//! Error types for remote mail API calls

use std::time::Duration;

/// Failure of a whole remote call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// No usable credential; the caller must sign in again
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),
    /// Network failure, timeout or provider 5xx
    #[error("Transport error: {0}")]
    Transport(String),
    /// Provider asked us to slow down
    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },
    /// Non-retryable HTTP status
    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    /// Response did not match the expected shape
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Transport-class failures worth retrying with the bounded attempt policy
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }

    /// Classify a non-success HTTP status from the provider
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        match status {
            401 => ApiError::NotAuthenticated(summarize(body)),
            429 => ApiError::RateLimited { retry_after },
            403 if is_rate_limit_reason(body) => ApiError::RateLimited { retry_after },
            500..=599 => ApiError::Transport(format!("status {}: {}", status, summarize(body))),
            _ => ApiError::Status {
                status,
                message: summarize(body),
            },
        }
    }
}

impl From<ureq::Error> for ApiError {
    fn from(e: ureq::Error) -> Self {
        ApiError::Transport(e.to_string())
    }
}

/// Failure of one item inside a batch
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("status {status}: {message}")]
pub struct ItemError {
    pub status: u16,
    pub message: String,
}

impl ItemError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn from_response(status: u16, body: &str) -> Self {
        Self::new(status, summarize(body))
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429 || (self.status == 403 && is_rate_limit_reason(&self.message))
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

fn is_rate_limit_reason(body: &str) -> bool {
    body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded")
}

/// Pull the human-readable message out of a Google error body, bounded in length
fn summarize(body: &str) -> String {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            let error = v.get("error")?;
            let reason = error
                .get("errors")
                .and_then(|e| e.get(0))
                .and_then(|e| e.get("reason"))
                .and_then(|r| r.as_str());
            let message = error.get("message").and_then(|m| m.as_str())?;
            Some(match reason {
                Some(reason) => format!("{} ({})", message, reason),
                None => message.to_string(),
            })
        })
        .unwrap_or_else(|| body.trim().to_string());

    if message.chars().count() > 200 {
        let truncated: String = message.chars().take(200).collect();
        format!("{}...", truncated)
    } else {
        message
    }
}
