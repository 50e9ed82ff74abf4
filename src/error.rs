//! Error taxonomy for the n8n API client.

use reqwest::StatusCode;
use thiserror::Error;

use crate::http::RetryableStatuses;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by [`crate::client::N8nClient`] operations.
///
/// `Clone` so that every caller waiting on a shared single-flight fetch
/// receives the same outcome.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Caller input rejected before any network call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Connection failure or per-attempt timeout.
    #[error("Network error: {message}")]
    Network { message: String, timed_out: bool },

    /// Non-2xx response that is not otherwise classified.
    #[error("n8n API error: {status} - {message}")]
    Api {
        status: u16,
        message: String,
        body: Option<serde_json::Value>,
    },

    /// HTTP 404 from the service.
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// Retries exhausted; `source` is the last observed failure.
    #[error("Request failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    /// 2xx response whose body could not be parsed or broke an invariant.
    #[error("Invalid response from n8n API: {0}")]
    InvalidResponse(String),
}

impl Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub(crate) fn network(error: &reqwest::Error) -> Self {
        Error::Network {
            message: error.to_string(),
            timed_out: error.is_timeout(),
        }
    }

    /// HTTP status carried by this error, looking through `RetryExhausted`.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Api { status, .. } => StatusCode::from_u16(*status).ok(),
            Error::NotFound { .. } => Some(StatusCode::NOT_FOUND),
            Error::RetryExhausted { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable_with(&self, statuses: &RetryableStatuses) -> bool {
        match self {
            Error::Network { .. } => true,
            Error::Api { status, .. } => statuses.contains(*status),
            _ => false,
        }
    }

    /// True for `NotFound`, including one wrapped by `RetryExhausted`.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::RetryExhausted { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
