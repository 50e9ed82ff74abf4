//! HTTP transport and retry policy for the n8n API.

mod client;
mod retry;

pub use client::{API_KEY_HEADER, HttpClient, Response};
pub use retry::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_JITTER_RATIO, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RETRIES,
    RetryPolicy, RetryableStatuses, backoff_delay,
};
