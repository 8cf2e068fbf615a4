// Shared trait + request/response types for provider transports
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::engine::types::{Cadence, Instrument};

/// One request against the quoting service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderRequest {
    History {
        instrument: Instrument,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cadence: Cadence,
        // Cursor from the previous page, None for the first page
        page: Option<String>,
    },
    Latest {
        instrument: Instrument,
    },
}

impl ProviderRequest {
    pub fn instrument(&self) -> &Instrument {
        match self {
            ProviderRequest::History { instrument, .. } | ProviderRequest::Latest { instrument } => instrument,
        }
    }
}

/// Provider JSON body, opaque until the normaliser reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    pub body: serde_json::Value,
}

impl RawPayload {
    pub fn new(body: serde_json::Value) -> Self {
        Self { body }
    }

    /// Pagination cursor stored under `field`, if any. Empty strings and nulls end paging.
    pub fn next_page(&self, field: &str) -> Option<String> {
        match self.body.get(field)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryReason {
    pub reason: String,
    // Server-provided hint (HTTP Retry-After)
    pub retry_after: Option<Duration>,
}

impl RetryReason {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into(), retry_after: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Auth failure, unknown instrument, rejected request.
    Permanent(String),
    /// The service answered but the body is unusable.
    Malformed(String),
}

/// Outcome of a single attempt. The fetch client's retry loop decides what
/// happens next; transports never sleep or retry on their own.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    Done(T),
    Retry(RetryReason),
    Fail(Failure),
}

#[async_trait::async_trait]
pub trait QuoteTransport: Send + Sync {
    async fn send(&self, request: &ProviderRequest) -> Attempt<RawPayload>;
}

pub mod http;
