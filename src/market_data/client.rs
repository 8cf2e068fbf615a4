// Rate-limited, retrying, cancellable access to a QuoteTransport.
//
// Every attempt first takes a token from the shared limiter. Retry decisions
// are made here, never inside a transport.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::engine::types::{FetchWindow, Instrument};
use crate::error::FetchError;
use crate::market_data::adapters::{Attempt, Failure, ProviderRequest, QuoteTransport, RawPayload};
use crate::market_data::rate_limiter::RateLimiter;
use crate::market_data::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paging {
    /// Top-level payload field holding the next-page cursor.
    pub next_page_field: String,
    pub max_pages: u32,
}

impl Default for Paging {
    fn default() -> Self {
        Self { next_page_field: "next_page".into(), max_pages: 100 }
    }
}

#[derive(Clone)]
pub struct FetchClient {
    transport: Arc<dyn QuoteTransport>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    paging: Paging,
    cancel: CancellationToken,
}

impl FetchClient {
    pub fn new(
        transport: Arc<dyn QuoteTransport>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        paging: Paging,
        cancel: CancellationToken,
    ) -> Self {
        Self { transport, limiter, retry, paging, cancel }
    }

    /// All pages covering `window`, in the order the provider returned them.
    #[instrument(skip_all, fields(instrument = %window.instrument, start = %window.start, end = %window.end))]
    pub async fn fetch_history(&self, window: &FetchWindow) -> Result<Vec<RawPayload>, FetchError> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let request = ProviderRequest::History {
                instrument: window.instrument.clone(),
                start: window.start,
                end: window.end,
                cadence: window.cadence,
                page: cursor.take(),
            };
            let payload = self.send(&request).await?;
            let next = payload.next_page(&self.paging.next_page_field);
            pages.push(payload);

            let Some(next) = next else { break };
            if !seen.insert(next.clone()) {
                return Err(FetchError::malformed(&window.instrument, format!("pagination cursor '{next}' repeated")));
            }
            if pages.len() as u32 >= self.paging.max_pages {
                return Err(FetchError::malformed(
                    &window.instrument,
                    format!("more than {} pages", self.paging.max_pages),
                ));
            }
            debug!(page = pages.len(), cursor = %next, "Following pagination cursor");
            cursor = Some(next);
        }

        debug!(pages = pages.len(), "History fetched");
        Ok(pages)
    }

    #[instrument(skip_all, fields(instrument = %instrument))]
    pub async fn fetch_latest(&self, instrument: &Instrument) -> Result<RawPayload, FetchError> {
        self.send(&ProviderRequest::Latest { instrument: instrument.clone() }).await
    }

    async fn send(&self, request: &ProviderRequest) -> Result<RawPayload, FetchError> {
        let instrument = request.instrument();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                outcome = async {
                    self.limiter.acquire(1).await;
                    self.transport.send(request).await
                } => outcome,
            };

            let retry = match outcome {
                Attempt::Done(payload) => {
                    metrics::counter!("quotepipe_requests_total", "outcome" => "ok").increment(1);
                    return Ok(payload);
                }
                Attempt::Fail(Failure::Permanent(reason)) => {
                    metrics::counter!("quotepipe_requests_total", "outcome" => "permanent").increment(1);
                    return Err(FetchError::Permanent { instrument: instrument.to_string(), reason });
                }
                Attempt::Fail(Failure::Malformed(reason)) => {
                    metrics::counter!("quotepipe_requests_total", "outcome" => "malformed").increment(1);
                    return Err(FetchError::malformed(instrument, reason));
                }
                Attempt::Retry(retry) => retry,
            };

            metrics::counter!("quotepipe_requests_total", "outcome" => "retry").increment(1);
            if !self.retry.should_retry(attempts) {
                warn!(attempts, reason = %retry.reason, "Giving up after retries");
                return Err(FetchError::Transient {
                    instrument: instrument.to_string(),
                    attempts,
                    reason: retry.reason,
                });
            }

            let delay = self.retry.delay_for(attempts, retry.retry_after);
            warn!(attempts, delay_ms = delay.as_millis() as u64, reason = %retry.reason, "Retrying request");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
