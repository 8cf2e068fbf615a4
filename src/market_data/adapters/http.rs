// HTTP(S) transport for the quoting service.
//
// GET {base}{history_path}?symbol=..&exchange=..&start=..&end=..&interval=..[&{page_param}=..]
// GET {base}{latest_path}?symbol=..&exchange=..

use std::fmt;
use std::time::Duration;

use chrono::SecondsFormat;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::{debug, instrument};

use super::{Attempt, Failure, ProviderRequest, QuoteTransport, RawPayload, RetryReason};
use crate::error::ConfigError;

/// Header forwarded verbatim on every request.
#[derive(Clone)]
pub struct AuthHeader {
    pub name: String,
    pub value: String,
}

impl fmt::Debug for AuthHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthHeader")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    pub base_url: String,
    pub history_path: String,
    pub latest_path: String,
    pub page_param: String,
    pub timeout: Duration,
    pub auth: Option<AuthHeader>,
}

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: HttpEndpoint,
}

impl HttpTransport {
    pub fn new(endpoint: HttpEndpoint) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        if let Some(auth) = &endpoint.auth {
            let name = HeaderName::from_bytes(auth.name.as_bytes())
                .map_err(|e| ConfigError::Invalid(format!("auth header name '{}': {e}", auth.name)))?;
            let mut value = HeaderValue::from_str(&auth.value)
                .map_err(|e| ConfigError::Invalid(format!("auth header value: {e}")))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(endpoint.timeout)
            .default_headers(headers)
            .user_agent(concat!("quotepipe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;

        Ok(Self { client, endpoint })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.base_url.trim_end_matches('/'), path)
    }

    fn build(&self, request: &ProviderRequest) -> reqwest::RequestBuilder {
        match request {
            ProviderRequest::History { instrument, start, end, cadence, page } => {
                let mut query: Vec<(&str, String)> = vec![
                    ("symbol", instrument.ticker().to_string()),
                    ("exchange", instrument.exchange().to_string()),
                    ("start", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
                    ("end", end.to_rfc3339_opts(SecondsFormat::Secs, true)),
                    ("interval", cadence.to_string()),
                ];
                if let Some(cursor) = page {
                    query.push((self.endpoint.page_param.as_str(), cursor.clone()));
                }
                self.client.get(self.url(&self.endpoint.history_path)).query(&query)
            }
            ProviderRequest::Latest { instrument } => self
                .client
                .get(self.url(&self.endpoint.latest_path))
                .query(&[("symbol", instrument.ticker()), ("exchange", instrument.exchange())]),
        }
    }
}

#[async_trait::async_trait]
impl QuoteTransport for HttpTransport {
    #[instrument(skip_all, fields(instrument = %request.instrument()))]
    async fn send(&self, request: &ProviderRequest) -> Attempt<RawPayload> {
        let response = match self.build(request).send().await {
            Ok(response) => response,
            Err(e) => return classify_send_error(&e),
        };

        let status = response.status();
        if let Some(outcome) = classify_status(status, response.headers()) {
            debug!(%status, "Provider rejected request");
            return outcome;
        }

        // Body read failures (reset mid-stream, timeout) are worth another try
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return Attempt::Retry(RetryReason::new(format!("reading body: {e}"))),
        };
        match serde_json::from_slice(&bytes) {
            Ok(body) => Attempt::Done(RawPayload::new(body)),
            Err(e) => Attempt::Fail(Failure::Malformed(format!("body is not JSON: {e}"))),
        }
    }
}

fn classify_send_error(e: &reqwest::Error) -> Attempt<RawPayload> {
    if e.is_builder() {
        return Attempt::Fail(Failure::Permanent(format!("invalid request: {e}")));
    }
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else {
        "network"
    };
    Attempt::Retry(RetryReason::new(format!("{kind}: {e}")))
}

/// Map a non-success status to an attempt outcome; `None` means the body should be read.
pub(crate) fn classify_status(status: StatusCode, headers: &HeaderMap) -> Option<Attempt<RawPayload>> {
    if status.is_success() {
        return None;
    }
    let outcome = match status {
        StatusCode::TOO_MANY_REQUESTS => Attempt::Retry(RetryReason {
            reason: "rate limited (HTTP 429)".into(),
            retry_after: retry_after(headers),
        }),
        StatusCode::REQUEST_TIMEOUT => Attempt::Retry(RetryReason::new("HTTP 408")),
        s if s.is_server_error() => Attempt::Retry(RetryReason::new(format!("HTTP {}", s.as_u16()))),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Attempt::Fail(Failure::Permanent(format!("authentication failed (HTTP {})", status.as_u16())))
        }
        StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
            Attempt::Fail(Failure::Permanent(format!("invalid instrument or request (HTTP {})", status.as_u16())))
        }
        s => Attempt::Fail(Failure::Permanent(format!("unexpected HTTP {}", s.as_u16()))),
    };
    Some(outcome)
}

// Only the delta-seconds form is honoured
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
