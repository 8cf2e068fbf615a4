use std::path::PathBuf;

use thiserror::Error;

/// Per-instrument fetch/normalize failures. These never abort sibling instruments.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{instrument}: transient failure after {attempts} attempts: {reason}")]
    Transient {
        instrument: String,
        attempts: u32,
        reason: String,
    },

    #[error("{instrument}: permanent failure: {reason}")]
    Permanent { instrument: String, reason: String },

    #[error("{instrument}: malformed response: {reason}")]
    MalformedResponse { instrument: String, reason: String },

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn malformed(instrument: impl ToString, reason: impl Into<String>) -> Self {
        FetchError::MalformedResponse {
            instrument: instrument.to_string(),
            reason: reason.into(),
        }
    }

    /// Short label used for metrics and the run summary.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transient { .. } => "transient",
            FetchError::Permanent { .. } => "permanent",
            FetchError::MalformedResponse { .. } => "malformed_response",
            FetchError::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("write failure at {}: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encode failure: {0}")]
    Encode(String),

    #[error("decode failure: {0}")]
    Decode(String),
}

impl SinkError {
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SinkError::WriteFailure {
            path: path.into(),
            source,
        }
    }
}

/// Raised while turning settings into a runnable pipeline; always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid instrument '{0}'")]
    InvalidInstrument(String),

    #[error("invalid cadence '{0}' (expected e.g. 30s, 1m, 15m, 1h, 1d)")]
    InvalidCadence(String),

    #[error("invalid schema mapping: {0}")]
    InvalidSchema(String),

    #[error("invalid time '{value}': {reason}")]
    InvalidTime { value: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Write(#[from] SinkError),

    #[error("all {instruments} instruments failed, nothing written")]
    AllFailed { instruments: usize },

    #[error("pipeline cancelled")]
    Cancelled,
}
