pub mod types;
pub use types::*;
pub mod atomic;
pub mod codec;
pub mod records;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::engine::types::{Instrument, Series};
use crate::error::SinkError;

/// Serialize every series into `destination`, replacing it atomically.
/// Returns the number of rows written.
#[instrument(skip(series_by_instrument, destination), fields(instruments = series_by_instrument.len(), destination = %destination.display()))]
pub fn write(
    series_by_instrument: &BTreeMap<Instrument, Series>,
    format: OutputFormat,
    destination: &Path,
) -> Result<usize, SinkError> {
    let rows = records::from_series(series_by_instrument);
    atomic::write_atomic(destination, |out| codec::encode(&rows, format, out, destination))?;
    info!(rows = rows.len(), %format, "Output written");
    Ok(rows.len())
}

pub fn read_records(path: &Path, format: OutputFormat) -> Result<Vec<OutputRecord>, SinkError> {
    let file = File::open(path).map_err(|e| SinkError::write(path, e))?;
    codec::decode(BufReader::new(file), format)
}

/// Final stage of a run. Takes ownership so the series are dropped once written.
#[async_trait]
pub trait SeriesSink: Send + Sync {
    async fn write(&self, series_by_instrument: BTreeMap<Instrument, Series>) -> Result<usize, SinkError>;
}

#[derive(Debug, Clone)]
pub struct FileSink {
    pub format: OutputFormat,
    pub destination: PathBuf,
}

impl FileSink {
    pub fn new(format: OutputFormat, destination: impl Into<PathBuf>) -> Self {
        Self { format, destination: destination.into() }
    }
}

#[async_trait]
impl SeriesSink for FileSink {
    async fn write(&self, series_by_instrument: BTreeMap<Instrument, Series>) -> Result<usize, SinkError> {
        let format = self.format;
        let destination = self.destination.clone();
        // File I/O stays off the async workers
        tokio::task::spawn_blocking(move || write(&series_by_instrument, format, &destination))
            .await
            .map_err(|e| SinkError::write(&self.destination, std::io::Error::other(e)))?
    }
}
