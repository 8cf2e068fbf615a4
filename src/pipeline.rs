// Fan out one task per instrument, assemble, then hand everything to the sink.
//
// Instruments never affect each other: a failure is recorded in the report and
// the rest carry on. Only cancellation stops the run as a whole.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn, Instrument as _};

use crate::config::{RuntimeConfig, Settings};
use crate::engine::assemble;
use crate::engine::types::{Cadence, ExpectedGrid, FetchWindow, Instrument, Series, SessionHours};
use crate::error::{ConfigError, FetchError, PipelineError};
use crate::market_data::adapters::http::HttpTransport;
use crate::market_data::client::FetchClient;
use crate::market_data::normaliser::Normaliser;
use crate::market_data::rate_limiter::RateLimiter;
use crate::persist::SeriesSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMode {
    History {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cadence: Cadence,
        /// Merge a latest-quote fetch after the history pages.
        include_latest: bool,
    },
    Latest,
}

#[derive(Debug, Clone)]
pub struct RunPlan {
    pub instruments: Vec<Instrument>,
    pub mode: FetchMode,
    pub session: Option<SessionHours>,
}

#[derive(Debug)]
pub enum InstrumentOutcome {
    Success { rows: usize },
    Partial { rows: usize, gaps: usize },
    Failed(FetchError),
}

impl InstrumentOutcome {
    fn label(&self) -> &'static str {
        match self {
            InstrumentOutcome::Success { .. } => "success",
            InstrumentOutcome::Partial { .. } => "partial",
            InstrumentOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: BTreeMap<Instrument, InstrumentOutcome>,
    pub rows_written: usize,
    pub gaps: usize,
    pub skipped: usize,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, InstrumentOutcome::Success { .. }))
    }

    pub fn partial(&self) -> usize {
        self.count(|o| matches!(o, InstrumentOutcome::Partial { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, InstrumentOutcome::Failed(_)))
    }

    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.failed() == self.outcomes.len()
    }

    fn count(&self, pred: impl Fn(&InstrumentOutcome) -> bool) -> usize {
        self.outcomes.values().filter(|o| pred(o)).count()
    }

    pub fn log_summary(&self) {
        for (instrument, outcome) in &self.outcomes {
            match outcome {
                InstrumentOutcome::Success { rows } => info!(%instrument, rows, "success"),
                InstrumentOutcome::Partial { rows, gaps } => warn!(%instrument, rows, gaps, "partial"),
                InstrumentOutcome::Failed(e) => error!(%instrument, kind = e.kind(), error = %e, "failed"),
            }
        }
        info!(
            succeeded = self.succeeded(),
            partial = self.partial(),
            failed = self.failed(),
            rows = self.rows_written,
            gaps = self.gaps,
            skipped = self.skipped,
            "Run summary"
        );
    }
}

pub struct Pipeline {
    client: FetchClient,
    normaliser: Arc<Normaliser>,
    sink: Arc<dyn SeriesSink>,
    workers: usize,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        client: FetchClient,
        normaliser: Normaliser,
        sink: Arc<dyn SeriesSink>,
        workers: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self { client, normaliser: Arc::new(normaliser), sink, workers: workers.max(1), cancel }
    }

    /// Wire the HTTP transport, shared limiter and file sink from validated settings.
    pub fn from_config(runtime: &RuntimeConfig, cancel: CancellationToken) -> Result<Self, ConfigError> {
        let transport = Arc::new(HttpTransport::new(runtime.endpoint.clone())?);
        let limiter = Arc::new(RateLimiter::new(runtime.requests_per_second, runtime.burst));
        let client = FetchClient::new(transport, limiter, runtime.retry.clone(), runtime.paging.clone(), cancel.clone());
        let normaliser = Normaliser::new(runtime.schema.clone(), runtime.aliases.clone());
        Ok(Self::new(client, normaliser, Arc::new(runtime.output.clone()), runtime.workers, cancel))
    }

    pub fn from_settings(settings: &Settings, cancel: CancellationToken) -> Result<(Self, RunPlan), ConfigError> {
        let runtime = settings.validate()?;
        let pipeline = Self::from_config(&runtime, cancel)?;
        Ok((pipeline, runtime.plan))
    }

    #[instrument(skip_all, fields(instruments = plan.instruments.len(), workers = self.workers))]
    pub async fn run(&self, plan: &RunPlan) -> Result<RunReport, PipelineError> {
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(plan.instruments.len());

        for instrument in &plan.instruments {
            let permits = Arc::clone(&permits);
            let client = self.client.clone();
            let normaliser = Arc::clone(&self.normaliser);
            let mode = plan.mode.clone();
            let session = plan.session;
            let task_instrument = instrument.clone();
            let span = tracing::info_span!("instrument", instrument = %instrument);

            let handle = tokio::spawn(
                async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return Err(FetchError::Cancelled);
                    };
                    fetch_instrument(&client, &normaliser, task_instrument, &mode, session).await
                }
                .instrument(span),
            );
            handles.push(handle);
        }
        let joined = join_all(handles).await;

        let mut report = RunReport::default();
        let mut series_by_instrument = BTreeMap::new();
        let mut cancelled = false;

        for (instrument, joined) in plan.instruments.iter().cloned().zip(joined) {
            let result = match joined {
                Ok(result) => result,
                Err(join_error) => Err(FetchError::Permanent {
                    instrument: instrument.to_string(),
                    reason: format!("fetch task aborted: {join_error}"),
                }),
            };
            let outcome = match result {
                Ok(series) => {
                    report.skipped += series.skipped.total();
                    report.gaps += series.gap_count();
                    let outcome = if series.gap_count() > 0 {
                        InstrumentOutcome::Partial { rows: series.len(), gaps: series.gap_count() }
                    } else {
                        InstrumentOutcome::Success { rows: series.len() }
                    };
                    series_by_instrument.insert(instrument.clone(), series);
                    outcome
                }
                Err(FetchError::Cancelled) => {
                    cancelled = true;
                    InstrumentOutcome::Failed(FetchError::Cancelled)
                }
                Err(e) => InstrumentOutcome::Failed(e),
            };
            metrics::counter!("quotepipe_instruments_total", "outcome" => outcome.label()).increment(1);
            report.outcomes.insert(instrument, outcome);
        }

        if cancelled || self.cancel.is_cancelled() {
            warn!("Run cancelled, no output written");
            return Err(PipelineError::Cancelled);
        }
        metrics::counter!("quotepipe_gaps_total").increment(report.gaps as u64);

        if report.all_failed() {
            report.log_summary();
            return Err(PipelineError::AllFailed { instruments: report.outcomes.len() });
        }

        report.rows_written = self.sink.write(series_by_instrument).await?;
        report.log_summary();
        Ok(report)
    }
}

async fn fetch_instrument(
    client: &FetchClient,
    normaliser: &Normaliser,
    instrument: Instrument,
    mode: &FetchMode,
    session: Option<SessionHours>,
) -> Result<Series, FetchError> {
    match *mode {
        FetchMode::History { start, end, cadence, include_latest } => {
            let window = FetchWindow { instrument: instrument.clone(), start, end, cadence };
            let pages = client.fetch_history(&window).await?;
            let mut chunks = pages
                .iter()
                .map(|page| normaliser.normalize(page, &instrument))
                .collect::<Result<Vec<_>, _>>()?;

            if include_latest {
                let latest = client
                    .fetch_latest(&instrument)
                    .await
                    .and_then(|payload| normaliser.normalize(&payload, &instrument));
                match latest {
                    // Merged last so it wins over a history quote at the same second
                    Ok(chunk) => chunks.push(chunk),
                    Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                    Err(e) => warn!(error = %e, "Latest quote unavailable, keeping history only"),
                }
            }

            let grid = ExpectedGrid::for_window(&window, session);
            Ok(assemble(instrument, chunks, Some(&grid)))
        }
        FetchMode::Latest => {
            let payload = client.fetch_latest(&instrument).await?;
            let chunk = normaliser.normalize(&payload, &instrument)?;
            Ok(assemble(instrument, vec![chunk], None))
        }
    }
}
