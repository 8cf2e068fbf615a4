//! Layered run configuration.
//!
//! Sources, later ones winning:
//! 1. TOML file (`--config`, default `quotepipe.toml`, optional unless named explicitly)
//! 2. Environment variables `QUOTEPIPE__SECTION__KEY` (e.g. `QUOTEPIPE__RUN__WORKERS=8`)
//! 3. Command-line overrides
//!
//! `Settings` is the raw, deserialized shape. `Settings::validate` turns it into a
//! `RuntimeConfig` or fails with the first problem found.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc};
use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::warn;

use crate::engine::types::{Cadence, Instrument, SessionHours};
use crate::error::ConfigError;
use crate::market_data::adapters::http::{AuthHeader, HttpEndpoint};
use crate::market_data::client::Paging;
use crate::market_data::retry::RetryPolicy;
use crate::market_data::schema::{AliasTable, SchemaMapping, TimestampFormat};
use crate::persist::{FileSink, OutputFormat};
use crate::pipeline::{FetchMode, RunPlan};

pub const DEFAULT_CONFIG_FILE: &str = "quotepipe.toml";
const ENV_PREFIX: &str = "QUOTEPIPE";
/// One request every ~17 minutes; anything slower is a typo.
const MIN_REQUESTS_PER_SECOND: f64 = 0.001;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub run: RunSettings,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    /// Trading session; when absent every cadence slot is expected.
    #[serde(default)]
    pub session: Option<SessionSettings>,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunSettings {
    #[serde(default)]
    pub symbols: Vec<String>,
    /// RFC 3339, `YYYY-MM-DD HH:MM[:SS]` (UTC) or `YYYY-MM-DD`.
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub latest: bool,
    /// History mode only: also fetch the latest quote and merge it last.
    #[serde(default)]
    pub include_latest: bool,
    #[serde(default = "default_cadence")]
    pub cadence: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            start: None,
            end: None,
            latest: false,
            include_latest: false,
            cadence: default_cadence(),
            workers: default_workers(),
        }
    }
}

fn default_cadence() -> String {
    "1m".into()
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputSettings {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self { format: OutputFormat::default(), path: default_output_path() }
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from("quotes.csv")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_history_path")]
    pub history_path: String,
    #[serde(default = "default_latest_path")]
    pub latest_path: String,
    #[serde(default = "default_page_param")]
    pub page_param: String,
    #[serde(default = "default_next_page_field")]
    pub next_page_field: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_exchange")]
    pub default_exchange: String,
    #[serde(default = "default_records_field")]
    pub records_field: String,
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
    /// Offset for naive provider timestamps, e.g. `-05:00`.
    #[serde(default = "default_utc_offset")]
    pub source_utc_offset: String,
    /// canonical field (`timestamp`, `price`, `volume`, `symbol`) -> provider field
    #[serde(default = "default_fields")]
    pub fields: HashMap<String, String>,
    /// provider symbol -> canonical instrument
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    #[serde(default)]
    pub auth: Option<AuthSettings>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            history_path: default_history_path(),
            latest_path: default_latest_path(),
            page_param: default_page_param(),
            next_page_field: default_next_page_field(),
            max_pages: default_max_pages(),
            timeout_secs: default_timeout_secs(),
            default_exchange: default_exchange(),
            records_field: default_records_field(),
            timestamp_format: default_timestamp_format(),
            source_utc_offset: default_utc_offset(),
            fields: default_fields(),
            aliases: HashMap::new(),
            auth: None,
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".into()
}

fn default_history_path() -> String {
    "/v1/history".into()
}

fn default_latest_path() -> String {
    "/v1/latest".into()
}

fn default_page_param() -> String {
    "page".into()
}

fn default_next_page_field() -> String {
    "next_page".into()
}

fn default_max_pages() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_exchange() -> String {
    "NASDAQ".into()
}

fn default_records_field() -> String {
    "data".into()
}

fn default_timestamp_format() -> String {
    "auto".into()
}

fn default_utc_offset() -> String {
    "+00:00".into()
}

fn default_fields() -> HashMap<String, String> {
    ["timestamp", "price", "volume", "symbol"]
        .into_iter()
        .map(|f| (f.to_string(), f.to_string()))
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    #[serde(default = "default_auth_header")]
    pub header: String,
    pub value: Secret,
}

fn default_auth_header() -> String {
    "Authorization".into()
}

/// Credential string that never shows up in logs or `Debug` output.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitSettings {
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { requests_per_second: default_requests_per_second(), burst: default_burst() }
    }
}

fn default_requests_per_second() -> f64 {
    5.0
}

fn default_burst() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionSettings {
    #[serde(default = "default_open")]
    pub open: String,
    #[serde(default = "default_close")]
    pub close: String,
    #[serde(default = "default_session_offset")]
    pub utc_offset: String,
    #[serde(default = "default_weekdays_only")]
    pub weekdays_only: bool,
}

fn default_open() -> String {
    "09:30".into()
}

fn default_close() -> String {
    "16:00".into()
}

fn default_session_offset() -> String {
    "-05:00".into()
}

fn default_weekdays_only() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetrySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Prometheus listener; only used with the `metrics-exporter` feature.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self { log_level: default_log_level(), metrics_port: None }
    }
}

fn default_log_level() -> String {
    "info".into()
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub symbols: Option<Vec<String>>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub latest: Option<bool>,
    pub include_latest: Option<bool>,
    pub cadence: Option<String>,
    pub format: Option<String>,
    pub output: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Everything a run needs, checked and converted.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub plan: RunPlan,
    pub workers: usize,
    pub output: FileSink,
    pub schema: SchemaMapping,
    pub aliases: AliasTable,
    pub retry: RetryPolicy,
    pub requests_per_second: f64,
    pub burst: u32,
    pub paging: Paging,
    pub endpoint: HttpEndpoint,
}

impl Settings {
    /// Load from `path` (or the default file, if present), the environment and `overrides`.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        Self::load_with(path, overrides, environment())
    }

    fn load_with(path: Option<&Path>, overrides: &Overrides, env: Environment) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let builder = Config::builder()
            .add_source(file)
            .add_source(env)
            .set_override_option("run.symbols", overrides.symbols.clone())?
            .set_override_option("run.start", overrides.start.clone())?
            .set_override_option("run.end", overrides.end.clone())?
            .set_override_option("run.latest", overrides.latest)?
            .set_override_option("run.include_latest", overrides.include_latest)?
            .set_override_option("run.cadence", overrides.cadence.clone())?
            .set_override_option("output.format", overrides.format.clone())?
            .set_override_option(
                "output.path",
                overrides.output.as_ref().map(|p| p.to_string_lossy().into_owned()),
            )?
            .set_override_option("telemetry.log_level", overrides.log_level.clone())?;

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<RuntimeConfig, ConfigError> {
        let provider = &self.provider;

        let plan = RunPlan {
            instruments: self.instruments()?,
            mode: self.fetch_mode()?,
            session: self.session.as_ref().map(SessionSettings::to_hours).transpose()?,
        };

        if self.run.workers == 0 {
            return Err(ConfigError::Invalid("run.workers must be at least 1".into()));
        }

        let rate = &self.rate_limit;
        if !rate.requests_per_second.is_finite() || rate.requests_per_second < MIN_REQUESTS_PER_SECOND {
            return Err(ConfigError::Invalid(format!(
                "rate_limit.requests_per_second must be at least {MIN_REQUESTS_PER_SECOND}"
            )));
        }
        if rate.burst == 0 {
            return Err(ConfigError::Invalid("rate_limit.burst must be at least 1".into()));
        }

        let schema = SchemaMapping::from_fields(
            &provider.fields,
            &provider.records_field,
            provider.timestamp_format.parse::<TimestampFormat>()?,
            parse_offset(&provider.source_utc_offset)?,
        )?;
        let aliases = AliasTable::new(&provider.aliases, &provider.default_exchange)?;

        if provider.max_pages == 0 || provider.next_page_field.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "provider.max_pages must be at least 1 and provider.next_page_field non-empty".into(),
            ));
        }
        let paging = Paging { next_page_field: provider.next_page_field.clone(), max_pages: provider.max_pages };

        Ok(RuntimeConfig {
            plan,
            workers: self.run.workers,
            output: FileSink::new(self.output.format, self.output.path.clone()),
            schema,
            aliases,
            retry: self.retry.to_policy()?,
            requests_per_second: rate.requests_per_second,
            burst: rate.burst,
            paging,
            endpoint: provider.to_endpoint()?,
        })
    }

    fn instruments(&self) -> Result<Vec<Instrument>, ConfigError> {
        if self.run.symbols.is_empty() {
            return Err(ConfigError::Invalid("no symbols configured (run.symbols / --symbols)".into()));
        }
        let mut seen = HashSet::new();
        let mut instruments = Vec::with_capacity(self.run.symbols.len());
        for raw in &self.run.symbols {
            let instrument = Instrument::parse(raw, &self.provider.default_exchange)?;
            if seen.insert(instrument.clone()) {
                instruments.push(instrument);
            } else {
                warn!(%instrument, "Duplicate symbol ignored");
            }
        }
        Ok(instruments)
    }

    fn fetch_mode(&self) -> Result<FetchMode, ConfigError> {
        let run = &self.run;
        if run.latest {
            if run.start.is_some() || run.end.is_some() {
                return Err(ConfigError::Invalid("latest mode takes no start/end".into()));
            }
            return Ok(FetchMode::Latest);
        }

        let (Some(start), Some(end)) = (&run.start, &run.end) else {
            return Err(ConfigError::Invalid("history mode needs both run.start and run.end".into()));
        };
        let start = parse_time(start)?;
        let end = parse_time(end)?;
        if start >= end {
            return Err(ConfigError::InvalidTime {
                value: end.to_rfc3339(),
                reason: format!("end must be after start ({})", start.to_rfc3339()),
            });
        }
        Ok(FetchMode::History {
            start,
            end,
            cadence: run.cadence.parse::<Cadence>()?,
            include_latest: run.include_latest,
        })
    }
}

impl SessionSettings {
    fn to_hours(&self) -> Result<SessionHours, ConfigError> {
        let time = |raw: &str| {
            NaiveTime::parse_from_str(raw.trim(), "%H:%M")
                .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
                .map_err(|e| ConfigError::InvalidTime { value: raw.to_string(), reason: e.to_string() })
        };
        let open = time(&self.open)?;
        let close = time(&self.close)?;
        if open >= close {
            return Err(ConfigError::Invalid(format!(
                "session.open ({}) must be before session.close ({})",
                self.open, self.close
            )));
        }
        Ok(SessionHours { open, close, offset: parse_offset(&self.utc_offset)?, weekdays_only: self.weekdays_only })
    }
}

impl RetrySettings {
    fn to_policy(&self) -> Result<RetryPolicy, ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if !(self.multiplier >= 1.0 && self.multiplier.is_finite()) {
            return Err(ConfigError::Invalid("retry.multiplier must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid("retry.jitter must be within 0..=1".into()));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid("retry.base_delay_ms exceeds retry.max_delay_ms".into()));
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            jitter_factor: self.jitter,
        })
    }
}

impl ProviderSettings {
    fn to_endpoint(&self) -> Result<HttpEndpoint, ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!("provider.base_url '{}' is not http(s)", self.base_url)));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("provider.timeout_secs must be at least 1".into()));
        }
        let auth = match &self.auth {
            Some(auth) if auth.header.trim().is_empty() || auth.value.expose().is_empty() => {
                return Err(ConfigError::Invalid("provider.auth needs both header and value".into()));
            }
            Some(auth) => Some(AuthHeader { name: auth.header.clone(), value: auth.value.expose().to_string() }),
            None => None,
        };
        Ok(HttpEndpoint {
            base_url: self.base_url.clone(),
            history_path: self.history_path.clone(),
            latest_path: self.latest_path.clone(),
            page_param: self.page_param.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            auth,
        })
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("run.symbols")
}

/// Accepts RFC 3339, naive date-times (taken as UTC) and bare dates (midnight UTC).
pub fn parse_time(raw: &str) -> Result<DateTime<Utc>, ConfigError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
        .map_err(|_| ConfigError::InvalidTime {
            value: raw.to_string(),
            reason: "expected RFC 3339, YYYY-MM-DD HH:MM[:SS] or YYYY-MM-DD".into(),
        })
}

fn parse_offset(raw: &str) -> Result<FixedOffset, ConfigError> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }
    raw.parse::<FixedOffset>().map_err(|e| ConfigError::InvalidTime {
        value: raw.to_string(),
        reason: format!("bad UTC offset: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::adapters::RawPayload;
    use crate::market_data::normaliser::Normaliser;
    use chrono::TimeZone;
    use std::io::Write;

    fn quiet_env() -> Environment {
        environment().source(Some(HashMap::new()))
    }

    fn history_settings() -> Settings {
        let mut settings = Settings::default();
        settings.run.symbols = vec!["AAPL".into(), "nyse:ibm".into()];
        settings.run.start = Some("2025-12-16T09:00:00Z".into());
        settings.run.end = Some("2025-12-16 09:05".into());
        settings
    }

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.run.workers, 4);
        assert_eq!(settings.run.cadence, "1m");
        assert_eq!(settings.output.format, OutputFormat::Csv);
        assert_eq!(settings.provider.default_exchange, "NASDAQ");
        assert_eq!(settings.retry.max_attempts, 4);
        assert!(settings.session.is_none());
    }

    #[test]
    fn validate_builds_history_plan() {
        let runtime = history_settings().validate().unwrap();
        let names: Vec<String> = runtime.plan.instruments.iter().map(ToString::to_string).collect();
        assert_eq!(names, ["NASDAQ:AAPL", "NYSE:IBM"]);
        match runtime.plan.mode {
            FetchMode::History { start, end, cadence, include_latest } => {
                assert_eq!(start, Utc.with_ymd_and_hms(2025, 12, 16, 9, 0, 0).unwrap());
                assert_eq!(end, Utc.with_ymd_and_hms(2025, 12, 16, 9, 5, 0).unwrap());
                assert_eq!(cadence.as_secs(), 60);
                assert!(!include_latest);
            }
            FetchMode::Latest => panic!("expected history mode"),
        }
        assert_eq!(runtime.retry.max_attempts, 4);
        assert_eq!(runtime.paging.max_pages, 100);
    }

    #[test]
    fn duplicate_symbols_are_collapsed() {
        let mut settings = history_settings();
        settings.run.symbols = vec!["AAPL".into(), "NASDAQ:AAPL".into(), "aapl".into()];
        assert_eq!(settings.validate().unwrap().plan.instruments.len(), 1);
    }

    #[test]
    fn invalid_inputs_fail_fast() {
        let mut empty = history_settings();
        empty.run.symbols.clear();
        assert!(empty.validate().is_err());

        let mut backwards = history_settings();
        backwards.run.end = Some("2025-12-16T08:00:00Z".into());
        assert!(matches!(backwards.validate(), Err(ConfigError::InvalidTime { .. })));

        let mut cadence = history_settings();
        cadence.run.cadence = "0m".into();
        assert!(matches!(cadence.validate(), Err(ConfigError::InvalidCadence(_))));

        let mut schema = history_settings();
        schema.provider.fields.remove("price");
        assert!(matches!(schema.validate(), Err(ConfigError::InvalidSchema(_))));

        let mut symbol = history_settings();
        symbol.run.symbols.push("NYSE:".into());
        assert!(matches!(symbol.validate(), Err(ConfigError::InvalidInstrument(_))));

        let mut url = history_settings();
        url.provider.base_url = "ftp://example".into();
        assert!(url.validate().is_err());

        let mut workers = history_settings();
        workers.run.workers = 0;
        assert!(workers.validate().is_err());

        let mut glacial = history_settings();
        glacial.rate_limit.requests_per_second = 1e-20;
        assert!(matches!(glacial.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn latest_mode_rejects_window() {
        let mut settings = history_settings();
        settings.run.latest = true;
        assert!(settings.validate().is_err());

        settings.run.start = None;
        settings.run.end = None;
        assert!(matches!(settings.validate().unwrap().plan.mode, FetchMode::Latest));
    }

    #[test]
    fn session_block_is_parsed() {
        let mut settings = history_settings();
        settings.session = Some(SessionSettings {
            open: "09:30".into(),
            close: "16:00".into(),
            utc_offset: "-05:00".into(),
            weekdays_only: true,
        });
        let session = settings.validate().unwrap().plan.session.unwrap();
        assert_eq!(session.offset, FixedOffset::west_opt(5 * 3600).unwrap());
        assert!(session.contains(Utc.with_ymd_and_hms(2025, 12, 16, 14, 30, 0).unwrap()));
        assert!(!session.contains(Utc.with_ymd_and_hms(2025, 12, 16, 21, 0, 0).unwrap()));
    }

    #[test]
    fn time_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 12, 16, 14, 30, 0).unwrap();
        assert_eq!(parse_time("2025-12-16T09:30:00-05:00").unwrap(), expected);
        assert_eq!(parse_time("2025-12-16 14:30:00").unwrap(), expected);
        assert_eq!(parse_time("2025-12-16T14:30").unwrap(), expected);
        assert_eq!(
            parse_time("2025-12-16").unwrap(),
            Utc.with_ymd_and_hms(2025, 12, 16, 0, 0, 0).unwrap()
        );
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn secrets_are_redacted() {
        let auth = AuthSettings { header: "X-Api-Key".into(), value: Secret::new("hunter2") };
        let debug = format!("{auth:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn file_env_and_overrides_layer_in_order() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[run]
symbols = ["AAPL", "TSLA"]
start = "2025-12-16T09:00:00Z"
end = "2025-12-16T10:00:00Z"
cadence = "15m"
workers = 2

[provider]
base_url = "https://quotes.example"
fields = {{ timestamp = "t", price = "c" }}

[provider.auth]
header = "X-Api-Key"
value = "from-file"
"#
        )
        .unwrap();

        let env = environment().source(Some(HashMap::from([
            ("QUOTEPIPE__RUN__WORKERS".to_string(), "8".to_string()),
            ("QUOTEPIPE__PROVIDER__AUTH__VALUE".to_string(), "from-env".to_string()),
        ])));
        let overrides = Overrides { cadence: Some("1m".into()), ..Overrides::default() };

        let settings = Settings::load_with(Some(file.path()), &overrides, env).unwrap();
        assert_eq!(settings.run.symbols, ["AAPL", "TSLA"]);
        assert_eq!(settings.run.workers, 8);
        assert_eq!(settings.run.cadence, "1m");
        assert_eq!(settings.provider.base_url, "https://quotes.example");
        assert_eq!(settings.provider.auth.as_ref().unwrap().value.expose(), "from-env");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn provider_field_names_keep_their_case() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[run]
symbols = ["AAPL"]
start = "2025-12-16T14:30:00Z"
end = "2025-12-16T14:35:00Z"

[provider]
records_field = "quotes"
timestamp_format = "unix_millis"
fields = {{ timestamp = "closeTime", price = "lastPrice", volume = "tradeVolume" }}
"#
        )
        .unwrap();
        let env = environment().source(Some(HashMap::from([(
            "QUOTEPIPE__PROVIDER__FIELDS__SYMBOL".to_string(),
            "instrumentId".to_string(),
        )])));

        let settings = Settings::load_with(Some(file.path()), &Overrides::default(), env).unwrap();
        assert_eq!(settings.provider.fields["price"], "lastPrice");
        assert_eq!(settings.provider.fields["symbol"], "instrumentId");

        let runtime = settings.validate().unwrap();
        let normaliser = Normaliser::new(runtime.schema, runtime.aliases);
        let payload = RawPayload::new(serde_json::json!({"quotes": [
            {"closeTime": 1765895400000_i64, "lastPrice": "178.5", "tradeVolume": 100, "instrumentId": "AAPL"},
        ]}));
        let chunk = normaliser.normalize(&payload, &runtime.plan.instruments[0]).unwrap();
        assert_eq!(chunk.quotes.len(), 1);
        assert_eq!(chunk.quotes[0].price.to_string(), "178.5");
        assert_eq!(chunk.quotes[0].volume, Some(100));
        assert_eq!(chunk.quotes[0].timestamp, Utc.with_ymd_and_hms(2025, 12, 16, 14, 30, 0).unwrap());
    }

    #[test]
    fn symbol_list_from_environment() {
        let env = environment().source(Some(HashMap::from([(
            "QUOTEPIPE__RUN__SYMBOLS".to_string(),
            "AAPL,NYSE:IBM".to_string(),
        )])));
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        // named file must exist
        assert!(Settings::load_with(Some(&missing), &Overrides::default(), quiet_env()).is_err());

        let settings = Settings::load_with(None, &Overrides::default(), env).unwrap();
        assert_eq!(settings.run.symbols, ["AAPL", "NYSE:IBM"]);
    }

    #[test]
    fn cli_overrides_win() {
        let overrides = Overrides {
            symbols: Some(vec!["MSFT".into()]),
            latest: Some(true),
            format: Some("json".into()),
            output: Some(PathBuf::from("out/quotes.json")),
            ..Overrides::default()
        };
        let settings = Settings::load_with(None, &overrides, quiet_env()).unwrap();
        assert_eq!(settings.run.symbols, ["MSFT"]);
        assert!(settings.run.latest);
        assert_eq!(settings.output.format, OutputFormat::Json);
        assert_eq!(settings.output.path, PathBuf::from("out/quotes.json"));
    }
}
