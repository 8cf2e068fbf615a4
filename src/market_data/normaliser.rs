// Convert provider payloads into canonical quotes.
// Field names come from the schema table; nothing here knows a provider by name.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::engine::types::{Instrument, NormalizedChunk, Quote, SkipCounts};
use crate::error::FetchError;
use crate::market_data::adapters::RawPayload;
use crate::market_data::schema::{AliasTable, CanonicalField, SchemaMapping, TimestampFormat};

// Unix values above this are taken as milliseconds in auto mode (year ~5138 in seconds)
const AUTO_MILLIS_THRESHOLD: i64 = 100_000_000_000;

const NAIVE_FORMATS: [&str; 4] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    Unparseable,
    NonPositivePrice,
    SymbolMismatch,
}

pub struct Normaliser {
    schema: SchemaMapping,
    aliases: AliasTable,
}

impl Normaliser {
    pub fn new(schema: SchemaMapping, aliases: AliasTable) -> Self {
        Self { schema, aliases }
    }

    /// Extract every record in `payload` as a quote for `instrument`.
    ///
    /// Bad records are skipped and counted. The call only fails when the
    /// payload has no recognisable record list, or when it has records and
    /// every one of them is unparseable. Records that parse but are rejected
    /// (non-positive price, foreign symbol) leave an empty chunk instead.
    #[instrument(skip_all, fields(instrument = %instrument))]
    pub fn normalize(&self, payload: &RawPayload, instrument: &Instrument) -> Result<NormalizedChunk, FetchError> {
        let records = self
            .records(&payload.body)
            .map_err(|reason| FetchError::malformed(instrument, reason))?;

        let mut chunk = NormalizedChunk::default();
        for record in &records {
            match self.parse_record(record, instrument) {
                Ok(quote) => chunk.quotes.push(quote),
                Err(skip) => {
                    debug!(?skip, %record, "Skipping record");
                    match skip {
                        Skip::Unparseable => chunk.skipped.unparseable += 1,
                        Skip::NonPositivePrice => chunk.skipped.non_positive_price += 1,
                        Skip::SymbolMismatch => chunk.skipped.symbol_mismatch += 1,
                    }
                }
            }
        }

        let skipped = chunk.skipped.total();
        if skipped > 0 {
            metrics::counter!("quotepipe_records_skipped_total", "instrument" => instrument.to_string())
                .increment(skipped as u64);
        }
        if !records.is_empty() && chunk.skipped.unparseable == records.len() {
            warn!(records = records.len(), "No parseable record in payload");
            return Err(FetchError::malformed(
                instrument,
                format!("all {} records unparseable", records.len()),
            ));
        }
        if chunk.quotes.is_empty() && skipped > 0 {
            warn!(records = records.len(), skipped = %describe(&chunk.skipped), "Every record rejected");
        }

        debug!(records = records.len(), quotes = chunk.quotes.len(), skipped, "Normalized payload");
        Ok(chunk)
    }

    // Records live under `records_field` (array or single object); a bare array
    // body or a flat object carrying the timestamp field are accepted too.
    fn records<'a>(&self, body: &'a Value) -> Result<Vec<&'a Value>, String> {
        match body {
            Value::Array(items) => Ok(items.iter().collect()),
            Value::Object(map) => match map.get(&self.schema.records_field) {
                Some(Value::Array(items)) => Ok(items.iter().collect()),
                Some(record @ Value::Object(_)) => Ok(vec![record]),
                Some(Value::Null) => Ok(Vec::new()),
                Some(other) => Err(format!(
                    "'{}' is neither an array nor an object: {other}",
                    self.schema.records_field
                )),
                None => {
                    let ts_field = self.field(CanonicalField::Timestamp).unwrap_or_default();
                    if map.contains_key(ts_field) {
                        Ok(vec![body])
                    } else {
                        Err(format!("missing records field '{}'", self.schema.records_field))
                    }
                }
            },
            other => Err(format!("unexpected payload type: {}", type_name(other))),
        }
    }

    fn field(&self, field: CanonicalField) -> Option<&str> {
        self.schema.provider_field(field)
    }

    fn lookup<'a>(&self, record: &'a Value, field: CanonicalField) -> Option<&'a Value> {
        let name = self.field(field)?;
        match record.get(name) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v),
        }
    }

    fn parse_record(&self, record: &Value, instrument: &Instrument) -> Result<Quote, Skip> {
        if !record.is_object() {
            return Err(Skip::Unparseable);
        }

        // No symbol in the record means it belongs to whatever was requested
        if let Some(raw) = self.lookup(record, CanonicalField::Symbol) {
            let resolved = raw.as_str().and_then(|s| self.aliases.resolve(s)).ok_or(Skip::Unparseable)?;
            if &resolved != instrument {
                return Err(Skip::SymbolMismatch);
            }
        }

        let timestamp = self
            .lookup(record, CanonicalField::Timestamp)
            .and_then(|v| self.parse_timestamp(v))
            .ok_or(Skip::Unparseable)?;

        let price = self
            .lookup(record, CanonicalField::Price)
            .and_then(parse_decimal)
            .ok_or(Skip::Unparseable)?;
        if price <= Decimal::ZERO {
            return Err(Skip::NonPositivePrice);
        }

        let volume = match self.lookup(record, CanonicalField::Volume) {
            None => None,
            Some(v) => Some(parse_volume(v).ok_or(Skip::Unparseable)?),
        };

        Ok(Quote {
            instrument: instrument.clone(),
            timestamp,
            price: price.normalize(),
            volume,
        })
    }

    fn parse_timestamp(&self, value: &Value) -> Option<DateTime<Utc>> {
        let ts = match (self.schema.timestamp_format, value) {
            (TimestampFormat::UnixSeconds, v) => from_unix_seconds(integer(v)?),
            (TimestampFormat::UnixMillis, v) => from_unix_millis(integer(v)?),
            (TimestampFormat::Rfc3339, Value::String(s)) => from_rfc3339(s),
            (TimestampFormat::Naive, Value::String(s)) => self.parse_naive(s),
            (TimestampFormat::Auto, Value::Number(_)) => {
                let n = integer(value)?;
                if n.abs() >= AUTO_MILLIS_THRESHOLD {
                    from_unix_millis(n)
                } else {
                    from_unix_seconds(n)
                }
            }
            (TimestampFormat::Auto, Value::String(s)) => from_rfc3339(s).or_else(|| self.parse_naive(s)),
            _ => None,
        }?;
        // Second precision
        DateTime::from_timestamp(ts.timestamp(), 0)
    }

    fn parse_naive(&self, s: &str) -> Option<DateTime<Utc>> {
        let s = s.trim();
        NAIVE_FORMATS.iter().find_map(|fmt| {
            let naive = NaiveDateTime::parse_from_str(s, fmt).ok()?;
            self.schema
                .source_offset
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc))
        })
    }
}

fn from_unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

fn from_unix_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

fn from_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim()).ok().map(|dt| dt.with_timezone(&Utc))
}

// Integer from a JSON number or numeric string. Fractions are truncated.
fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

// Prices keep the provider's decimal text instead of round-tripping through f64.
fn parse_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)).ok()
}

fn parse_volume(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn describe(skipped: &SkipCounts) -> String {
    format!(
        "unparseable={}, non_positive_price={}, symbol_mismatch={}",
        skipped.unparseable, skipped.non_positive_price, skipped.symbol_mismatch
    )
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
