//! Canonical-field → provider-field mapping table.
//!
//! Built once at startup from configuration. A table that would leave a
//! required canonical field unmapped, or read one provider field into two
//! canonical fields, is rejected before any request is made.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{FixedOffset, Offset, Utc};

use crate::engine::types::Instrument;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CanonicalField {
    Timestamp,
    Price,
    Volume,
    Symbol,
}

impl CanonicalField {
    pub const REQUIRED: [CanonicalField; 2] = [CanonicalField::Timestamp, CanonicalField::Price];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::Timestamp => "timestamp",
            CanonicalField::Price => "price",
            CanonicalField::Volume => "volume",
            CanonicalField::Symbol => "symbol",
        }
    }
}

impl FromStr for CanonicalField {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "timestamp" => Ok(CanonicalField::Timestamp),
            "price" => Ok(CanonicalField::Price),
            "volume" => Ok(CanonicalField::Volume),
            "symbol" => Ok(CanonicalField::Symbol),
            other => Err(ConfigError::InvalidSchema(format!("unknown canonical field '{other}'"))),
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the provider encodes timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    UnixSeconds,
    UnixMillis,
    Rfc3339,
    /// Wall-clock time without offset, interpreted in `source_offset`.
    Naive,
    /// Numbers by magnitude (seconds vs millis), strings as RFC 3339 then naive.
    Auto,
}

impl FromStr for TimestampFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unix_seconds" | "unix" => Ok(TimestampFormat::UnixSeconds),
            "unix_millis" => Ok(TimestampFormat::UnixMillis),
            "rfc3339" | "iso8601" => Ok(TimestampFormat::Rfc3339),
            "naive" => Ok(TimestampFormat::Naive),
            "auto" => Ok(TimestampFormat::Auto),
            other => Err(ConfigError::InvalidSchema(format!("unknown timestamp format '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMapping {
    // canonical -> provider field name
    fields: BTreeMap<CanonicalField, String>,
    pub records_field: String,
    pub timestamp_format: TimestampFormat,
    pub source_offset: FixedOffset,
}

impl SchemaMapping {
    /// Validate a `canonical_field -> provider_field` table.
    ///
    /// Canonical names are the keys so provider spellings (`lastPrice`,
    /// `closeTime`) survive config loading, which folds key case.
    pub fn from_fields(
        table: &HashMap<String, String>,
        records_field: &str,
        timestamp_format: TimestampFormat,
        source_offset: FixedOffset,
    ) -> Result<Self, ConfigError> {
        // Sorted so errors name the same pair on every run
        let sorted: BTreeMap<&String, &String> = table.iter().collect();
        let mut fields = BTreeMap::new();
        let mut sources: HashMap<&str, CanonicalField> = HashMap::new();
        for (canonical, provider) in sorted {
            let canonical: CanonicalField = canonical.parse()?;
            let provider = provider.trim();
            if provider.is_empty() {
                return Err(ConfigError::InvalidSchema(format!("empty provider field for '{canonical}'")));
            }
            if let Some(existing) = sources.insert(provider, canonical) {
                return Err(ConfigError::InvalidSchema(format!(
                    "provider field '{provider}' mapped to both '{existing}' and '{canonical}'"
                )));
            }
            if fields.insert(canonical, provider.to_string()).is_some() {
                return Err(ConfigError::InvalidSchema(format!("canonical field '{canonical}' mapped twice")));
            }
        }
        for required in CanonicalField::REQUIRED {
            if !fields.contains_key(&required) {
                return Err(ConfigError::InvalidSchema(format!("required field '{required}' is not mapped")));
            }
        }
        if records_field.trim().is_empty() {
            return Err(ConfigError::InvalidSchema("records field must not be empty".into()));
        }
        Ok(Self {
            fields,
            records_field: records_field.to_string(),
            timestamp_format,
            source_offset,
        })
    }

    /// Identity mapping (`timestamp`, `price`, `volume`, `symbol`), UTC, auto timestamps.
    pub fn identity() -> Self {
        let fields = [
            CanonicalField::Timestamp,
            CanonicalField::Price,
            CanonicalField::Volume,
            CanonicalField::Symbol,
        ]
        .into_iter()
        .map(|f| (f, f.as_str().to_string()))
        .collect();
        Self {
            fields,
            records_field: "data".into(),
            timestamp_format: TimestampFormat::Auto,
            source_offset: Utc.fix(),
        }
    }

    pub fn provider_field(&self, field: CanonicalField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }
}

/// Provider symbol spellings that map onto a canonical instrument (e.g. `BRK-B` → `NYSE:BRK.B`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    aliases: HashMap<String, Instrument>,
    default_exchange: String,
}

impl AliasTable {
    pub fn new(raw: &HashMap<String, String>, default_exchange: &str) -> Result<Self, ConfigError> {
        let mut aliases = HashMap::with_capacity(raw.len());
        for (alias, target) in raw {
            let alias = alias.trim().to_uppercase();
            if alias.is_empty() {
                return Err(ConfigError::Invalid("empty symbol alias".into()));
            }
            aliases.insert(alias, Instrument::parse(target, default_exchange)?);
        }
        Ok(Self {
            aliases,
            default_exchange: default_exchange.to_string(),
        })
    }

    /// Canonical instrument for a provider symbol; unknown symbols are parsed as-is.
    pub fn resolve(&self, provider_symbol: &str) -> Option<Instrument> {
        let key = provider_symbol.trim().to_uppercase();
        match self.aliases.get(&key) {
            Some(instrument) => Some(instrument.clone()),
            None => Instrument::parse(&key, &self.default_exchange).ok(),
        }
    }
}
