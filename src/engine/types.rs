use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Utc, Weekday};
use rust_decimal::Decimal;

use crate::error::ConfigError;

// Exchange-qualified symbol, e.g. NASDAQ:TSLA. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instrument {
    exchange: String,
    ticker: String,
}

impl Instrument {
    /// Parse `EXCH:TICKER`, or a bare `TICKER` qualified with `default_exchange`.
    pub fn parse(raw: &str, default_exchange: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        let (exchange, ticker) = match raw.split_once(':') {
            Some((exchange, ticker)) => (exchange.trim(), ticker.trim()),
            None => (default_exchange.trim(), raw),
        };
        if exchange.is_empty() || ticker.is_empty() || ticker.contains(':') {
            return Err(ConfigError::InvalidInstrument(raw.to_string()));
        }
        Ok(Self {
            exchange: exchange.to_uppercase(),
            ticker: ticker.to_uppercase(),
        })
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.ticker)
    }
}

// Expected spacing between consecutive quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cadence {
    seconds: i64,
}

impl Cadence {
    pub fn from_secs(seconds: i64) -> Result<Self, ConfigError> {
        if seconds <= 0 {
            return Err(ConfigError::InvalidCadence(format!("{seconds}s")));
        }
        Ok(Self { seconds })
    }

    pub fn as_secs(&self) -> i64 {
        self.seconds
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds)
    }
}

impl FromStr for Cadence {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ConfigError::InvalidCadence(s.to_string());
        let split = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        let (count, unit) = s.split_at(split);
        let count: i64 = count.parse().map_err(|_| invalid())?;
        let unit_secs = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            _ => return Err(invalid()),
        };
        count
            .checked_mul(unit_secs)
            .ok_or_else(invalid)
            .and_then(|secs| Self::from_secs(secs).map_err(|_| invalid()))
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.seconds;
        if s % 86_400 == 0 {
            write!(f, "{}d", s / 86_400)
        } else if s % 3_600 == 0 {
            write!(f, "{}h", s / 3_600)
        } else if s % 60 == 0 {
            write!(f, "{}m", s / 60)
        } else {
            write!(f, "{s}s")
        }
    }
}

/// One canonical quote. Timestamps are UTC at second precision; price is always > 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub instrument: Instrument,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub volume: Option<u64>,
}

// Requested range for one history fetch, half-open [start, end).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWindow {
    pub instrument: Instrument,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cadence: Cadence,
}

/// Trading session in a fixed UTC offset. Slots outside it are never expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub offset: FixedOffset,
    pub weekdays_only: bool,
}

impl SessionHours {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        let local = ts.with_timezone(&self.offset);
        if self.weekdays_only && matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let t = local.time();
        t >= self.open && t < self.close
    }
}

/// The set of timestamps a complete series would contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedGrid {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cadence: Cadence,
    pub session: Option<SessionHours>,
}

impl ExpectedGrid {
    pub fn for_window(window: &FetchWindow, session: Option<SessionHours>) -> Self {
        Self {
            start: window.start,
            end: window.end,
            cadence: window.cadence,
            session,
        }
    }

    /// Slots start at `start` and step by the cadence; `end` is exclusive.
    pub fn slots(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        let step = self.cadence.duration();
        std::iter::successors(Some(self.start), move |ts| Some(*ts + step))
            .take_while(move |ts| *ts < self.end)
            .filter(move |ts| self.session.map_or(true, |s| s.contains(*ts)))
    }
}

// Why a raw record did not become a Quote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipCounts {
    pub unparseable: usize,
    pub non_positive_price: usize,
    pub symbol_mismatch: usize,
}

impl SkipCounts {
    pub fn total(&self) -> usize {
        self.unparseable + self.non_positive_price + self.symbol_mismatch
    }

    pub fn absorb(&mut self, other: SkipCounts) {
        self.unparseable += other.unparseable;
        self.non_positive_price += other.non_positive_price;
        self.symbol_mismatch += other.symbol_mismatch;
    }
}

/// Output of normalizing one raw payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedChunk {
    pub quotes: Vec<Quote>,
    pub skipped: SkipCounts,
}

/// Time-ordered, deduplicated quotes for one instrument plus the missing slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    pub instrument: Instrument,
    pub quotes: Vec<Quote>,
    pub gaps: Vec<DateTime<Utc>>,
    pub skipped: SkipCounts,
}

impl Series {
    pub fn empty(instrument: Instrument) -> Self {
        Self {
            instrument,
            quotes: Vec::new(),
            gaps: Vec::new(),
            skipped: SkipCounts::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    pub fn gap_count(&self) -> usize {
        self.gaps.len()
    }
}
