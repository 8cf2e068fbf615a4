//! Pure conversions between assembled series and output rows.
//!
//! Nothing here touches the filesystem.

use std::collections::BTreeMap;

use crate::engine::types::{Instrument, Quote, Series};
use crate::persist::types::OutputRecord;

pub fn from_quote(quote: &Quote) -> OutputRecord {
    OutputRecord {
        timestamp: quote.timestamp,
        symbol: quote.instrument.to_string(),
        price: quote.price,
        volume: quote.volume,
    }
}

/// Instruments in sorted order, each series in time order.
pub fn from_series(series_by_instrument: &BTreeMap<Instrument, Series>) -> Vec<OutputRecord> {
    let rows = series_by_instrument.values().map(Series::len).sum();
    let mut records = Vec::with_capacity(rows);
    for series in series_by_instrument.values() {
        records.extend(series.quotes.iter().map(from_quote));
    }
    records
}
