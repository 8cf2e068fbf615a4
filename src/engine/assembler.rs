use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, trace, warn};

use crate::engine::types::{ExpectedGrid, Instrument, NormalizedChunk, Quote, Series, SkipCounts};

/// Merge normalized chunks into one ordered, deduplicated series.
///
/// Chunks are applied in the order given; a later quote at the same timestamp
/// replaces an earlier one, so callers pass history pages first and the latest
/// fetch last. When `grid` is given, every expected slot without a quote is
/// reported in `Series::gaps`. Nothing is interpolated.
#[instrument(skip_all, fields(instrument = %instrument, chunks = chunks.len()))]
pub fn assemble(instrument: Instrument, chunks: Vec<NormalizedChunk>, grid: Option<&ExpectedGrid>) -> Series {
    let mut by_ts: BTreeMap<DateTime<Utc>, Quote> = BTreeMap::new();
    let mut skipped = SkipCounts::default();
    let mut seen = 0usize;

    for chunk in chunks {
        skipped.absorb(chunk.skipped);
        for quote in chunk.quotes {
            if quote.instrument != instrument {
                // The normaliser tags every quote; a foreign one here is a caller bug.
                warn!(expected = %instrument, got = %quote.instrument, "Dropping quote for another instrument");
                skipped.symbol_mismatch += 1;
                continue;
            }
            seen += 1;
            if let Some(previous) = by_ts.insert(quote.timestamp, quote) {
                trace!(ts = %previous.timestamp, "Replaced duplicate timestamp (last seen wins)");
            }
        }
    }

    let gaps = match grid {
        Some(grid) => find_gaps(&by_ts, grid),
        None => Vec::new(),
    };

    let quotes: Vec<Quote> = by_ts.into_values().collect();
    debug!(
        received = seen,
        kept = quotes.len(),
        duplicates = seen - quotes.len(),
        gaps = gaps.len(),
        skipped = skipped.total(),
        "Assembled series"
    );

    Series { instrument, quotes, gaps, skipped }
}

fn find_gaps(by_ts: &BTreeMap<DateTime<Utc>, Quote>, grid: &ExpectedGrid) -> Vec<DateTime<Utc>> {
    grid.slots().filter(|slot| !by_ts.contains_key(slot)).collect()
}
