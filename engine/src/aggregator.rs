//! Folding of finest-resolution bars into coarser timeframes.
//!
//! A coarser bar opens on the step whose cursor is a nonzero multiple of the timeframe's
//! alignment factor and absorbs each following finest bar until the next boundary. Its
//! `timestamp` and `open` are fixed at opening; `high`, `low`, `close` and `volume` move
//! monotonically until it closes.

use kline_shared::models::{Bar, TimeFrame};

/// True iff `cursor` is a nonzero multiple of `factor`, i.e. the open bar of a timeframe with
/// that alignment factor has just absorbed its last finest bar.
pub fn should_open_new_bar(factor: usize, cursor: usize) -> bool {
    factor != 0 && cursor != 0 && cursor % factor == 0
}

/// True iff folding the finest bar at `cursor` completes a whole period counted from the
/// dataset origin. Used to materialize the first bar of a timeframe that started empty.
pub fn completes_period(factor: usize, cursor: usize) -> bool {
    factor != 0 && (cursor + 1) % factor == 0
}

/// Start of the UTC period of `timeframe` containing `timestamp` (epoch ms).
pub fn align_timestamp(timestamp: i64, timeframe: TimeFrame) -> i64 {
    timestamp - timestamp.rem_euclid(timeframe.duration_ms())
}

pub fn open_new_bar(incoming: &Bar, aligned_timestamp: i64) -> Bar {
    Bar {
        timestamp: aligned_timestamp,
        ..*incoming
    }
}

pub fn merge_bar(existing: &Bar, incoming: &Bar) -> Bar {
    Bar {
        timestamp: existing.timestamp,
        open: existing.open,
        high: existing.high.max(incoming.high),
        low: existing.low.min(incoming.low),
        close: incoming.close,
        volume: existing.volume + incoming.volume,
    }
}

/// Folds a run of bars into a single bar stamped `aligned_timestamp`. `None` for an empty run.
pub fn fold_bars(bars: &[Bar], aligned_timestamp: i64) -> Option<Bar> {
    let (first, rest) = bars.split_first()?;
    let opened = open_new_bar(first, aligned_timestamp);
    Some(rest.iter().fold(opened, |acc, bar| merge_bar(&acc, bar)))
}
