// In-memory candlestick store: one ordered bar sequence per tracked timeframe.
use crate::data::history::HistoryFrames;
use crate::error::{EngineError, Result};
use crate::models::TimeFrameLadder;
use kline_shared::models::{Bar, Direction, TimeFrame};
use std::collections::HashMap;

/// A single pending mutation of one timeframe sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BarUpdate {
    Append(TimeFrame, Bar),
    ReplaceLast(TimeFrame, Bar),
}

impl BarUpdate {
    pub fn timeframe(&self) -> TimeFrame {
        match self {
            BarUpdate::Append(tf, _) | BarUpdate::ReplaceLast(tf, _) => *tf,
        }
    }
}

/// Maps each timeframe of a ladder to its bars, ascending by timestamp with no duplicates.
#[derive(Debug, Clone, PartialEq)]
pub struct CandlestickDataset {
    ladder: TimeFrameLadder,
    series: HashMap<TimeFrame, Vec<Bar>>,
}

impl CandlestickDataset {
    pub fn new(ladder: TimeFrameLadder) -> Self {
        let series = ladder.frames().iter().map(|tf| (*tf, Vec::new())).collect();
        CandlestickDataset { ladder, series }
    }

    /// Builds the full dataset from fetched history. Bars are sorted and deduplicated per
    /// timeframe; timeframes outside the ladder are ignored, missing ones stay empty.
    pub fn from_history(ladder: TimeFrameLadder, mut frames: HistoryFrames) -> Result<Self> {
        let mut dataset = CandlestickDataset::new(ladder);

        for (timeframe, sequence) in dataset.series.iter_mut() {
            let mut bars = frames.remove(timeframe).unwrap_or_default();
            bars.sort_by_key(|b| b.timestamp);
            bars.dedup_by_key(|b| b.timestamp);

            if let Some(bad) = bars.iter().find(|b| !b.is_well_formed()) {
                return Err(EngineError::MalformedBar {
                    timeframe: *timeframe,
                    timestamp: bad.timestamp,
                });
            }
            *sequence = bars;
        }

        for ignored in frames.keys() {
            tracing::debug!(timeframe = %ignored, "Ignoring history for a timeframe outside the ladder");
        }
        Ok(dataset)
    }

    pub fn ladder(&self) -> &TimeFrameLadder {
        &self.ladder
    }

    /// Read-only view of a timeframe's bars. Untracked timeframes read as empty.
    pub fn get(&self, timeframe: TimeFrame) -> &[Bar] {
        self.series.get(&timeframe).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn finest(&self) -> &[Bar] {
        self.get(self.ladder.finest())
    }

    pub fn len(&self, timeframe: TimeFrame) -> usize {
        self.get(timeframe).len()
    }

    pub fn last(&self, timeframe: TimeFrame) -> Option<&Bar> {
        self.get(timeframe).last()
    }

    pub fn append(&mut self, timeframe: TimeFrame, bar: Bar) -> Result<()> {
        self.apply(BarUpdate::Append(timeframe, bar))
    }

    pub fn replace_last(&mut self, timeframe: TimeFrame, bar: Bar) -> Result<()> {
        self.apply(BarUpdate::ReplaceLast(timeframe, bar))
    }

    /// First `count` bars of `timeframe`, or fewer when the sequence is shorter.
    pub fn slice_prefix(&self, timeframe: TimeFrame, count: usize) -> Vec<Bar> {
        let bars = self.get(timeframe);
        bars[..count.min(bars.len())].to_vec()
    }

    /// Dataset whose every timeframe holds the whole bars covered by the first
    /// `finest_count` finest bars, so all sequences end at the same instant.
    pub fn prefix(&self, finest_count: usize) -> Result<Self> {
        let mut window = CandlestickDataset::new(self.ladder.clone());
        for timeframe in self.ladder.frames() {
            let count = self.ladder.whole_bars(*timeframe, finest_count)?;
            window.series.insert(*timeframe, self.slice_prefix(*timeframe, count));
        }
        Ok(window)
    }

    /// Validates an update without mutating anything.
    pub fn check(&self, update: &BarUpdate) -> Result<()> {
        let timeframe = update.timeframe();
        let bars = self
            .series
            .get(&timeframe)
            .ok_or(EngineError::UntrackedTimeFrame(timeframe))?;

        match update {
            BarUpdate::Append(_, bar) => match bars.last() {
                Some(last) if bar.timestamp <= last.timestamp => Err(EngineError::OutOfOrder {
                    timeframe,
                    last: last.timestamp,
                    incoming: bar.timestamp,
                }),
                _ => Ok(()),
            },
            BarUpdate::ReplaceLast(..) if bars.is_empty() => Err(EngineError::EmptySequence { timeframe }),
            BarUpdate::ReplaceLast(..) => Ok(()),
        }
    }

    pub fn apply(&mut self, update: BarUpdate) -> Result<()> {
        self.check(&update)?;
        let timeframe = update.timeframe();
        let bars = self
            .series
            .get_mut(&timeframe)
            .ok_or(EngineError::UntrackedTimeFrame(timeframe))?;

        match update {
            BarUpdate::Append(_, bar) => bars.push(bar),
            BarUpdate::ReplaceLast(_, bar) => {
                let last = bars.last_mut().ok_or(EngineError::EmptySequence { timeframe })?;
                *last = bar;
            }
        }
        Ok(())
    }

    /// Bars strictly after (`Forward`) or strictly before (`Backward`) `anchor`.
    /// Without an anchor the whole sequence is returned.
    pub fn bars_relative_to(&self, timeframe: TimeFrame, anchor: Option<i64>, direction: Direction) -> Vec<Bar> {
        let bars = self.get(timeframe);
        match anchor {
            None => bars.to_vec(),
            Some(anchor) => bars
                .iter()
                .filter(|b| direction.admits(b.timestamp, anchor))
                .copied()
                .collect(),
        }
    }
}
