use crate::error::{EngineError, Result};
use kline_shared::models::TimeFrame;
use serde::{Deserialize, Serialize};

/// The ordered set of timeframes a dataset tracks, finest first.
///
/// Every coarser timeframe spans a whole number of finest bars, its alignment factor
/// `N(T) = minutes(T) / minutes(finest)`. The default ladder `5m, 15m, 1h, 4h, 1d` yields
/// the factors `1, 3, 12, 48, 288`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TimeFrame>", into = "Vec<TimeFrame>")]
pub struct TimeFrameLadder {
    frames: Vec<TimeFrame>,
}

impl TimeFrameLadder {
    pub fn new(frames: impl IntoIterator<Item = TimeFrame>) -> Result<Self> {
        let mut frames: Vec<TimeFrame> = frames.into_iter().collect();
        if frames.is_empty() {
            return Err(EngineError::InvalidLadder("no timeframes given".to_string()));
        }
        frames.sort();
        if frames.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(EngineError::InvalidLadder("duplicate timeframe".to_string()));
        }

        let finest = frames[0];
        if let Some(bad) = frames.iter().find(|tf| tf.minutes() % finest.minutes() != 0) {
            return Err(EngineError::InvalidLadder(format!(
                "{} is not a whole multiple of the finest timeframe {}",
                bad, finest
            )));
        }
        Ok(TimeFrameLadder { frames })
    }

    /// Builds a ladder from labels such as `"5m"` or `"1d"`.
    pub fn from_labels<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let frames = labels
            .into_iter()
            .map(|label| label.as_ref().parse::<TimeFrame>())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Self::new(frames)
    }

    pub fn finest(&self) -> TimeFrame {
        self.frames[0]
    }

    pub fn coarsest(&self) -> TimeFrame {
        self.frames[self.frames.len() - 1]
    }

    /// All tracked timeframes in ascending duration.
    pub fn frames(&self) -> &[TimeFrame] {
        &self.frames
    }

    /// Tracked timeframes other than the finest, ascending.
    pub fn coarser(&self) -> &[TimeFrame] {
        &self.frames[1..]
    }

    pub fn contains(&self, timeframe: TimeFrame) -> bool {
        self.frames.contains(&timeframe)
    }

    pub fn alignment_factor(&self, timeframe: TimeFrame) -> Result<usize> {
        if !self.contains(timeframe) {
            return Err(EngineError::UntrackedTimeFrame(timeframe));
        }
        Ok((timeframe.minutes() / self.finest().minutes()) as usize)
    }

    /// Number of whole `timeframe` bars covered by `finest_count` finest bars.
    pub fn whole_bars(&self, timeframe: TimeFrame, finest_count: usize) -> Result<usize> {
        Ok(finest_count / self.alignment_factor(timeframe)?)
    }
}

impl Default for TimeFrameLadder {
    fn default() -> Self {
        TimeFrameLadder {
            frames: vec![
                TimeFrame::Minute5,
                TimeFrame::Minute15,
                TimeFrame::Hour1,
                TimeFrame::Hour4,
                TimeFrame::Day1,
            ],
        }
    }
}

impl TryFrom<Vec<TimeFrame>> for TimeFrameLadder {
    type Error = EngineError;

    fn try_from(frames: Vec<TimeFrame>) -> Result<Self> {
        TimeFrameLadder::new(frames)
    }
}

impl From<TimeFrameLadder> for Vec<TimeFrame> {
    fn from(ladder: TimeFrameLadder) -> Self {
        ladder.frames
    }
}
