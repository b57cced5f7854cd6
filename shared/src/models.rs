use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One OHLCV observation. `timestamp` is epoch milliseconds (UTC), aligned to the
/// start of the period the bar covers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Bar { timestamp, open, high, low, close, volume }
    }

    /// `low <= min(open, close) <= max(open, close) <= high` and a non-negative volume.
    pub fn is_well_formed(&self) -> bool {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        self.low <= body_low && body_high <= self.high && self.volume >= 0.0
    }

    pub fn mid_price(&self) -> f64 {
        (self.open + self.close) / 2.0
    }

    pub fn is_up(&self) -> bool {
        self.close >= self.open
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeFrame {
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "30m")]
    Minute30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
}

impl TimeFrame {
    pub const ALL: [TimeFrame; 7] = [
        TimeFrame::Minute1,
        TimeFrame::Minute5,
        TimeFrame::Minute15,
        TimeFrame::Minute30,
        TimeFrame::Hour1,
        TimeFrame::Hour4,
        TimeFrame::Day1,
    ];

    pub fn minutes(self) -> i64 {
        match self {
            TimeFrame::Minute1 => 1,
            TimeFrame::Minute5 => 5,
            TimeFrame::Minute15 => 15,
            TimeFrame::Minute30 => 30,
            TimeFrame::Hour1 => 60,
            TimeFrame::Hour4 => 240,
            TimeFrame::Day1 => 1440,
        }
    }

    pub fn duration_ms(self) -> i64 {
        self.minutes() * 60_000
    }

    /// Short label used in file names and logs, e.g. `"15m"`.
    pub fn label(self) -> &'static str {
        match self {
            TimeFrame::Minute1 => "1m",
            TimeFrame::Minute5 => "5m",
            TimeFrame::Minute15 => "15m",
            TimeFrame::Minute30 => "30m",
            TimeFrame::Hour1 => "1h",
            TimeFrame::Hour4 => "4h",
            TimeFrame::Day1 => "1d",
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown timeframe '{0}'")]
pub struct ParseTimeFrameError(pub String);

impl FromStr for TimeFrame {
    type Err = ParseTimeFrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        TimeFrame::ALL
            .into_iter()
            .find(|tf| tf.label() == trimmed)
            .ok_or_else(|| ParseTimeFrameError(s.to_string()))
    }
}

/// Which side of an anchor timestamp a bar request wants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// Strict comparison: the anchor bar itself is never included.
    pub fn admits(self, timestamp: i64, anchor: i64) -> bool {
        match self {
            Direction::Forward => timestamp > anchor,
            Direction::Backward => timestamp < anchor,
        }
    }
}
