use kline_shared::models::Bar;
use kline_shared::utils::{percent_change, round_to};
use serde::Serialize;

/// Ticker values the dashboard header shows while replaying.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceSnapshot {
    pub timestamp: i64,
    /// Mid of the latest finest bar, two decimals.
    pub price: f64,
    pub is_up: bool,
    /// Change of the current coarsest bar (the daily bar by default), in percent.
    pub change_percent: f64,
}

impl PriceSnapshot {
    pub fn from_bars(finest: &Bar, coarsest: &Bar) -> Self {
        PriceSnapshot {
            timestamp: finest.timestamp,
            price: round_to(finest.mid_price(), 2),
            is_up: finest.is_up(),
            change_percent: round_to(percent_change(coarsest.open, coarsest.close), 2),
        }
    }
}
