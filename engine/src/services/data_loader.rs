// Answers the chart's pull requests for bars from the full dataset or the replay window.
use crate::data::history::{normalize_symbol, HistorySource};
use crate::data::market_data::CandlestickDataset;
use crate::error::{EngineError, Result};
use crate::models::TimeFrameLadder;
use crate::services::replay::ReplayEngine;
use kline_shared::models::{Bar, Direction, TimeFrame};
use serde::Deserialize;
use std::sync::Arc;

/// One pull from the chart: bars of `timeframe` on the `direction` side of `anchor_timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoadRequest {
    pub symbol: String,
    pub timeframe: TimeFrame,
    pub direction: Direction,
    pub anchor_timestamp: Option<i64>,
}

impl LoadRequest {
    pub fn new(symbol: impl Into<String>, timeframe: TimeFrame) -> Self {
        LoadRequest {
            symbol: symbol.into(),
            timeframe,
            direction: Direction::Backward,
            anchor_timestamp: None,
        }
    }

    pub fn anchored(mut self, anchor_timestamp: i64, direction: Direction) -> Self {
        self.anchor_timestamp = Some(anchor_timestamp);
        self.direction = direction;
        self
    }
}

pub struct DataLoaderAdapter {
    source: Arc<dyn HistorySource>,
    ladder: TimeFrameLadder,
    symbol: Option<String>,
    timeframe: TimeFrame,
    full: Option<Arc<CandlestickDataset>>,
    replay: ReplayEngine,
}

impl DataLoaderAdapter {
    pub fn new(source: Arc<dyn HistorySource>, ladder: TimeFrameLadder) -> Self {
        let timeframe = ladder.coarsest();
        DataLoaderAdapter {
            source,
            ladder,
            symbol: None,
            timeframe,
            full: None,
            replay: ReplayEngine::new(timeframe),
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    pub fn full_dataset(&self) -> Option<&Arc<CandlestickDataset>> {
        self.full.as_ref()
    }

    pub fn replay(&self) -> &ReplayEngine {
        &self.replay
    }

    pub fn replay_mut(&mut self) -> &mut ReplayEngine {
        &mut self.replay
    }

    /// Returns the bars for `request`, fetching history first when the symbol changed.
    pub async fn load(&mut self, request: &LoadRequest) -> Result<Vec<Bar>> {
        if !self.ladder.contains(request.timeframe) {
            return Err(EngineError::UntrackedTimeFrame(request.timeframe));
        }
        let symbol = normalize_symbol(&request.symbol)?;
        let cached = match (&self.full, &self.symbol) {
            (Some(full), Some(cached)) if *cached == symbol => Some(Arc::clone(full)),
            _ => None,
        };
        let full = match cached {
            Some(full) => full,
            None => self.switch_symbol(symbol).await?,
        };
        self.timeframe = request.timeframe;

        if self.replay.is_active()? {
            self.replay.set_active_timeframe(request.timeframe)?;
            let window = self.replay.bars(request.timeframe)?;
            return Ok(filter_relative(window, request.anchor_timestamp, request.direction));
        }

        let bars = full.bars_relative_to(request.timeframe, request.anchor_timestamp, request.direction);
        tracing::debug!(timeframe = %request.timeframe, count = bars.len(), "Served bars from full dataset");
        Ok(bars)
    }

    async fn switch_symbol(&mut self, symbol: String) -> Result<Arc<CandlestickDataset>> {
        if let Some(previous) = &self.symbol {
            tracing::info!(from = %previous, to = %symbol, "Symbol changed; discarding cached history");
        }
        self.replay.exit();
        self.symbol = None;
        self.full = None;

        let frames = self.source.fetch_history(&symbol).await.map_err(|e| {
            tracing::error!(symbol = %symbol, error = %e, "History fetch failed");
            e
        })?;
        let full = Arc::new(CandlestickDataset::from_history(self.ladder.clone(), frames)?);
        tracing::info!(
            symbol = %symbol,
            finest_bars = full.finest().len(),
            coarsest_bars = full.len(self.ladder.coarsest()),
            from = ?full.finest().first().and_then(Bar::datetime),
            to = ?full.finest().last().and_then(Bar::datetime),
            "History loaded"
        );

        self.symbol = Some(symbol);
        self.full = Some(Arc::clone(&full));
        Ok(full)
    }

    /// Starts a replay on the loaded symbol at the last requested timeframe.
    pub fn start_replay(&mut self, origin_days: usize) -> Result<()> {
        let full = match (&self.full, &self.symbol) {
            (Some(full), Some(_)) => Arc::clone(full),
            _ => return Err(EngineError::InvalidSymbol("no symbol loaded".to_string())),
        };
        self.replay.start(full, origin_days, self.timeframe)
    }
}

fn filter_relative(bars: Vec<Bar>, anchor: Option<i64>, direction: Direction) -> Vec<Bar> {
    match anchor {
        None => bars,
        Some(anchor) => bars.into_iter().filter(|b| direction.admits(b.timestamp, anchor)).collect(),
    }
}
