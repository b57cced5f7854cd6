// Replay session: the window dataset plus the cursor that walks the full dataset.
use super::state::{ReplayMode, ReplayState, StepOutcome, REPLAY_SPEEDS};
use crate::aggregator::{align_timestamp, completes_period, fold_bars, merge_bar, open_new_bar, should_open_new_bar};
use crate::data::market_data::{BarUpdate, CandlestickDataset};
use crate::error::{EngineError, Result};
use crate::models::PriceSnapshot;
use kline_shared::models::{Bar, TimeFrame};
use std::sync::Arc;

/// Exclusively owned replay state. Callers sharing it across tasks wrap it in a mutex;
/// every method here assumes it has the session to itself.
#[derive(Debug)]
pub struct ReplaySession {
    full: Option<Arc<CandlestickDataset>>,
    window: Option<CandlestickDataset>,
    state: ReplayState,
}

impl ReplaySession {
    pub fn new(active_timeframe: TimeFrame) -> Self {
        ReplaySession {
            full: None,
            window: None,
            state: ReplayState::idle(active_timeframe),
        }
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    pub fn mode(&self) -> ReplayMode {
        self.state.mode
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn window(&self) -> Option<&CandlestickDataset> {
        self.window.as_ref()
    }

    /// Seeds the window with the first `origin_days` days of finest history, plus the
    /// coarser bars those days cover.
    pub fn start(&mut self, full: Arc<CandlestickDataset>, origin_days: usize, active_timeframe: TimeFrame) -> Result<()> {
        if self.is_active() {
            return Err(EngineError::ReplayAlreadyActive);
        }
        if origin_days == 0 {
            return Err(EngineError::InvalidOrigin("origin must be at least one day".to_string()));
        }
        let ladder = full.ladder();
        if !ladder.contains(active_timeframe) {
            return Err(EngineError::UntrackedTimeFrame(active_timeframe));
        }

        let bars_per_day = (TimeFrame::Day1.minutes() / ladder.finest().minutes()) as usize;
        let origin = origin_days * bars_per_day;
        let available = full.finest().len();
        if available < origin {
            return Err(EngineError::InsufficientHistory { required: origin, available });
        }

        let window = full.prefix(origin)?;
        self.window = Some(window);
        self.full = Some(full);
        self.state = ReplayState {
            cursor: origin,
            origin,
            mode: ReplayMode::Seeded,
            speed: self.state.speed,
            active_timeframe,
            exhausted: false,
        };
        tracing::info!(origin_days, origin, available, timeframe = %active_timeframe, "Replay started");
        Ok(())
    }

    /// Folds the next finest bar of the full dataset into every timeframe of the window.
    /// All updates are validated before any is applied, so a failed step changes nothing.
    pub fn step(&mut self) -> Result<StepOutcome> {
        let (Some(full), Some(window)) = (self.full.as_ref(), self.window.as_mut()) else {
            return Ok(StepOutcome::Inactive);
        };

        let cursor = self.state.cursor;
        let Some(next) = full.finest().get(cursor).copied() else {
            if !self.state.exhausted {
                tracing::warn!(cursor, "Replay reached the end of history");
            }
            self.state.exhausted = true;
            return Ok(StepOutcome::Exhausted);
        };

        let updates = plan_step(window, &next, cursor)?;
        for update in &updates {
            window.check(update)?;
        }
        for update in updates {
            window.apply(update)?;
        }

        self.state.cursor = cursor + 1;
        tracing::trace!(cursor = self.state.cursor, timestamp = next.timestamp, "Replay advanced");
        Ok(StepOutcome::Advanced { cursor: self.state.cursor })
    }

    pub fn set_active_timeframe(&mut self, timeframe: TimeFrame) -> Result<()> {
        if let Some(window) = &self.window {
            if !window.ladder().contains(timeframe) {
                return Err(EngineError::UntrackedTimeFrame(timeframe));
            }
        }
        self.state.active_timeframe = timeframe;
        Ok(())
    }

    pub fn set_speed(&mut self, speed: u32) -> Result<()> {
        if !REPLAY_SPEEDS.contains(&speed) {
            return Err(EngineError::InvalidSpeed(speed));
        }
        self.state.speed = speed;
        Ok(())
    }

    pub(crate) fn set_auto_playing(&mut self, playing: bool) {
        if !self.is_active() {
            return;
        }
        self.state.mode = if playing { ReplayMode::AutoPlaying } else { ReplayMode::Seeded };
    }

    /// Discards the window and returns to idle. Safe to call when already idle.
    pub fn exit(&mut self) {
        if self.is_active() {
            tracing::info!(steps = self.state.steps_taken(), "Replay exited");
        }
        self.full = None;
        self.window = None;
        self.state = ReplayState {
            speed: self.state.speed,
            ..ReplayState::idle(self.state.active_timeframe)
        };
    }

    /// Window bars of `timeframe`; empty when idle.
    pub fn bars(&self, timeframe: TimeFrame) -> Vec<Bar> {
        self.window.as_ref().map(|w| w.get(timeframe).to_vec()).unwrap_or_default()
    }

    pub fn price(&self) -> Option<PriceSnapshot> {
        let window = self.window.as_ref()?;
        let ladder = window.ladder();
        let finest = window.last(ladder.finest())?;
        let coarsest = window.last(ladder.coarsest())?;
        Some(PriceSnapshot::from_bars(finest, coarsest))
    }
}

/// Updates that fold `next` (the finest bar at `cursor`) into `window`.
fn plan_step(window: &CandlestickDataset, next: &Bar, cursor: usize) -> Result<Vec<BarUpdate>> {
    let ladder = window.ladder();
    let mut updates = vec![BarUpdate::Append(ladder.finest(), *next)];

    for &timeframe in ladder.coarser() {
        let factor = ladder.alignment_factor(timeframe)?;
        match window.last(timeframe) {
            Some(_) if should_open_new_bar(factor, cursor) => {
                let aligned = align_timestamp(next.timestamp, timeframe);
                updates.push(BarUpdate::Append(timeframe, open_new_bar(next, aligned)));
            }
            Some(last) => updates.push(BarUpdate::ReplaceLast(timeframe, merge_bar(last, next))),
            None if completes_period(factor, cursor) => {
                let finest = window.finest();
                let run: Vec<Bar> = finest[finest.len() + 1 - factor..]
                    .iter()
                    .copied()
                    .chain(std::iter::once(*next))
                    .collect();
                let aligned = align_timestamp(run[0].timestamp, timeframe);
                if let Some(bar) = fold_bars(&run, aligned) {
                    updates.push(BarUpdate::Append(timeframe, bar));
                }
            }
            None => {}
        }
    }
    Ok(updates)
}
