//! Bar replay: rebuilds multi-timeframe candles one finest bar at a time.
//!
//! [`ReplayEngine`] is the handle the rest of the engine talks to. It owns the
//! [`ReplaySession`] behind a mutex shared with the autoplay task; reads and steps take the
//! mutex, so no reader sees a half-applied step. A separate in-flight flag guards stepping:
//! a step that finds another step in flight is dropped, not queued, while a step that only
//! meets a reader waits for it.

mod session;
mod state;

pub use session::ReplaySession;
pub use state::{
    period_for_speed, ReplayMode, ReplayState, StepOutcome, DEFAULT_AUTOPLAY_PERIOD_MS, DEFAULT_REPLAY_SPEED,
    REPLAY_SPEEDS,
};

use crate::data::market_data::CandlestickDataset;
use crate::error::{EngineError, Result};
use crate::models::PriceSnapshot;
use crate::services::scheduler::{IntervalScheduler, TaskResult};
use anyhow::anyhow;
use kline_shared::models::{Bar, TimeFrame};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

struct SharedSession {
    session: Mutex<ReplaySession>,
    stepping: AtomicBool,
}

// Clears the in-flight flag when the step ends, including by panic.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SharedSession {
    fn lock(&self) -> Result<MutexGuard<'_, ReplaySession>> {
        self.session.lock().map_err(|_| EngineError::LockPoisoned)
    }

    /// `None` when another step is already in flight.
    fn begin_step(&self) -> Option<InFlight<'_>> {
        if self.stepping.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(InFlight(&self.stepping))
        }
    }
}

pub struct ReplayEngine {
    shared: Arc<SharedSession>,
    scheduler: IntervalScheduler,
}

impl ReplayEngine {
    pub fn new(active_timeframe: TimeFrame) -> Self {
        ReplayEngine {
            shared: Arc::new(SharedSession {
                session: Mutex::new(ReplaySession::new(active_timeframe)),
                stepping: AtomicBool::new(false),
            }),
            scheduler: IntervalScheduler::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ReplaySession>> {
        self.shared.lock()
    }

    /// Seeds a replay `origin_days` into `full`. Fails with `ReplayAlreadyActive` while one runs.
    pub fn start(&self, full: Arc<CandlestickDataset>, origin_days: usize, active_timeframe: TimeFrame) -> Result<()> {
        self.lock()?.start(full, origin_days, active_timeframe)
    }

    /// Advances one finest bar. Returns `Dropped` when another step is in flight.
    pub fn step(&self) -> Result<StepOutcome> {
        let Some(_in_flight) = self.shared.begin_step() else {
            tracing::debug!("Replay step already in flight; dropping this one");
            return Ok(StepOutcome::Dropped);
        };
        self.lock()?.step()
    }

    /// Starts autoplay stepping every `period_ms`, or stops it if running. Returns whether
    /// autoplay is on afterwards. Does nothing outside a replay.
    pub fn toggle_auto_play(&mut self, period_ms: u64) -> Result<bool> {
        if !self.lock()?.is_active() {
            tracing::debug!("Autoplay toggled without an active replay; ignored");
            return Ok(false);
        }

        if self.scheduler.is_running() {
            self.scheduler.stop();
            self.lock()?.set_auto_playing(false);
            return Ok(false);
        }

        // Mode goes first so the first tick already sees autoplay on.
        self.lock()?.set_auto_playing(true);
        let shared = Arc::clone(&self.shared);
        let started = self.scheduler.start(move || autoplay_tick(&shared), period_ms);
        if !started {
            self.lock()?.set_auto_playing(false);
        }
        Ok(started)
    }

    /// Toggles autoplay at the period matching the current speed.
    pub fn toggle_auto_play_at_speed(&mut self) -> Result<bool> {
        let speed = self.lock()?.state().speed;
        self.toggle_auto_play(period_for_speed(speed))
    }

    /// Changes the replay speed (steps per second); a running autoplay is re-timed.
    pub fn set_speed(&mut self, speed: u32) -> Result<()> {
        self.lock()?.set_speed(speed)?;
        if self.scheduler.is_running() {
            self.scheduler.set_period(period_for_speed(speed));
        }
        Ok(())
    }

    pub fn set_active_timeframe(&self, timeframe: TimeFrame) -> Result<()> {
        self.lock()?.set_active_timeframe(timeframe)
    }

    /// Stops autoplay, lets an in-flight step finish, then discards the replay. Idempotent.
    pub fn exit(&mut self) {
        self.scheduler.stop();
        let mut session = self.shared.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        session.exit();
    }

    pub fn state(&self) -> Result<ReplayState> {
        Ok(self.lock()?.state())
    }

    pub fn mode(&self) -> Result<ReplayMode> {
        Ok(self.lock()?.mode())
    }

    pub fn cursor(&self) -> Result<usize> {
        Ok(self.lock()?.state().cursor)
    }

    pub fn is_active(&self) -> Result<bool> {
        Ok(self.lock()?.is_active())
    }

    pub fn is_auto_playing(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Window bars of `timeframe`, cloned so no lock outlives the call.
    pub fn bars(&self, timeframe: TimeFrame) -> Result<Vec<Bar>> {
        Ok(self.lock()?.bars(timeframe))
    }

    pub fn active_bars(&self) -> Result<Vec<Bar>> {
        let session = self.lock()?;
        Ok(session.bars(session.state().active_timeframe))
    }

    pub fn price(&self) -> Result<Option<PriceSnapshot>> {
        Ok(self.lock()?.price())
    }
}

fn autoplay_tick(shared: &SharedSession) -> TaskResult {
    let Some(_in_flight) = shared.begin_step() else {
        tracing::debug!("Autoplay tick skipped; a step is in flight");
        return Ok(ControlFlow::Continue(()));
    };
    let mut session = shared.lock().map_err(|_| anyhow!("replay session lock poisoned"))?;
    if session.mode() != ReplayMode::AutoPlaying {
        return Ok(ControlFlow::Break(()));
    }

    match session.step() {
        Ok(StepOutcome::Advanced { .. }) => Ok(ControlFlow::Continue(())),
        Ok(StepOutcome::Exhausted) => {
            tracing::info!(cursor = session.state().cursor, "Autoplay reached the end of history");
            session.set_auto_playing(false);
            Ok(ControlFlow::Break(()))
        }
        Ok(StepOutcome::Dropped | StepOutcome::Inactive) => Ok(ControlFlow::Break(())),
        Err(e) => {
            if e.is_integrity_violation() {
                tracing::error!(cursor = session.state().cursor, error = %e, "Replay window integrity violated");
            }
            session.set_auto_playing(false);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::history::HistoryFrames;
    use crate::models::TimeFrameLadder;
    use std::time::Duration;
    use tokio::time::sleep;

    const FIVE_MIN: i64 = 5 * 60_000;

    fn full_dataset(finest_count: i64) -> Arc<CandlestickDataset> {
        let ladder = TimeFrameLadder::new([TimeFrame::Minute5, TimeFrame::Hour1]).unwrap();
        let mut frames = HistoryFrames::new();
        frames.insert(
            TimeFrame::Minute5,
            (0..finest_count).map(|i| Bar::new(i * FIVE_MIN, 10.0, 11.0, 9.0, 10.5, 1.0)).collect(),
        );
        Arc::new(CandlestickDataset::from_history(ladder, frames).unwrap())
    }

    #[test]
    fn test_step_is_dropped_while_another_is_in_flight() {
        let engine = ReplayEngine::new(TimeFrame::Minute5);
        engine.start(full_dataset(300), 1, TimeFrame::Minute5).unwrap();

        let in_flight = engine.shared.begin_step().unwrap();
        assert_eq!(engine.step().unwrap(), StepOutcome::Dropped);
        drop(in_flight);

        assert_eq!(engine.step().unwrap(), StepOutcome::Advanced { cursor: 289 });
    }

    #[test]
    fn test_step_waits_for_a_reader_instead_of_dropping() {
        let engine = ReplayEngine::new(TimeFrame::Minute5);
        engine.start(full_dataset(300), 1, TimeFrame::Minute5).unwrap();

        let reader = engine.shared.session.lock().unwrap();
        std::thread::scope(|scope| {
            let stepper = scope.spawn(|| engine.step());
            std::thread::sleep(Duration::from_millis(50));
            drop(reader);
            assert_eq!(stepper.join().unwrap().unwrap(), StepOutcome::Advanced { cursor: 289 });
        });
    }

    #[test]
    fn test_toggle_without_replay_is_ignored() {
        let mut engine = ReplayEngine::new(TimeFrame::Minute5);
        assert!(!engine.toggle_auto_play(100).unwrap());
        assert_eq!(engine.mode().unwrap(), ReplayMode::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoplay_steps_until_exhausted() {
        let mut engine = ReplayEngine::new(TimeFrame::Hour1);
        engine.start(full_dataset(291), 1, TimeFrame::Hour1).unwrap();

        assert!(engine.toggle_auto_play(100).unwrap());
        assert_eq!(engine.mode().unwrap(), ReplayMode::AutoPlaying);

        sleep(Duration::from_millis(1000)).await;
        assert_eq!(engine.cursor().unwrap(), 291);
        assert!(engine.state().unwrap().exhausted);
        assert_eq!(engine.mode().unwrap(), ReplayMode::Seeded);
        assert!(!engine.is_auto_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoplay_stops_on_integrity_error() {
        let ladder = TimeFrameLadder::new([TimeFrame::Minute5, TimeFrame::Minute15]).unwrap();
        let mut frames = HistoryFrames::new();
        frames.insert(
            TimeFrame::Minute5,
            (0..290).map(|i| Bar::new(i * FIVE_MIN, 10.0, 11.0, 9.0, 10.5, 1.0)).collect(),
        );
        // Stamped past the next 5m bar, so the first replayed 15m bar is out of order.
        frames.insert(TimeFrame::Minute15, vec![Bar::new(400 * FIVE_MIN, 1.0, 1.0, 1.0, 1.0, 1.0)]);
        let full = Arc::new(CandlestickDataset::from_history(ladder, frames).unwrap());

        let mut engine = ReplayEngine::new(TimeFrame::Minute5);
        engine.start(full, 1, TimeFrame::Minute5).unwrap();
        let before = engine.bars(TimeFrame::Minute15).unwrap();
        assert!(engine.toggle_auto_play(100).unwrap());

        sleep(Duration::from_millis(500)).await;
        assert!(!engine.is_auto_playing());
        assert_eq!(engine.mode().unwrap(), ReplayMode::Seeded);
        assert_eq!(engine.cursor().unwrap(), 288);
        assert_eq!(engine.bars(TimeFrame::Minute5).unwrap().len(), 288);
        assert_eq!(engine.bars(TimeFrame::Minute15).unwrap(), before);
        assert_eq!(engine.scheduler.stats().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_speed_retimes_autoplay() {
        let mut engine = ReplayEngine::new(TimeFrame::Minute5);
        engine.start(full_dataset(600), 1, TimeFrame::Minute5).unwrap();
        assert!(matches!(engine.set_speed(7), Err(EngineError::InvalidSpeed(7))));

        engine.set_speed(1).unwrap();
        assert!(engine.toggle_auto_play_at_speed().unwrap());
        engine.set_speed(10).unwrap();

        sleep(Duration::from_millis(550)).await;
        assert_eq!(engine.state().unwrap().steps_taken(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_stops_autoplay() {
        let mut engine = ReplayEngine::new(TimeFrame::Minute5);
        engine.start(full_dataset(600), 1, TimeFrame::Minute5).unwrap();
        engine.toggle_auto_play(100).unwrap();
        sleep(Duration::from_millis(250)).await;

        engine.exit();
        engine.exit();
        assert!(!engine.is_auto_playing());
        assert_eq!(engine.mode().unwrap(), ReplayMode::Idle);
        assert!(engine.bars(TimeFrame::Minute5).unwrap().is_empty());
        assert_eq!(engine.step().unwrap(), StepOutcome::Inactive);
    }
}
