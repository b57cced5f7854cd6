use kline_shared::models::TimeFrame;
use serde::Serialize;

/// Replay speeds offered to the user, in steps per second.
pub const REPLAY_SPEEDS: [u32; 5] = [1, 2, 5, 10, 20];
pub const DEFAULT_REPLAY_SPEED: u32 = 2;
pub const DEFAULT_AUTOPLAY_PERIOD_MS: u64 = 500;
const MIN_AUTOPLAY_PERIOD_MS: u64 = 50;

/// Scheduler period for a speed in steps per second, never below 50 ms.
pub fn period_for_speed(speed: u32) -> u64 {
    (1000 / u64::from(speed.max(1))).max(MIN_AUTOPLAY_PERIOD_MS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReplayMode {
    Idle,
    Seeded,
    AutoPlaying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplayState {
    /// Finest bars consumed, counted from the start of the full dataset.
    pub cursor: usize,
    /// Cursor value the replay was seeded at.
    pub origin: usize,
    pub mode: ReplayMode,
    pub speed: u32,
    pub active_timeframe: TimeFrame,
    /// Set once a step found no further finest bar in the full dataset.
    pub exhausted: bool,
}

impl ReplayState {
    pub fn idle(active_timeframe: TimeFrame) -> Self {
        ReplayState {
            cursor: 0,
            origin: 0,
            mode: ReplayMode::Idle,
            speed: DEFAULT_REPLAY_SPEED,
            active_timeframe,
            exhausted: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.mode != ReplayMode::Idle
    }

    /// Steps taken since the replay origin.
    pub fn steps_taken(&self) -> usize {
        self.cursor - self.origin
    }
}

/// What a call to `step()` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepOutcome {
    /// One finest bar was folded in; `cursor` is the new cursor.
    Advanced { cursor: usize },
    /// The full dataset has no more finest bars. Nothing changed.
    Exhausted,
    /// Another step was in flight, so this one was skipped.
    Dropped,
    /// No replay is running.
    Inactive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_for_speed() {
        assert_eq!(period_for_speed(1), 1000);
        assert_eq!(period_for_speed(DEFAULT_REPLAY_SPEED), DEFAULT_AUTOPLAY_PERIOD_MS);
        assert_eq!(period_for_speed(20), 50);
        assert_eq!(period_for_speed(100), 50);
    }

    #[test]
    fn test_idle_state() {
        let state = ReplayState::idle(TimeFrame::Hour1);
        assert!(!state.is_active());
        assert_eq!(state.steps_taken(), 0);
        assert_eq!(state.speed, 2);
    }
}
