// Engine settings, loaded from a JSON file; every field falls back to its default.
use crate::error::{EngineError, Result};
use crate::models::TimeFrameLadder;
use crate::services::replay::DEFAULT_AUTOPLAY_PERIOD_MS;
use kline_shared::models::TimeFrame;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Root of the history cache (`<data_dir>/<SYMBOL>/<timeframe>.json`).
    pub data_dir: PathBuf,
    pub symbol: String,
    pub timeframe: TimeFrame,
    pub ladder: Vec<TimeFrame>,
    pub origin_days: usize,
    pub autoplay_period_ms: u64,
    pub replay_steps: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            data_dir: PathBuf::from("data"),
            symbol: "BTCUSDT".to_string(),
            timeframe: TimeFrame::Day1,
            ladder: TimeFrameLadder::default().frames().to_vec(),
            origin_days: 1,
            autoplay_period_ms: DEFAULT_AUTOPLAY_PERIOD_MS,
            replay_steps: 12,
        }
    }
}

impl EngineSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let settings: EngineSettings = serde_json::from_str(&content)?;
        settings.validate()?;
        tracing::debug!(path = %path.display(), "Loaded engine settings");
        Ok(settings)
    }

    pub fn ladder(&self) -> Result<TimeFrameLadder> {
        TimeFrameLadder::new(self.ladder.iter().copied())
    }

    fn validate(&self) -> Result<()> {
        let ladder = self.ladder()?;
        if !ladder.contains(self.timeframe) {
            return Err(EngineError::ConfigError(format!(
                "timeframe {} is not part of the ladder",
                self.timeframe
            )));
        }
        if self.origin_days == 0 {
            return Err(EngineError::ConfigError("origin_days must be at least 1".to_string()));
        }
        if self.autoplay_period_ms == 0 {
            return Err(EngineError::ConfigError("autoplay_period_ms must be positive".to_string()));
        }
        Ok(())
    }
}
