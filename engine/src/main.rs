// Engine main entry point: loads cached history and auto-plays a short replay.
// Usage: kline-engine [settings.json] [timeframe]
use anyhow::Context;
use kline_engine::config::settings::EngineSettings;
use kline_engine::data::history::FileHistorySource;
use kline_engine::services::data_loader::{DataLoaderAdapter, LoadRequest};
use kline_engine::EngineError;
use kline_shared::models::TimeFrame;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut settings = match std::env::args().nth(1) {
        Some(path) => EngineSettings::load(&path).with_context(|| format!("loading settings from {}", path))?,
        None => EngineSettings::default(),
    };
    if let Some(label) = std::env::args().nth(2) {
        settings.timeframe = label.parse::<TimeFrame>().map_err(EngineError::from)?;
    }
    info!(symbol = %settings.symbol, data_dir = %settings.data_dir.display(), "Starting candle replay engine");

    let source = Arc::new(FileHistorySource::new(&settings.data_dir));
    let mut loader = DataLoaderAdapter::new(source, settings.ladder()?);

    let request = LoadRequest::new(settings.symbol.clone(), settings.timeframe);
    let bars = loader.load(&request).await?;
    info!(timeframe = %settings.timeframe, count = bars.len(), "Chart bars ready");

    loader.start_replay(settings.origin_days)?;
    let replay = loader.replay_mut();
    replay.toggle_auto_play(settings.autoplay_period_ms)?;

    let mut reported = 0;
    while replay.is_auto_playing() && reported < settings.replay_steps {
        tokio::time::sleep(Duration::from_millis(settings.autoplay_period_ms)).await;
        let state = replay.state()?;
        if state.steps_taken() > reported {
            reported = state.steps_taken();
            if let Some(price) = replay.price()? {
                info!(
                    step = reported,
                    timestamp = price.timestamp,
                    price = price.price,
                    up = price.is_up,
                    change_percent = price.change_percent,
                    "Replay price"
                );
            }
        }
    }

    let state = replay.state()?;
    info!(steps = state.steps_taken(), exhausted = state.exhausted, "Replay finished");
    let active = replay.active_bars()?;
    info!(timeframe = %state.active_timeframe, count = active.len(), "Replay window bars");
    replay.exit();
    Ok(())
}
