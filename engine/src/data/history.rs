// History fetch boundary: where the full dataset comes from.
use crate::data::csv_parser::{timestamp_format, HistoryCsvParser};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use kline_shared::models::{Bar, TimeFrame};
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Raw fetched history, one bar sequence per timeframe.
pub type HistoryFrames = HashMap<TimeFrame, Vec<Bar>>;

/// Single-attempt history fetch. Retrying is the implementor's business, not the engine's.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_history(&self, symbol: &str) -> Result<HistoryFrames>;
}

/// `"btc/usdt"` -> `"BTCUSDT"`. Rejects empty or non-alphanumeric symbols.
pub fn normalize_symbol(symbol: &str) -> Result<String> {
    let normalized: String = symbol.trim().replace('/', "").to_ascii_uppercase();
    if normalized.is_empty() || !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(EngineError::InvalidSymbol(symbol.to_string()));
    }
    Ok(normalized)
}

/// Reads the on-disk history cache: `<data_dir>/<SYMBOL>/<timeframe>.json` holding rows of
/// `[timestamp, open, high, low, close, volume]`, falling back to `<timeframe>.csv`.
#[derive(Debug, Clone)]
pub struct FileHistorySource {
    data_dir: PathBuf,
}

impl FileHistorySource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        FileHistorySource { data_dir: data_dir.into() }
    }

    async fn read_timeframe(&self, symbol_dir: &Path, timeframe: TimeFrame) -> Result<Option<Vec<Bar>>> {
        let json_path = symbol_dir.join(format!("{}.json", timeframe.label()));
        match tokio::fs::read_to_string(&json_path).await {
            Ok(content) => return parse_json_rows(&content, timeframe).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let csv_path = symbol_dir.join(format!("{}.csv", timeframe.label()));
        match tokio::fs::read(&csv_path).await {
            Ok(bytes) => HistoryCsvParser::parse_bars(bytes.as_slice()).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl HistorySource for FileHistorySource {
    async fn fetch_history(&self, symbol: &str) -> Result<HistoryFrames> {
        let symbol = normalize_symbol(symbol)?;
        let symbol_dir = self.data_dir.join(&symbol);

        match tokio::fs::metadata(&symbol_dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(EngineError::SymbolNotFound(symbol)),
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(EngineError::SymbolNotFound(symbol)),
            Err(e) => return Err(e.into()),
        }

        let mut frames = HistoryFrames::new();
        for timeframe in TimeFrame::ALL {
            if let Some(bars) = self.read_timeframe(&symbol_dir, timeframe).await? {
                tracing::debug!(symbol = %symbol, timeframe = %timeframe, count = bars.len(), "Read cached history");
                frames.insert(timeframe, bars);
            }
        }

        tracing::info!(symbol = %symbol, timeframes = frames.len(), dir = %symbol_dir.display(), "Loaded history from cache");
        Ok(frames)
    }
}

fn parse_json_rows(content: &str, timeframe: TimeFrame) -> Result<Vec<Bar>> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(content)?;
    rows.iter()
        .enumerate()
        .map(|(idx, row)| parse_json_row(row).ok_or_else(|| {
            EngineError::HistoryFormat(format!("Invalid {} row {}: {:?}", timeframe, idx, row))
        }))
        .collect()
}

fn parse_json_row(row: &[Value]) -> Option<Bar> {
    if row.len() < 6 {
        return None;
    }
    let timestamp = match &row[0] {
        Value::Number(n) => timestamp_format::from_epoch(n.as_i64()?),
        Value::String(s) => timestamp_format::parse(s)?,
        _ => return None,
    };
    let number = |v: &Value| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Some(Bar {
        timestamp,
        open: number(&row[1])?,
        high: number(&row[2])?,
        low: number(&row[3])?,
        close: number(&row[4])?,
        volume: number(&row[5])?,
    })
}
