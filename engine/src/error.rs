use kline_shared::models::{ParseTimeFrameError, TimeFrame};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Insufficient history: replay origin needs {required} finest bars, dataset has {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("Out-of-order bar for {timeframe}: timestamp {incoming} does not follow {last}")]
    OutOfOrder {
        timeframe: TimeFrame,
        last: i64,
        incoming: i64,
    },

    #[error("Empty sequence: {timeframe} has no bar to replace")]
    EmptySequence { timeframe: TimeFrame },

    #[error("Timeframe {0} is not tracked by this dataset")]
    UntrackedTimeFrame(TimeFrame),

    #[error(transparent)]
    UnknownTimeFrame(#[from] ParseTimeFrameError),

    #[error("Invalid timeframe ladder: {0}")]
    InvalidLadder(String),

    #[error("Invalid replay origin: {0}")]
    InvalidOrigin(String),

    #[error("Unsupported replay speed {0}")]
    InvalidSpeed(u32),

    #[error("A replay is already active; exit it before starting another")]
    ReplayAlreadyActive,

    #[error("Invalid symbol '{0}'")]
    InvalidSymbol(String),

    #[error("No history found for symbol {0}")]
    SymbolNotFound(String),

    #[error("Malformed bar in {timeframe} at timestamp {timestamp}")]
    MalformedBar { timeframe: TimeFrame, timestamp: i64 },

    #[error("History format error: {0}")]
    HistoryFormat(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Replay state lock poisoned")]
    LockPoisoned,

    #[error("CSV parsing system error: {source}")]
    CsvSystemError {
        #[from]
        source: csv::Error,
    },

    #[error("JSON error: {source}")]
    JsonError {
        #[from]
        source: serde_json::Error,
    },

    #[error("I/O error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Dataset invariant violations. These abort the current step and must reach the caller.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            EngineError::OutOfOrder { .. } | EngineError::EmptySequence { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
