// Candle replay engine library root

pub mod aggregator;
pub mod config;
pub mod data;
pub mod error;
pub mod models;
pub mod services;

pub use error::{EngineError, Result};
