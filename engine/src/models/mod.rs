// Engine-side models layered on top of `kline_shared::models`.
pub mod ladder;
pub mod price;

pub use kline_shared::models::{Bar, Direction, TimeFrame};
pub use ladder::TimeFrameLadder;
pub use price::PriceSnapshot;
