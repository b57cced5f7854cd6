pub mod csv_parser;
pub mod history;
pub mod market_data;
