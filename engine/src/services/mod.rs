pub mod data_loader;
pub mod replay;
pub mod scheduler;
