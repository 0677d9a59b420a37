pub mod cache;
pub mod config;
pub mod summarize;
pub mod usage;
