pub mod admin;
pub mod batches;
pub mod config_entries;
pub mod observations;
pub mod segments;
pub mod timeline_cards;
pub mod token_usage;
