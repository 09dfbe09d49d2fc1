mod batch;
mod config_entry;
mod observation;
mod segment;
mod timeline_card;
mod token_usage;

pub use batch::{Batch, BatchStatus};
pub use config_entry::ConfigEntry;
pub use observation::Observation;
pub use segment::Segment;
pub use timeline_card::{CardCategory, TimelineCard};
pub use token_usage::{RequestKind, TokenUsageRecord, TokenUsageSummary};
