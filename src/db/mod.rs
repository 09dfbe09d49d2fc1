mod connection;
pub(crate) mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use repositories::admin::{ClearReport, TableCounts};
pub use repositories::segments::NewSegment;
