pub mod batcher;
pub mod merge;
pub mod orchestrator;
pub mod retention;
pub mod scheduler;

pub use orchestrator::AnalysisOrchestrator;
pub use retention::SweepReport;
pub use scheduler::Scheduler;
