// Expense pipeline: ingestion, processing and run outputs

pub mod bundle;
pub mod ingestion;
pub mod orchestrator;
pub mod processing;
pub mod report;
pub mod utils;

pub use orchestrator::PipelineOrchestrator;
pub use report::{InconsistencyReport, RunReport};
