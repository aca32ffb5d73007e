// Pipeline ingestion: period discovery, archive download and extraction

pub mod discovery;
pub mod fetch;
pub mod listing;

pub use discovery::{DiscoveredPeriod, PeriodDiscovery};
pub use fetch::{ArchiveFetcher, FetchOutcome, FetchStats};
