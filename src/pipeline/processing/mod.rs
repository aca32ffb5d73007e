// Pipeline processing: filtering, consolidation, validation, enrichment and aggregation

pub mod aggregate;
pub mod consolidate;
pub mod enrich;
pub mod filter;
pub mod validate;
