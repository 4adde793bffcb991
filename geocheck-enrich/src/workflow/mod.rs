//! Enrichment workflow
//!
//! The pipeline that turns an input table into an enriched table, findings
//! and a summary, plus the worker that runs its lookups.

pub mod lookup_worker;
pub mod pipeline;

pub use lookup_worker::LookupWorker;
pub use pipeline::{
    DimensionCounts, EnrichmentPipeline, EnrichmentReport, BLANK_DIMENSION, OUTPUT_COLUMNS,
};
