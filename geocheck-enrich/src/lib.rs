//! geocheck-enrich library interface
//!
//! Registry enrichment and matching engine: looks building identifiers up
//! in the federal building register, appends the registry's values to the
//! input table, scores each row against them and reports findings.
//!
//! Exposes public APIs for the `geocheck` binary and integration testing.

pub mod services;
pub mod table;
pub mod types;
pub mod workflow;

pub use crate::services::{detect_columns, BatchLookupCoordinator, LookupMode, RegistryClient};
pub use crate::table::{Table, TableError};
pub use crate::types::{
    ColumnMapping, LogicalField, MatchLabel, MatchResult, RegistryRecord, RuleId, Severity,
    Summary, ValidationFinding,
};
pub use crate::workflow::{EnrichmentPipeline, EnrichmentReport, LookupWorker};
