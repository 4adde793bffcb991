//! Enrichment services
//!
//! Leaf components used by the enrichment pipeline: coordinate conversion,
//! registry access, batch lookup, column detection and row scoring.

pub mod batch_lookup;
pub mod column_detector;
pub mod coordinate_converter;
pub mod match_scorer;
pub mod registry_client;

pub use batch_lookup::{
    BatchLookupCoordinator, BoundedConcurrentLookup, LookupMode, LookupResults, LookupStrategy,
    ProgressCallback, SequentialLookup,
};
pub use column_detector::{detect_columns, resolve_mapping};
pub use match_scorer::{haversine_distance_m, MatchScorer, RowFields, ScoreOutcome};
pub use registry_client::{HttpTransport, RegistryClient, RegistryError, RegistryTransport};
