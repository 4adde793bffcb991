//! Test Helper Utilities
//!
//! Shared utilities for testing geocheck-enrich

#![allow(dead_code)]

pub mod mock_transport;

// Re-export commonly used items
pub use mock_transport::{building, mock_client, MockTransport};

use geocheck_enrich::services::{BatchLookupCoordinator, LookupMode};
use geocheck_enrich::{EnrichmentPipeline, LookupWorker};
use std::sync::Arc;

/// Pipeline over a mock transport
pub fn mock_pipeline(transport: Arc<MockTransport>, mode: LookupMode) -> EnrichmentPipeline {
    let coordinator = BatchLookupCoordinator::new(mock_client(transport), mode);
    EnrichmentPipeline::new(coordinator, LookupWorker::new(Some(2)))
}
