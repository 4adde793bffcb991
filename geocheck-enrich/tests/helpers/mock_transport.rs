//! Instrumented in-memory registry transport

use async_trait::async_trait;
use geocheck_enrich::services::registry_client::{
    FindResponse, FindResult, RegistryError, RegistryTransport,
};
use geocheck_enrich::RegistryClient;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Registry stand-in that records every call
///
/// Tracks per-identifier call counts and the peak number of requests in
/// flight at once.
#[derive(Default)]
pub struct MockTransport {
    records: HashMap<String, Map<String, Value>>,
    failing: HashSet<String>,
    delay: Duration,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `egid` with these attributes
    pub fn with_record(mut self, egid: &str, attributes: Value) -> Self {
        let attributes = attributes.as_object().cloned().unwrap_or_default();
        self.records.insert(egid.to_string(), attributes);
        self
    }

    /// Answer `egid` with an HTTP-style error
    pub fn with_failure(mut self, egid: &str) -> Self {
        self.failing.insert(egid.to_string());
        self
    }

    /// Hold every request open for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls_for(&self, egid: &str) -> usize {
        self.calls.lock().unwrap().get(egid).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryTransport for MockTransport {
    async fn find(&self, egid: &str) -> Result<FindResponse, RegistryError> {
        *self.calls.lock().unwrap().entry(egid.to_string()).or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(egid) {
            return Err(RegistryError::Api(503, "Service Unavailable".to_string()));
        }

        let results = self
            .records
            .get(egid)
            .map(|attributes| {
                vec![FindResult {
                    attributes: attributes.clone(),
                }]
            })
            .unwrap_or_default();
        Ok(FindResponse { results })
    }
}

/// Client with no request spacing and a short timeout
pub fn mock_client(transport: Arc<MockTransport>) -> Arc<RegistryClient> {
    Arc::new(RegistryClient::new(
        transport,
        Duration::ZERO,
        Duration::from_secs(5),
    ))
}

/// Register attributes for one building
pub fn building(
    egid: &str,
    canton: &str,
    municipality: &str,
    postal_code: &str,
    street: &str,
    house_number: &str,
) -> Value {
    json!({
        "egid": egid,
        "gdekt": canton,
        "ggdename": municipality,
        "dplz4": [postal_code],
        "strname": [street],
        "deinr": house_number,
        "gkode": 2600000.0,
        "gkodn": 1200000.0,
    })
}
