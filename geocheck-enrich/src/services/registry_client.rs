//! Building registry client
//!
//! Looks up one building identifier (EGID) against the federal building
//! register search service and maps the first result into a
//! [`RegistryRecord`].
//!
//! # API Reference
//! - Endpoint: https://api3.geo.admin.ch/rest/services/ech/MapServer/find
//! - Query: `layer`, `searchText`, `searchField`, `returnGeometry=false`,
//!   `contains=false` (exact match)
//! - Response: `{"results": [{"attributes": {...}}]}`
//!
//! # Failure handling
//! Transport errors, timeouts, non-2xx statuses and malformed bodies are
//! logged and resolve to "absent". [`RegistryClient::lookup`] never returns
//! an error, so one failing identifier cannot abort a batch.

use crate::services::coordinate_converter;
use crate::types::RegistryRecord;
use async_trait::async_trait;
use geocheck_common::config::RegistryConfig;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// User-Agent header sent with every request
const USER_AGENT: &str = concat!("geocheck/", env!("CARGO_PKG_VERSION"));

/// Attribute keys in the register layer
mod attr {
    pub const EGID: &str = "egid";
    pub const EASTING: &str = "gkode";
    pub const NORTHING: &str = "gkodn";
    pub const CANTON: &str = "gdekt";
    pub const MUNICIPALITY: &str = "ggdename";
    pub const POSTAL_CODE: &str = "dplz4";
    pub const STREET: &str = "strname";
    pub const HOUSE_NUMBER: &str = "deinr";

    pub const MODELED: [&str; 8] = [
        EGID,
        EASTING,
        NORTHING,
        CANTON,
        MUNICIPALITY,
        POSTAL_CODE,
        STREET,
        HOUSE_NUMBER,
    ];
}

/// Registry client errors (internal; surfaced only as log lines)
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Search response body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindResponse {
    #[serde(default)]
    pub results: Vec<FindResult>,
}

/// One search hit
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindResult {
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// Wire-level access to the registry search service
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Exact-match search for one identifier
    async fn find(&self, egid: &str) -> Result<FindResponse, RegistryError>;
}

/// HTTP transport backed by reqwest
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: String,
    layer: String,
    search_field: String,
}

impl HttpTransport {
    pub fn new(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RegistryError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            layer: config.layer.clone(),
            search_field: config.search_field.clone(),
        })
    }
}

#[async_trait]
impl RegistryTransport for HttpTransport {
    async fn find(&self, egid: &str) -> Result<FindResponse, RegistryError> {
        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&[
                ("layer", self.layer.as_str()),
                ("searchText", egid),
                ("searchField", self.search_field.as_str()),
                ("returnGeometry", "false"),
                ("contains", "false"),
            ])
            .send()
            .await
            .map_err(|e| RegistryError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Api(status.as_u16(), body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RegistryError::Network(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| RegistryError::Parse(e.to_string()))
    }
}

/// Minimum spacing between sequential requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    /// Sleep for whatever remains of the interval since the previous call
    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Single-identifier registry lookup
pub struct RegistryClient {
    transport: Arc<dyn RegistryTransport>,
    rate_limiter: RateLimiter,
    timeout: Duration,
}

impl RegistryClient {
    pub fn new(
        transport: Arc<dyn RegistryTransport>,
        min_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            rate_limiter: RateLimiter::new(min_interval),
            timeout,
        }
    }

    /// Client over HTTP using the configured endpoint and spacing
    pub fn from_config(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(
            Arc::new(transport),
            Duration::from_millis(config.min_interval_ms),
            Duration::from_secs(config.timeout_secs),
        ))
    }

    /// Rate-limited lookup for the sequential path
    pub async fn lookup(&self, egid: &str) -> Option<RegistryRecord> {
        self.rate_limiter.wait().await;
        self.lookup_unthrottled(egid).await
    }

    /// Lookup without inter-request spacing
    ///
    /// Used by the concurrent strategy, which bounds load through its own
    /// admission gate instead.
    pub async fn lookup_unthrottled(&self, egid: &str) -> Option<RegistryRecord> {
        match self.fetch(egid).await {
            Ok(Some(record)) => {
                debug!(egid = %egid, "Registry record found");
                Some(record)
            }
            Ok(None) => {
                debug!(egid = %egid, "Registry returned no results");
                None
            }
            Err(e) => {
                warn!(egid = %egid, error = %e, "Registry lookup failed, treating as not found");
                None
            }
        }
    }

    async fn fetch(&self, egid: &str) -> Result<Option<RegistryRecord>, RegistryError> {
        let response = tokio::time::timeout(self.timeout, self.transport.find(egid))
            .await
            .map_err(|_| RegistryError::Timeout(self.timeout))??;

        if response.results.len() > 1 {
            // Exact-match search should be unique; the first hit wins.
            debug!(
                egid = %egid,
                results = response.results.len(),
                "Multiple registry results, using first"
            );
        }

        Ok(response
            .results
            .into_iter()
            .next()
            .map(|hit| record_from_attributes(egid, hit.attributes)))
    }
}

/// Collapse a scalar-or-list attribute to a scalar
///
/// Takes the first element of an array, the value itself otherwise; nulls
/// and empty arrays yield `None`.
pub fn scalar(value: &Value) -> Option<&Value> {
    let value = match value {
        Value::Array(items) => items.first()?,
        other => other,
    };
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

fn scalar_text(attributes: &Map<String, Value>, key: &str) -> Option<String> {
    let text = match scalar(attributes.get(key)?)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn scalar_f64(attributes: &Map<String, Value>, key: &str) -> Option<f64> {
    match scalar(attributes.get(key)?)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Map registry attributes into a record
///
/// Geodetic coordinates are derived only when both projected coordinates
/// are present. `requested_egid` is used when the response omits the id.
pub fn record_from_attributes(
    requested_egid: &str,
    attributes: Map<String, Value>,
) -> RegistryRecord {
    let easting = scalar_f64(&attributes, attr::EASTING);
    let northing = scalar_f64(&attributes, attr::NORTHING);
    let (latitude, longitude) = match (easting, northing) {
        (Some(e), Some(n)) => {
            let (lat, lon) = coordinate_converter::convert(e, n);
            (Some(lat), Some(lon))
        }
        _ => (None, None),
    };

    let egid = scalar_text(&attributes, attr::EGID)
        .map(|id| crate::types::normalize_identifier(&id))
        .unwrap_or_else(|| requested_egid.to_string());

    RegistryRecord {
        egid,
        easting,
        northing,
        latitude,
        longitude,
        canton: scalar_text(&attributes, attr::CANTON),
        municipality: scalar_text(&attributes, attr::MUNICIPALITY),
        postal_code: scalar_text(&attributes, attr::POSTAL_CODE),
        street: scalar_text(&attributes, attr::STREET),
        house_number: scalar_text(&attributes, attr::HOUSE_NUMBER),
        attributes: attributes
            .into_iter()
            .filter(|(key, _)| !attr::MODELED.contains(&key.as_str()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticTransport {
        response: Result<FindResponse, u16>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RegistryTransport for StaticTransport {
        async fn find(&self, _egid: &str) -> Result<FindResponse, RegistryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Ok(r) => Ok(r.clone()),
                Err(status) => Err(RegistryError::Api(*status, "boom".to_string())),
            }
        }
    }

    struct SlowTransport;

    #[async_trait]
    impl RegistryTransport for SlowTransport {
        async fn find(&self, _egid: &str) -> Result<FindResponse, RegistryError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(FindResponse::default())
        }
    }

    fn attributes(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn client(transport: Arc<dyn RegistryTransport>) -> RegistryClient {
        RegistryClient::new(transport, Duration::ZERO, Duration::from_secs(1))
    }

    #[test]
    fn test_scalar_unwraps_lists() {
        assert_eq!(scalar(&json!(["Bahnhofstrasse"])), Some(&json!("Bahnhofstrasse")));
        assert_eq!(scalar(&json!("ZH")), Some(&json!("ZH")));
        assert_eq!(scalar(&json!([])), None);
        assert_eq!(scalar(&Value::Null), None);
        assert_eq!(scalar(&json!([null])), None);
    }

    #[test]
    fn test_record_from_attributes() {
        let record = record_from_attributes(
            "190001",
            attributes(json!({
                "egid": 190001,
                "gkode": 2683112.0,
                "gkodn": [1247947.0],
                "gdekt": "ZH",
                "ggdename": ["Zürich"],
                "dplz4": 8001,
                "strname": ["Bahnhofstrasse"],
                "deinr": "1a",
                "gbauj": 1901
            })),
        );

        assert_eq!(record.egid, "190001");
        assert_eq!(record.position(), Some((47.377113, 8.539163)));
        assert_eq!(record.canton.as_deref(), Some("ZH"));
        assert_eq!(record.municipality.as_deref(), Some("Zürich"));
        assert_eq!(record.postal_code.as_deref(), Some("8001"));
        assert_eq!(record.street.as_deref(), Some("Bahnhofstrasse"));
        assert_eq!(record.house_number.as_deref(), Some("1a"));
        assert_eq!(record.attributes.len(), 1);
        assert_eq!(record.attributes["gbauj"], json!(1901));
    }

    #[test]
    fn test_record_without_both_coordinates_has_no_position() {
        let record = record_from_attributes("7", attributes(json!({ "gkode": 2600000.0 })));
        assert_eq!(record.egid, "7");
        assert_eq!(record.easting, Some(2600000.0));
        assert_eq!(record.position(), None);
    }

    #[tokio::test]
    async fn test_lookup_takes_first_result() {
        let transport = Arc::new(StaticTransport {
            response: Ok(FindResponse {
                results: vec![
                    FindResult { attributes: attributes(json!({ "egid": 1, "gdekt": "BE" })) },
                    FindResult { attributes: attributes(json!({ "egid": 1, "gdekt": "ZH" })) },
                ],
            }),
            calls: AtomicUsize::new(0),
        });

        let record = client(transport).lookup("1").await.unwrap();
        assert_eq!(record.canton.as_deref(), Some("BE"));
    }

    #[tokio::test]
    async fn test_empty_results_is_absent() {
        let transport = Arc::new(StaticTransport {
            response: Ok(FindResponse::default()),
            calls: AtomicUsize::new(0),
        });
        assert!(client(transport).lookup("1").await.is_none());
    }

    #[tokio::test]
    async fn test_api_error_is_absent() {
        let transport = Arc::new(StaticTransport {
            response: Err(500),
            calls: AtomicUsize::new(0),
        });
        assert!(client(transport.clone()).lookup("1").await.is_none());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_absent() {
        let client = RegistryClient::new(
            Arc::new(SlowTransport),
            Duration::ZERO,
            Duration::from_millis(100),
        );
        assert!(client.lookup("1").await.is_none());
    }

    #[tokio::test]
    async fn test_rate_limiting_spaces_sequential_calls() {
        let transport = Arc::new(StaticTransport {
            response: Ok(FindResponse::default()),
            calls: AtomicUsize::new(0),
        });
        let client = RegistryClient::new(
            transport,
            Duration::from_millis(200),
            Duration::from_secs(1),
        );

        let start = Instant::now();
        client.lookup("1").await;
        assert!(start.elapsed() < Duration::from_millis(150), "First request should be immediate");

        let start = Instant::now();
        client.lookup("2").await;
        assert!(
            start.elapsed() >= Duration::from_millis(150),
            "Second request should wait, got {:?}",
            start.elapsed()
        );
    }

    #[test]
    fn test_parse_response_body() {
        let body = r#"{"results":[{"layerBodId":"x","attributes":{"egid":"5","strname":["A"]}}]}"#;
        let response: FindResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].attributes["egid"], json!("5"));

        let empty: FindResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.results.is_empty());
    }
}
