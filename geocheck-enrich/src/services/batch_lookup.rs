//! Batch Lookup Coordinator
//!
//! Deduplicates identifiers and fans lookups out through [`RegistryClient`].
//!
//! # Strategies
//! - [`SequentialLookup`]: one identifier at a time, rate-limited
//! - [`BoundedConcurrentLookup`]: at most `max_in_flight` requests
//!   outstanding, admitted through a counting semaphore
//!
//! The strategy is chosen when the coordinator is constructed; batches
//! smaller than the concurrency threshold always run sequentially.
//!
//! # Result map
//! Identifiers are deduplicated before dispatch, so each key is written
//! exactly once. In concurrent mode the spawned tasks only return their
//! result; the coordinator drains the [`JoinSet`] as the single writer, in
//! completion order, and reports progress as each lookup finishes.

use crate::services::registry_client::RegistryClient;
use crate::types::RegistryRecord;
use async_trait::async_trait;
use geocheck_common::config::LookupConfig;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Identifier → record, `None` when the registry had no (usable) answer
pub type LookupResults = HashMap<String, Option<RegistryRecord>>;

/// Progress callback: `(completed, total, identifier just finished)`
pub type ProgressCallback = Arc<dyn Fn(usize, usize, Option<&str>) + Send + Sync>;

/// Interchangeable lookup strategy
#[async_trait]
pub trait LookupStrategy: Send + Sync {
    /// Strategy name for logs
    fn name(&self) -> &'static str;

    /// Look up every identifier; the returned map has one entry per input
    ///
    /// `egids` must already be deduplicated.
    async fn lookup_all(
        &self,
        client: &Arc<RegistryClient>,
        egids: Vec<String>,
        progress: Option<&ProgressCallback>,
    ) -> LookupResults;
}

/// Strictly sequential lookups honoring the client's rate limit
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialLookup;

#[async_trait]
impl LookupStrategy for SequentialLookup {
    fn name(&self) -> &'static str {
        "sequential"
    }

    async fn lookup_all(
        &self,
        client: &Arc<RegistryClient>,
        egids: Vec<String>,
        progress: Option<&ProgressCallback>,
    ) -> LookupResults {
        let total = egids.len();
        let mut results = HashMap::with_capacity(total);

        for (index, egid) in egids.into_iter().enumerate() {
            let record = client.lookup(&egid).await;
            if let Some(progress) = progress {
                progress(index + 1, total, Some(&egid));
            }
            results.insert(egid, record);
        }

        results
    }
}

/// Concurrent lookups with a fixed cap on in-flight requests
///
/// Bypasses the client's inter-request spacing; the cap is the only
/// throttle in this mode.
#[derive(Debug, Clone, Copy)]
pub struct BoundedConcurrentLookup {
    max_in_flight: usize,
}

impl BoundedConcurrentLookup {
    /// `max_in_flight` is clamped to at least 1
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}

#[async_trait]
impl LookupStrategy for BoundedConcurrentLookup {
    fn name(&self) -> &'static str {
        "bounded-concurrent"
    }

    async fn lookup_all(
        &self,
        client: &Arc<RegistryClient>,
        egids: Vec<String>,
        progress: Option<&ProgressCallback>,
    ) -> LookupResults {
        let total = egids.len();
        let gate = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();

        // Every task is spawned up front and waits for its own permit, so the
        // drain loop below sees completions while later identifiers queue
        for egid in &egids {
            let gate = Arc::clone(&gate);
            let client = Arc::clone(client);
            let egid = egid.clone();
            tasks.spawn(async move {
                let _permit = match gate.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        warn!(egid = %egid, error = %e, "Admission gate closed");
                        return (egid, None);
                    }
                };
                let record = client.lookup_unthrottled(&egid).await;
                (egid, record)
            });
        }

        let mut results = HashMap::with_capacity(total);
        let mut completed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((egid, record)) => {
                    completed += 1;
                    if let Some(progress) = progress {
                        progress(completed, total, Some(&egid));
                    }
                    results.insert(egid, record);
                }
                Err(e) => {
                    warn!(error = %e, "Lookup task failed");
                }
            }
        }

        // A panicked task leaves its identifier unresolved: treat as absent
        for egid in egids {
            results.entry(egid).or_insert(None);
        }

        results
    }
}

/// Strategy selection made at construction time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    Sequential,
    Concurrent {
        max_in_flight: usize,
        /// Batches smaller than this run sequentially
        threshold: usize,
    },
}

impl LookupMode {
    pub fn from_config(config: &LookupConfig) -> Self {
        if config.sequential {
            LookupMode::Sequential
        } else {
            LookupMode::Concurrent {
                max_in_flight: config.max_concurrency,
                threshold: config.concurrency_threshold,
            }
        }
    }
}

/// Deduplicating front end over the lookup strategies
pub struct BatchLookupCoordinator {
    client: Arc<RegistryClient>,
    mode: LookupMode,
    sequential: SequentialLookup,
    concurrent: Option<BoundedConcurrentLookup>,
}

impl BatchLookupCoordinator {
    pub fn new(client: Arc<RegistryClient>, mode: LookupMode) -> Self {
        let concurrent = match mode {
            LookupMode::Sequential => None,
            LookupMode::Concurrent { max_in_flight, .. } => {
                Some(BoundedConcurrentLookup::new(max_in_flight))
            }
        };
        Self {
            client,
            mode,
            sequential: SequentialLookup,
            concurrent,
        }
    }

    pub fn from_config(client: Arc<RegistryClient>, config: &LookupConfig) -> Self {
        Self::new(client, LookupMode::from_config(config))
    }

    pub fn mode(&self) -> LookupMode {
        self.mode
    }

    pub fn client(&self) -> &Arc<RegistryClient> {
        &self.client
    }

    /// Strategy used for a batch of `unique` distinct identifiers
    fn strategy_for(&self, unique: usize) -> &dyn LookupStrategy {
        match (self.mode, &self.concurrent) {
            (LookupMode::Concurrent { threshold, .. }, Some(concurrent)) if unique >= threshold => {
                concurrent
            }
            _ => &self.sequential,
        }
    }

    /// Look up many identifiers, each distinct one exactly once
    ///
    /// Blank identifiers are skipped. The returned map has exactly one entry
    /// per distinct non-blank input.
    pub async fn lookup_many<I, S>(
        &self,
        identifiers: I,
        progress: Option<&ProgressCallback>,
    ) -> LookupResults
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let unique: BTreeSet<String> = identifiers
            .into_iter()
            .map(|id| id.as_ref().trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();

        if unique.is_empty() {
            debug!("No identifiers to look up");
            return LookupResults::new();
        }

        let egids: Vec<String> = unique.into_iter().collect();
        let strategy = self.strategy_for(egids.len());
        info!(
            unique = egids.len(),
            strategy = strategy.name(),
            "Starting registry lookups"
        );

        let results = strategy.lookup_all(&self.client, egids, progress).await;

        let found = results.values().filter(|r| r.is_some()).count();
        info!(
            total = results.len(),
            found,
            missing = results.len() - found,
            "Registry lookups complete"
        );

        results
    }
}
