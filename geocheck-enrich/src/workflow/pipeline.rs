//! Enrichment Pipeline
//!
//! Orchestrates one enrichment run over a table.
//!
//! # Steps
//! 1. Resolve the column mapping (auto-detect when none is given)
//! 2. Fail the run when the identifier column cannot be resolved
//! 3. Collect the normalized, deduplicated identifier set
//! 4. Look every identifier up once through the batch coordinator
//! 5. Process rows in input order: missing identifier, missing address
//!    fields, not found, or registry enrichment plus scoring
//! 6. Flag duplicate identifiers (every occurrence after the first)
//! 7. Compute summary counts
//!
//! # Error Handling
//! The only fatal condition is an unresolvable identifier column, which
//! aborts before any lookup. Lookup failures surface as "not found" rows.
//!
//! # Example
//! ```rust,ignore
//! let pipeline = EnrichmentPipeline::from_config(&config)?;
//! let report = pipeline.run(table, None, None)?;
//! report.table.write_csv(Path::new("enriched.csv"))?;
//! ```

use super::lookup_worker::LookupWorker;
use crate::services::{
    resolve_mapping, BatchLookupCoordinator, LookupResults, MatchScorer, ProgressCallback,
    RegistryClient, RowFields,
};
use crate::table::Table;
use crate::types::{
    is_missing_identifier, normalize_identifier, AddressField, ColumnMapping, MatchResult,
    RegistryRecord, RuleId, Severity, Summary, ValidationFinding,
};
use chrono::{DateTime, Utc};
use geocheck_common::config::TomlConfig;
use geocheck_common::{Error, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Output columns appended to every enriched table, in order
pub const OUTPUT_COLUMNS: [&str; 11] = [
    "gwr_canton",
    "gwr_municipality",
    "gwr_postal_code",
    "gwr_street",
    "gwr_house_number",
    "gwr_latitude",
    "gwr_longitude",
    "gwr_easting",
    "gwr_northing",
    "match_score",
    "match_label",
];

/// Dimension value used for rows whose dimension cell is blank
pub const BLANK_DIMENSION: &str = "(none)";

/// Finding counts for one dimension value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DimensionCounts {
    pub errors: usize,
    pub warnings: usize,
    pub infos: usize,
}

/// Result of one enrichment run
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// Input table plus the eleven output columns
    #[serde(skip)]
    pub table: Table,
    /// Findings ordered by processing: per-row findings in row order, then
    /// duplicate warnings
    pub findings: Vec<ValidationFinding>,
    /// One result per input row
    pub results: Vec<MatchResult>,
    pub summary: Summary,
    /// Mapping actually used
    pub mapping: ColumnMapping,
    /// Setup diagnostics from mapping resolution (not findings)
    pub setup_warnings: Vec<String>,
}

impl EnrichmentReport {
    /// Finding counts grouped by the value of `column` on each finding's row
    ///
    /// Empty when the table has no such column.
    pub fn findings_by_dimension(&self, column: &str) -> BTreeMap<String, DimensionCounts> {
        let mut groups = BTreeMap::new();
        let Some(index) = self.table.column_index(column) else {
            return groups;
        };

        for finding in &self.findings {
            let key = self
                .table
                .text_at(finding.row_index, index)
                .unwrap_or_else(|| BLANK_DIMENSION.to_string());
            let counts: &mut DimensionCounts = groups.entry(key).or_default();
            match finding.severity {
                Severity::Error => counts.errors += 1,
                Severity::Warning => counts.warnings += 1,
                Severity::Info => counts.infos += 1,
            }
        }
        groups
    }
}

/// Mapping and identifiers resolved before any lookup
struct PreparedRun {
    mapping: ColumnMapping,
    setup_warnings: Vec<String>,
    identifiers: Vec<String>,
}

/// Registry enrichment pipeline
pub struct EnrichmentPipeline {
    coordinator: Arc<BatchLookupCoordinator>,
    scorer: MatchScorer,
    worker: LookupWorker,
}

impl EnrichmentPipeline {
    pub fn new(coordinator: BatchLookupCoordinator, worker: LookupWorker) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            scorer: MatchScorer::new(),
            worker,
        }
    }

    /// Pipeline over HTTP using the resolved configuration
    pub fn from_config(config: &TomlConfig) -> Result<Self> {
        let client = RegistryClient::from_config(&config.registry)
            .map_err(|e| Error::Config(format!("Failed to build registry client: {}", e)))?;
        let coordinator = BatchLookupCoordinator::from_config(Arc::new(client), &config.lookup);
        Ok(Self::new(
            coordinator,
            LookupWorker::new(config.lookup.worker_threads),
        ))
    }

    pub fn with_scorer(mut self, scorer: MatchScorer) -> Self {
        self.scorer = scorer;
        self
    }

    /// Blocking run; lookups execute on the pipeline's own worker
    ///
    /// Safe to call with or without an enclosing tokio runtime.
    pub fn run(
        &self,
        table: Table,
        mapping: Option<ColumnMapping>,
        progress: Option<ProgressCallback>,
    ) -> Result<EnrichmentReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("enrichment_run", run_id = %run_id);
        let _guard = span.enter();

        let prepared = prepare(&table, mapping)?;
        let coordinator = Arc::clone(&self.coordinator);
        let identifiers = prepared.identifiers.clone();
        let lookup_span = span.clone();
        let lookups = self.worker.run_blocking(move || {
            async move { coordinator.lookup_many(identifiers, progress.as_ref()).await }
                .instrument(lookup_span)
        })?;

        self.assemble(run_id, table, prepared, &lookups)
    }

    /// Async run on the caller's runtime
    pub async fn run_async(
        &self,
        table: Table,
        mapping: Option<ColumnMapping>,
        progress: Option<ProgressCallback>,
    ) -> Result<EnrichmentReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("enrichment_run", run_id = %run_id);

        async move {
            let prepared = prepare(&table, mapping)?;
            let lookups = self
                .coordinator
                .lookup_many(&prepared.identifiers, progress.as_ref())
                .await;
            self.assemble(run_id, table, prepared, &lookups)
        }
        .instrument(span)
        .await
    }

    /// Steps 5-7 over the finished lookup map
    fn assemble(
        &self,
        run_id: Uuid,
        mut table: Table,
        prepared: PreparedRun,
        lookups: &LookupResults,
    ) -> Result<EnrichmentReport> {
        let PreparedRun {
            mapping,
            setup_warnings,
            ..
        } = prepared;
        let identifier_column = mapping
            .identifier()
            .ok_or_else(|| Error::Internal("Identifier mapping lost after resolution".to_string()))?
            .to_string();

        // Column positions are fixed for the whole run
        let identifier_index = table
            .column_index(&identifier_column)
            .ok_or_else(|| Error::MissingIdentifierColumn(identifier_column.clone()))?;
        let address_columns: Vec<(AddressField, &str, usize)> = AddressField::ALL
            .into_iter()
            .filter_map(|field| {
                let column = mapping.get(field.logical())?;
                table.column_index(column).map(|index| (field, column, index))
            })
            .collect();
        let field_columns = RowFields::resolve_columns(&table, &mapping);

        let rows = table.len();
        let mut output = OutputColumns::with_capacity(rows);
        let mut findings = Vec::new();
        let mut results = Vec::with_capacity(rows);

        for row in 0..rows {
            let raw = table.text_at(row, identifier_index);
            let egid = raw.as_deref().map(normalize_identifier).unwrap_or_default();

            if is_missing_identifier(&egid) {
                let mut finding = ValidationFinding::new(
                    row,
                    identifier_column.as_str(),
                    RuleId::MissingIdentifier,
                    "EGID is missing or zero",
                );
                if let Some(raw) = raw {
                    finding = finding.with_value(raw);
                }
                findings.push(finding);
                results.push(MatchResult::not_found());
                output.push_unreached(MatchResult::not_found());
                continue;
            }

            for &(field, column, index) in &address_columns {
                if table.text_at(row, index).is_none() {
                    findings.push(ValidationFinding::new(
                        row,
                        column,
                        field.missing_rule(),
                        format!("{} is empty", field.label()),
                    ));
                }
            }

            let record = match lookups.get(&egid) {
                Some(Some(record)) => record,
                _ => {
                    findings.push(
                        ValidationFinding::new(
                            row,
                            identifier_column.as_str(),
                            RuleId::IdentifierNotFound,
                            format!("EGID {} not found in the building registry", egid),
                        )
                        .with_value(egid),
                    );
                    results.push(MatchResult::not_found());
                    output.push_unreached(MatchResult::not_found());
                    continue;
                }
            };

            let fields = RowFields::extract_resolved(&table, row, &field_columns);
            let outcome = self.scorer.score(row, &fields, record, &mapping);
            let result = MatchResult::from_score(outcome.score);
            findings.extend(outcome.findings);
            results.push(result);
            output.push_record(record, result);
        }

        findings.extend(duplicate_findings(&table, &identifier_column, identifier_index));

        for (name, values) in output.into_columns() {
            table
                .set_column(name, values)
                .map_err(|e| Error::Internal(format!("Failed to write column '{}': {}", name, e)))?;
        }

        let summary = Summary::compute(&results, &findings);
        info!(
            rows = summary.total_rows,
            errors = summary.error_count,
            warnings = summary.warning_count,
            matches = summary.match_count,
            not_found = summary.not_found_count,
            "Enrichment run complete"
        );

        Ok(EnrichmentReport {
            run_id,
            generated_at: Utc::now(),
            table,
            findings,
            results,
            summary,
            mapping,
            setup_warnings,
        })
    }
}

/// Steps 1-3: resolve the mapping and collect identifiers
fn prepare(table: &Table, mapping: Option<ColumnMapping>) -> Result<PreparedRun> {
    let (mapping, setup_warnings) = resolve_mapping(table, mapping)?;
    let identifier_column = mapping
        .identifier()
        .ok_or_else(|| Error::MissingIdentifierColumn("no identifier mapping".to_string()))?;
    let identifier_index = table
        .column_index(identifier_column)
        .ok_or_else(|| Error::MissingIdentifierColumn(identifier_column.to_string()))?;

    let identifiers: BTreeSet<String> = (0..table.len())
        .filter_map(|row| table.text_at(row, identifier_index))
        .map(|raw| normalize_identifier(&raw))
        .filter(|egid| !is_missing_identifier(egid))
        .collect();

    info!(
        rows = table.len(),
        unique_identifiers = identifiers.len(),
        setup_warnings = setup_warnings.len(),
        "Enrichment run started"
    );

    Ok(PreparedRun {
        mapping,
        setup_warnings,
        identifiers: identifiers.into_iter().collect(),
    })
}

/// Step 6: one warning per occurrence after the first
///
/// Only blank identifiers are skipped; "0" participates like any other value.
fn duplicate_findings(
    table: &Table,
    identifier_column: &str,
    identifier_index: usize,
) -> Vec<ValidationFinding> {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    let mut normalized = Vec::with_capacity(table.len());

    for row in 0..table.len() {
        let egid = table
            .text_at(row, identifier_index)
            .map(|raw| normalize_identifier(&raw))
            .filter(|egid| !egid.is_empty());
        if let Some(egid) = &egid {
            groups.entry(egid.clone()).or_default().push(row);
        }
        normalized.push(egid);
    }

    let mut findings = Vec::new();
    for (row, egid) in normalized.into_iter().enumerate() {
        let Some(egid) = egid else { continue };
        let Some(rows) = groups.get(&egid) else { continue };
        if rows.len() < 2 || rows[0] == row {
            continue;
        }

        let row_numbers = rows
            .iter()
            .map(|r| (r + 2).to_string())
            .collect::<Vec<_>>()
            .join(", ");
        findings.push(
            ValidationFinding::new(
                row,
                identifier_column,
                RuleId::DuplicateIdentifier,
                format!(
                    "EGID {} occurs {} times (rows: {})",
                    egid,
                    rows.len(),
                    row_numbers
                ),
            )
            .with_value(egid),
        );
    }
    findings
}

/// Column buffers for the eleven output columns
struct OutputColumns {
    canton: Vec<Value>,
    municipality: Vec<Value>,
    postal_code: Vec<Value>,
    street: Vec<Value>,
    house_number: Vec<Value>,
    latitude: Vec<Value>,
    longitude: Vec<Value>,
    easting: Vec<Value>,
    northing: Vec<Value>,
    score: Vec<Value>,
    label: Vec<Value>,
}

impl OutputColumns {
    fn with_capacity(rows: usize) -> Self {
        Self {
            canton: Vec::with_capacity(rows),
            municipality: Vec::with_capacity(rows),
            postal_code: Vec::with_capacity(rows),
            street: Vec::with_capacity(rows),
            house_number: Vec::with_capacity(rows),
            latitude: Vec::with_capacity(rows),
            longitude: Vec::with_capacity(rows),
            easting: Vec::with_capacity(rows),
            northing: Vec::with_capacity(rows),
            score: Vec::with_capacity(rows),
            label: Vec::with_capacity(rows),
        }
    }

    /// Row that never reached the comparison step: registry columns stay null
    fn push_unreached(&mut self, result: MatchResult) {
        for column in [
            &mut self.canton,
            &mut self.municipality,
            &mut self.postal_code,
            &mut self.street,
            &mut self.house_number,
            &mut self.latitude,
            &mut self.longitude,
            &mut self.easting,
            &mut self.northing,
        ] {
            column.push(Value::Null);
        }
        self.push_result(result);
    }

    fn push_record(&mut self, record: &RegistryRecord, result: MatchResult) {
        self.canton.push(text_value(&record.canton));
        self.municipality.push(text_value(&record.municipality));
        self.postal_code.push(text_value(&record.postal_code));
        self.street.push(text_value(&record.street));
        self.house_number.push(text_value(&record.house_number));
        self.latitude.push(number_value(record.latitude));
        self.longitude.push(number_value(record.longitude));
        self.easting.push(number_value(record.easting));
        self.northing.push(number_value(record.northing));
        self.push_result(result);
    }

    fn push_result(&mut self, result: MatchResult) {
        self.score.push(json!(result.score));
        self.label.push(json!(result.label.as_str()));
    }

    fn into_columns(self) -> [(&'static str, Vec<Value>); 11] {
        let [canton, municipality, postal_code, street, house_number, latitude, longitude, easting, northing, score, label] =
            OUTPUT_COLUMNS;
        [
            (canton, self.canton),
            (municipality, self.municipality),
            (postal_code, self.postal_code),
            (street, self.street),
            (house_number, self.house_number),
            (latitude, self.latitude),
            (longitude, self.longitude),
            (easting, self.easting),
            (northing, self.northing),
            (score, self.score),
            (label, self.label),
        ]
    }
}

fn text_value(value: &Option<String>) -> Value {
    value.as_ref().map_or(Value::Null, |v| Value::String(v.clone()))
}

fn number_value(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map_or(Value::Null, Value::Number)
}
