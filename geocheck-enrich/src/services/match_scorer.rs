//! Match Scorer
//!
//! Compares one input row with one registry record and produces an integer
//! score (0-100) plus findings.
//!
//! # Checks
//! 1. **Coordinates**: haversine distance between row and registry position,
//!    a match when within the tolerance (50 m by default)
//! 2. **Address fields**: canton, postal code, municipality, street and house
//!    number, compared after normalization (trim, lowercase, no periods or
//!    commas)
//!
//! A check only counts when the value exists on both sides; absence is never
//! a mismatch.
//!
//! # Scoring
//! `score = round(matches / checks × 100)`. A row with no checks at all
//! scores 100: with nothing to compare there is no basis to penalize it.
//! Keep this default when touching the scorer, a stricter reading silently
//! turns sparse rows into mismatches.

use crate::table::Table;
use crate::types::{
    AddressField, ColumnMapping, LogicalField, RegistryRecord, RuleId, ValidationFinding,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Mean Earth radius used by the haversine formula (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Default coordinate tolerance (meters)
pub const DEFAULT_TOLERANCE_M: f64 = 50.0;

/// Synthetic column name for the aggregated address finding
pub const ADDRESS_COLUMN: &str = "address";

/// Great-circle distance between two WGS84 points in meters
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Normalize an address value for equality comparison
pub fn normalize_text(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| *c != '.' && *c != ',')
        .collect()
}

/// Non-blank values of the mapped fields on one row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowFields {
    values: BTreeMap<LogicalField, String>,
}

impl RowFields {
    /// Read every mapped field of `row` from `table`
    pub fn extract(table: &Table, row: usize, mapping: &ColumnMapping) -> Self {
        Self::extract_resolved(table, row, &Self::resolve_columns(table, mapping))
    }

    /// Column positions of the mapped fields present in `table`
    pub fn resolve_columns(table: &Table, mapping: &ColumnMapping) -> Vec<(LogicalField, usize)> {
        mapping
            .iter()
            .filter_map(|(field, column)| table.column_index(column).map(|i| (field, i)))
            .collect()
    }

    /// [`RowFields::extract`] with positions resolved once per table
    pub fn extract_resolved(table: &Table, row: usize, columns: &[(LogicalField, usize)]) -> Self {
        let values = columns
            .iter()
            .filter_map(|&(field, index)| table.text_at(row, index).map(|v| (field, v)))
            .collect();
        Self { values }
    }

    pub fn with(mut self, field: LogicalField, value: impl Into<String>) -> Self {
        self.values.insert(field, value.into());
        self
    }

    pub fn get(&self, field: LogicalField) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    fn position(&self) -> Option<(f64, f64)> {
        let lat = self.get(LogicalField::Latitude)?.parse::<f64>().ok()?;
        let lon = self.get(LogicalField::Longitude)?.parse::<f64>().ok()?;
        (lat.is_finite() && lon.is_finite()).then_some((lat, lon))
    }
}

/// Result of scoring one row
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    /// Integer score in 0..=100
    pub score: u8,
    pub total_checks: usize,
    pub matches: usize,
    pub findings: Vec<ValidationFinding>,
}

/// Weighted field comparison against a registry record
#[derive(Debug, Clone)]
pub struct MatchScorer {
    tolerance_m: f64,
}

impl Default for MatchScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchScorer {
    pub fn new() -> Self {
        Self {
            tolerance_m: DEFAULT_TOLERANCE_M,
        }
    }

    pub fn with_tolerance(tolerance_m: f64) -> Self {
        Self { tolerance_m }
    }

    /// Score one row against its registry record
    pub fn score(
        &self,
        row_index: usize,
        row: &RowFields,
        record: &RegistryRecord,
        mapping: &ColumnMapping,
    ) -> ScoreOutcome {
        let mut total_checks = 0;
        let mut matches = 0;
        let mut findings = Vec::new();

        // Check 1: coordinates
        if let (Some(lat_col), Some(lon_col)) = (
            mapping.get(LogicalField::Latitude),
            mapping.get(LogicalField::Longitude),
        ) {
            if let (Some((lat, lon)), Some((reg_lat, reg_lon))) = (row.position(), record.position()) {
                total_checks += 1;
                let distance = haversine_distance_m(lat, lon, reg_lat, reg_lon);
                if distance <= self.tolerance_m {
                    matches += 1;
                } else {
                    findings.push(
                        ValidationFinding::new(
                            row_index,
                            format!("{}/{}", lat_col, lon_col),
                            RuleId::CoordinateMismatch,
                            format!(
                                "Coordinates deviate {:.0} m from registry (tolerance {:.0} m)",
                                distance, self.tolerance_m
                            ),
                        )
                        .with_value(format!("{}, {}", lat, lon))
                        .with_suggestion(format!("{}, {}", reg_lat, reg_lon)),
                    );
                }
            }
        }

        // Check 2: address fields, aggregated into one finding
        let mut mismatches = Vec::new();
        for field in AddressField::ALL {
            let (Some(row_value), Some(registry_value)) =
                (row.get(field.logical()), record.address_value(field))
            else {
                continue;
            };
            if mapping.get(field.logical()).is_none() {
                continue;
            }

            total_checks += 1;
            if normalize_text(row_value) == normalize_text(registry_value) {
                matches += 1;
            } else {
                mismatches.push((field, row_value, registry_value));
            }
        }

        if !mismatches.is_empty() {
            let message = mismatches
                .iter()
                .map(|(field, row_value, registry_value)| {
                    format!("{}: '{}' → '{}'", field.label(), row_value, registry_value)
                })
                .collect::<Vec<_>>()
                .join(", ");
            let value = mismatches
                .iter()
                .map(|(_, row_value, _)| *row_value)
                .collect::<Vec<_>>()
                .join(", ");
            let suggestion = mismatches
                .iter()
                .map(|(_, _, registry_value)| *registry_value)
                .collect::<Vec<_>>()
                .join(", ");

            findings.push(
                ValidationFinding::new(
                    row_index,
                    ADDRESS_COLUMN,
                    RuleId::AddressMismatch,
                    format!("Address differs from registry: {}", message),
                )
                .with_value(value)
                .with_suggestion(suggestion),
            );
        }

        let score = if total_checks == 0 {
            100
        } else {
            (matches as f64 / total_checks as f64 * 100.0).round() as u8
        };

        debug!(
            row = row_index,
            egid = %record.egid,
            score,
            total_checks,
            matches,
            "Row scored"
        );

        ScoreOutcome {
            score,
            total_checks,
            matches,
            findings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    fn full_mapping() -> ColumnMapping {
        ColumnMapping::new()
            .with(LogicalField::Egid, "EGID")
            .with(LogicalField::Latitude, "Latitude")
            .with(LogicalField::Longitude, "Longitude")
            .with(LogicalField::Canton, "Kanton")
            .with(LogicalField::Municipality, "Ort")
            .with(LogicalField::PostalCode, "PLZ")
            .with(LogicalField::Street, "Strasse")
            .with(LogicalField::HouseNumber, "Hausnummer")
    }

    fn registry_record() -> RegistryRecord {
        RegistryRecord {
            egid: "190001".to_string(),
            easting: Some(2_683_112.0),
            northing: Some(1_247_947.0),
            latitude: Some(47.377113),
            longitude: Some(8.539163),
            canton: Some("ZH".to_string()),
            municipality: Some("Zürich".to_string()),
            postal_code: Some("8001".to_string()),
            street: Some("Bahnhofstrasse".to_string()),
            house_number: Some("1".to_string()),
            ..Default::default()
        }
    }

    fn identical_row() -> RowFields {
        RowFields::default()
            .with(LogicalField::Egid, "190001")
            .with(LogicalField::Latitude, "47.377113")
            .with(LogicalField::Longitude, "8.539163")
            .with(LogicalField::Canton, "ZH")
            .with(LogicalField::Municipality, "Zürich")
            .with(LogicalField::PostalCode, "8001")
            .with(LogicalField::Street, "Bahnhofstrasse")
            .with(LogicalField::HouseNumber, "1")
    }

    #[test]
    fn test_haversine_known_distances() {
        assert_eq!(haversine_distance_m(47.0, 8.0, 47.0, 8.0), 0.0);
        let d = haversine_distance_m(47.0, 8.0, 47.0003, 8.0);
        assert!((d - 33.358).abs() < 0.01, "got {}", d);
        let d = haversine_distance_m(47.0, 8.0, 47.001, 8.0);
        assert!((d - 111.195).abs() < 0.01, "got {}", d);
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  St. Gallen, "), "st gallen");
        assert_eq!(normalize_text("BAHNHOFSTR."), "bahnhofstr");
    }

    #[test]
    fn test_identical_row_scores_100_without_findings() {
        let outcome = MatchScorer::new().score(0, &identical_row(), &registry_record(), &full_mapping());
        assert_eq!(outcome.score, 100);
        assert_eq!(outcome.total_checks, 6);
        assert!(outcome.findings.is_empty());
    }

    #[test]
    fn test_no_checks_scores_100() {
        let mapping = ColumnMapping::new().with(LogicalField::Egid, "EGID");
        let row = RowFields::default().with(LogicalField::Egid, "190001");
        let outcome = MatchScorer::new().score(0, &row, &registry_record(), &mapping);
        assert_eq!(outcome.total_checks, 0);
        assert_eq!(outcome.score, 100);
    }

    #[test]
    fn test_normalized_equality_matches() {
        let row = identical_row()
            .with(LogicalField::Street, " bahnhofstrasse. ")
            .with(LogicalField::Canton, "zh");
        let outcome = MatchScorer::new().score(0, &row, &registry_record(), &full_mapping());
        assert_eq!(outcome.score, 100);
    }

    #[test]
    fn test_address_mismatches_aggregate_into_one_finding() {
        let row = identical_row()
            .with(LogicalField::PostalCode, "8000")
            .with(LogicalField::Street, "Limmatquai");
        let outcome = MatchScorer::new().score(4, &row, &registry_record(), &full_mapping());

        // 4 of 6 checks match
        assert_eq!(outcome.score, 67);
        assert_eq!(outcome.findings.len(), 1);
        let finding = &outcome.findings[0];
        assert_eq!(finding.rule_id, RuleId::AddressMismatch);
        assert_eq!(finding.severity, Severity::Warning);
        assert_eq!(finding.column, "address");
        assert_eq!(finding.row_index, 4);
        assert!(finding.message.contains("Postal code: '8000' → '8001'"));
        assert!(finding.message.contains("Street: 'Limmatquai' → 'Bahnhofstrasse'"));
        assert_eq!(finding.suggestion.as_deref(), Some("8001, Bahnhofstrasse"));
    }

    #[test]
    fn test_coordinates_beyond_tolerance_emit_warning() {
        let row = identical_row().with(LogicalField::Latitude, "47.378113");
        let outcome = MatchScorer::new().score(0, &row, &registry_record(), &full_mapping());

        assert_eq!(outcome.score, 83);
        assert_eq!(outcome.findings.len(), 1);
        let finding = &outcome.findings[0];
        assert_eq!(finding.rule_id, RuleId::CoordinateMismatch);
        assert_eq!(finding.column, "Latitude/Longitude");
        assert_eq!(finding.suggestion.as_deref(), Some("47.377113, 8.539163"));
    }

    #[test]
    fn test_coordinates_within_tolerance_match() {
        let row = identical_row().with(LogicalField::Latitude, "47.377413");
        let outcome = MatchScorer::new().score(0, &row, &registry_record(), &full_mapping());
        assert_eq!(outcome.score, 100);
        assert!(outcome.findings.is_empty());
    }

    #[test]
    fn test_absent_registry_value_is_not_a_check() {
        let mut record = registry_record();
        record.municipality = None;
        record.latitude = None;
        record.longitude = None;
        let outcome = MatchScorer::new().score(0, &identical_row(), &record, &full_mapping());
        assert_eq!(outcome.total_checks, 4);
        assert_eq!(outcome.score, 100);
    }

    #[test]
    fn test_all_mismatched_scores_zero() {
        let mapping = ColumnMapping::new()
            .with(LogicalField::Egid, "EGID")
            .with(LogicalField::Canton, "Kanton");
        let row = RowFields::default().with(LogicalField::Canton, "BE");
        let outcome = MatchScorer::new().score(0, &row, &registry_record(), &mapping);
        assert_eq!(outcome.score, 0);
    }

    #[test]
    fn test_resolved_columns_skip_missing_and_read_by_position() {
        let table = Table::from_rows(
            ["Notes", "PLZ", "EGID"],
            [vec!["x", "8001", "190001"], vec!["y", " ", "190002"]],
        )
        .unwrap();
        let mapping = ColumnMapping::new()
            .with(LogicalField::Egid, "EGID")
            .with(LogicalField::PostalCode, "PLZ")
            .with(LogicalField::Street, "Strasse");

        let columns = RowFields::resolve_columns(&table, &mapping);
        assert_eq!(
            columns,
            vec![(LogicalField::Egid, 2), (LogicalField::PostalCode, 1)]
        );

        let first = RowFields::extract_resolved(&table, 0, &columns);
        assert_eq!(first, RowFields::extract(&table, 0, &mapping));
        assert_eq!(first.get(LogicalField::PostalCode), Some("8001"));
        assert_eq!(first.get(LogicalField::Street), None);

        let second = RowFields::extract_resolved(&table, 1, &columns);
        assert_eq!(second.get(LogicalField::Egid), Some("190002"));
        assert_eq!(second.get(LogicalField::PostalCode), None);
    }
}
