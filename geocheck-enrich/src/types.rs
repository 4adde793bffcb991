//! Core Types for the Registry Enrichment Engine
//!
//! Defines the data model shared by the scorer, the batch lookup and the
//! pipeline:
//! - **Column mapping**: logical field → actual column name
//! - **Registry record**: one authoritative building entry
//! - **Match result**: score (0-100) plus label
//! - **Validation finding**: one structured row-level outcome
//!
//! All of these are created fresh per pipeline run.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Normalize a raw building identifier for comparison and cache lookup
///
/// Trims whitespace; float-shaped text ("123.0") is truncated to the
/// equivalent integer string ("123"). Text that is not a valid number is
/// returned trimmed but otherwise untouched.
///
/// The integer part is taken from the text itself, so identifiers wider
/// than any machine integer keep every digit.
pub fn normalize_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains('.') {
        if let Ok(value) = trimmed.parse::<f64>() {
            if value.is_finite() {
                if trimmed.contains(['e', 'E']) {
                    return format!("{:.0}", value.trunc());
                }
                return integer_part(trimmed);
            }
        }
    }
    trimmed.to_string()
}

/// Digits before the decimal point, sign kept, leading zeros dropped
fn integer_part(number: &str) -> String {
    let (negative, unsigned) = match number.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, number.strip_prefix('+').unwrap_or(number)),
    };
    let whole = unsigned.split_once('.').map_or(unsigned, |(whole, _)| whole);
    let digits = whole.trim_start_matches('0');
    match (digits.is_empty(), negative) {
        (true, _) => "0".to_string(),
        (false, true) => format!("-{}", digits),
        (false, false) => digits.to_string(),
    }
}

/// True when a normalized identifier carries no usable value (blank or zero)
pub fn is_missing_identifier(normalized: &str) -> bool {
    normalized.is_empty() || normalized == "0"
}

// ============================================================================
// Column Mapping
// ============================================================================

/// Logical input field the engine knows how to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalField {
    Egid,
    Latitude,
    Longitude,
    Canton,
    Municipality,
    PostalCode,
    Street,
    HouseNumber,
}

impl LogicalField {
    /// Every logical field, identifier first
    pub const ALL: [LogicalField; 8] = [
        LogicalField::Egid,
        LogicalField::Latitude,
        LogicalField::Longitude,
        LogicalField::Canton,
        LogicalField::Municipality,
        LogicalField::PostalCode,
        LogicalField::Street,
        LogicalField::HouseNumber,
    ];

    /// Key used in mapping configuration (`--map postal_code=PLZ`)
    pub fn key(self) -> &'static str {
        match self {
            LogicalField::Egid => "egid",
            LogicalField::Latitude => "latitude",
            LogicalField::Longitude => "longitude",
            LogicalField::Canton => "canton",
            LogicalField::Municipality => "municipality",
            LogicalField::PostalCode => "postal_code",
            LogicalField::Street => "street",
            LogicalField::HouseNumber => "house_number",
        }
    }

    /// Parse a mapping key; `identifier` is accepted as an alias for `egid`
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim().to_lowercase().replace('-', "_");
        if key == "identifier" {
            return Some(LogicalField::Egid);
        }
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    /// Column name expected by auto-detection (matched case-insensitively)
    pub fn expected_column(self) -> &'static str {
        match self {
            LogicalField::Egid => "EGID",
            LogicalField::Latitude => "Latitude",
            LogicalField::Longitude => "Longitude",
            LogicalField::Canton => "Kanton",
            LogicalField::Municipality => "Ort",
            LogicalField::PostalCode => "PLZ",
            LogicalField::Street => "Strasse",
            LogicalField::HouseNumber => "Hausnummer",
        }
    }

    /// Only the identifier is mandatory
    pub fn is_required(self) -> bool {
        self == LogicalField::Egid
    }
}

impl fmt::Display for LogicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Address fields compared against the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressField {
    Canton,
    PostalCode,
    Municipality,
    Street,
    HouseNumber,
}

impl AddressField {
    /// Comparison order (also the order of fragments in mismatch messages)
    pub const ALL: [AddressField; 5] = [
        AddressField::Canton,
        AddressField::PostalCode,
        AddressField::Municipality,
        AddressField::Street,
        AddressField::HouseNumber,
    ];

    pub fn logical(self) -> LogicalField {
        match self {
            AddressField::Canton => LogicalField::Canton,
            AddressField::PostalCode => LogicalField::PostalCode,
            AddressField::Municipality => LogicalField::Municipality,
            AddressField::Street => LogicalField::Street,
            AddressField::HouseNumber => LogicalField::HouseNumber,
        }
    }

    /// Human-readable label used in finding messages
    pub fn label(self) -> &'static str {
        match self {
            AddressField::Canton => "Canton",
            AddressField::PostalCode => "Postal code",
            AddressField::Municipality => "Municipality",
            AddressField::Street => "Street",
            AddressField::HouseNumber => "House number",
        }
    }

    /// Info rule emitted when the field is mapped but blank on a row
    pub fn missing_rule(self) -> RuleId {
        match self {
            AddressField::Canton => RuleId::CantonMissing,
            AddressField::PostalCode => RuleId::PostalCodeMissing,
            AddressField::Municipality => RuleId::MunicipalityMissing,
            AddressField::Street => RuleId::StreetMissing,
            AddressField::HouseNumber => RuleId::HouseNumberMissing,
        }
    }
}

/// Mapping from logical field to the actual column name in the input table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMapping {
    columns: BTreeMap<LogicalField, String>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit `(field, column)` pairs
    ///
    /// A logical field may be mapped only once; a repeat is rejected rather
    /// than silently replacing the earlier column.
    pub fn from_entries<I, C>(entries: I) -> geocheck_common::Result<Self>
    where
        I: IntoIterator<Item = (LogicalField, C)>,
        C: Into<String>,
    {
        let mut mapping = Self::new();
        for (field, column) in entries {
            let column = column.into();
            if let Some(previous) = mapping.get(field) {
                return Err(geocheck_common::Error::InvalidInput(format!(
                    "field '{}' mapped more than once ('{}' and '{}')",
                    field, previous, column
                )));
            }
            mapping.insert(field, column);
        }
        Ok(mapping)
    }

    /// Builder-style insert
    pub fn with(mut self, field: LogicalField, column: impl Into<String>) -> Self {
        self.insert(field, column);
        self
    }

    pub fn insert(&mut self, field: LogicalField, column: impl Into<String>) {
        self.columns.insert(field, column.into());
    }

    pub fn remove(&mut self, field: LogicalField) -> Option<String> {
        self.columns.remove(&field)
    }

    pub fn get(&self, field: LogicalField) -> Option<&str> {
        self.columns.get(&field).map(String::as_str)
    }

    pub fn identifier(&self) -> Option<&str> {
        self.get(LogicalField::Egid)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LogicalField, &str)> {
        self.columns.iter().map(|(f, c)| (*f, c.as_str()))
    }
}

// ============================================================================
// Registry Record
// ============================================================================

/// One authoritative building entry from the registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    /// Building identifier as reported by the registry
    pub egid: String,
    /// LV95 easting
    pub easting: Option<f64>,
    /// LV95 northing
    pub northing: Option<f64>,
    /// WGS84 latitude derived from easting/northing
    pub latitude: Option<f64>,
    /// WGS84 longitude derived from easting/northing
    pub longitude: Option<f64>,
    /// Two-letter canton code
    pub canton: Option<String>,
    pub municipality: Option<String>,
    pub postal_code: Option<String>,
    pub street: Option<String>,
    pub house_number: Option<String>,
    /// Registry attributes not otherwise modeled
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl RegistryRecord {
    /// Registry value of an address field
    pub fn address_value(&self, field: AddressField) -> Option<&str> {
        match field {
            AddressField::Canton => self.canton.as_deref(),
            AddressField::PostalCode => self.postal_code.as_deref(),
            AddressField::Municipality => self.municipality.as_deref(),
            AddressField::Street => self.street.as_deref(),
            AddressField::HouseNumber => self.house_number.as_deref(),
        }
    }

    /// Geodetic position, when both coordinates are known
    pub fn position(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

// ============================================================================
// Match Result
// ============================================================================

/// Categorical match outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLabel {
    Match,
    Partial,
    Mismatch,
    NotFound,
}

impl MatchLabel {
    /// Lowest score labelled `Match`
    pub const MATCH_THRESHOLD: u8 = 90;
    /// Lowest score labelled `Partial`
    pub const PARTIAL_THRESHOLD: u8 = 50;

    /// Label for a compared row (never `NotFound`)
    pub fn from_score(score: u8) -> Self {
        if score >= Self::MATCH_THRESHOLD {
            MatchLabel::Match
        } else if score >= Self::PARTIAL_THRESHOLD {
            MatchLabel::Partial
        } else {
            MatchLabel::Mismatch
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchLabel::Match => "match",
            MatchLabel::Partial => "partial",
            MatchLabel::Mismatch => "mismatch",
            MatchLabel::NotFound => "not_found",
        }
    }
}

impl fmt::Display for MatchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-row match outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Integer score in 0..=100
    pub score: u8,
    pub label: MatchLabel,
}

impl MatchResult {
    pub fn from_score(score: u8) -> Self {
        let score = score.min(100);
        Self {
            score,
            label: MatchLabel::from_score(score),
        }
    }

    /// Identifier missing or absent from the registry
    pub fn not_found() -> Self {
        Self {
            score: 0,
            label: MatchLabel::NotFound,
        }
    }
}

// ============================================================================
// Findings
// ============================================================================

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Fixed rule taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleId {
    MissingIdentifier,
    IdentifierNotFound,
    DuplicateIdentifier,
    CantonMissing,
    MunicipalityMissing,
    PostalCodeMissing,
    StreetMissing,
    HouseNumberMissing,
    CoordinateMismatch,
    AddressMismatch,
}

impl RuleId {
    /// Stable rule code
    pub fn code(self) -> &'static str {
        match self {
            RuleId::MissingIdentifier => "GWR-001",
            RuleId::IdentifierNotFound => "GWR-002",
            RuleId::DuplicateIdentifier => "GWR-003",
            RuleId::CantonMissing => "GWR-010",
            RuleId::MunicipalityMissing => "GWR-011",
            RuleId::PostalCodeMissing => "GWR-012",
            RuleId::StreetMissing => "GWR-013",
            RuleId::HouseNumberMissing => "GWR-014",
            RuleId::CoordinateMismatch => "GWR-020",
            RuleId::AddressMismatch => "GWR-021",
        }
    }

    /// Short rule name for reports
    pub fn name(self) -> &'static str {
        match self {
            RuleId::MissingIdentifier => "missing-identifier",
            RuleId::IdentifierNotFound => "identifier-not-found",
            RuleId::DuplicateIdentifier => "duplicate-identifier",
            RuleId::CantonMissing => "canton-missing",
            RuleId::MunicipalityMissing => "municipality-missing",
            RuleId::PostalCodeMissing => "postal-code-missing",
            RuleId::StreetMissing => "street-missing",
            RuleId::HouseNumberMissing => "house-number-missing",
            RuleId::CoordinateMismatch => "coordinate-mismatch",
            RuleId::AddressMismatch => "address-mismatch",
        }
    }

    /// Severity attached to every finding of this rule
    pub fn severity(self) -> Severity {
        match self {
            RuleId::MissingIdentifier | RuleId::IdentifierNotFound => Severity::Error,
            RuleId::DuplicateIdentifier
            | RuleId::CoordinateMismatch
            | RuleId::AddressMismatch => Severity::Warning,
            RuleId::CantonMissing
            | RuleId::MunicipalityMissing
            | RuleId::PostalCodeMissing
            | RuleId::StreetMissing
            | RuleId::HouseNumberMissing => Severity::Info,
        }
    }
}

impl Serialize for RuleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.name())
    }
}

/// One structured validation outcome attached to a row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationFinding {
    /// 0-based row index in the input table
    pub row_index: usize,
    /// Spreadsheet row number (header is row 1)
    pub row_number: usize,
    /// Source column, or a synthetic name such as "address"
    pub column: String,
    pub rule_id: RuleId,
    pub rule_name: &'static str,
    pub severity: Severity,
    pub message: String,
    pub value: Option<String>,
    pub suggestion: Option<String>,
}

impl ValidationFinding {
    /// Create a finding; severity follows the rule
    pub fn new(
        row_index: usize,
        column: impl Into<String>,
        rule_id: RuleId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row_index,
            row_number: row_index + 2,
            column: column.into(),
            rule_id,
            rule_name: rule_id.name(),
            severity: rule_id.severity(),
            message: message.into(),
            value: None,
            suggestion: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Aggregate counts over one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total_rows: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub match_count: usize,
    pub partial_count: usize,
    pub mismatch_count: usize,
    pub not_found_count: usize,
    /// Rows without any error-severity finding
    pub passed_rows: usize,
}

impl Summary {
    /// Compute counts from per-row results and the finding list
    pub fn compute(results: &[MatchResult], findings: &[ValidationFinding]) -> Self {
        let mut summary = Summary {
            total_rows: results.len(),
            ..Default::default()
        };

        for result in results {
            match result.label {
                MatchLabel::Match => summary.match_count += 1,
                MatchLabel::Partial => summary.partial_count += 1,
                MatchLabel::Mismatch => summary.mismatch_count += 1,
                MatchLabel::NotFound => summary.not_found_count += 1,
            }
        }

        let mut error_rows = std::collections::BTreeSet::new();
        for finding in findings {
            match finding.severity {
                Severity::Error => {
                    summary.error_count += 1;
                    error_rows.insert(finding.row_index);
                }
                Severity::Warning => summary.warning_count += 1,
                Severity::Info => summary.info_count += 1,
            }
        }

        summary.passed_rows = summary.total_rows.saturating_sub(error_rows.len());
        summary
    }

    /// Passed rows as a percentage, one decimal; `None` for an empty table
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_rows == 0 {
            return None;
        }
        let rate = self.passed_rows as f64 / self.total_rows as f64 * 100.0;
        Some((rate * 10.0).round() / 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(normalize_identifier(" 123 "), "123");
        assert_eq!(normalize_identifier("123.0"), "123");
        assert_eq!(normalize_identifier("123.9"), "123");
        assert_eq!(normalize_identifier("0.0"), "0");
        assert_eq!(normalize_identifier("abc"), "abc");
        assert_eq!(normalize_identifier("1.2.3"), "1.2.3");
        assert_eq!(normalize_identifier("   "), "");
        assert_eq!(normalize_identifier("007.0"), "7");
        assert_eq!(normalize_identifier("-42.7"), "-42");
        assert_eq!(normalize_identifier("-0.5"), "0");
        assert_eq!(normalize_identifier("+15.0"), "15");
        assert_eq!(normalize_identifier(".5"), "0");
        assert_eq!(normalize_identifier("1.5e3"), "1500");
    }

    #[test]
    fn test_normalize_wide_identifiers_keeps_every_digit() {
        let a = normalize_identifier("123456789012345678901234.0");
        let b = normalize_identifier("123456789012345678901235.0");
        assert_eq!(a, "123456789012345678901234");
        assert_eq!(b, "123456789012345678901235");
        assert_ne!(a, b);
        assert_eq!(normalize_identifier("9223372036854775808.0"), "9223372036854775808");
    }

    #[test]
    fn test_mapping_from_entries() {
        let mapping = ColumnMapping::from_entries([
            (LogicalField::Egid, "ID"),
            (LogicalField::Canton, "KT"),
        ])
        .unwrap();
        assert_eq!(mapping.identifier(), Some("ID"));
        assert_eq!(mapping.get(LogicalField::Canton), Some("KT"));
    }

    #[test]
    fn test_mapping_from_entries_rejects_repeated_field() {
        let err = ColumnMapping::from_entries([
            (LogicalField::Egid, "ID"),
            (LogicalField::Egid, "Gebaeude"),
        ])
        .unwrap_err();
        assert!(matches!(err, geocheck_common::Error::InvalidInput(_)));
        assert!(err.to_string().contains("egid"));
    }

    #[test]
    fn test_missing_identifier() {
        assert!(is_missing_identifier(""));
        assert!(is_missing_identifier("0"));
        assert!(is_missing_identifier(&normalize_identifier("0.0")));
        assert!(!is_missing_identifier("190001"));
    }

    #[test]
    fn test_label_boundaries() {
        assert_eq!(MatchLabel::from_score(100), MatchLabel::Match);
        assert_eq!(MatchLabel::from_score(90), MatchLabel::Match);
        assert_eq!(MatchLabel::from_score(89), MatchLabel::Partial);
        assert_eq!(MatchLabel::from_score(50), MatchLabel::Partial);
        assert_eq!(MatchLabel::from_score(49), MatchLabel::Mismatch);
        assert_eq!(MatchLabel::from_score(0), MatchLabel::Mismatch);
    }

    #[test]
    fn test_not_found_forces_zero() {
        let result = MatchResult::not_found();
        assert_eq!(result.score, 0);
        assert_eq!(result.label, MatchLabel::NotFound);
    }

    #[test]
    fn test_logical_field_keys() {
        assert_eq!(LogicalField::from_key("postal-code"), Some(LogicalField::PostalCode));
        assert_eq!(LogicalField::from_key("Identifier"), Some(LogicalField::Egid));
        assert_eq!(LogicalField::from_key("floor"), None);
        for field in LogicalField::ALL {
            assert_eq!(LogicalField::from_key(field.key()), Some(field));
        }
    }

    #[test]
    fn test_missing_rules_are_distinct_info() {
        let rules: std::collections::HashSet<_> =
            AddressField::ALL.iter().map(|f| f.missing_rule()).collect();
        assert_eq!(rules.len(), 5);
        assert!(rules.iter().all(|r| r.severity() == Severity::Info));
    }

    #[test]
    fn test_summary_passed_rows_counts_distinct_error_rows() {
        let results = vec![
            MatchResult::not_found(),
            MatchResult::from_score(100),
            MatchResult::from_score(60),
        ];
        let findings = vec![
            ValidationFinding::new(0, "EGID", RuleId::MissingIdentifier, "EGID missing"),
            ValidationFinding::new(0, "EGID", RuleId::DuplicateIdentifier, "dup"),
            ValidationFinding::new(2, "address", RuleId::AddressMismatch, "differs"),
        ];

        let summary = Summary::compute(&results, &findings);
        assert_eq!(summary.total_rows, 3);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.warning_count, 2);
        assert_eq!(summary.passed_rows, 2);
        assert_eq!(summary.match_count, 1);
        assert_eq!(summary.partial_count, 1);
        assert_eq!(summary.not_found_count, 1);
        assert_eq!(summary.success_rate(), Some(66.7));
    }

    #[test]
    fn test_finding_serializes_rule_code() {
        let finding = ValidationFinding::new(3, "EGID", RuleId::IdentifierNotFound, "not found")
            .with_value("123");
        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["rule_id"], "GWR-002");
        assert_eq!(json["row_number"], 5);
        assert_eq!(json["severity"], "error");
    }
}
