//! Column detection and mapping resolution
//!
//! Auto-detection matches each logical field's expected column name
//! case-insensitively against the table header. Setup problems are reported
//! as plain warning strings, not findings; only an unresolvable identifier
//! column is fatal.

use crate::table::Table;
use crate::types::{ColumnMapping, LogicalField};
use geocheck_common::{Error, Result};
use tracing::{debug, warn};

/// Detect a mapping from header names
///
/// Returns the mapping plus one warning per expected column not found.
pub fn detect_columns<S: AsRef<str>>(columns: &[S]) -> (ColumnMapping, Vec<String>) {
    let mut mapping = ColumnMapping::new();
    let mut warnings = Vec::new();

    for field in LogicalField::ALL {
        let expected = field.expected_column();
        let found = columns
            .iter()
            .map(AsRef::as_ref)
            .find(|c| c.trim().eq_ignore_ascii_case(expected));

        match found {
            Some(column) => {
                debug!(field = %field, column = %column, "Column detected");
                mapping.insert(field, column);
            }
            None if field.is_required() => {
                warnings.push(format!(
                    "Required column '{}' ({}) not found",
                    expected, field
                ));
            }
            None => {
                warnings.push(format!(
                    "Optional column '{}' ({}) not found, check skipped",
                    expected, field
                ));
            }
        }
    }

    (mapping, warnings)
}

/// Resolve the mapping a run will use
///
/// An absent or empty mapping is auto-detected. A caller-supplied mapping
/// keeps its entries, except optional ones naming columns the table does
/// not have (dropped with a warning). Fails with
/// [`Error::MissingIdentifierColumn`] when the identifier column cannot be
/// resolved.
pub fn resolve_mapping(
    table: &Table,
    mapping: Option<ColumnMapping>,
) -> Result<(ColumnMapping, Vec<String>)> {
    let (mut mapping, mut warnings) = match mapping {
        Some(mapping) if !mapping.is_empty() => (mapping, Vec::new()),
        _ => detect_columns(table.columns()),
    };

    let identifier = match mapping.identifier() {
        Some(column) => column.to_string(),
        None => {
            return Err(Error::MissingIdentifierColumn(format!(
                "no column mapped for '{}' (expected '{}')",
                LogicalField::Egid,
                LogicalField::Egid.expected_column()
            )))
        }
    };
    if !table.has_column(&identifier) {
        return Err(Error::MissingIdentifierColumn(format!(
            "mapped column '{}' is not in the table",
            identifier
        )));
    }

    let stale: Vec<(LogicalField, String)> = mapping
        .iter()
        .filter(|(field, column)| !field.is_required() && !table.has_column(column))
        .map(|(field, column)| (field, column.to_string()))
        .collect();
    for (field, column) in stale {
        mapping.remove(field);
        warn!(field = %field, column = %column, "Mapped column missing from table");
        warnings.push(format!(
            "Mapped column '{}' for {} not found, check skipped",
            column, field
        ));
    }

    Ok((mapping, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_is_case_insensitive() {
        let (mapping, warnings) = detect_columns(&["egid", "KANTON", "plz", "Notes"]);

        assert_eq!(mapping.identifier(), Some("egid"));
        assert_eq!(mapping.get(LogicalField::Canton), Some("KANTON"));
        assert_eq!(mapping.get(LogicalField::PostalCode), Some("plz"));
        assert_eq!(mapping.get(LogicalField::Street), None);
        // Latitude, Longitude, Ort, Strasse, Hausnummer
        assert_eq!(warnings.len(), 5);
        assert!(warnings.iter().all(|w| w.starts_with("Optional")));
    }

    #[test]
    fn test_detect_reports_required_column() {
        let (mapping, warnings) = detect_columns(&["Kanton"]);
        assert!(mapping.identifier().is_none());
        assert!(warnings.iter().any(|w| w.starts_with("Required column 'EGID'")));
    }

    #[test]
    fn test_resolve_missing_identifier_is_fatal() {
        let table = Table::from_rows(["Kanton"], [vec!["BE"]]).unwrap();
        let err = resolve_mapping(&table, None).unwrap_err();
        assert!(matches!(err, Error::MissingIdentifierColumn(_)));
    }

    #[test]
    fn test_resolve_explicit_identifier_must_exist() {
        let table = Table::from_rows(["EGID"], [vec!["1"]]).unwrap();
        let mapping = ColumnMapping::new().with(LogicalField::Egid, "building_id");
        let err = resolve_mapping(&table, Some(mapping)).unwrap_err();
        assert!(matches!(err, Error::MissingIdentifierColumn(_)));
    }

    #[test]
    fn test_resolve_drops_absent_optional_columns() {
        let table = Table::from_rows(["id", "canton"], [vec!["1", "BE"]]).unwrap();
        let mapping = ColumnMapping::new()
            .with(LogicalField::Egid, "id")
            .with(LogicalField::Canton, "canton")
            .with(LogicalField::Street, "street_name");

        let (resolved, warnings) = resolve_mapping(&table, Some(mapping)).unwrap();
        assert_eq!(resolved.get(LogicalField::Canton), Some("canton"));
        assert_eq!(resolved.get(LogicalField::Street), None);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("street_name"));
    }

    #[test]
    fn test_resolve_empty_mapping_auto_detects() {
        let table = Table::from_rows(["EGID", "Ort"], [vec!["1", "Bern"]]).unwrap();
        let (resolved, _) = resolve_mapping(&table, Some(ColumnMapping::new())).unwrap();
        assert_eq!(resolved.identifier(), Some("EGID"));
        assert_eq!(resolved.get(LogicalField::Municipality), Some("Ort"));
    }
}
