//! In-memory tabular dataset
//!
//! Columns are ordered; cells are JSON values so a column can carry text,
//! numbers, or nulls side by side. Columns the engine does not understand
//! are carried through untouched.

use serde_json::Value;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

/// Table construction and I/O errors
#[derive(Debug, Error)]
pub enum TableError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Row {row} has {found} cells, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Column length mismatch for '{column}': {found} values for {expected} rows")]
    ColumnLength {
        column: String,
        expected: usize,
        found: usize,
    },
}

/// Ordered columns and rows of JSON cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from string literals; empty strings become nulls
    pub fn from_rows<C, R, S>(columns: C, rows: R) -> Result<Self, TableError>
    where
        C: IntoIterator<Item = S>,
        R: IntoIterator<Item = Vec<S>>,
        S: AsRef<str>,
    {
        let mut table = Table::new(columns.into_iter().map(|c| c.as_ref().to_string()).collect());
        for row in rows {
            table.push_row(row.iter().map(|s| text_cell(s.as_ref())).collect())?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                row: self.rows.len(),
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Raw cell, `None` when the row or column does not exist
    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        self.cell_at(row, self.column_index(column)?)
    }

    /// Raw cell by column position
    ///
    /// Row loops resolve the position once with [`Table::column_index`]
    /// and use this instead of [`Table::cell`].
    pub fn cell_at(&self, row: usize, index: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(index))
    }

    /// Cell as trimmed text; nulls and blank strings yield `None`
    pub fn text(&self, row: usize, column: &str) -> Option<String> {
        self.cell(row, column).and_then(value_text)
    }

    /// [`Table::text`] by column position
    pub fn text_at(&self, row: usize, index: usize) -> Option<String> {
        self.cell_at(row, index).and_then(value_text)
    }

    /// Replace a column's values, appending the column if it is new
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) -> Result<(), TableError> {
        if values.len() != self.rows.len() {
            return Err(TableError::ColumnLength {
                column: name.to_string(),
                expected: self.rows.len(),
                found: values.len(),
            });
        }

        match self.column_index(name) {
            Some(index) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[index] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(())
    }

    /// Read a CSV document with a header row
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(false)
            .trim(csv::Trim::None)
            .from_reader(reader);

        let columns = csv_reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();
        let mut table = Table::new(columns);

        for record in csv_reader.records() {
            let record = record?;
            table.push_row(record.iter().map(text_cell).collect())?;
        }
        Ok(table)
    }

    pub fn read_csv(path: &Path) -> Result<Self, TableError> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(std::io::BufReader::new(file))
    }

    /// Write the table as CSV; nulls become empty cells
    pub fn to_csv_writer<W: Write>(&self, writer: W) -> Result<(), TableError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(&self.columns)?;
        for row in &self.rows {
            csv_writer.write_record(row.iter().map(csv_text))?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), TableError> {
        let file = std::fs::File::create(path)?;
        self.to_csv_writer(std::io::BufWriter::new(file))
    }
}

/// Text cell; empty input becomes null
fn text_cell(raw: &str) -> Value {
    if raw.is_empty() {
        Value::Null
    } else {
        Value::String(raw.to_string())
    }
}

/// Trimmed text of a cell, `None` for null or blank
pub fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn csv_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
