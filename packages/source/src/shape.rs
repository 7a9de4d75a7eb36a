//! JSON-to-table shape inference.
//!
//! The BI connector has answered with several layouts over time. The
//! recognized shapes are:
//!
//! * array of arrays, first row is the header
//! * array of objects (columns are the union of keys, first-seen order)
//! * an object wrapping either array under `data`, `result`, `items` or
//!   `rows`
//! * an object of equal-length column arrays
//!
//! Anything else is [`SourceError::UnrecognizedShape`]. A recognized
//! shape with no rows is an empty table, not an error.

use serde_json::{Map, Value};

use crate::SourceError;

/// Keys under which a response may wrap its rows.
const WRAPPER_KEYS: [&str; 4] = ["data", "result", "items", "rows"];

/// A rectangular table of JSON cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    /// Column names.
    pub columns: Vec<String>,
    /// Rows, each exactly `columns.len()` cells.
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Index of a column by case-insensitive name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.trim().eq_ignore_ascii_case(name.trim()))
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Infers a table from a JSON payload.
///
/// # Errors
///
/// Returns [`SourceError::UnrecognizedShape`] if the payload matches none
/// of the known layouts.
pub fn infer_table(value: &Value) -> Result<Table, SourceError> {
    match value {
        Value::Array(items) => from_rows(items),
        Value::Object(map) => {
            for key in WRAPPER_KEYS {
                if let Some(Value::Array(items)) = map.get(key) {
                    log::trace!("Rows found under '{key}'");
                    return from_rows(items);
                }
            }
            from_columns(map)
        }
        other => Err(SourceError::UnrecognizedShape(describe(other).to_string())),
    }
}

fn from_rows(items: &[Value]) -> Result<Table, SourceError> {
    if items.is_empty() {
        return Ok(Table::default());
    }
    if items.iter().all(Value::is_array) {
        return from_header_rows(items);
    }
    if items.iter().all(Value::is_object) {
        return Ok(from_objects(items));
    }
    Err(SourceError::UnrecognizedShape(
        "array mixing rows of different kinds".to_string(),
    ))
}

fn from_header_rows(items: &[Value]) -> Result<Table, SourceError> {
    let Some(Value::Array(header)) = items.first() else {
        return Ok(Table::default());
    };
    let columns = header
        .iter()
        .map(|cell| match cell {
            Value::String(name) => Ok(name.clone()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(SourceError::UnrecognizedShape(format!(
                "header row contains {}",
                describe(other)
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let width = columns.len();
    let rows = items[1..]
        .iter()
        .filter_map(Value::as_array)
        .map(|row| {
            let mut cells: Vec<Value> = row.iter().take(width).cloned().collect();
            cells.resize(width, Value::Null);
            cells
        })
        .collect();

    Ok(Table { columns, rows })
}

fn from_objects(items: &[Value]) -> Table {
    let mut columns: Vec<String> = Vec::new();
    for object in items.iter().filter_map(Value::as_object) {
        for key in object.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let rows = items
        .iter()
        .filter_map(Value::as_object)
        .map(|object| {
            columns
                .iter()
                .map(|column| object.get(column).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    Table { columns, rows }
}

fn from_columns(map: &Map<String, Value>) -> Result<Table, SourceError> {
    if map.is_empty() {
        return Err(SourceError::UnrecognizedShape("empty object".to_string()));
    }

    let mut columns = Vec::with_capacity(map.len());
    let mut arrays = Vec::with_capacity(map.len());
    for (key, value) in map {
        let Value::Array(cells) = value else {
            return Err(SourceError::UnrecognizedShape(format!(
                "object field '{key}' is {}",
                describe(value)
            )));
        };
        columns.push(key.clone());
        arrays.push(cells);
    }

    let height = arrays[0].len();
    if arrays.iter().any(|cells| cells.len() != height) {
        return Err(SourceError::UnrecognizedShape(
            "column arrays of different lengths".to_string(),
        ));
    }

    let rows = (0..height)
        .map(|i| arrays.iter().map(|cells| cells[i].clone()).collect())
        .collect();

    Ok(Table { columns, rows })
}

const fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
