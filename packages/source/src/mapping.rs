//! Table-to-record mapping.

use crm_geocode_matcher_models::CrmRecord;
use crm_geocode_matcher_models::config::FieldMapping;
use serde_json::Value;

use crate::SourceError;
use crate::shape::Table;

/// Builds [`CrmRecord`]s from `table` using the column names in
/// `fields`.
///
/// Column names are matched case-insensitively. Only the id column is
/// required; a missing title, place or province column leaves that
/// field empty on every record. Rows with a blank id are skipped.
///
/// # Errors
///
/// Returns [`SourceError::MissingColumn`] if the id column is absent
/// from a non-empty table.
pub fn records_from_table(
    table: &Table,
    fields: &FieldMapping,
) -> Result<Vec<CrmRecord>, SourceError> {
    if table.is_empty() {
        return Ok(Vec::new());
    }

    let id_col = table
        .column(&fields.id)
        .ok_or_else(|| SourceError::MissingColumn(fields.id.clone()))?;
    let title_col = table.column(&fields.title);
    let place_col = table.column(&fields.place);
    let province_col = table.column(&fields.province);

    for (name, col) in [
        (&fields.title, title_col),
        (&fields.place, place_col),
        (&fields.province, province_col),
    ] {
        if col.is_none() {
            log::warn!("Column '{name}' not found; field left empty");
        }
    }

    let cell = |row: &[Value], col: Option<usize>| col.and_then(|i| row.get(i)).and_then(stringify);

    let mut skipped = 0usize;
    let records: Vec<CrmRecord> = table
        .rows
        .iter()
        .map(Vec::as_slice)
        .filter_map(|row| {
            let Some(id) = cell(row, Some(id_col)).filter(|id| !id.trim().is_empty()) else {
                skipped += 1;
                return None;
            };
            Some(CrmRecord {
                id: id.trim().to_string(),
                title: cell(row, title_col).unwrap_or_default(),
                place: cell(row, place_col),
                province: cell(row, province_col),
            })
        })
        .collect();

    if skipped > 0 {
        log::warn!("Skipped {skipped} rows without a record id");
    }
    log::debug!("Mapped {} records from {} rows", records.len(), table.len());

    Ok(records)
}

/// Renders a cell as text. Nulls are absent; nested values are kept as
/// compact JSON.
fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}
