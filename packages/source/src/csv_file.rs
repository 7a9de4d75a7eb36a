//! CSV-file record source and writer.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use crm_geocode_matcher_models::CrmRecord;
use crm_geocode_matcher_models::config::FieldMapping;
use serde_json::Value;

use crate::mapping::records_from_table;
use crate::shape::Table;
use crate::{RecordSource, SourceError};

/// Reads CRM records from a CSV export.
///
/// The file must have a header row; the [`FieldMapping`] names the
/// columns to use. Empty cells are treated as absent values.
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    path: PathBuf,
    fields: FieldMapping,
}

impl CsvFileSource {
    /// Creates a source for the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, fields: FieldMapping) -> Self {
        Self {
            path: path.into(),
            fields,
        }
    }

    /// Path of the file this source reads.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSource for CsvFileSource {
    fn name(&self) -> String {
        format!("CSV file {}", self.path.display())
    }

    async fn fetch_records(&self) -> Result<Vec<CrmRecord>, SourceError> {
        let path = self.path.clone();
        let table = tokio::task::spawn_blocking(move || read_table(&path))
            .await
            .map_err(std::io::Error::other)??;
        log::info!(
            "Read {} rows ({} columns) from {}",
            table.len(),
            table.columns.len(),
            self.path.display()
        );
        records_from_table(&table, &self.fields)
    }
}

/// Reads a CSV file with a header row into a [`Table`] of string cells.
///
/// # Errors
///
/// * [`SourceError::Csv`] if the file cannot be opened or parsed
pub fn read_table(path: &Path) -> Result<Table, SourceError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;

    let columns: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    let width = columns.len();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let mut cells: Vec<Value> = record
            .iter()
            .take(width)
            .map(|cell| {
                let cell = cell.trim();
                if cell.is_empty() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                }
            })
            .collect();
        cells.resize(width, Value::Null);
        rows.push(cells);
    }

    Ok(Table { columns, rows })
}

/// Writes `records` to `path` with the column names from `fields`.
/// Parent directories are created as needed. Returns the number of rows
/// written.
///
/// # Errors
///
/// * [`SourceError::Io`] if the parent directory cannot be created
/// * [`SourceError::Csv`] if the file cannot be written
pub fn write_records(
    path: &Path,
    records: &[CrmRecord],
    fields: &FieldMapping,
) -> Result<usize, SourceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([&fields.id, &fields.title, &fields.place, &fields.province])?;
    for record in records {
        writer.write_record([
            record.id.as_str(),
            record.title.as_str(),
            record.place.as_deref().unwrap_or_default(),
            record.province.as_deref().unwrap_or_default(),
        ])?;
    }
    writer.flush()?;

    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<CrmRecord> {
        vec![
            CrmRecord {
                id: "1".to_string(),
                title: "Deal, with comma".to_string(),
                place: Some("Comune di Treviso".to_string()),
                province: Some("TV".to_string()),
            },
            CrmRecord {
                id: "2".to_string(),
                title: "Deal 2".to_string(),
                place: None,
                province: None,
            },
        ]
    }

    #[tokio::test]
    async fn written_records_read_back_through_source() {
        let dir = std::env::temp_dir().join("crm_geocode_source_csv_test");
        let path = dir.join("out/records.csv");

        assert_eq!(write_records(&path, &sample(), &FieldMapping::default()).unwrap(), 2);

        let source = CsvFileSource::new(&path, FieldMapping::default());
        let records = source.fetch_records().await.unwrap();
        assert_eq!(records, sample());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn short_rows_are_padded_and_bom_is_stripped() {
        let dir = std::env::temp_dir().join("crm_geocode_source_csv_short_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("records.csv");
        std::fs::write(&path, "\u{feff}ID,TITLE,UF_CRM_COMUNE\n7,Deal 7\n8,Deal 8,Padova\n").unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table.columns[0], "ID");
        assert_eq!(table.rows[0][2], Value::Null);
        assert_eq!(table.rows[1][2], Value::String("Padova".to_string()));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let source = CsvFileSource::new(
            std::env::temp_dir().join("crm_geocode_source_no_such_file.csv"),
            FieldMapping::default(),
        );
        assert!(matches!(
            source.fetch_records().await,
            Err(SourceError::Csv(_))
        ));
    }
}
