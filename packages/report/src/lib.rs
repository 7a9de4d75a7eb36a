#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CSV exports of pipeline results.
//!
//! * the unmatched export lists every record that exhausted all stages,
//!   with raw and normalized text, for manual correction
//! * the geocoded export lists every record with its coordinates and
//!   match-source tag, blank when unresolved
//!
//! Exports are diagnostics. The plain `export_*` functions log failures
//! and return `None` so a failed write never aborts a run; the `try_*`
//! variants return the error for callers that want it.

use std::path::Path;

use crm_geocode_matcher_models::{GeocodedRecord, StageKind};
use serde::Serialize;

/// Errors from writing an export.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Output directory could not be created.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being created.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// CSV writer failure.
    #[error("CSV error writing {path}: {source}")]
    Csv {
        /// File being written.
        path: String,
        /// Underlying CSV error.
        source: csv::Error,
    },
}

#[derive(Serialize)]
struct UnmatchedRow<'a> {
    record_id: &'a str,
    title: &'a str,
    place_raw: &'a str,
    province_raw: &'a str,
    place_normalized: &'a str,
    province_normalized: &'a str,
    stages_tried: String,
    gazetteer_available: bool,
}

#[derive(Serialize)]
struct GeocodedRow<'a> {
    record_id: &'a str,
    title: &'a str,
    place_raw: &'a str,
    province_raw: &'a str,
    latitude: Option<f64>,
    longitude: Option<f64>,
    match_source: Option<String>,
}

/// Writes every unresolved record in `records` to `path`. Returns the
/// number of rows written.
///
/// # Errors
///
/// * [`ReportError::Io`] if the parent directory cannot be created
/// * [`ReportError::Csv`] if the file cannot be written
pub fn try_export_unmatched(
    records: &[GeocodedRecord],
    gazetteer_available: bool,
    path: &Path,
) -> Result<usize, ReportError> {
    let mut writer = open_writer(path)?;
    let mut count = 0;

    for geocoded in records.iter().filter(|r| !r.result.is_matched()) {
        let record = &geocoded.record;
        let row = UnmatchedRow {
            record_id: &record.id,
            title: &record.title,
            place_raw: record.place.as_deref().unwrap_or_default(),
            province_raw: record.province.as_deref().unwrap_or_default(),
            place_normalized: &geocoded.result.key.place,
            province_normalized: &geocoded.result.key.province,
            stages_tried: join_stages(&geocoded.stages_tried),
            gazetteer_available,
        };
        writer.serialize(row).map_err(|e| csv_error(path, e))?;
        count += 1;
    }

    if count == 0 {
        // serialize() only writes headers alongside the first row
        writer
            .write_record([
                "record_id",
                "title",
                "place_raw",
                "province_raw",
                "place_normalized",
                "province_normalized",
                "stages_tried",
                "gazetteer_available",
            ])
            .map_err(|e| csv_error(path, e))?;
    }

    writer
        .flush()
        .map_err(|e| csv_error(path, csv::Error::from(e)))?;
    Ok(count)
}

/// Writes every record in `records` with coordinates and tag. Returns
/// the number of rows written.
///
/// # Errors
///
/// * [`ReportError::Io`] if the parent directory cannot be created
/// * [`ReportError::Csv`] if the file cannot be written
pub fn try_export_geocoded(records: &[GeocodedRecord], path: &Path) -> Result<usize, ReportError> {
    let mut writer = open_writer(path)?;

    for geocoded in records {
        let record = &geocoded.record;
        let row = GeocodedRow {
            record_id: &record.id,
            title: &record.title,
            place_raw: record.place.as_deref().unwrap_or_default(),
            province_raw: record.province.as_deref().unwrap_or_default(),
            latitude: geocoded.result.latitude(),
            longitude: geocoded.result.longitude(),
            match_source: geocoded.result.match_source(),
        };
        writer.serialize(row).map_err(|e| csv_error(path, e))?;
    }

    if records.is_empty() {
        writer
            .write_record([
                "record_id",
                "title",
                "place_raw",
                "province_raw",
                "latitude",
                "longitude",
                "match_source",
            ])
            .map_err(|e| csv_error(path, e))?;
    }

    writer
        .flush()
        .map_err(|e| csv_error(path, csv::Error::from(e)))?;
    Ok(records.len())
}

/// Like [`try_export_unmatched`], but logs failures instead of returning
/// them.
pub fn export_unmatched(
    records: &[GeocodedRecord],
    gazetteer_available: bool,
    path: &Path,
) -> Option<usize> {
    match try_export_unmatched(records, gazetteer_available, path) {
        Ok(count) => {
            log::info!("Exported {count} unmatched records to {}", path.display());
            Some(count)
        }
        Err(e) => {
            log::error!("Failed to export unmatched records: {e}");
            None
        }
    }
}

/// Like [`try_export_geocoded`], but logs failures instead of returning
/// them.
pub fn export_geocoded(records: &[GeocodedRecord], path: &Path) -> Option<usize> {
    match try_export_geocoded(records, path) {
        Ok(count) => {
            log::info!("Exported {count} geocoded records to {}", path.display());
            Some(count)
        }
        Err(e) => {
            log::error!("Failed to export geocoded records: {e}");
            None
        }
    }
}

fn open_writer(path: &Path) -> Result<csv::Writer<std::fs::File>, ReportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ReportError::Io {
            path: parent.display().to_string(),
            source: e,
        })?;
    }
    csv::Writer::from_path(path).map_err(|e| csv_error(path, e))
}

fn csv_error(path: &Path, source: csv::Error) -> ReportError {
    ReportError::Csv {
        path: path.display().to_string(),
        source,
    }
}

fn join_stages(stages: &[StageKind]) -> String {
    stages
        .iter()
        .map(AsRef::<str>::as_ref)
        .collect::<Vec<_>>()
        .join(">")
}
