#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CRM record sources.
//!
//! Each source implements [`RecordSource`] to produce [`CrmRecord`]s for
//! the matcher. Two are provided: [`CsvFileSource`] for exported files
//! and [`BiConnectorSource`] for the Bitrix24 BI-connector endpoint.
//! Both turn their input into a [`Table`] first and share the
//! [`FieldMapping`](crm_geocode_matcher_models::config::FieldMapping)
//! step from table to records.

pub mod bi_connector;
pub mod cache;
pub mod csv_file;
pub mod mapping;
pub mod retry;
pub mod shape;

use async_trait::async_trait;
use crm_geocode_matcher_models::CrmRecord;

pub use bi_connector::BiConnectorSource;
pub use cache::ResponseCache;
pub use csv_file::CsvFileSource;
pub use retry::RetryPolicy;
pub use shape::Table;

/// Errors that can occur while fetching CRM records.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP transport failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with an error status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Status code.
        status: u16,
        /// Request URL.
        url: String,
    },

    /// Body is not valid JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV read or write failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O error (file read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON payload is not any known table shape.
    #[error("Unrecognized response shape: {0}")]
    UnrecognizedShape(String),

    /// The record-id column is not in the table.
    #[error("Column '{0}' not found in source table")]
    MissingColumn(String),

    /// Connector URL or token is not configured.
    #[error("Connector not configured: {0}")]
    MissingCredentials(String),

    /// Every attempt failed transiently.
    #[error("Giving up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: Box<Self>,
    },
}

impl SourceError {
    /// Returns `true` if retrying the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => retry::is_transient_http(e),
            Self::Status { status, .. } => retry::is_transient_status(*status),
            // Truncated bodies parse as invalid JSON
            Self::Json(_) => true,
            Self::Csv(_)
            | Self::Io(_)
            | Self::UnrecognizedShape(_)
            | Self::MissingColumn(_)
            | Self::MissingCredentials(_)
            | Self::RetriesExhausted { .. } => false,
        }
    }
}

/// A provider of CRM records.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Human-readable description used in logs.
    fn name(&self) -> String;

    /// Fetches every record. A source with no rows returns an empty
    /// list; failures are errors, never an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the records cannot be fetched or the
    /// payload cannot be turned into records.
    async fn fetch_records(&self) -> Result<Vec<CrmRecord>, SourceError>;
}
