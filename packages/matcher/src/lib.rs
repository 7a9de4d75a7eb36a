#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Multi-stage matcher resolving CRM place text to coordinates.
//!
//! Records flow through an ordered list of [`MatchStage`]s. Each stage
//! only sees the records every earlier stage failed to resolve, and the
//! first stage to succeed fixes the record's [`MatchResult`]. Records
//! surviving every stage stay unresolved and are reported separately.
//!
//! The default order is:
//!
//! 1. exact place
//! 2. exact `(place, province)`
//! 3. manual correction table
//! 4. fuzzy place (token-sort, token-set, partial, ratio)
//! 5. prefix
//! 6. province centroid (exact, then fuzzy)

pub mod corrections;
pub mod fuzzy;
pub mod pipeline;
pub mod stages;

pub use corrections::ManualCorrections;
pub use pipeline::{Pipeline, PipelineReport, StageCount};
pub use stages::MatchStage;

/// Errors from building the matcher.
#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    /// Correction table could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Correction table is not valid TOML for its schema.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A correction entry has coordinates outside the WGS84 range.
    #[error("Invalid coordinates for correction '{key}': {latitude}, {longitude}")]
    InvalidCorrection {
        /// Offending key.
        key: String,
        /// Latitude as written.
        latitude: f64,
        /// Longitude as written.
        longitude: f64,
    },
}
