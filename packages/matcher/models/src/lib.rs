#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for the CRM place-geocoding pipeline.
//!
//! This crate contains only data types, configuration structs, and simple
//! conversions. It has no heavyweight dependencies (no CSV, no HTTP, no
//! I/O).
//!
//! The flow these types describe is:
//!
//! ```text
//! CrmRecord ─► RawPlaceReference ─► NormalizedPlaceKey ─► MatchResult
//! ```

pub mod config;
pub mod progress;

use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Reserved placeholder for empty or unnormalizable text.
///
/// The gazetteer never contains this value as a key, so a record whose
/// place normalizes to it can only be resolved through its province.
pub const UNSPECIFIED: &str = "unspecified";

/// Free-text place reference taken from a CRM record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPlaceReference {
    /// Identifier of the owning CRM record.
    pub record_id: String,
    /// Place (municipality, parish, hamlet...) as typed in the CRM.
    pub place: Option<String>,
    /// Province as typed in the CRM (name or two-letter code).
    pub province: Option<String>,
}

/// Normalized `(place, province)` pair used as a gazetteer lookup key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NormalizedPlaceKey {
    /// Normalized place name.
    pub place: String,
    /// Normalized province name or code.
    pub province: String,
}

impl NormalizedPlaceKey {
    /// Creates a key from already-normalized parts.
    #[must_use]
    pub fn new(place: impl Into<String>, province: impl Into<String>) -> Self {
        Self {
            place: place.into(),
            province: province.into(),
        }
    }

    /// Returns `true` if the place part is the [`UNSPECIFIED`] sentinel.
    #[must_use]
    pub fn place_unspecified(&self) -> bool {
        self.place == UNSPECIFIED
    }

    /// Returns `true` if the province part is the [`UNSPECIFIED`] sentinel.
    #[must_use]
    pub fn province_unspecified(&self) -> bool {
        self.province == UNSPECIFIED
    }
}

impl fmt::Display for NormalizedPlaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.place, self.province)
    }
}

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees.
    #[serde(alias = "lat")]
    pub latitude: f64,
    /// Longitude in degrees.
    #[serde(alias = "lon")]
    pub longitude: f64,
}

impl Coordinates {
    /// Creates a coordinate pair.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns `true` if both values are finite and inside the WGS84
    /// range. Zero is a valid coordinate.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A reference municipality with its normalized key and coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct GazetteerEntry {
    /// Municipality identifier shared by both reference tables.
    pub municipality_id: String,
    /// Municipality name as written in the reference table.
    pub name: String,
    /// Province code as written in the reference table.
    pub province_code: String,
    /// Province name, when the reference table carries one.
    pub province_name: Option<String>,
    /// Normalized `(municipality, province code)` key.
    pub key: NormalizedPlaceKey,
    /// Municipality coordinates.
    pub coordinates: Coordinates,
}

/// One matching strategy in the fixed-priority fallback chain.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StageKind {
    /// Normalized place found in the place-only index.
    ExactPlace,
    /// Normalized `(place, province)` found in the compound index.
    ExactPlaceProvince,
    /// Hand-maintained literal corrections.
    ManualCorrection,
    /// Approximate place match against every gazetteer name.
    FuzzyPlace,
    /// Shared leading characters with a gazetteer name.
    Prefix,
    /// Province-level fallback (exact, then fuzzy).
    Province,
}

impl StageKind {
    /// The stage order used when none is configured.
    pub const DEFAULT_ORDER: [Self; 6] = [
        Self::ExactPlace,
        Self::ExactPlaceProvince,
        Self::ManualCorrection,
        Self::FuzzyPlace,
        Self::Prefix,
        Self::Province,
    ];
}

/// String-similarity scorer used by the fuzzy stage.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum Scorer {
    /// Ratio of the alphabetically sorted tokens.
    TokenSort,
    /// Ratio built from the shared and the leftover token sets.
    TokenSet,
    /// Best ratio of the shorter string against any same-length window.
    Partial,
    /// Plain normalized indel similarity.
    Ratio,
}

impl Scorer {
    /// Scorers in the order the fuzzy stage evaluates them.
    pub const ALL: [Self; 4] = [Self::TokenSort, Self::TokenSet, Self::Partial, Self::Ratio];

    /// Token-based scorers may short-circuit the fuzzy stage on a
    /// high-confidence score.
    #[must_use]
    pub const fn is_token_based(self) -> bool {
        matches!(self, Self::TokenSort | Self::TokenSet)
    }
}

/// How a record obtained its coordinates.
///
/// The [`Display`](fmt::Display) form is the tag written to exports,
/// e.g. `ExactMatch_ComuneProv` or `FuzzyMatch_TokenSet_88`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchSource {
    /// `ExactMatch_Comune`
    ExactComune,
    /// `ExactMatch_ComuneProv`
    ExactComuneProvince,
    /// `CorrecaoManual`
    ManualCorrection,
    /// `FuzzyMatch_<scorer>_<score>`
    Fuzzy {
        /// Winning scorer.
        scorer: Scorer,
        /// Winning score, 0-100.
        score: u8,
    },
    /// `PrefixMatch_<prefix>`
    Prefix {
        /// The leading characters that matched.
        prefix: String,
    },
    /// `ProvinciaMatch`
    Province,
    /// `ProvinciaFuzzy_<score>`
    ProvinceFuzzy {
        /// Winning score, 0-100.
        score: u8,
    },
}

impl MatchSource {
    /// Returns the tag string for this source.
    #[must_use]
    pub fn tag(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExactComune => f.write_str("ExactMatch_Comune"),
            Self::ExactComuneProvince => f.write_str("ExactMatch_ComuneProv"),
            Self::ManualCorrection => f.write_str("CorrecaoManual"),
            Self::Fuzzy { scorer, score } => write!(f, "FuzzyMatch_{scorer}_{score}"),
            Self::Prefix { prefix } => write!(f, "PrefixMatch_{prefix}"),
            Self::Province => f.write_str("ProvinciaMatch"),
            Self::ProvinceFuzzy { score } => write!(f, "ProvinciaFuzzy_{score}"),
        }
    }
}

/// Successful outcome of a stage: coordinates plus their provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Resolved coordinates.
    pub coordinates: Coordinates,
    /// Match-source tag.
    pub source: MatchSource,
    /// Stage that produced the match.
    pub stage: StageKind,
}

/// Match outcome attached to a CRM record.
///
/// Coordinates and tag live together inside [`Resolution`], so a result
/// can never carry one without the other.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Normalized key the matcher worked with.
    pub key: NormalizedPlaceKey,
    /// `None` when every stage was exhausted.
    pub resolution: Option<Resolution>,
}

impl MatchResult {
    /// Creates an unresolved result.
    #[must_use]
    pub const fn unmatched(key: NormalizedPlaceKey) -> Self {
        Self {
            key,
            resolution: None,
        }
    }

    /// Returns `true` if a stage resolved this record.
    #[must_use]
    pub const fn is_matched(&self) -> bool {
        self.resolution.is_some()
    }

    /// Resolved latitude.
    #[must_use]
    pub fn latitude(&self) -> Option<f64> {
        self.resolution.as_ref().map(|r| r.coordinates.latitude)
    }

    /// Resolved longitude.
    #[must_use]
    pub fn longitude(&self) -> Option<f64> {
        self.resolution.as_ref().map(|r| r.coordinates.longitude)
    }

    /// Match-source tag.
    #[must_use]
    pub fn match_source(&self) -> Option<String> {
        self.resolution.as_ref().map(|r| r.source.tag())
    }

    /// Stage that resolved this record.
    #[must_use]
    pub fn stage(&self) -> Option<StageKind> {
        self.resolution.as_ref().map(|r| r.stage)
    }
}

/// A CRM record carrying free-text place fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmRecord {
    /// CRM identifier (deal, contact, ...).
    pub id: String,
    /// Record title.
    #[serde(default)]
    pub title: String,
    /// Place as typed in the CRM.
    #[serde(default)]
    pub place: Option<String>,
    /// Province as typed in the CRM.
    #[serde(default)]
    pub province: Option<String>,
}

impl CrmRecord {
    /// Extracts the place reference for matching.
    #[must_use]
    pub fn place_reference(&self) -> RawPlaceReference {
        RawPlaceReference {
            record_id: self.id.clone(),
            place: self.place.clone(),
            province: self.province.clone(),
        }
    }
}

/// A CRM record enriched with its match outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedRecord {
    /// The source record.
    pub record: CrmRecord,
    /// Match outcome.
    pub result: MatchResult,
    /// Stages that were attempted for this record, in order.
    pub stages_tried: Vec<StageKind>,
}
