//! Configuration structs shared by the pipeline crates.
//!
//! Every struct deserializes from a section of `crm_geocode.toml` and
//! falls back to the defaults defined here for any missing key.

use serde::{Deserialize, Serialize};

use crate::StageKind;

/// Top-level settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Reference gazetteer sources.
    pub gazetteer: GazetteerConfig,
    /// Normalization tables.
    pub normalizer: NormalizerConfig,
    /// Stage order and thresholds.
    pub matcher: MatcherConfig,
    /// Output files.
    pub export: ExportConfig,
    /// CRM BI-connector access.
    pub connector: ConnectorConfig,
}

/// Location and layout of the two reference tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GazetteerConfig {
    /// Municipality directory (name, province code, identifier).
    pub municipalities_path: String,
    /// Coordinate directory (identifier, latitude, longitude).
    pub coordinates_path: String,
    /// Column names in the municipality directory.
    pub municipality_columns: MunicipalityColumns,
    /// Column names in the coordinate directory.
    pub coordinate_columns: CoordinateColumns,
    /// Field delimiter. Sniffed from the header line when unset.
    pub delimiter: Option<char>,
}

impl Default for GazetteerConfig {
    fn default() -> Self {
        Self {
            municipalities_path: "reference/comuni.csv".to_string(),
            coordinates_path: "reference/coordinate.csv".to_string(),
            municipality_columns: MunicipalityColumns::default(),
            coordinate_columns: CoordinateColumns::default(),
            delimiter: None,
        }
    }
}

/// Column names in the municipality directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MunicipalityColumns {
    /// Municipality name column.
    pub name: String,
    /// Two-letter province code column.
    pub province_code: String,
    /// Shared municipality identifier column.
    pub id: String,
    /// Optional province name column.
    pub province_name: Option<String>,
}

impl Default for MunicipalityColumns {
    fn default() -> Self {
        Self {
            name: "municipality_name".to_string(),
            province_code: "province_code".to_string(),
            id: "municipality_id".to_string(),
            province_name: None,
        }
    }
}

/// Column names in the coordinate directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinateColumns {
    /// Shared municipality identifier column.
    pub id: String,
    /// Latitude column.
    pub latitude: String,
    /// Longitude column.
    pub longitude: String,
}

impl Default for CoordinateColumns {
    fn default() -> Self {
        Self {
            id: "municipality_id".to_string(),
            latitude: "latitude".to_string(),
            longitude: "longitude".to_string(),
        }
    }
}

/// External normalization tables. The embedded tables are used for any
/// path left unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Prefixes, stopwords, province codes and substitutions.
    pub tables_path: Option<String>,
    /// Whole-string known exceptions.
    pub exceptions_path: Option<String>,
}

/// Stage order and thresholds for the multi-stage matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Stages in priority order.
    pub stages: Vec<StageKind>,
    /// Fuzzy place stage.
    pub fuzzy: FuzzyConfig,
    /// Prefix stage.
    pub prefix: PrefixConfig,
    /// Province fallback stage.
    pub province: ProvinceConfig,
    /// External manual-correction table. The embedded table is used when
    /// unset.
    pub corrections_path: Option<String>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            stages: StageKind::DEFAULT_ORDER.to_vec(),
            fuzzy: FuzzyConfig::default(),
            prefix: PrefixConfig::default(),
            province: ProvinceConfig::default(),
            corrections_path: None,
        }
    }
}

/// Thresholds for the fuzzy place stage (scores are 0-100).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzyConfig {
    /// Minimum score for the token-sort and token-set scorers.
    pub token_threshold: f64,
    /// Minimum score for the partial scorer.
    pub partial_threshold: f64,
    /// Minimum score for the plain ratio scorer.
    pub ratio_threshold: f64,
    /// A token-based score at or above this ends the search immediately.
    pub high_confidence: f64,
    /// Inputs shorter than this many characters are skipped.
    pub min_length: usize,
}

impl Default for FuzzyConfig {
    fn default() -> Self {
        Self {
            token_threshold: 80.0,
            partial_threshold: 80.0,
            ratio_threshold: 75.0,
            high_confidence: 85.0,
            min_length: 3,
        }
    }
}

/// Prefix stage parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefixConfig {
    /// Number of leading characters compared.
    pub length: usize,
    /// Inputs shorter than this many characters are skipped.
    pub min_length: usize,
}

impl Default for PrefixConfig {
    fn default() -> Self {
        Self {
            length: 5,
            min_length: 4,
        }
    }
}

/// Province fallback parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvinceConfig {
    /// Minimum token-set score for a fuzzy province match.
    pub fuzzy_threshold: f64,
}

impl Default for ProvinceConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 75.0,
        }
    }
}

/// Output files written after a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Records that exhausted every stage.
    pub unmatched_path: String,
    /// Every record with its coordinates and tag.
    pub geocoded_path: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            unmatched_path: "generated/unmatched_places.csv".to_string(),
            geocoded_path: "generated/geocoded_records.csv".to_string(),
        }
    }
}

/// Delay growth between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles after every retry.
    Exponential,
}

/// Bounded retry policy for connector requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub delay_ms: u64,
    /// Delay growth.
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2_000,
            backoff: Backoff::Fixed,
        }
    }
}

/// Column names mapping a connector table onto CRM records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMapping {
    /// Record identifier column.
    pub id: String,
    /// Record title column.
    pub title: String,
    /// Free-text place column.
    pub place: String,
    /// Free-text province column.
    pub province: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            id: "ID".to_string(),
            title: "TITLE".to_string(),
            place: "UF_CRM_COMUNE".to_string(),
            province: "UF_CRM_PROVINCIA".to_string(),
        }
    }
}

/// Access to the CRM BI-connector endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Endpoint URL. Overridden by `BITRIX_BI_URL`.
    pub base_url: String,
    /// Connector table to download (e.g. `crm_deal`).
    pub table: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Only fetch rows created within this many days, when set.
    pub days_back: Option<u32>,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Lifetime of cached responses in seconds.
    pub cache_ttl_secs: u64,
    /// Column mapping.
    pub fields: FieldMapping,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            table: "crm_deal".to_string(),
            timeout_secs: 120,
            days_back: None,
            retry: RetryConfig::default(),
            cache_ttl_secs: 600,
            fields: FieldMapping::default(),
        }
    }
}
