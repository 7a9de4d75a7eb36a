//! Hand-maintained manual correction table.
//!
//! Maps normalized place strings (and, separately, normalized province
//! strings) directly to coordinates for places the gazetteer cannot
//! resolve. The table is data: an embedded default ships with the crate
//! and `[matcher] corrections_path` replaces it.

use std::collections::BTreeMap;
use std::path::Path;

use crm_geocode_matcher_models::Coordinates;
use serde::Deserialize;

use crate::MatcherError;

const MANUAL_CORRECTIONS_TOML: &str = include_str!("../tables/manual_corrections.toml");

/// Literal place and province corrections.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManualCorrections {
    /// Normalized place → coordinates.
    #[serde(default)]
    pub places: BTreeMap<String, Coordinates>,
    /// Normalized province → coordinates.
    #[serde(default)]
    pub provinces: BTreeMap<String, Coordinates>,
}

impl ManualCorrections {
    /// Parses a correction table and validates every coordinate.
    ///
    /// # Errors
    ///
    /// * [`MatcherError::Toml`] if the text cannot be parsed
    /// * [`MatcherError::InvalidCorrection`] if an entry has coordinates
    ///   outside the WGS84 range
    pub fn from_toml_str(text: &str) -> Result<Self, MatcherError> {
        let corrections: Self = toml::from_str(text)?;
        for (key, coordinates) in corrections.places.iter().chain(&corrections.provinces) {
            if !coordinates.is_valid() {
                return Err(MatcherError::InvalidCorrection {
                    key: key.clone(),
                    latitude: coordinates.latitude,
                    longitude: coordinates.longitude,
                });
            }
        }
        Ok(corrections)
    }

    /// Reads a correction table from disk.
    ///
    /// # Errors
    ///
    /// Returns [`MatcherError::Io`] if the file cannot be read, otherwise
    /// as [`Self::from_toml_str`].
    pub fn from_path(path: &Path) -> Result<Self, MatcherError> {
        let text = std::fs::read_to_string(path)?;
        let corrections = Self::from_toml_str(&text)?;
        log::info!(
            "Loaded {} place and {} province corrections from {}",
            corrections.places.len(),
            corrections.provinces.len(),
            path.display()
        );
        Ok(corrections)
    }

    /// Returns the table compiled into the binary.
    ///
    /// # Panics
    ///
    /// Panics if the embedded table is malformed (covered by tests).
    #[must_use]
    pub fn embedded() -> Self {
        Self::from_toml_str(MANUAL_CORRECTIONS_TOML)
            .unwrap_or_else(|e| panic!("Failed to parse embedded manual_corrections.toml: {e}"))
    }

    /// Coordinates for a normalized place.
    #[must_use]
    pub fn place(&self, place: &str) -> Option<Coordinates> {
        self.places.get(place).copied()
    }

    /// Coordinates for a normalized province.
    #[must_use]
    pub fn province(&self, province: &str) -> Option<Coordinates> {
        self.provinces.get(province).copied()
    }

    /// Total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.places.len() + self.provinces.len()
    }

    /// Returns `true` if the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.places.is_empty() && self.provinces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_geocode_normalize::Normalizer;

    #[test]
    fn embedded_table_parses() {
        let corrections = ManualCorrections::embedded();
        assert!(!corrections.places.is_empty());
        assert!(!corrections.provinces.is_empty());
    }

    #[test]
    fn embedded_keys_are_normalized() {
        let normalizer = Normalizer::embedded();
        let corrections = ManualCorrections::embedded();
        for key in corrections.places.keys().chain(corrections.provinces.keys()) {
            assert_eq!(&normalizer.normalize(key), key, "key '{key}' is not normalized");
        }
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let err = ManualCorrections::from_toml_str(
            "[places]\n\"atlantide\" = { latitude = 123.0, longitude = 12.0 }\n",
        )
        .unwrap_err();
        assert!(matches!(err, MatcherError::InvalidCorrection { ref key, .. } if key == "atlantide"));
    }

    #[test]
    fn accepts_short_coordinate_names() {
        let corrections =
            ManualCorrections::from_toml_str("[provinces]\n\"veneto\" = { lat = 45.6, lon = 11.8 }\n")
                .unwrap();
        let coordinates = corrections.province("veneto").unwrap();
        assert!((coordinates.latitude - 45.6).abs() < f64::EPSILON);
        assert!(corrections.place("veneto").is_none());
    }
}
