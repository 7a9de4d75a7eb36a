#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Reference gazetteer of Italian municipalities.
//!
//! Joins a municipality directory (name, province code, identifier) with
//! a coordinate directory (identifier, latitude, longitude), runs every
//! name through the same [`Normalizer`] used for CRM text, and indexes
//! the result three ways:
//!
//! * by normalized `(place, province)`
//! * by normalized place alone (first occurrence in file order wins)
//! * by normalized province, mapping to the centroid of its
//!   municipalities

pub mod cache;
pub mod reader;

use std::collections::HashMap;
use std::path::Path;

use crm_geocode_matcher_models::config::GazetteerConfig;
use crm_geocode_matcher_models::{Coordinates, GazetteerEntry, NormalizedPlaceKey, UNSPECIFIED};
use crm_geocode_normalize::Normalizer;

pub use cache::GazetteerCache;
use reader::{Table, normalize_id, parse_coordinate};

/// Errors from loading the reference tables.
#[derive(Debug, thiserror::Error)]
pub enum GazetteerError {
    /// A reference file does not exist.
    #[error("Reference file not found: {0}")]
    MissingFile(String),

    /// A required column is absent from a reference file.
    #[error("Column '{column}' not found in {path}")]
    MissingColumn {
        /// File that lacks the column.
        path: String,
        /// Configured column name.
        column: String,
    },

    /// I/O error reading a reference file.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// File being read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// CSV error in a reference file.
    #[error("CSV error in {path}: {source}")]
    Csv {
        /// File being read.
        path: String,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// The join produced no usable rows.
    #[error("Gazetteer join produced zero rows ({0})")]
    EmptyJoin(String),
}

/// A municipality row before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Municipality {
    /// Shared identifier.
    pub id: String,
    /// Name as written in the reference table.
    pub name: String,
    /// Province code as written in the reference table.
    pub province_code: String,
    /// Province name, if the table has one.
    pub province_name: Option<String>,
    /// Coordinates from the joined coordinate table.
    pub coordinates: Coordinates,
}

/// A province with the centroid of its municipalities.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvinceEntry {
    /// Normalized province code.
    pub code: String,
    /// Mean coordinates of the province's municipalities.
    pub centroid: Coordinates,
    /// Number of municipalities averaged.
    pub municipalities: usize,
}

/// Row counts gathered while loading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GazetteerStats {
    /// Data rows in the municipality directory.
    pub municipality_rows: usize,
    /// Data rows in the coordinate directory.
    pub coordinate_rows: usize,
    /// Municipalities with usable coordinates.
    pub joined_rows: usize,
    /// Coordinate rows dropped for missing, non-numeric or out-of-range
    /// values.
    pub dropped_rows: usize,
    /// Municipalities with no coordinate row.
    pub unjoined_rows: usize,
    /// Entries whose `(place, province)` key was already taken.
    pub duplicate_keys: usize,
    /// Entries whose name normalized to the sentinel.
    pub sentinel_names: usize,
}

/// Read-only reference index.
#[derive(Debug, Clone, Default)]
pub struct Gazetteer {
    entries: Vec<GazetteerEntry>,
    by_key: HashMap<NormalizedPlaceKey, usize>,
    by_place: HashMap<String, usize>,
    place_names: Vec<String>,
    provinces: HashMap<String, ProvinceEntry>,
    province_names: Vec<String>,
    stats: GazetteerStats,
}

impl Gazetteer {
    /// An empty gazetteer. Every lookup misses.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the indexes from joined municipality rows, in order.
    #[must_use]
    pub fn build(municipalities: Vec<Municipality>, normalizer: &Normalizer) -> Self {
        let mut gazetteer = Self::default();
        let mut province_sums: HashMap<String, (f64, f64, usize)> = HashMap::new();
        let mut province_aliases: Vec<(String, String)> = Vec::new();

        for municipality in municipalities {
            let place = normalizer.normalize(&municipality.name);
            let province = normalizer.normalize(&municipality.province_code);
            if place == UNSPECIFIED {
                log::debug!(
                    "Skipping municipality {} ({:?}): name normalizes to the sentinel",
                    municipality.id,
                    municipality.name
                );
                gazetteer.stats.sentinel_names += 1;
                continue;
            }

            let coordinates = municipality.coordinates;
            let key = NormalizedPlaceKey::new(place.clone(), province.clone());
            let index = gazetteer.entries.len();

            if province != UNSPECIFIED {
                if gazetteer.by_key.contains_key(&key) {
                    log::trace!("Duplicate gazetteer key {key}");
                    gazetteer.stats.duplicate_keys += 1;
                } else {
                    gazetteer.by_key.insert(key.clone(), index);
                }

                let sums = province_sums.entry(province.clone()).or_insert((0.0, 0.0, 0));
                sums.0 += coordinates.latitude;
                sums.1 += coordinates.longitude;
                sums.2 += 1;

                if let Some(name) = &municipality.province_name {
                    let alias = normalizer.normalize(name);
                    if alias != UNSPECIFIED && alias != province {
                        province_aliases.push((alias, province.clone()));
                    }
                }
            }

            if !gazetteer.by_place.contains_key(&place) {
                gazetteer.by_place.insert(place.clone(), index);
                gazetteer.place_names.push(place);
            }

            gazetteer.entries.push(GazetteerEntry {
                municipality_id: municipality.id,
                name: municipality.name,
                province_code: municipality.province_code,
                province_name: municipality.province_name,
                key,
                coordinates,
            });
        }

        let mut codes: Vec<&String> = province_sums.keys().collect();
        codes.sort();
        for code in codes {
            let (lat, lon, count) = province_sums[code];
            #[allow(clippy::cast_precision_loss)]
            let n = count as f64;
            let entry = ProvinceEntry {
                code: code.clone(),
                centroid: Coordinates::new(lat / n, lon / n),
                municipalities: count,
            };
            gazetteer.province_names.push(code.clone());
            gazetteer.provinces.insert(code.clone(), entry);
        }
        for (alias, code) in province_aliases {
            if gazetteer.provinces.contains_key(&alias) {
                continue;
            }
            if let Some(entry) = gazetteer.provinces.get(&code).cloned() {
                gazetteer.province_names.push(alias.clone());
                gazetteer.provinces.insert(alias, entry);
            }
        }

        gazetteer.stats.joined_rows = gazetteer.entries.len();
        gazetteer
    }

    /// Loads and joins both reference files.
    ///
    /// # Errors
    ///
    /// * [`GazetteerError::MissingFile`] if either file is missing
    /// * [`GazetteerError::MissingColumn`] if a configured column is absent
    /// * [`GazetteerError::EmptyJoin`] if no municipality has usable
    ///   coordinates
    /// * [`GazetteerError::Io`] / [`GazetteerError::Csv`] on read failures
    pub fn load(config: &GazetteerConfig, normalizer: &Normalizer) -> Result<Self, GazetteerError> {
        let municipalities_path = Path::new(&config.municipalities_path);
        let coordinates_path = Path::new(&config.coordinates_path);

        let municipality_table = Table::read(municipalities_path, config.delimiter)?;
        let coordinate_table = Table::read(coordinates_path, config.delimiter)?;

        let columns = &config.municipality_columns;
        let name_col = municipality_table.column(&columns.name)?;
        let province_col = municipality_table.column(&columns.province_code)?;
        let id_col = municipality_table.column(&columns.id)?;
        let province_name_col = columns
            .province_name
            .as_deref()
            .map(|name| municipality_table.column(name))
            .transpose()?;

        let coord_columns = &config.coordinate_columns;
        let coord_id_col = coordinate_table.column(&coord_columns.id)?;
        let lat_col = coordinate_table.column(&coord_columns.latitude)?;
        let lon_col = coordinate_table.column(&coord_columns.longitude)?;

        let mut coordinates: HashMap<String, Coordinates> = HashMap::new();
        let mut dropped = coordinate_table.unreadable_rows;
        for row in coordinate_table.rows() {
            let id = normalize_id(row.get(coord_id_col).unwrap_or_default());
            let lat = row.get(lat_col).and_then(parse_coordinate);
            let lon = row.get(lon_col).and_then(parse_coordinate);
            match (lat, lon) {
                (Some(lat), Some(lon)) if !id.is_empty() => {
                    let coords = Coordinates::new(lat, lon);
                    if coords.is_valid() {
                        coordinates.entry(id).or_insert(coords);
                    } else {
                        log::trace!("Dropping out-of-range coordinates for {id}: {lat}, {lon}");
                        dropped += 1;
                    }
                }
                _ => {
                    log::trace!("Dropping malformed coordinate row: {row:?}");
                    dropped += 1;
                }
            }
        }

        let mut municipalities = Vec::with_capacity(municipality_table.len());
        let mut unjoined = 0;
        for row in municipality_table.rows() {
            let id = normalize_id(row.get(id_col).unwrap_or_default());
            let Some(coords) = coordinates.get(&id) else {
                unjoined += 1;
                continue;
            };
            municipalities.push(Municipality {
                id,
                name: row.get(name_col).unwrap_or_default().trim().to_string(),
                province_code: row.get(province_col).unwrap_or_default().trim().to_string(),
                province_name: province_name_col
                    .and_then(|col| row.get(col))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
                coordinates: *coords,
            });
        }

        let mut gazetteer = Self::build(municipalities, normalizer);
        gazetteer.stats.municipality_rows =
            municipality_table.len() + municipality_table.unreadable_rows;
        gazetteer.stats.coordinate_rows = coordinate_table.len() + coordinate_table.unreadable_rows;
        gazetteer.stats.dropped_rows = dropped;
        gazetteer.stats.unjoined_rows = unjoined;

        let stats = &gazetteer.stats;
        log::info!(
            "Gazetteer loaded: {} municipality rows, {} coordinate rows, {} joined, \
             {} dropped malformed, {} without coordinates, {} duplicate keys",
            stats.municipality_rows,
            stats.coordinate_rows,
            stats.joined_rows,
            stats.dropped_rows,
            stats.unjoined_rows,
            stats.duplicate_keys,
        );

        if gazetteer.is_empty() {
            return Err(GazetteerError::EmptyJoin(format!(
                "{} municipality rows, {} coordinate rows",
                stats.municipality_rows, stats.coordinate_rows
            )));
        }

        Ok(gazetteer)
    }

    /// Number of indexed municipalities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, in file order.
    #[must_use]
    pub fn entries(&self) -> &[GazetteerEntry] {
        &self.entries
    }

    /// Load statistics.
    #[must_use]
    pub const fn stats(&self) -> &GazetteerStats {
        &self.stats
    }

    /// Looks up a normalized place name.
    #[must_use]
    pub fn lookup_place(&self, place: &str) -> Option<&GazetteerEntry> {
        self.by_place.get(place).map(|&i| &self.entries[i])
    }

    /// Looks up a normalized `(place, province)` pair.
    #[must_use]
    pub fn lookup_key(&self, key: &NormalizedPlaceKey) -> Option<&GazetteerEntry> {
        self.by_key.get(key).map(|&i| &self.entries[i])
    }

    /// Distinct normalized place names, in first-seen order.
    #[must_use]
    pub fn place_names(&self) -> &[String] {
        &self.place_names
    }

    /// Looks up a normalized province code or name.
    #[must_use]
    pub fn lookup_province(&self, province: &str) -> Option<&ProvinceEntry> {
        self.provinces.get(province)
    }

    /// Normalized province codes (sorted) followed by province-name
    /// aliases.
    #[must_use]
    pub fn province_names(&self) -> &[String] {
        &self.province_names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn municipality(id: &str, name: &str, code: &str, lat: f64, lon: f64) -> Municipality {
        Municipality {
            id: id.to_string(),
            name: name.to_string(),
            province_code: code.to_string(),
            province_name: None,
            coordinates: Coordinates::new(lat, lon),
        }
    }

    fn write_reference(dir: &str, comuni: &str, coords: &str) -> (PathBuf, GazetteerConfig) {
        let dir = std::env::temp_dir().join(dir);
        std::fs::create_dir_all(&dir).unwrap();
        let municipalities_path = dir.join("comuni.csv");
        let coordinates_path = dir.join("coordinate.csv");
        std::fs::write(&municipalities_path, comuni).unwrap();
        std::fs::write(&coordinates_path, coords).unwrap();
        let config = GazetteerConfig {
            municipalities_path: municipalities_path.display().to_string(),
            coordinates_path: coordinates_path.display().to_string(),
            ..GazetteerConfig::default()
        };
        (dir, config)
    }

    #[test]
    fn indexes_by_key_and_place() {
        let gazetteer = Gazetteer::build(
            vec![
                municipality("26086", "Treviso", "TV", 45.6667, 12.25),
                municipality("28060", "Padova", "PD", 45.4064, 11.8768),
            ],
            Normalizer::embedded(),
        );

        let entry = gazetteer
            .lookup_key(&NormalizedPlaceKey::new("treviso", "tv"))
            .unwrap();
        assert_eq!(entry.name, "Treviso");
        assert_eq!(gazetteer.lookup_place("padova").unwrap().municipality_id, "28060");
        assert_eq!(gazetteer.place_names(), ["treviso", "padova"]);
    }

    #[test]
    fn first_occurrence_wins_for_place_index() {
        let gazetteer = Gazetteer::build(
            vec![
                municipality("1", "Castelnuovo", "TN", 46.0, 11.0),
                municipality("2", "Castelnuovo", "PD", 45.0, 12.0),
                municipality("3", "Castelnuovo", "TN", 44.0, 10.0),
            ],
            Normalizer::embedded(),
        );

        assert_eq!(gazetteer.lookup_place("castelnuovo").unwrap().municipality_id, "1");
        assert_eq!(
            gazetteer
                .lookup_key(&NormalizedPlaceKey::new("castelnuovo", "pd"))
                .unwrap()
                .municipality_id,
            "2"
        );
        assert_eq!(gazetteer.stats().duplicate_keys, 1);
        assert_eq!(gazetteer.place_names().len(), 1);
    }

    #[test]
    fn never_indexes_the_sentinel() {
        let gazetteer = Gazetteer::build(
            vec![
                municipality("1", "", "TV", 45.0, 12.0),
                municipality("2", "Comune di", "TV", 45.0, 12.0),
            ],
            Normalizer::embedded(),
        );

        assert!(gazetteer.is_empty());
        assert!(gazetteer.lookup_place(UNSPECIFIED).is_none());
        assert_eq!(gazetteer.stats().sentinel_names, 2);
    }

    #[test]
    fn province_index_maps_to_centroid() {
        let mut first = municipality("1", "Treviso", "TV", 45.0, 12.0);
        first.province_name = Some("Treviso".to_string());
        let gazetteer = Gazetteer::build(
            vec![first, municipality("2", "Oderzo", "TV", 46.0, 13.0)],
            Normalizer::embedded(),
        );

        let by_code = gazetteer.lookup_province("tv").unwrap();
        assert!((by_code.centroid.latitude - 45.5).abs() < 1e-9);
        assert!((by_code.centroid.longitude - 12.5).abs() < 1e-9);
        assert_eq!(by_code.municipalities, 2);
        assert_eq!(gazetteer.lookup_province("treviso"), Some(by_code));
        assert_eq!(gazetteer.province_names(), ["tv", "treviso"]);
    }

    #[test]
    fn loads_and_joins_reference_files() {
        let (dir, config) = write_reference(
            "crm_geocode_gazetteer_load_test",
            "municipality_id;municipality_name;province_code\n\
             026086;Treviso;TV\n\
             028060;Padova;PD\n\
             099999;Nowhere;ZZ\n",
            "municipality_id,latitude,longitude\n\
             26086,45.6667,12.25\n\
             28060,\"45,4064\",\"11,8768\"\n\
             11111,abc,12.0\n\
             22222,95.0,12.0\n",
        );

        let gazetteer = Gazetteer::load(&config, Normalizer::embedded()).unwrap();
        assert_eq!(gazetteer.len(), 2);

        let treviso = gazetteer
            .lookup_key(&NormalizedPlaceKey::new("treviso", "tv"))
            .unwrap();
        assert!((treviso.coordinates.latitude - 45.6667).abs() < 1e-9);
        assert!((treviso.coordinates.longitude - 12.25).abs() < 1e-9);

        let padova = gazetteer.lookup_place("padova").unwrap();
        assert!((padova.coordinates.latitude - 45.4064).abs() < 1e-9);

        let stats = gazetteer.stats();
        assert_eq!(stats.municipality_rows, 3);
        assert_eq!(stats.coordinate_rows, 4);
        assert_eq!(stats.joined_rows, 2);
        assert_eq!(stats.dropped_rows, 2);
        assert_eq!(stats.unjoined_rows, 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_column_fails_loudly() {
        let (dir, config) = write_reference(
            "crm_geocode_gazetteer_missing_column_test",
            "municipality_id,name,province_code\n1,Treviso,TV\n",
            "municipality_id,latitude,longitude\n1,45.6,12.2\n",
        );

        let err = Gazetteer::load(&config, Normalizer::embedded()).unwrap_err();
        assert!(
            matches!(err, GazetteerError::MissingColumn { ref column, .. } if column == "municipality_name")
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn empty_join_fails_loudly() {
        let (dir, config) = write_reference(
            "crm_geocode_gazetteer_empty_join_test",
            "municipality_id,municipality_name,province_code\n1,Treviso,TV\n",
            "municipality_id,latitude,longitude\n2,45.6,12.2\n",
        );

        assert!(matches!(
            Gazetteer::load(&config, Normalizer::embedded()),
            Err(GazetteerError::EmptyJoin(_))
        ));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_fails_loudly() {
        let config = GazetteerConfig {
            municipalities_path: std::env::temp_dir()
                .join("crm_geocode_gazetteer_absent/comuni.csv")
                .display()
                .to_string(),
            ..GazetteerConfig::default()
        };
        assert!(matches!(
            Gazetteer::load(&config, Normalizer::embedded()),
            Err(GazetteerError::MissingFile(_))
        ));
    }

    #[test]
    fn empty_gazetteer_misses_everything() {
        let gazetteer = Gazetteer::empty();
        assert!(gazetteer.is_empty());
        assert!(gazetteer.lookup_place("treviso").is_none());
        assert!(gazetteer.lookup_province("tv").is_none());
        assert!(gazetteer.place_names().is_empty());
    }
}
