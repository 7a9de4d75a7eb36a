//! Batch driver running the stage chain over a set of CRM records.

use std::path::Path;
use std::sync::Arc;

use crm_geocode_gazetteer::Gazetteer;
use crm_geocode_matcher_models::config::MatcherConfig;
use crm_geocode_matcher_models::progress::{ProgressCallback, null_progress};
use crm_geocode_matcher_models::{
    CrmRecord, GeocodedRecord, MatchResult, NormalizedPlaceKey, Resolution, StageKind,
};
use crm_geocode_normalize::Normalizer;

use crate::MatcherError;
use crate::corrections::ManualCorrections;
use crate::stages::{MatchStage, Pending, build_stages};

/// Per-stage tally for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageCount {
    /// Stage.
    pub stage: StageKind,
    /// Records the stage was given.
    pub attempted: usize,
    /// Records the stage resolved.
    pub matched: usize,
}

/// Outcome of a batch run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Every input record with its result, in input order.
    pub records: Vec<GeocodedRecord>,
    /// Tallies in stage order. Empty if no gazetteer was available.
    pub stage_counts: Vec<StageCount>,
    /// Records with coordinates.
    pub matched: usize,
    /// Records without coordinates.
    pub unmatched: usize,
    /// `false` if the run had no reference data.
    pub gazetteer_available: bool,
}

impl PipelineReport {
    /// Number of input records.
    #[must_use]
    pub fn total(&self) -> usize {
        self.records.len()
    }

    /// Records that exhausted every stage.
    pub fn unmatched_records(&self) -> impl Iterator<Item = &GeocodedRecord> {
        self.records.iter().filter(|r| !r.result.is_matched())
    }

    /// Records resolved by `stage`.
    #[must_use]
    pub fn matched_by(&self, stage: StageKind) -> usize {
        self.stage_counts
            .iter()
            .find(|c| c.stage == stage)
            .map_or(0, |c| c.matched)
    }
}

/// Resolutions for a batch of keys, indexed like the input.
struct BatchOutcome {
    resolutions: Vec<Option<Resolution>>,
    stages_tried: Vec<Vec<StageKind>>,
    stage_counts: Vec<StageCount>,
}

/// The configured matcher: normalizer, gazetteer and stage chain.
pub struct Pipeline {
    normalizer: Normalizer,
    gazetteer: Arc<Gazetteer>,
    stages: Vec<Box<dyn MatchStage>>,
    progress: Arc<dyn ProgressCallback>,
}

impl Pipeline {
    /// Builds the pipeline from the `[matcher]` settings section, loading
    /// the correction table from `corrections_path` or the embedded
    /// default.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured correction table cannot be read,
    /// parsed or validated.
    pub fn new(
        normalizer: Normalizer,
        gazetteer: Arc<Gazetteer>,
        config: &MatcherConfig,
    ) -> Result<Self, MatcherError> {
        let corrections = match &config.corrections_path {
            Some(path) => ManualCorrections::from_path(Path::new(path))?,
            None => ManualCorrections::embedded(),
        };
        let stages = build_stages(config, &Arc::new(corrections));
        Ok(Self::with_stages(normalizer, gazetteer, stages))
    }

    /// Builds a pipeline from an explicit stage list.
    #[must_use]
    pub fn with_stages(
        normalizer: Normalizer,
        gazetteer: Arc<Gazetteer>,
        stages: Vec<Box<dyn MatchStage>>,
    ) -> Self {
        Self {
            normalizer,
            gazetteer,
            stages,
            progress: null_progress(),
        }
    }

    /// Reports one unit per record as records leave the pipeline.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// `false` if the gazetteer is empty, in which case every record
    /// ends unresolved.
    #[must_use]
    pub fn gazetteer_available(&self) -> bool {
        !self.gazetteer.is_empty()
    }

    /// Stages in the order they run.
    #[must_use]
    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind()).collect()
    }

    /// The normalizer applied to CRM text.
    #[must_use]
    pub const fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Resolves a single place reference.
    #[must_use]
    pub fn resolve(&self, place_raw: Option<&str>, province_raw: Option<&str>) -> MatchResult {
        let key = self.normalizer.normalize_key(place_raw, province_raw);
        let mut outcome = self.match_keys(vec![key.clone()], false);
        MatchResult {
            key,
            resolution: outcome.resolutions.pop().flatten(),
        }
    }

    /// Resolves every record. Always succeeds; unresolved records are
    /// part of the report, not errors.
    #[must_use]
    pub fn run(&self, records: Vec<CrmRecord>) -> PipelineReport {
        let total = records.len();
        log::info!("Matching {total} records through {} stages", self.stages.len());

        self.progress.set_total(total as u64);
        let keys: Vec<NormalizedPlaceKey> = records
            .iter()
            .map(|r| self.normalizer.normalize_reference(&r.place_reference()))
            .collect();

        let outcome = self.match_keys(keys.clone(), true);

        let geocoded: Vec<GeocodedRecord> = records
            .into_iter()
            .zip(keys)
            .zip(outcome.resolutions)
            .zip(outcome.stages_tried)
            .map(|(((record, key), resolution), stages_tried)| GeocodedRecord {
                record,
                result: MatchResult { key, resolution },
                stages_tried,
            })
            .collect();

        let matched = geocoded.iter().filter(|r| r.result.is_matched()).count();
        let unmatched = total - matched;
        self.progress
            .finish(format!("{matched} matched, {unmatched} unmatched"));
        log::info!("Matching complete: {matched}/{total} matched, {unmatched} unmatched");

        PipelineReport {
            records: geocoded,
            stage_counts: outcome.stage_counts,
            matched,
            unmatched,
            gazetteer_available: self.gazetteer_available(),
        }
    }

    fn match_keys(&self, keys: Vec<NormalizedPlaceKey>, report: bool) -> BatchOutcome {
        let total = keys.len();
        let mut outcome = BatchOutcome {
            resolutions: vec![None; total],
            stages_tried: vec![Vec::new(); total],
            stage_counts: Vec::with_capacity(self.stages.len()),
        };

        if !self.gazetteer_available() {
            if report {
                log::error!("No gazetteer available; all {total} records left unresolved");
                self.progress.inc(total as u64);
            }
            return outcome;
        }

        let mut batch: Vec<Pending> = keys
            .into_iter()
            .enumerate()
            .map(|(index, key)| Pending { index, key })
            .collect();

        for stage in &self.stages {
            let kind = stage.kind();
            let attempted = batch.len();
            for pending in &batch {
                outcome.stages_tried[pending.index].push(kind);
            }
            if report {
                self.progress.set_message(format!("Stage: {kind}"));
            }

            let result = stage.attempt(&self.gazetteer, batch);
            let matched = result.matched.len();
            for (pending, resolution) in result.matched {
                outcome.resolutions[pending.index] = Some(resolution);
            }
            batch = result.unmatched;

            if report {
                log::info!(
                    "Stage {kind}: {attempted} attempted, {matched} matched, {} remaining",
                    batch.len()
                );
                self.progress.inc(matched as u64);
            }
            outcome.stage_counts.push(StageCount {
                stage: kind,
                attempted,
                matched,
            });
        }

        if report {
            self.progress.inc(batch.len() as u64);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_geocode_gazetteer::Municipality;
    use crm_geocode_matcher_models::{Coordinates, UNSPECIFIED};

    fn gazetteer() -> Arc<Gazetteer> {
        let rows = [
            ("26086", "Treviso", "TV", 45.6667, 12.25),
            ("26043", "Mogliano Veneto", "TV", 45.5617, 12.2358),
            ("26051", "Oderzo", "TV", 45.7808, 12.4931),
            ("28060", "Padova", "PD", 45.4064, 11.8768),
            ("23999", "San Giovanni", "VR", 45.4500, 11.0833),
        ];
        Arc::new(Gazetteer::build(
            rows.into_iter()
                .map(|(id, name, code, lat, lon)| Municipality {
                    id: id.to_string(),
                    name: name.to_string(),
                    province_code: code.to_string(),
                    province_name: None,
                    coordinates: Coordinates::new(lat, lon),
                })
                .collect(),
            Normalizer::embedded(),
        ))
    }

    fn pipeline_with(config: &MatcherConfig) -> Pipeline {
        Pipeline::new(Normalizer::embedded().clone(), gazetteer(), config).unwrap()
    }

    fn pipeline() -> Pipeline {
        pipeline_with(&MatcherConfig::default())
    }

    fn record(id: &str, place: Option<&str>, province: Option<&str>) -> CrmRecord {
        CrmRecord {
            id: id.to_string(),
            title: format!("Deal {id}"),
            place: place.map(str::to_string),
            province: province.map(str::to_string),
        }
    }

    #[test]
    fn resolves_treviso_with_default_order() {
        let result = pipeline().resolve(Some("Comune di Treviso"), Some("TV"));
        assert_eq!(result.key, NormalizedPlaceKey::new("treviso", "tv"));
        assert_eq!(result.latitude(), Some(45.6667));
        assert_eq!(result.longitude(), Some(12.25));
        assert!(result.match_source().unwrap().starts_with("ExactMatch_"));
        assert_eq!(result.stage(), Some(StageKind::ExactPlace));
    }

    #[test]
    fn resolves_treviso_by_compound_key_when_ordered_first() {
        let config = MatcherConfig {
            stages: vec![
                StageKind::ExactPlaceProvince,
                StageKind::ExactPlace,
                StageKind::ManualCorrection,
                StageKind::FuzzyPlace,
                StageKind::Prefix,
                StageKind::Province,
            ],
            ..MatcherConfig::default()
        };
        let result = pipeline_with(&config).resolve(Some("Comune di Treviso"), Some("TV"));
        assert_eq!(result.match_source().as_deref(), Some("ExactMatch_ComuneProv"));
        assert_eq!(result.latitude(), Some(45.6667));
        assert_eq!(result.longitude(), Some(12.25));
    }

    #[test]
    fn earlier_stage_wins_over_later_stage() {
        // ("treviso", "tv") satisfies both the compound and the fuzzy stage
        let config = MatcherConfig {
            stages: vec![StageKind::ExactPlaceProvince, StageKind::FuzzyPlace],
            ..MatcherConfig::default()
        };
        let pipeline = pipeline_with(&config);
        let report = pipeline.run(vec![record("1", Some("Treviso"), Some("TV"))]);

        let result = &report.records[0].result;
        assert_eq!(result.match_source().as_deref(), Some("ExactMatch_ComuneProv"));
        assert_eq!(report.records[0].stages_tried, vec![StageKind::ExactPlaceProvince]);
        assert_eq!(report.stage_counts[1].attempted, 0);
    }

    #[test]
    fn every_gazetteer_entry_resolves_exactly() {
        let pipeline = pipeline();
        for entry in gazetteer().entries() {
            let result = pipeline.resolve(Some(&entry.name), Some(&entry.province_code));
            assert!(
                result.match_source().unwrap().starts_with("ExactMatch_"),
                "{} resolved via {:?}",
                entry.name,
                result.match_source()
            );
            assert_eq!(result.resolution.unwrap().coordinates, entry.coordinates);
        }
    }

    #[test]
    fn fuzzy_match_reached_only_after_exact_stages_fail() {
        let result = pipeline().resolve(Some("Parrocchia San Giovanni XYZ123"), None);
        assert_eq!(result.key.place, "giovanni xyz123");
        assert_eq!(result.stage(), Some(StageKind::FuzzyPlace));
        assert_eq!(result.match_source().as_deref(), Some("FuzzyMatch_TokenSet_100"));
    }

    #[test]
    fn empty_input_is_unmatched_with_sentinel_key() {
        let report = pipeline().run(vec![record("1", Some(""), Some(""))]);
        let geocoded = &report.records[0];
        assert!(!geocoded.result.is_matched());
        assert_eq!(geocoded.result.key.place, UNSPECIFIED);
        assert_eq!(geocoded.result.key.province, UNSPECIFIED);
        assert_eq!(geocoded.stages_tried, StageKind::DEFAULT_ORDER.to_vec());
        assert_eq!(report.unmatched_records().count(), 1);
    }

    #[test]
    fn manual_correction_resolves_hamlet() {
        let result = pipeline().resolve(Some("Lancenigo"), Some("TV"));
        assert_eq!(result.match_source().as_deref(), Some("CorrecaoManual"));
        assert_eq!(result.stage(), Some(StageKind::ManualCorrection));
    }

    #[test]
    fn province_fallback_for_unknown_place() {
        let result = pipeline().resolve(Some("Xq"), Some("Padova (PD)"));
        assert_eq!(result.key, NormalizedPlaceKey::new("xq", "padova"));
        // "padova" is not a province code in this gazetteer, "pd" is
        assert_eq!(result.match_source(), None);

        let result = pipeline().resolve(Some("Xq"), Some("PD"));
        assert_eq!(result.match_source().as_deref(), Some("ProvinciaMatch"));
        assert_eq!(result.latitude(), Some(45.4064));
    }

    #[test]
    fn province_names_resolve_when_name_column_is_loaded() {
        let padova = Municipality {
            id: "28060".to_string(),
            name: "Padova".to_string(),
            province_code: "PD".to_string(),
            province_name: Some("Padova".to_string()),
            coordinates: Coordinates::new(45.4064, 11.8768),
        };
        let gazetteer = Arc::new(Gazetteer::build(vec![padova], Normalizer::embedded()));
        let pipeline = Pipeline::new(
            Normalizer::embedded().clone(),
            gazetteer,
            &MatcherConfig::default(),
        )
        .unwrap();

        let result = pipeline.resolve(Some("Xq"), Some("Padova (PD)"));
        assert_eq!(result.key.province, "padova");
        assert_eq!(result.match_source().as_deref(), Some("ProvinciaMatch"));
        assert_eq!(result.latitude(), Some(45.4064));
    }

    #[test]
    fn province_codes_that_are_also_stopwords_resolve_by_province() {
        let rows = [
            ("6003", "Alessandria", "AL", 44.9133, 8.6150),
            ("75035", "Lecce", "LE", 40.3515, 18.1750),
            ("98031", "Lodi", "LO", 45.3140, 9.5036),
            ("90064", "Sassari", "SS", 40.7267, 8.5592),
            ("26086", "Treviso", "TV", 45.6667, 12.25),
        ];
        let gazetteer = Arc::new(Gazetteer::build(
            rows.into_iter()
                .map(|(id, name, code, lat, lon)| Municipality {
                    id: id.to_string(),
                    name: name.to_string(),
                    province_code: code.to_string(),
                    province_name: None,
                    coordinates: Coordinates::new(lat, lon),
                })
                .collect(),
            Normalizer::embedded(),
        ));
        let pipeline = Pipeline::new(
            Normalizer::embedded().clone(),
            Arc::clone(&gazetteer),
            &MatcherConfig::default(),
        )
        .unwrap();

        for (_, name, code, lat, lon) in rows {
            assert!(gazetteer.lookup_province(&code.to_lowercase()).is_some());

            let result = pipeline.resolve(Some("Xq"), Some(code));
            assert_eq!(result.key.province, code.to_lowercase());
            assert_eq!(result.match_source().as_deref(), Some("ProvinciaMatch"), "{code}");
            assert_eq!(result.latitude(), Some(lat));
            assert_eq!(result.longitude(), Some(lon));

            let exact = pipeline.resolve(Some(name), Some(code));
            assert!(
                gazetteer
                    .lookup_key(&exact.key)
                    .is_some_and(|entry| entry.name == name),
                "({name}, {code}) missing from the compound index"
            );
        }
    }

    #[test]
    fn batch_keys_come_from_place_references() {
        let records = vec![record("9", Some("Comune di Treviso (TV)"), Some("TV"))];
        let expected = Normalizer::embedded().normalize_reference(&records[0].place_reference());
        let report = pipeline().run(records);
        assert_eq!(report.records[0].result.key, expected);
        assert_eq!(expected, NormalizedPlaceKey::new("treviso", "tv"));
    }

    #[test]
    fn counts_add_up_and_coordinates_imply_tag() {
        let records = vec![
            record("1", Some("Treviso"), Some("TV")),
            record("2", Some("Mogliano"), None),
            record("3", None, None),
            record("4", Some("Oderso"), Some("TV")),
            record("5", Some("Qqqqq Zzzzz"), None),
            record("6", Some("Padovx"), Some("PD")),
            record("7", Some("Xq"), Some("VR")),
        ];
        let total = records.len();
        let report = pipeline().run(records);

        assert_eq!(report.total(), total);
        assert_eq!(report.matched + report.unmatched, total);
        assert_eq!(
            report.stage_counts.iter().map(|c| c.matched).sum::<usize>(),
            report.matched
        );
        for geocoded in &report.records {
            let result = &geocoded.result;
            assert_eq!(result.latitude().is_some(), result.match_source().is_some());
            assert_eq!(result.longitude().is_some(), result.match_source().is_some());
            if let Some(tag) = result.match_source() {
                assert!(!tag.is_empty());
            }
        }
        assert!(report.gazetteer_available);
    }

    #[test]
    fn missing_gazetteer_leaves_everything_unmatched() {
        let pipeline = Pipeline::new(
            Normalizer::embedded().clone(),
            Arc::new(Gazetteer::empty()),
            &MatcherConfig::default(),
        )
        .unwrap();
        let report = pipeline.run(vec![
            record("1", Some("Treviso"), Some("TV")),
            record("2", Some("Lancenigo"), None),
        ]);

        assert!(!report.gazetteer_available);
        assert_eq!(report.matched, 0);
        assert_eq!(report.unmatched, 2);
        assert!(report.stage_counts.is_empty());
        assert!(report.records.iter().all(|r| r.stages_tried.is_empty()));
    }

    #[test]
    fn records_keep_input_order() {
        let report = pipeline().run(vec![
            record("a", Some("nowhere at all"), None),
            record("b", Some("Treviso"), None),
            record("c", Some("Padova"), None),
        ]);
        let ids: Vec<&str> = report.records.iter().map(|r| r.record.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(report.matched_by(StageKind::ExactPlace), 2);
    }
}
