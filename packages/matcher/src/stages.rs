//! The matching stages.
//!
//! Each stage receives only the records still unresolved by earlier
//! stages and splits them into matched and still-unmatched. Stages never
//! see a record that already has a result, so an earlier stage can never
//! be overwritten by a later one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crm_geocode_gazetteer::Gazetteer;
use crm_geocode_matcher_models::config::{FuzzyConfig, MatcherConfig, PrefixConfig, ProvinceConfig};
use crm_geocode_matcher_models::{
    Coordinates, MatchSource, NormalizedPlaceKey, Resolution, Scorer, StageKind, UNSPECIFIED,
};

use crate::corrections::ManualCorrections;
use crate::fuzzy;

/// A record awaiting resolution, identified by its position in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending {
    /// Index into the caller's record list.
    pub index: usize,
    /// Normalized key of the record.
    pub key: NormalizedPlaceKey,
}

/// Result of running one stage over a batch.
#[derive(Debug, Default)]
pub struct StageOutcome {
    /// Records this stage resolved.
    pub matched: Vec<(Pending, Resolution)>,
    /// Records left for the next stage, in input order.
    pub unmatched: Vec<Pending>,
}

/// One strategy in the fallback chain.
pub trait MatchStage: Send + Sync + fmt::Debug {
    /// Which stage this is.
    fn kind(&self) -> StageKind;

    /// Attempts every record in `batch`.
    fn attempt(&self, gazetteer: &Gazetteer, batch: Vec<Pending>) -> StageOutcome;
}

/// Splits a batch with a per-key lookup.
fn partition(
    kind: StageKind,
    batch: Vec<Pending>,
    mut lookup: impl FnMut(&NormalizedPlaceKey) -> Option<(Coordinates, MatchSource)>,
) -> StageOutcome {
    let mut outcome = StageOutcome::default();
    for pending in batch {
        match lookup(&pending.key) {
            Some((coordinates, source)) => outcome.matched.push((
                pending,
                Resolution {
                    coordinates,
                    source,
                    stage: kind,
                },
            )),
            None => outcome.unmatched.push(pending),
        }
    }
    outcome
}

/// Memoizes a lookup on one string so that each distinct value is
/// evaluated once per batch.
fn memoized<'a>(
    mut lookup: impl FnMut(&str) -> Option<(Coordinates, MatchSource)> + 'a,
) -> impl FnMut(&str) -> Option<(Coordinates, MatchSource)> + 'a {
    let mut memo: HashMap<String, Option<(Coordinates, MatchSource)>> = HashMap::new();
    move |value| {
        if let Some(hit) = memo.get(value) {
            return hit.clone();
        }
        let result = lookup(value);
        memo.insert(value.to_string(), result.clone());
        result
    }
}

/// Stage 1: normalized place in the place-only index.
#[derive(Debug, Default)]
pub struct ExactPlaceStage;

impl MatchStage for ExactPlaceStage {
    fn kind(&self) -> StageKind {
        StageKind::ExactPlace
    }

    fn attempt(&self, gazetteer: &Gazetteer, batch: Vec<Pending>) -> StageOutcome {
        partition(self.kind(), batch, |key| {
            gazetteer
                .lookup_place(&key.place)
                .map(|entry| (entry.coordinates, MatchSource::ExactComune))
        })
    }
}

/// Stage 2: normalized `(place, province)` in the compound index.
#[derive(Debug, Default)]
pub struct ExactPlaceProvinceStage;

impl MatchStage for ExactPlaceProvinceStage {
    fn kind(&self) -> StageKind {
        StageKind::ExactPlaceProvince
    }

    fn attempt(&self, gazetteer: &Gazetteer, batch: Vec<Pending>) -> StageOutcome {
        partition(self.kind(), batch, |key| {
            gazetteer
                .lookup_key(key)
                .map(|entry| (entry.coordinates, MatchSource::ExactComuneProvince))
        })
    }
}

/// Stage 3: the manual correction table. Place entries take precedence
/// over province entries.
#[derive(Debug)]
pub struct ManualCorrectionStage {
    corrections: Arc<ManualCorrections>,
}

impl ManualCorrectionStage {
    /// Creates the stage over a correction table.
    #[must_use]
    pub const fn new(corrections: Arc<ManualCorrections>) -> Self {
        Self { corrections }
    }
}

impl MatchStage for ManualCorrectionStage {
    fn kind(&self) -> StageKind {
        StageKind::ManualCorrection
    }

    fn attempt(&self, _gazetteer: &Gazetteer, batch: Vec<Pending>) -> StageOutcome {
        partition(self.kind(), batch, |key| {
            if let Some(coordinates) = self.corrections.place(&key.place) {
                return Some((coordinates, MatchSource::ManualCorrection));
            }
            self.corrections
                .province(&key.province)
                .map(|coordinates| (coordinates, MatchSource::Province))
        })
    }
}

/// Stage 4: approximate match of the place against every gazetteer name.
#[derive(Debug)]
pub struct FuzzyPlaceStage {
    config: FuzzyConfig,
}

impl FuzzyPlaceStage {
    /// Creates the stage with its thresholds.
    #[must_use]
    pub const fn new(config: FuzzyConfig) -> Self {
        Self { config }
    }

    const fn threshold(&self, scorer: Scorer) -> f64 {
        match scorer {
            Scorer::TokenSort | Scorer::TokenSet => self.config.token_threshold,
            Scorer::Partial => self.config.partial_threshold,
            Scorer::Ratio => self.config.ratio_threshold,
        }
    }

    /// Runs every scorer, stopping early on a high-confidence token
    /// score. Returns the winning candidate, scorer and score.
    #[must_use]
    pub fn best_candidate<'a>(
        &self,
        place: &str,
        candidates: &'a [String],
    ) -> Option<(&'a str, Scorer, f64)> {
        if place == UNSPECIFIED || place.chars().count() < self.config.min_length {
            return None;
        }

        let mut best: Option<(&'a str, Scorer, f64)> = None;
        for scorer in Scorer::ALL {
            let Some((candidate, score)) = fuzzy::best_match(scorer, place, candidates) else {
                continue;
            };
            if scorer.is_token_based() && score >= self.config.high_confidence {
                log::trace!("High-confidence {scorer} match {place:?} -> {candidate:?} ({score:.1})");
                return Some((candidate, scorer, score));
            }
            if score >= self.threshold(scorer) && best.is_none_or(|(_, _, top)| score > top) {
                best = Some((candidate, scorer, score));
            }
        }
        best
    }
}

impl MatchStage for FuzzyPlaceStage {
    fn kind(&self) -> StageKind {
        StageKind::FuzzyPlace
    }

    fn attempt(&self, gazetteer: &Gazetteer, batch: Vec<Pending>) -> StageOutcome {
        let candidates = gazetteer.place_names();
        let mut lookup = memoized(|place| {
            let (candidate, scorer, score) = self.best_candidate(place, candidates)?;
            let entry = gazetteer.lookup_place(candidate)?;
            Some((
                entry.coordinates,
                MatchSource::Fuzzy {
                    scorer,
                    score: fuzzy::round_score(score),
                },
            ))
        });
        partition(self.kind(), batch, |key| lookup(&key.place))
    }
}

/// Stage 5: gazetteer names sharing the place's leading characters.
#[derive(Debug)]
pub struct PrefixStage {
    config: PrefixConfig,
}

impl PrefixStage {
    /// Creates the stage with its prefix length.
    #[must_use]
    pub const fn new(config: PrefixConfig) -> Self {
        Self { config }
    }

    /// Leading characters compared, or `None` when the place is too short
    /// to try.
    #[must_use]
    pub fn prefix_of(&self, place: &str) -> Option<String> {
        if place == UNSPECIFIED || place.chars().count() < self.config.min_length {
            return None;
        }
        Some(place.chars().take(self.config.length).collect())
    }
}

impl MatchStage for PrefixStage {
    fn kind(&self) -> StageKind {
        StageKind::Prefix
    }

    fn attempt(&self, gazetteer: &Gazetteer, batch: Vec<Pending>) -> StageOutcome {
        let candidates = gazetteer.place_names();
        let mut lookup = memoized(|place| {
            let prefix = self.prefix_of(place)?;
            let shortest = candidates
                .iter()
                .filter(|name| name.starts_with(&prefix))
                .min_by_key(|name| name.chars().count())?;
            let entry = gazetteer.lookup_place(shortest)?;
            Some((entry.coordinates, MatchSource::Prefix { prefix }))
        });
        partition(self.kind(), batch, |key| lookup(&key.place))
    }
}

/// Stage 6: province centroid, exact then fuzzy.
#[derive(Debug)]
pub struct ProvinceStage {
    config: ProvinceConfig,
}

impl ProvinceStage {
    /// Creates the stage with its fuzzy threshold.
    #[must_use]
    pub const fn new(config: ProvinceConfig) -> Self {
        Self { config }
    }
}

impl MatchStage for ProvinceStage {
    fn kind(&self) -> StageKind {
        StageKind::Province
    }

    fn attempt(&self, gazetteer: &Gazetteer, batch: Vec<Pending>) -> StageOutcome {
        let names = gazetteer.province_names();
        let mut lookup = memoized(|province| {
            if province == UNSPECIFIED {
                return None;
            }
            if let Some(entry) = gazetteer.lookup_province(province) {
                return Some((entry.centroid, MatchSource::Province));
            }
            let (candidate, score) = fuzzy::best_match(Scorer::TokenSet, province, names)?;
            if score < self.config.fuzzy_threshold {
                return None;
            }
            let entry = gazetteer.lookup_province(candidate)?;
            Some((
                entry.centroid,
                MatchSource::ProvinceFuzzy {
                    score: fuzzy::round_score(score),
                },
            ))
        });
        partition(self.kind(), batch, |key| lookup(&key.province))
    }
}

/// Builds the stages named in `config.stages`, in order. Repeated kinds
/// are ignored after their first occurrence.
#[must_use]
pub fn build_stages(
    config: &MatcherConfig,
    corrections: &Arc<ManualCorrections>,
) -> Vec<Box<dyn MatchStage>> {
    let mut stages: Vec<Box<dyn MatchStage>> = Vec::with_capacity(config.stages.len());
    let mut seen = Vec::with_capacity(config.stages.len());
    for &kind in &config.stages {
        if seen.contains(&kind) {
            log::warn!("Stage {kind} listed more than once, ignoring repeat");
            continue;
        }
        seen.push(kind);
        let stage: Box<dyn MatchStage> = match kind {
            StageKind::ExactPlace => Box::new(ExactPlaceStage),
            StageKind::ExactPlaceProvince => Box::new(ExactPlaceProvinceStage),
            StageKind::ManualCorrection => {
                Box::new(ManualCorrectionStage::new(Arc::clone(corrections)))
            }
            StageKind::FuzzyPlace => Box::new(FuzzyPlaceStage::new(config.fuzzy.clone())),
            StageKind::Prefix => Box::new(PrefixStage::new(config.prefix.clone())),
            StageKind::Province => Box::new(ProvinceStage::new(config.province.clone())),
        };
        stages.push(stage);
    }
    stages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_geocode_gazetteer::Municipality;
    use crm_geocode_normalize::Normalizer;

    fn gazetteer() -> Gazetteer {
        let rows = [
            ("1", "Treviso", "TV", 45.6667, 12.25),
            ("2", "Mogliano Veneto", "TV", 45.5617, 12.2358),
            ("3", "Castelfranco Veneto", "TV", 45.6714, 11.9272),
            ("4", "Castello di Godego", "TV", 45.6958, 11.8792),
            ("5", "Padova", "PD", 45.4064, 11.8768),
        ];
        Gazetteer::build(
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
        )
    }

    fn pending(place: &str, province: &str) -> Vec<Pending> {
        vec![Pending {
            index: 0,
            key: NormalizedPlaceKey::new(place, province),
        }]
    }

    fn single(stage: &dyn MatchStage, place: &str, province: &str) -> Option<Resolution> {
        let mut outcome = stage.attempt(&gazetteer(), pending(place, province));
        outcome.matched.pop().map(|(_, resolution)| resolution)
    }

    #[test]
    fn exact_place_matches_without_province() {
        let resolution = single(&ExactPlaceStage, "treviso", UNSPECIFIED).unwrap();
        assert_eq!(resolution.source, MatchSource::ExactComune);
        assert_eq!(resolution.stage, StageKind::ExactPlace);
    }

    #[test]
    fn exact_place_province_requires_both() {
        assert!(single(&ExactPlaceProvinceStage, "treviso", "tv").is_some());
        assert!(single(&ExactPlaceProvinceStage, "treviso", "pd").is_none());
    }

    #[test]
    fn manual_correction_prefers_place_entries() {
        let stage = ManualCorrectionStage::new(Arc::new(ManualCorrections::embedded()));
        let place = single(&stage, "lancenigo", "veneto").unwrap();
        assert_eq!(place.source.tag(), "CorrecaoManual");

        let province = single(&stage, "somewhere", "veneto").unwrap();
        assert_eq!(province.source.tag(), "ProvinciaMatch");
        assert_eq!(province.stage, StageKind::ManualCorrection);
    }

    #[test]
    fn fuzzy_stage_tags_scorer_and_score() {
        let stage = FuzzyPlaceStage::new(FuzzyConfig::default());
        let resolution = single(&stage, "mogliano", UNSPECIFIED).unwrap();
        assert_eq!(
            resolution.source,
            MatchSource::Fuzzy {
                scorer: Scorer::TokenSet,
                score: 100
            }
        );
        assert_eq!(resolution.source.tag(), "FuzzyMatch_TokenSet_100");
    }

    #[test]
    fn fuzzy_stage_accepts_misspelling_via_ratio() {
        let stage = FuzzyPlaceStage::new(FuzzyConfig::default());
        let resolution = single(&stage, "trevsio", UNSPECIFIED).unwrap();
        assert!((resolution.coordinates.latitude - 45.6667).abs() < 1e-9);
        assert!(resolution.source.tag().starts_with("FuzzyMatch_"));
    }

    #[test]
    fn fuzzy_stage_skips_short_and_sentinel_inputs() {
        let stage = FuzzyPlaceStage::new(FuzzyConfig::default());
        assert!(stage.best_candidate("tr", gazetteer().place_names()).is_none());
        assert!(stage.best_candidate(UNSPECIFIED, gazetteer().place_names()).is_none());
    }

    #[test]
    fn fuzzy_stage_rejects_unrelated_text() {
        let stage = FuzzyPlaceStage::new(FuzzyConfig::default());
        assert!(single(&stage, "zzzzqqq", UNSPECIFIED).is_none());
    }

    #[test]
    fn prefix_stage_picks_shortest_candidate() {
        let stage = PrefixStage::new(PrefixConfig::default());
        let resolution = single(&stage, "castelxyz", UNSPECIFIED).unwrap();
        // "castello godego" is shorter than "castelfranco veneto"
        assert!((resolution.coordinates.latitude - 45.6958).abs() < 1e-9);
        assert_eq!(resolution.source.tag(), "PrefixMatch_caste");
    }

    #[test]
    fn prefix_stage_skips_short_inputs() {
        let stage = PrefixStage::new(PrefixConfig::default());
        assert_eq!(stage.prefix_of("tre"), None);
        assert_eq!(stage.prefix_of("trev").as_deref(), Some("trev"));
        assert_eq!(stage.prefix_of("treviso").as_deref(), Some("trevi"));
        assert_eq!(stage.prefix_of(UNSPECIFIED), None);
    }

    #[test]
    fn province_stage_uses_centroid() {
        let stage = ProvinceStage::new(ProvinceConfig::default());
        let resolution = single(&stage, "nowhere", "pd").unwrap();
        assert_eq!(resolution.source, MatchSource::Province);
        assert!((resolution.coordinates.latitude - 45.4064).abs() < 1e-9);
    }

    #[test]
    fn province_stage_skips_sentinel() {
        let stage = ProvinceStage::new(ProvinceConfig::default());
        assert!(single(&stage, "nowhere", UNSPECIFIED).is_none());
    }

    #[test]
    fn unmatched_records_keep_input_order() {
        let batch = vec![
            Pending {
                index: 0,
                key: NormalizedPlaceKey::new("nowhere", UNSPECIFIED),
            },
            Pending {
                index: 1,
                key: NormalizedPlaceKey::new("treviso", UNSPECIFIED),
            },
            Pending {
                index: 2,
                key: NormalizedPlaceKey::new("elsewhere", UNSPECIFIED),
            },
        ];
        let outcome = ExactPlaceStage.attempt(&gazetteer(), batch);
        assert_eq!(outcome.matched.len(), 1);
        assert_eq!(outcome.matched[0].0.index, 1);
        let remaining: Vec<usize> = outcome.unmatched.iter().map(|p| p.index).collect();
        assert_eq!(remaining, vec![0, 2]);
    }

    #[test]
    fn build_stages_follows_configured_order() {
        let config = MatcherConfig {
            stages: vec![
                StageKind::Province,
                StageKind::ExactPlace,
                StageKind::Province,
            ],
            ..MatcherConfig::default()
        };
        let stages = build_stages(&config, &Arc::new(ManualCorrections::default()));
        let kinds: Vec<StageKind> = stages.iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, vec![StageKind::Province, StageKind::ExactPlace]);
    }
}
