//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crm_geocode_cli_utils::{IndicatifProgress, MultiProgress};
use crm_geocode_config::Config;
use crm_geocode_gazetteer::{Gazetteer, GazetteerCache};
use crm_geocode_matcher::{Pipeline, PipelineReport};
use crm_geocode_matcher_models::MatchResult;
use crm_geocode_normalize::Normalizer;
use crm_geocode_source::{
    BiConnectorSource, CsvFileSource, RecordSource, ResponseCache, SourceError, csv_file,
};

type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// State shared by the subcommands of one invocation: the normalizer
/// built from the settings and the single gazetteer cache.
pub struct Session {
    normalizer: Normalizer,
    gazetteer: GazetteerCache,
}

impl Session {
    /// Builds the normalizer. The gazetteer is not read until a command
    /// needs it.
    ///
    /// # Errors
    ///
    /// Returns the normalizer error if a configured table file is
    /// unreadable or invalid.
    pub fn new(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let settings = &config.settings;
        let normalizer = Normalizer::from_config(&settings.normalizer)?;
        let gazetteer = GazetteerCache::new(settings.gazetteer.clone(), normalizer.clone());
        Ok(Self {
            normalizer,
            gazetteer,
        })
    }
}

/// `normalize`: one line per argument, raw and normalized separated by a
/// tab.
pub fn normalize(session: &Session, text: &[String]) -> CommandResult {
    for raw in text {
        println!("{raw}\t{}", session.normalizer.normalize(raw));
    }
    Ok(())
}

/// `resolve`: runs a single place reference through every stage.
pub fn resolve(
    config: &Config,
    session: &Session,
    place: &str,
    province: Option<&str>,
) -> CommandResult {
    let pipeline = build_pipeline(config, session)?;
    let result = pipeline.resolve(Some(place), province);
    print_result(&result);
    Ok(())
}

/// `gazetteer`: loads the reference tables and prints their statistics.
/// Unlike the matching commands, a load failure is returned as an error.
pub fn gazetteer(session: &Session) -> CommandResult {
    let start = Instant::now();
    let gazetteer = session.gazetteer.get()?;
    let stats = gazetteer.stats();

    println!("Municipality rows:      {}", stats.municipality_rows);
    println!("Coordinate rows:        {}", stats.coordinate_rows);
    println!("Joined rows:            {}", stats.joined_rows);
    println!("Dropped (malformed):    {}", stats.dropped_rows);
    println!("Without coordinates:    {}", stats.unjoined_rows);
    println!("Duplicate keys:         {}", stats.duplicate_keys);
    println!("Names normalizing away: {}", stats.sentinel_names);
    println!("Distinct places:        {}", gazetteer.place_names().len());
    println!("Province keys:          {}", gazetteer.province_names().len());
    log::info!("Gazetteer loaded in {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}

/// Picks the record source for `geocode`.
pub fn record_source(
    config: &Config,
    input: Option<PathBuf>,
    connector: bool,
) -> Result<Box<dyn RecordSource>, SourceError> {
    match input {
        Some(path) if !connector => Ok(Box::new(CsvFileSource::new(
            path,
            config.settings.connector.fields.clone(),
        ))),
        _ => Ok(Box::new(connector_source(config)?)),
    }
}

/// `geocode`: fetches records, runs the pipeline, writes both exports
/// and prints a per-stage summary.
pub async fn geocode(
    config: &Config,
    session: &Session,
    source: &dyn RecordSource,
    multi: &MultiProgress,
) -> CommandResult {
    let start = Instant::now();

    let spinner = IndicatifProgress::spinner(multi, &format!("Fetching from {}", source.name()));
    let records = source.fetch_records().await?;
    spinner.finish(format!("{} records from {}", records.len(), source.name()));

    let progress = IndicatifProgress::records_bar(multi, "Matching places");
    let pipeline = build_pipeline(config, session)?.with_progress(progress);
    let report = pipeline.run(records);

    let export = &config.settings.export;
    crm_geocode_report::export_geocoded(&report.records, Path::new(&export.geocoded_path));
    crm_geocode_report::export_unmatched(
        &report.records,
        report.gazetteer_available,
        Path::new(&export.unmatched_path),
    );

    print_summary(&report);
    log::info!("Geocoding finished in {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}

/// `fetch`: downloads connector records and writes them as CSV.
pub async fn fetch(config: &Config, output: &Path) -> CommandResult {
    let source = connector_source(config)?;
    let records = source.fetch_records().await?;
    let written = csv_file::write_records(output, &records, &config.settings.connector.fields)?;
    log::info!("Wrote {written} records to {}", output.display());
    println!("{written} records written to {}", output.display());
    Ok(())
}

fn connector_source(config: &Config) -> Result<BiConnectorSource, SourceError> {
    let connector = &config.settings.connector;
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(
        connector.cache_ttl_secs,
    )));
    BiConnectorSource::new(connector, config.token.as_deref().unwrap_or_default(), cache)
}

/// Builds the matcher. A gazetteer that fails to load is logged and
/// replaced by an empty one, so every record ends unresolved.
fn build_pipeline(
    config: &Config,
    session: &Session,
) -> Result<Pipeline, Box<dyn std::error::Error>> {
    let gazetteer = session.gazetteer.get().unwrap_or_else(|e| {
        log::error!("Gazetteer unavailable, no record can be geocoded: {e}");
        Arc::new(Gazetteer::empty())
    });

    Ok(Pipeline::new(
        session.normalizer.clone(),
        gazetteer,
        &config.settings.matcher,
    )?)
}

fn print_result(result: &MatchResult) {
    println!("place:    {}", result.key.place);
    println!("province: {}", result.key.province);
    match (result.latitude(), result.longitude(), result.match_source()) {
        (Some(lat), Some(lon), Some(source)) => {
            println!("lat/lon:  {lat}, {lon}");
            println!("source:   {source}");
        }
        _ => println!("unmatched"),
    }
}

fn print_summary(report: &PipelineReport) {
    println!();
    println!("{:<22} {:>9} {:>9}", "STAGE", "ATTEMPTED", "MATCHED");
    println!("{}", "-".repeat(42));
    for count in &report.stage_counts {
        println!(
            "{:<22} {:>9} {:>9}",
            count.stage.as_ref(),
            count.attempted,
            count.matched
        );
    }
    println!("{}", "-".repeat(42));
    println!(
        "{} records: {} matched, {} unmatched",
        report.total(),
        report.matched,
        report.unmatched
    );
    if !report.gazetteer_available {
        println!("Gazetteer was unavailable; see the log for the load error.");
    }
}
