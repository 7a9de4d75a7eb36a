//! Bitrix24 BI-connector source.
//!
//! The connector exposes each CRM table at a single endpoint. A request
//! is a POST to `{base_url}?table={table}` with the access key (and an
//! optional creation-date window) in the JSON body. The response layout
//! varies, so the body goes through [`infer_table`] before mapping.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use crm_geocode_matcher_models::CrmRecord;
use crm_geocode_matcher_models::config::ConnectorConfig;
use serde_json::{Value, json};

use crate::cache::ResponseCache;
use crate::mapping::records_from_table;
use crate::retry::RetryPolicy;
use crate::shape::{Table, infer_table};
use crate::{RecordSource, SourceError};

/// Fetches CRM records from the BI connector.
pub struct BiConnectorSource {
    client: reqwest::Client,
    config: ConnectorConfig,
    token: String,
    retry: RetryPolicy,
    cache: Arc<ResponseCache>,
}

impl fmt::Debug for BiConnectorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BiConnectorSource")
            .field("base_url", &self.config.base_url)
            .field("table", &self.config.table)
            .field("token", &"<redacted>")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl BiConnectorSource {
    /// Creates a connector source. `token` is the connector access key.
    ///
    /// # Errors
    ///
    /// * [`SourceError::MissingCredentials`] if the URL or token is blank
    /// * [`SourceError::Http`] if the HTTP client cannot be built
    pub fn new(
        config: &ConnectorConfig,
        token: &str,
        cache: Arc<ResponseCache>,
    ) -> Result<Self, SourceError> {
        if config.base_url.trim().is_empty() {
            return Err(SourceError::MissingCredentials(
                "connector base URL is not set (BITRIX_BI_URL)".to_string(),
            ));
        }
        if token.trim().is_empty() {
            return Err(SourceError::MissingCredentials(
                "connector token is not set (BITRIX_BI_TOKEN)".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
            token: token.trim().to_string(),
            retry: RetryPolicy::from(&config.retry),
            cache,
        })
    }

    /// Downloads the configured table, or returns the cached copy if it
    /// is still fresh.
    ///
    /// # Errors
    ///
    /// * [`SourceError::RetriesExhausted`] if every attempt failed
    ///   transiently
    /// * [`SourceError::Status`] for a non-retryable HTTP status
    /// * [`SourceError::UnrecognizedShape`] if the payload is not a table
    pub async fn fetch_table(&self) -> Result<Arc<Table>, SourceError> {
        let table_name = &self.config.table;
        if let Some(table) = self.cache.get(table_name) {
            log::debug!("Using cached '{table_name}' ({} rows)", table.len());
            return Ok(table);
        }

        let url = self.config.base_url.trim_end_matches('?');
        let body = request_body(&self.token, self.config.days_back, Utc::now().date_naive());
        log::info!("Fetching '{table_name}' from the BI connector");

        let payload = self
            .retry
            .send_json(&format!("BI connector '{table_name}'"), || {
                self.client
                    .post(url)
                    .query(&[("table", table_name.as_str())])
                    .json(&body)
            })
            .await?;

        let table = Arc::new(infer_table(&payload)?);
        log::info!(
            "Received {} rows ({} columns) for '{table_name}'",
            table.len(),
            table.columns.len()
        );
        self.cache.insert(table_name, Arc::clone(&table));
        Ok(table)
    }
}

#[async_trait]
impl RecordSource for BiConnectorSource {
    fn name(&self) -> String {
        format!("BI connector table '{}'", self.config.table)
    }

    async fn fetch_records(&self) -> Result<Vec<CrmRecord>, SourceError> {
        let table = self.fetch_table().await?;
        records_from_table(&table, &self.config.fields)
    }
}

/// Builds the request body. With `days_back`, rows are limited to those
/// created between `today - days_back` and `today`.
fn request_body(token: &str, days_back: Option<u32>, today: NaiveDate) -> Value {
    let mut body = json!({ "key": token });
    if let Some(days) = days_back {
        let start = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        body["dateRange"] = json!({
            "startDate": start.format("%Y-%m-%d").to_string(),
            "endDate": today.format("%Y-%m-%d").to_string(),
        });
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_geocode_matcher_models::config::RetryConfig;

    fn config(base_url: &str) -> ConnectorConfig {
        ConnectorConfig {
            base_url: base_url.to_string(),
            retry: RetryConfig {
                max_attempts: 1,
                delay_ms: 1,
                ..RetryConfig::default()
            },
            ..ConnectorConfig::default()
        }
    }

    fn cache() -> Arc<ResponseCache> {
        Arc::new(ResponseCache::new(Duration::from_secs(600)))
    }

    #[test]
    fn requires_url_and_token() {
        assert!(matches!(
            BiConnectorSource::new(&config(""), "secret", cache()),
            Err(SourceError::MissingCredentials(_))
        ));
        assert!(matches!(
            BiConnectorSource::new(&config("http://127.0.0.1:9/pbi.php"), "  ", cache()),
            Err(SourceError::MissingCredentials(_))
        ));
    }

    #[test]
    fn debug_output_hides_token() {
        let source =
            BiConnectorSource::new(&config("http://127.0.0.1:9/pbi.php"), "s3cr3t", cache())
                .unwrap();
        let debug = format!("{source:?}");
        assert!(!debug.contains("s3cr3t"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn body_carries_key_and_optional_date_range() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();

        let plain = request_body("k", None, today);
        assert_eq!(plain, json!({ "key": "k" }));

        let windowed = request_body("k", Some(30), today);
        assert_eq!(windowed["dateRange"]["startDate"], "2024-03-01");
        assert_eq!(windowed["dateRange"]["endDate"], "2024-03-31");
    }

    #[tokio::test]
    async fn fresh_cache_entry_skips_the_network() {
        let shared = cache();
        shared.insert(
            "crm_deal",
            Arc::new(Table {
                columns: vec!["ID".to_string(), "UF_CRM_COMUNE".to_string()],
                rows: vec![vec![json!(1), json!("Treviso")]],
            }),
        );

        // Port 9 is unreachable, so a network call would fail
        let source =
            BiConnectorSource::new(&config("http://127.0.0.1:9/pbi.php"), "k", shared).unwrap();
        let records = source.fetch_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].place.as_deref(), Some("Treviso"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error_not_an_empty_table() {
        let shared = cache();
        let source =
            BiConnectorSource::new(&config("http://127.0.0.1:9/pbi.php"), "k", Arc::clone(&shared))
                .unwrap();

        let result = source.fetch_records().await;
        assert!(matches!(
            result,
            Err(SourceError::RetriesExhausted { attempts: 1, .. })
        ));
        assert!(shared.get("crm_deal").is_none());
    }
}
