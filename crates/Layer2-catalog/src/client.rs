//! Explore API v2.1 catalog client
//!
//! Snapshot Reader의 transport 구현. 순수 읽기이며 로컬 상태가 없다.

use crate::{
    error::{CatalogError, CatalogResult},
    retry::{with_retry, RetryConfig},
    text::clean_html_text,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use vigia_foundation::{EntityKind, EntityState, Result, SnapshotSource, UNAVAILABLE};

/// Offset ceiling for per-scope paging, keeps a broken upstream from
/// turning one scope fetch into an unbounded crawl
const MAX_SCAN_OFFSET: u32 = 1000;

/// Request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Catalog API client
pub struct CatalogClient {
    client: Client,
    base_url: String,
    page_size: u32,
    retry_config: RetryConfig,
}

impl CatalogClient {
    /// Create a new catalog client
    pub fn new(base_url: impl Into<String>, page_size: u32) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.into(),
            page_size: page_size.max(1),
            retry_config: RetryConfig::default(),
        }
    }

    /// Override the retry policy (tests use no_retry)
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> CatalogResult<Value> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(CatalogError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::from_http_status(status.as_u16(), &body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| CatalogError::InvalidResponse(e.to_string()))
    }

    /// All themes, as entities whose record count is the dataset count
    pub async fn fetch_themes(&self) -> CatalogResult<Vec<EntityState>> {
        let url = self.url("/api/explore/v2.1/catalog/facets");
        let query = [
            ("facet", "default.theme".to_string()),
            ("lang", "es".to_string()),
        ];

        let data = with_retry(&self.retry_config, "fetch_themes", || {
            self.get_json(&url, &query)
        })
        .await?;

        let response: FacetsResponse = serde_json::from_value(data)
            .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;

        let themes = response
            .facets
            .into_iter()
            .filter(|group| group.name == "default.theme")
            .flat_map(|group| group.facets)
            .map(|facet| EntityState {
                kind: EntityKind::Theme,
                id: facet.name.clone(),
                title: facet.name,
                description: None,
                publisher: None,
                modified: None,
                data_processed: None,
                metadata_processed: None,
                records_count: facet.count,
                themes: vec![],
                keywords: vec![],
            })
            .collect();

        Ok(themes)
    }

    /// Datasets belonging to a theme
    ///
    /// The upstream theme refine is unreliable, so pages are scanned and
    /// filtered client-side, bounded by MAX_SCAN_OFFSET.
    pub async fn fetch_theme_datasets(&self, theme: &str) -> CatalogResult<Vec<EntityState>> {
        let url = self.url("/api/explore/v2.1/catalog/datasets");
        let mut matching = Vec::new();
        let mut offset: u32 = 0;

        loop {
            let query = [
                ("lang", "es".to_string()),
                ("limit", self.page_size.to_string()),
                ("offset", offset.to_string()),
                ("order_by", "-metadata_processed".to_string()),
            ];

            debug!(theme, offset, "Fetching dataset batch");
            let data = with_retry(&self.retry_config, "fetch_theme_datasets", || {
                self.get_json(&url, &query)
            })
            .await?;

            let response: DatasetsResponse = serde_json::from_value(data)
                .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;

            let batch_len = response.results.len();
            for payload in response.results {
                match parse_dataset(&payload) {
                    Some(dataset) if dataset_in_theme(&dataset, theme) => matching.push(dataset),
                    Some(_) => {}
                    None => warn!(theme, "Skipping dataset with unusable payload"),
                }
            }

            offset += self.page_size;
            if batch_len < self.page_size as usize || offset >= MAX_SCAN_OFFSET {
                break;
            }
        }

        debug!(theme, count = matching.len(), "Theme scan complete");
        Ok(matching)
    }

    /// One page of the full dataset listing (daily discovery)
    pub async fn fetch_datasets_page(
        &self,
        limit: u32,
        offset: u32,
    ) -> CatalogResult<Vec<EntityState>> {
        let url = self.url("/api/explore/v2.1/catalog/datasets");
        let query = [
            ("lang", "es".to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
            ("order_by", "-metadata_processed".to_string()),
        ];

        let data = with_retry(&self.retry_config, "fetch_datasets_page", || {
            self.get_json(&url, &query)
        })
        .await?;

        let response: DatasetsResponse = serde_json::from_value(data)
            .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;

        Ok(response
            .results
            .iter()
            .filter_map(parse_dataset)
            .collect())
    }

    /// A single dataset's current state, None if removed upstream
    pub async fn fetch_dataset(&self, id: &str) -> CatalogResult<Option<EntityState>> {
        let url = self.url(&format!("/api/explore/v2.1/catalog/datasets/{}", id));
        let query = [("lang", "es".to_string())];

        let result = with_retry(&self.retry_config, "fetch_dataset", || {
            self.get_json(&url, &query)
        })
        .await;

        match result {
            Ok(data) => {
                let payload: DatasetPayload = serde_json::from_value(data)
                    .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;
                Ok(parse_dataset(&payload))
            }
            Err(CatalogError::EntityNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// SnapshotSource 구현
// ============================================================================

#[async_trait]
impl SnapshotSource for CatalogClient {
    async fn fetch_entities(
        &self,
        kind: EntityKind,
        scope: Option<&str>,
    ) -> Result<Vec<EntityState>> {
        match (kind, scope) {
            (EntityKind::Theme, _) => Ok(self.fetch_themes().await?),
            (EntityKind::Dataset, Some(theme)) => Ok(self.fetch_theme_datasets(theme).await?),
            (EntityKind::Dataset, None) => Ok(self.fetch_datasets_page(self.page_size, 0).await?),
        }
    }

    async fn fetch_entity(&self, kind: EntityKind, id: &str) -> Result<Option<EntityState>> {
        match kind {
            EntityKind::Dataset => Ok(self.fetch_dataset(id).await?),
            EntityKind::Theme => {
                let themes = self.fetch_themes().await?;
                Ok(themes.into_iter().find(|t| t.id == id))
            }
        }
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct FacetsResponse {
    #[serde(default)]
    facets: Vec<FacetGroup>,
}

#[derive(Debug, Deserialize)]
struct FacetGroup {
    #[serde(default)]
    name: String,
    #[serde(default)]
    facets: Vec<FacetItem>,
}

#[derive(Debug, Deserialize)]
struct FacetItem {
    #[serde(default)]
    name: String,
    #[serde(default)]
    count: i64,
}

#[derive(Debug, Deserialize)]
struct DatasetsResponse {
    #[serde(default)]
    results: Vec<DatasetPayload>,
}

#[derive(Debug, Deserialize)]
struct DatasetPayload {
    #[serde(default)]
    dataset_id: String,
    #[serde(default)]
    metas: Metas,
}

#[derive(Debug, Default, Deserialize)]
struct Metas {
    #[serde(default)]
    default: DefaultMetas,
}

#[derive(Debug, Default, Deserialize)]
struct DefaultMetas {
    #[serde(default)]
    title: Value,
    #[serde(default)]
    description: Value,
    #[serde(default)]
    publisher: Value,
    #[serde(default)]
    modified: Option<String>,
    #[serde(default)]
    data_processed: Option<String>,
    #[serde(default)]
    metadata_processed: Option<String>,
    #[serde(default)]
    records_count: Option<i64>,
    #[serde(default)]
    theme: Value,
    #[serde(default)]
    keyword: Value,
}

// ============================================================================
// Payload Parsing
// ============================================================================

/// Fields arrive as either a string or a list of strings
fn string_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(clean_html_text(s)),
        Value::Array(items) => items
            .iter()
            .find_map(|v| v.as_str())
            .map(clean_html_text),
        _ => None,
    }
}

fn list_value(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Timestamp fields use a sentinel string when missing
fn timestamp_value(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .filter(|v| !v.is_empty() && *v != UNAVAILABLE)
        .map(str::to_string)
}

fn parse_dataset(payload: &DatasetPayload) -> Option<EntityState> {
    // Ids longer than 200 chars are junk rows in this catalog
    if payload.dataset_id.is_empty() || payload.dataset_id.len() > 200 {
        return None;
    }

    let metas = &payload.metas.default;
    Some(EntityState {
        kind: EntityKind::Dataset,
        id: payload.dataset_id.clone(),
        title: string_value(&metas.title).unwrap_or_else(|| UNAVAILABLE.to_string()),
        description: string_value(&metas.description),
        publisher: string_value(&metas.publisher),
        modified: timestamp_value(&metas.modified),
        data_processed: timestamp_value(&metas.data_processed),
        metadata_processed: timestamp_value(&metas.metadata_processed),
        records_count: metas.records_count.unwrap_or(0),
        themes: list_value(&metas.theme),
        keywords: list_value(&metas.keyword),
    })
}

/// Theme membership is a loose containment match in either direction
fn dataset_in_theme(dataset: &EntityState, theme: &str) -> bool {
    let theme_lower = theme.to_lowercase();
    dataset.themes.iter().any(|t| {
        let t_lower = t.to_lowercase();
        t_lower.contains(&theme_lower) || theme_lower.contains(&t_lower)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(raw: Value) -> DatasetPayload {
        serde_json::from_value(raw).expect("payload parses")
    }

    #[test]
    fn parses_full_payload() {
        let raw = json!({
            "dataset_id": "calidad-del-aire",
            "metas": {
                "default": {
                    "title": "<b>Calidad del aire</b>",
                    "description": ["Mediciones horarias"],
                    "publisher": "Junta",
                    "modified": "2025-08-12T11:14:26+00:00",
                    "data_processed": "2025-08-12T12:00:00+00:00",
                    "metadata_processed": "2025-08-12T12:05:00+00:00",
                    "records_count": 15000,
                    "theme": ["Medio ambiente"],
                    "keyword": ["aire", "contaminacion"]
                }
            }
        });

        let dataset = parse_dataset(&payload(raw)).expect("parses");
        assert_eq!(dataset.id, "calidad-del-aire");
        assert_eq!(dataset.title, "Calidad del aire");
        assert_eq!(dataset.description.as_deref(), Some("Mediciones horarias"));
        assert_eq!(dataset.records_count, 15000);
        assert_eq!(dataset.themes, vec!["Medio ambiente"]);
    }

    #[test]
    fn sentinel_timestamps_become_none() {
        let raw = json!({
            "dataset_id": "sin-fechas",
            "metas": { "default": { "modified": "Dato no disponible" } }
        });

        let dataset = parse_dataset(&payload(raw)).expect("parses");
        assert_eq!(dataset.modified, None);
        assert_eq!(dataset.title, UNAVAILABLE);
    }

    #[test]
    fn rejects_junk_ids() {
        let raw = json!({ "dataset_id": "", "metas": {} });
        assert!(parse_dataset(&payload(raw)).is_none());

        let long_id = "x".repeat(300);
        let raw = json!({ "dataset_id": long_id, "metas": {} });
        assert!(parse_dataset(&payload(raw)).is_none());
    }

    #[test]
    fn theme_matching_is_loose() {
        let raw = json!({
            "dataset_id": "d",
            "metas": { "default": { "theme": ["Salud y bienestar"] } }
        });
        let dataset = parse_dataset(&payload(raw)).expect("parses");

        assert!(dataset_in_theme(&dataset, "salud"));
        assert!(dataset_in_theme(&dataset, "Salud y bienestar"));
        assert!(!dataset_in_theme(&dataset, "transporte"));
    }

    #[test]
    fn facets_response_parses() {
        let raw = json!({
            "facets": [
                {
                    "name": "default.theme",
                    "facets": [
                        { "name": "Salud", "count": 12 },
                        { "name": "Transporte", "count": 7 }
                    ]
                }
            ]
        });
        let response: FacetsResponse = serde_json::from_value(raw).expect("parses");
        assert_eq!(response.facets[0].facets.len(), 2);
        assert_eq!(response.facets[0].facets[0].name, "Salud");
    }
}
