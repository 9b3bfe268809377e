use crate::errors::{AppError, ResultExt};
use crate::models::{Lead, NamedRef, Pipeline, Status, TagWrite};
use async_trait::async_trait;
use moka::future::Cache;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;

/// Leads requested per page; a shorter page marks the end of a pipeline.
pub const LEADS_PAGE_SIZE: usize = 250;

const STATUS_CACHE_TTL: Duration = Duration::from_secs(600);

/// Operations the scoring pipeline needs from the CRM.
///
/// Implementors provide the five primitives; pipeline-wide listing, tagging
/// and moving are composed on top of them.
#[async_trait]
pub trait CrmGateway: Send + Sync {
    async fn list_pipelines(&self) -> Result<Vec<Pipeline>, AppError>;

    async fn list_pipeline_statuses(&self, pipeline_id: i64) -> Result<Vec<Status>, AppError>;

    async fn list_leads_by_pipeline(&self, pipeline_id: i64) -> Result<Vec<Lead>, AppError>;

    async fn get_lead(&self, lead_id: i64) -> Result<Lead, AppError>;

    async fn update_lead(&self, lead_id: i64, fields: Value) -> Result<Lead, AppError>;

    /// Leads from every pipeline. A pipeline that fails to load is skipped.
    async fn list_all_leads(&self) -> Result<Vec<Lead>, AppError> {
        let pipelines = self.list_pipelines().await.context("Listing pipelines")?;
        let mut all_leads = Vec::new();
        let mut failed_pipelines = Vec::new();

        for pipeline in &pipelines {
            match self.list_leads_by_pipeline(pipeline.id).await {
                Ok(leads) => {
                    tracing::info!(
                        "✓ Fetched {} leads from pipeline {} ({})",
                        leads.len(),
                        pipeline.name,
                        pipeline.id
                    );
                    all_leads.extend(
                        leads
                            .into_iter()
                            .map(|lead| attach_pipeline_refs(lead, pipeline)),
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "✗ Failed to fetch leads from pipeline {} ({}): {}",
                        pipeline.name,
                        pipeline.id,
                        e
                    );
                    failed_pipelines.push(pipeline.id);
                }
            }
        }

        if !failed_pipelines.is_empty() {
            tracing::warn!(
                "Skipped {} pipeline(s) {:?}; continuing with {} leads",
                failed_pipelines.len(),
                failed_pipelines,
                all_leads.len()
            );
        }

        Ok(all_leads)
    }

    /// Adds `tag_name` to the lead unless it is already there.
    ///
    /// Re-reads the lead so the written tag list reflects the CRM's current state.
    async fn add_tag(&self, lead_id: i64, tag_name: &str) -> Result<TagWrite, AppError> {
        let lead = self
            .get_lead(lead_id)
            .await
            .with_context(|| format!("Reading tags of lead {}", lead_id))?;

        if lead.has_tag(tag_name) {
            return Ok(TagWrite::AlreadyPresent);
        }

        let mut tags: Vec<Value> = lead
            .tag_names()
            .into_iter()
            .map(|name| json!({ "name": name }))
            .collect();
        tags.push(json!({ "name": tag_name }));

        self.update_lead(lead_id, json!({ "_embedded": { "tags": tags } }))
            .await
            .with_context(|| format!("Writing tag {} to lead {}", tag_name, lead_id))?;

        Ok(TagWrite::Added)
    }

    /// Moves a lead into `pipeline_id` at `status_id`.
    async fn move_lead(
        &self,
        lead_id: i64,
        pipeline_id: i64,
        status_id: i64,
    ) -> Result<(), AppError> {
        self.update_lead(
            lead_id,
            json!({ "pipeline_id": pipeline_id, "status_id": status_id }),
        )
        .await
        .with_context(|| format!("Moving lead {} to pipeline {}", lead_id, pipeline_id))?;
        Ok(())
    }
}

/// Fills in the pipeline reference (and status name, when known) of a lead
/// fetched through `pipeline`.
fn attach_pipeline_refs(mut lead: Lead, pipeline: &Pipeline) -> Lead {
    let needs_pipeline = lead
        .pipeline
        .as_ref()
        .map(|p| p.name.is_empty())
        .unwrap_or(true);
    if needs_pipeline {
        lead.pipeline = Some(NamedRef {
            id: pipeline.id,
            name: pipeline.name.clone(),
        });
    }

    if lead.status.is_none() {
        if let Some(status_id) = lead.status_id {
            lead.status = pipeline
                .statuses()
                .iter()
                .find(|s| s.id == status_id)
                .map(|s| NamedRef {
                    id: s.id,
                    name: s.name.clone(),
                });
        }
    }

    lead
}

/// Pulls `_embedded.<key>` out of a Kommo list response, skipping entries that
/// do not decode. Also returns the raw entry count, malformed entries included.
fn embedded_items<T: DeserializeOwned>(body: Option<Value>, key: &str) -> (Vec<T>, usize) {
    let items = body
        .and_then(|mut b| b.get_mut("_embedded").and_then(|e| e.get_mut(key)).map(Value::take));

    match items {
        Some(Value::Array(items)) => {
            let raw_len = items.len();
            let parsed = items
                .into_iter()
                .filter_map(|item| match serde_json::from_value(item) {
                    Ok(parsed) => Some(parsed),
                    Err(e) => {
                        tracing::warn!("Skipping malformed {} entry: {}", key, e);
                        None
                    }
                })
                .collect();
            (parsed, raw_len)
        }
        _ => (Vec::new(), 0),
    }
}

/// Client for the Kommo REST API (v4).
#[derive(Clone)]
pub struct KommoClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    status_cache: Cache<i64, Vec<Status>>,
}

impl KommoClient {
    /// Creates a new `KommoClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The Kommo API root, e.g. `https://acme.kommo.com/api/v4`.
    /// * `token` - The long-lived API token.
    pub fn new(base_url: String, token: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create Kommo client: {}", e))
            })?;

        let status_cache = Cache::builder()
            .time_to_live(STATUS_CACHE_TTL)
            .max_capacity(1_000)
            .build();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            status_cache,
        })
    }

    /// GETs an endpoint. Kommo answers 204 for empty collections, reported as `None`.
    async fn get_json(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<Option<Value>, AppError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        tracing::debug!("Kommo GET {} {:?}", url, query);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Kommo request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::status_error(status, response).await);
        }

        let data = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Kommo response: {}", e))
        })?;

        Ok(Some(data))
    }

    async fn patch_json(&self, endpoint: &str, body: &Value) -> Result<Value, AppError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        tracing::debug!("Kommo PATCH {}", url);

        let response = self
            .client
            .patch(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Kommo request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status, response).await);
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(json!({}));
        }

        response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Kommo response: {}", e))
        })
    }

    async fn status_error(status: StatusCode, response: reqwest::Response) -> AppError {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                AppError::RateLimited(format!("Kommo returned {}: {}", status, error_text))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                AppError::ExternalApiError(format!("Kommo rejected credentials ({})", status))
            }
            StatusCode::NOT_FOUND => AppError::NotFound(format!("Kommo returned 404: {}", error_text)),
            _ => AppError::ExternalApiError(format!("Kommo returned {}: {}", status, error_text)),
        }
    }
}

#[async_trait]
impl CrmGateway for KommoClient {
    async fn list_pipelines(&self) -> Result<Vec<Pipeline>, AppError> {
        let body = self.get_json("leads/pipelines", &[]).await?;
        let (pipelines, _): (Vec<Pipeline>, _) = embedded_items(body, "pipelines");
        tracing::info!("Found {} pipelines", pipelines.len());
        Ok(pipelines)
    }

    async fn list_pipeline_statuses(&self, pipeline_id: i64) -> Result<Vec<Status>, AppError> {
        if let Some(cached) = self.status_cache.get(&pipeline_id).await {
            tracing::debug!("Status cache hit for pipeline {}", pipeline_id);
            return Ok(cached);
        }

        let endpoint = format!("leads/pipelines/{}/statuses", pipeline_id);
        let body = self.get_json(&endpoint, &[]).await?;
        let (statuses, _): (Vec<Status>, _) = embedded_items(body, "statuses");
        tracing::info!(
            "Found {} statuses for pipeline {}",
            statuses.len(),
            pipeline_id
        );

        if !statuses.is_empty() {
            self.status_cache
                .insert(pipeline_id, statuses.clone())
                .await;
        }

        Ok(statuses)
    }

    async fn list_leads_by_pipeline(&self, pipeline_id: i64) -> Result<Vec<Lead>, AppError> {
        let mut all_leads = Vec::new();
        let mut page = 1usize;

        loop {
            let query = [
                ("filter[pipeline_id]", pipeline_id.to_string()),
                ("limit", LEADS_PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ];
            let body = self
                .get_json("leads", &query)
                .await
                .with_context(|| format!("Listing page {} of pipeline {}", page, pipeline_id))?;

            // End of pipeline is judged on the raw page, malformed entries included.
            let (leads, page_len): (Vec<Lead>, _) = embedded_items(body, "leads");
            if page_len == 0 {
                break;
            }

            all_leads.extend(leads);

            if page_len < LEADS_PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(all_leads)
    }

    async fn get_lead(&self, lead_id: i64) -> Result<Lead, AppError> {
        let endpoint = format!("leads/{}", lead_id);
        let body = self
            .get_json(&endpoint, &[])
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", lead_id)))?;

        Ok(serde_json::from_value(body)?)
    }

    async fn update_lead(&self, lead_id: i64, fields: Value) -> Result<Lead, AppError> {
        let endpoint = format!("leads/{}", lead_id);
        tracing::info!("Updating lead {} in Kommo", lead_id);

        let mut body = self.patch_json(&endpoint, &fields).await?;

        // Kommo echoes only `{id, updated_at}` on PATCH; some proxies drop the id.
        if let Some(map) = body.as_object_mut() {
            map.entry("id").or_insert_with(|| json!(lead_id));
        }

        Ok(serde_json::from_value(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = KommoClient::new(
            "https://acme.kommo.com/api/v4/".to_string(),
            "token".to_string(),
        );
        assert!(client.is_ok());
        assert_eq!(client.unwrap().base_url, "https://acme.kommo.com/api/v4");
    }

    #[test]
    fn test_embedded_items_skips_bad_entries() {
        let body = json!({
            "_embedded": {
                "leads": [
                    {"id": 1, "name": "First"},
                    {"name": "missing id"},
                    {"id": 2}
                ]
            }
        });
        let (leads, raw_len): (Vec<Lead>, _) = embedded_items(Some(body), "leads");
        assert_eq!(leads.iter().map(|l| l.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(raw_len, 3);
    }

    #[test]
    fn test_embedded_items_empty_body() {
        let (leads, raw_len): (Vec<Lead>, _) = embedded_items(None, "leads");
        assert!(leads.is_empty());
        assert_eq!(raw_len, 0);
    }

    #[test]
    fn test_attach_pipeline_refs_resolves_status_name() {
        let pipeline: Pipeline = serde_json::from_value(json!({
            "id": 10,
            "name": "Sales",
            "_embedded": {"statuses": [{"id": 100, "name": "Incoming"}]}
        }))
        .unwrap();
        let lead = Lead {
            id: 1,
            pipeline_id: Some(10),
            status_id: Some(100),
            ..Default::default()
        };

        let lead = attach_pipeline_refs(lead, &pipeline);
        assert_eq!(lead.pipeline_name(), "Sales");
        assert_eq!(lead.status_name(), "Incoming");
    }
}
