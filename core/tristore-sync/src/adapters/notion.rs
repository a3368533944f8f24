//! Notion store.
//!
//! Each entity type maps to one Notion database; records are its pages.
//! Change listing queries on `last_edited_time`, external-reference lookup
//! uses a `rich_text` equality filter.

use super::http;
use crate::cursor::ChangeCursor;
use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;
use crate::store::RemoteStore;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{debug, info};
use tristore_types::{EntityType, ExternalRef, FieldValue, Fields, Record, RecordId, Timestamp};

/// Largest page size the query endpoint accepts.
const PAGE_SIZE: u32 = 100;

/// `last_edited_time` is truncated to this resolution by Notion.
const EDIT_TIME_RESOLUTION_MS: u64 = 60_000;

/// Lower bound for a change query: the start of the watermark's minute,
/// inclusive. Pages edited again within that minute keep the same
/// `last_edited_time`, so they are listed again and upserted idempotently.
fn edited_since(watermark: Timestamp) -> Timestamp {
    let ms = watermark.as_millis();
    Timestamp::from_millis(ms - ms % EDIT_TIME_RESOLUTION_MS)
}

/// Notion specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotionConfig {
    /// Integration secret. Usually supplied through the environment.
    #[serde(skip_serializing)]
    pub secret: String,
    /// Entity type → database id.
    pub databases: HashMap<String, String>,
    /// Rich-text property holding the upstream external reference.
    pub external_ref_property: String,
    /// Title property of the databases; plain text written here becomes a title.
    pub title_property: String,
    /// Value of the `Notion-Version` header.
    pub notion_version: String,
    /// Base URL for the Notion API (e.g. `https://api.notion.com`).
    pub api_base_url: String,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            databases: HashMap::new(),
            external_ref_property: "AirtableID".to_string(),
            title_property: "Name".to_string(),
            notion_version: "2022-06-28".to_string(),
            api_base_url: "https://api.notion.com".to_string(),
            timeout_secs: 60,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    results: Vec<Page>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Page {
    id: String,
    last_edited_time: String,
    #[serde(default)]
    properties: Map<String, Value>,
}

/// Notion implementation of `RemoteStore`.
pub struct NotionStore {
    config: NotionConfig,
    client: Client,
}

impl NotionStore {
    pub fn new(config: NotionConfig) -> SyncResult<Self> {
        let client = http::build_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }

    fn database(&self, entity_type: &EntityType) -> SyncResult<&str> {
        http::resolve(&self.config.databases, entity_type, "notion database")
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.config.secret)
            .header("Notion-Version", &self.config.notion_version)
    }

    /// Runs a database query with `filter`, following cursor pagination.
    async fn query(&self, entity_type: &EntityType, filter: Option<Value>) -> SyncResult<Vec<Record>> {
        let url = format!(
            "{}/v1/databases/{}/query",
            self.config.api_base_url,
            self.database(entity_type)?
        );
        let mut records = Vec::new();
        let mut start_cursor: Option<String> = None;

        loop {
            let mut body = json!({ "page_size": PAGE_SIZE });
            if let Some(f) = &filter {
                body["filter"] = f.clone();
            }
            if let Some(c) = &start_cursor {
                body["start_cursor"] = Value::String(c.clone());
            }

            let page: QueryResponse = http::send_json(&self.config.retry, "notion query", || {
                self.request(reqwest::Method::POST, &url).json(&body)
            })
            .await?;

            for raw in page.results {
                records.push(page_to_record(raw)?);
            }

            match (page.has_more, page.next_cursor) {
                (true, Some(next)) => start_cursor = Some(next),
                _ => break,
            }
        }
        Ok(records)
    }

    /// Translates fields into Notion property values.
    fn properties(&self, fields: &Fields) -> Map<String, Value> {
        fields
            .iter()
            .map(|(name, value)| {
                let property = if *name == self.config.title_property {
                    let text = value.plain_text().unwrap_or_default();
                    json!({ "title": [text_run(&text)] })
                } else {
                    value_to_property(value)
                };
                (name.clone(), property)
            })
            .collect()
    }
}

fn text_run(content: &str) -> Value {
    json!({ "text": { "content": content } })
}

fn value_to_property(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text(s) => json!({ "rich_text": [text_run(s)] }),
        FieldValue::RichText(runs) => {
            let runs: Vec<Value> = runs.iter().map(|r| text_run(r)).collect();
            json!({ "rich_text": runs })
        }
        FieldValue::Number(n) => json!({ "number": n }),
        FieldValue::Select(label) => json!({ "select": { "name": label } }),
        FieldValue::Reference(ids) => {
            let ids: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
            json!({ "relation": ids })
        }
    }
}

/// Reads the plain text of each run in a title or rich_text array.
fn runs_of(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    item.get("plain_text")
                        .or_else(|| item.pointer("/text/content"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Translates one property value. Unsupported property types yield `None`.
fn property_to_value(property: &Value) -> Option<FieldValue> {
    let kind = property.get("type").and_then(Value::as_str)?;
    let inner = property.get(kind)?;
    match kind {
        "title" | "rich_text" => Some(FieldValue::RichText(runs_of(inner))),
        "number" => inner.as_f64().map(FieldValue::Number),
        "select" => inner
            .get("name")
            .and_then(Value::as_str)
            .map(FieldValue::select),
        "relation" => Some(FieldValue::Reference(
            inner
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|i| i.get("id").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        )),
        _ => None,
    }
}

fn page_to_record(page: Page) -> SyncResult<Record> {
    let fields = page
        .properties
        .iter()
        .filter_map(|(name, p)| property_to_value(p).map(|v| (name.clone(), v)))
        .collect();
    Ok(Record {
        id: RecordId::new(page.id),
        fields,
        last_modified: Timestamp::parse_rfc3339(&page.last_edited_time)?,
    })
}

#[async_trait]
impl RemoteStore for NotionStore {
    fn system(&self) -> &str {
        "notion"
    }

    fn external_ref_field(&self) -> &str {
        &self.config.external_ref_property
    }

    async fn authenticate(&self) -> SyncResult<()> {
        if self.config.secret.trim().is_empty() {
            return Err(SyncError::Auth("notion secret is not set".to_string()));
        }
        Ok(())
    }

    async fn list_changed_since(
        &self,
        entity_type: &EntityType,
        cursor: &ChangeCursor,
    ) -> SyncResult<Vec<Record>> {
        let filter = (!cursor.is_beginning()).then(|| {
            json!({
                "timestamp": "last_edited_time",
                "last_edited_time": {
                    "on_or_after": edited_since(cursor.watermark).to_rfc3339()
                }
            })
        });
        let records = self.query(entity_type, filter).await?;
        info!(
            "Notion: {} {} changed since {}",
            records.len(),
            entity_type,
            cursor.watermark
        );
        Ok(records)
    }

    async fn find_by_external_ref(
        &self,
        entity_type: &EntityType,
        external_ref: &ExternalRef,
    ) -> SyncResult<Vec<Record>> {
        let filter = json!({
            "property": self.config.external_ref_property,
            "rich_text": { "equals": external_ref.to_string() }
        });
        self.query(entity_type, Some(filter)).await
    }

    async fn create(&self, entity_type: &EntityType, fields: Fields) -> SyncResult<Record> {
        let url = format!("{}/v1/pages", self.config.api_base_url);
        let body = json!({
            "parent": { "database_id": self.database(entity_type)? },
            "properties": self.properties(&fields),
        });
        let page: Page = http::send_json(&self.config.retry, "notion create page", || {
            self.request(reqwest::Method::POST, &url).json(&body)
        })
        .await?;
        debug!("Notion: created page {}", page.id);
        page_to_record(page)
    }

    async fn update(
        &self,
        _entity_type: &EntityType,
        id: &RecordId,
        fields: Fields,
    ) -> SyncResult<Record> {
        let url = format!(
            "{}/v1/pages/{}",
            self.config.api_base_url,
            urlencoding::encode(id.as_str())
        );
        let body = json!({ "properties": self.properties(&fields) });
        let page: Page = http::send_json(&self.config.retry, "notion update page", || {
            self.request(reqwest::Method::PATCH, &url).json(&body)
        })
        .await?;
        debug!("Notion: updated page {}", page.id);
        page_to_record(page)
    }
}
