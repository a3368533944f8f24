//! Airtable store.
//!
//! Uses the Airtable REST API v0. Each entity type maps to one table of a
//! single base. Change listing filters on a last-modified-time field with an
//! `IS_AFTER` formula.

use super::http::{self, fields_from_object, fields_to_object};
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
use tristore_types::{EntityType, ExternalRef, Fields, Record, RecordId, Timestamp};

/// Airtable specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AirtableConfig {
    /// Personal access token. Usually supplied through the environment.
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Base id (e.g. `app12345678`).
    pub base_id: String,
    /// Entity type → table name.
    pub tables: HashMap<String, String>,
    /// Last-modified-time field used for change listing.
    pub modified_field: String,
    /// Field holding the upstream external reference when Airtable is written to.
    pub external_ref_field: String,
    /// Base URL for the Airtable API (e.g. `https://api.airtable.com`).
    pub api_base_url: String,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for AirtableConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_id: String::new(),
            tables: HashMap::from([("product".to_string(), "Products".to_string())]),
            modified_field: "Last Modified".to_string(),
            external_ref_field: "ExternalRef".to_string(),
            api_base_url: "https://api.airtable.com".to_string(),
            timeout_secs: 60,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecordList {
    records: Vec<AirtableRecord>,
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AirtableRecord {
    id: String,
    #[serde(rename = "createdTime")]
    created_time: Option<String>,
    #[serde(default)]
    fields: Map<String, Value>,
}

/// Airtable implementation of `RemoteStore`.
pub struct AirtableStore {
    config: AirtableConfig,
    client: Client,
}

impl AirtableStore {
    pub fn new(config: AirtableConfig) -> SyncResult<Self> {
        if config.base_id.trim().is_empty() {
            return Err(SyncError::Config("airtable base_id is empty".to_string()));
        }
        let client = http::build_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }

    fn table_url(&self, entity_type: &EntityType) -> SyncResult<String> {
        let table = http::resolve(&self.config.tables, entity_type, "airtable table")?;
        Ok(format!(
            "{}/v0/{}/{}",
            self.config.api_base_url,
            urlencoding::encode(&self.config.base_id),
            urlencoding::encode(table)
        ))
    }

    fn to_record(&self, raw: AirtableRecord) -> SyncResult<Record> {
        let modified = raw
            .fields
            .get(&self.config.modified_field)
            .and_then(Value::as_str)
            .or(raw.created_time.as_deref())
            .ok_or_else(|| {
                SyncError::Protocol(format!("airtable record {} has no modification time", raw.id))
            })?;
        Ok(Record {
            id: RecordId::new(raw.id.clone()),
            last_modified: Timestamp::parse_rfc3339(modified)?,
            fields: fields_from_object(&raw.fields),
        })
    }

    /// Lists every record matching `formula`, following `offset` pagination.
    async fn list(&self, entity_type: &EntityType, formula: Option<String>) -> SyncResult<Vec<Record>> {
        let url = self.table_url(entity_type)?;
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = Vec::new();
            if let Some(f) = &formula {
                query.push(("filterByFormula", f.clone()));
            }
            if let Some(o) = &offset {
                query.push(("offset", o.clone()));
            }

            let page: RecordList = http::send_json(&self.config.retry, "airtable list", || {
                self.client
                    .get(&url)
                    .bearer_auth(&self.config.api_key)
                    .query(&query)
            })
            .await?;

            for raw in page.records {
                records.push(self.to_record(raw)?);
            }

            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(records)
    }
}

/// Quotes a string for use inside an Airtable formula.
pub fn formula_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[async_trait]
impl RemoteStore for AirtableStore {
    fn system(&self) -> &str {
        "airtable"
    }

    fn external_ref_field(&self) -> &str {
        &self.config.external_ref_field
    }

    async fn authenticate(&self) -> SyncResult<()> {
        if self.config.api_key.trim().is_empty() {
            return Err(SyncError::Auth("airtable API key is not set".to_string()));
        }
        Ok(())
    }

    async fn list_changed_since(
        &self,
        entity_type: &EntityType,
        cursor: &ChangeCursor,
    ) -> SyncResult<Vec<Record>> {
        let formula = (!cursor.is_beginning()).then(|| {
            format!(
                "IS_AFTER({{{}}}, {})",
                self.config.modified_field,
                formula_string(&cursor.watermark.to_rfc3339())
            )
        });
        let records = self.list(entity_type, formula).await?;
        info!(
            "Airtable: {} {} changed since {}",
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
        let formula = format!(
            "{{{}}} = {}",
            self.config.external_ref_field,
            formula_string(&external_ref.to_string())
        );
        self.list(entity_type, Some(formula)).await
    }

    async fn create(&self, entity_type: &EntityType, fields: Fields) -> SyncResult<Record> {
        let url = self.table_url(entity_type)?;
        let body = json!({ "fields": fields_to_object(&fields), "typecast": true });
        let raw: AirtableRecord = http::send_json(&self.config.retry, "airtable create", || {
            self.client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&body)
        })
        .await?;
        debug!("Airtable: created {}", raw.id);
        self.to_record(raw)
    }

    async fn update(
        &self,
        entity_type: &EntityType,
        id: &RecordId,
        fields: Fields,
    ) -> SyncResult<Record> {
        let url = format!(
            "{}/{}",
            self.table_url(entity_type)?,
            urlencoding::encode(id.as_str())
        );
        let body = json!({ "fields": fields_to_object(&fields), "typecast": true });
        let raw: AirtableRecord = http::send_json(&self.config.retry, "airtable update", || {
            self.client
                .patch(&url)
                .bearer_auth(&self.config.api_key)
                .json(&body)
        })
        .await?;
        debug!("Airtable: updated {}", raw.id);
        self.to_record(raw)
    }
}
