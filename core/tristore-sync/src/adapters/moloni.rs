//! Moloni invoicing store.
//!
//! Authenticates with a client-credentials grant and caches the access
//! token until shortly before it expires. Entities are read with `getAll`
//! and written with `insert` / `update`.

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
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use tristore_types::{EntityType, ExternalRef, Fields, Record, RecordId, Timestamp};

/// Moloni specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MoloniConfig {
    #[serde(skip_serializing)]
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    /// Entity type → Moloni entity path (e.g. `products`).
    pub entities: HashMap<String, String>,
    /// Field holding the upstream external reference.
    pub reference_field: String,
    /// Field carrying the entity's last modification time.
    pub modified_field: String,
    /// Field carrying the entity id.
    pub id_field: String,
    /// Base URL for the Moloni API (e.g. `https://api.moloni.com`).
    pub api_base_url: String,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for MoloniConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            entities: HashMap::from([("product".to_string(), "products".to_string())]),
            reference_field: "reference".to_string(),
            modified_field: "updated_at".to_string(),
            id_field: "id".to_string(),
            api_base_url: "https://api.moloni.com".to_string(),
            timeout_secs: 60,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Option<Instant>,
}

/// Moloni implementation of `RemoteStore`.
pub struct MoloniStore {
    config: MoloniConfig,
    client: Client,
    token: RwLock<Option<CachedToken>>,
}

impl MoloniStore {
    pub fn new(config: MoloniConfig) -> SyncResult<Self> {
        let client = http::build_client(config.timeout_secs)?;
        Ok(Self {
            config,
            client,
            token: RwLock::new(None),
        })
    }

    /// Returns a valid access token, requesting a new one if needed.
    async fn access_token(&self) -> SyncResult<String> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref()
                && token.expires_at.is_none_or(|exp| Instant::now() < exp)
            {
                return Ok(token.access_token.clone());
            }
        } // read lock dropped here

        self.grant().await
    }

    async fn grant(&self) -> SyncResult<String> {
        if self.config.client_id.is_empty() || self.config.client_secret.is_empty() {
            return Err(SyncError::Auth("moloni client credentials are not set".to_string()));
        }
        debug!("Requesting Moloni access token");

        let url = format!("{}/v1/grant", self.config.api_base_url);
        let response: TokenResponse = http::send_json(&self.config.retry, "moloni grant", || {
            self.client.post(&url).form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
        })
        .await?;

        let expires_at = response
            .expires_in
            .map(|secs| Instant::now() + Duration::from_secs(secs.saturating_sub(60))); // 60s buffer

        *self.token.write().await = Some(CachedToken {
            access_token: response.access_token.clone(),
            expires_at,
        });
        Ok(response.access_token)
    }

    fn endpoint(&self, entity_type: &EntityType, action: &str) -> SyncResult<String> {
        let entity = http::resolve(&self.config.entities, entity_type, "moloni entity")?;
        Ok(format!(
            "{}/v1/{}/{}",
            self.config.api_base_url,
            urlencoding::encode(entity),
            action
        ))
    }

    async fn get_all(&self, entity_type: &EntityType, body: Value) -> SyncResult<Vec<Map<String, Value>>> {
        let url = self.endpoint(entity_type, "getAll")?;
        let token = self.access_token().await?;
        http::send_json(&self.config.retry, "moloni getAll", || {
            self.client.post(&url).bearer_auth(&token).json(&body)
        })
        .await
    }

    fn entity_id(&self, object: &Map<String, Value>) -> Option<String> {
        match object.get(&self.config.id_field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn modified_at(&self, object: &Map<String, Value>) -> Option<Timestamp> {
        match object.get(&self.config.modified_field)? {
            Value::String(s) => Timestamp::parse_rfc3339(s).ok(),
            Value::Number(n) => n
                .as_u64()
                .and_then(|secs| secs.checked_mul(1000))
                .map(Timestamp::from_millis),
            _ => None,
        }
    }

    fn to_record(&self, object: &Map<String, Value>) -> SyncResult<Record> {
        let id = self.entity_id(object).ok_or_else(|| {
            SyncError::Protocol(format!("moloni entity has no '{}'", self.config.id_field))
        })?;
        Ok(Record {
            id: RecordId::new(id),
            fields: fields_from_object(object),
            last_modified: self.modified_at(object).unwrap_or(Timestamp::BEGINNING),
        })
    }

    /// Builds the record for a write. Write endpoints may answer with only the
    /// id, so the sent fields fill in whatever the response leaves out.
    fn written_record(
        &self,
        response: &Map<String, Value>,
        sent: Fields,
        id: Option<&RecordId>,
    ) -> SyncResult<Record> {
        let id = match (self.entity_id(response), id) {
            (Some(found), _) => RecordId::new(found),
            (None, Some(known)) => known.clone(),
            (None, None) => {
                return Err(SyncError::Protocol(format!(
                    "moloni insert returned no '{}'",
                    self.config.id_field
                )));
            }
        };
        let mut fields = sent;
        fields.extend(fields_from_object(response));
        Ok(Record {
            id,
            fields,
            last_modified: self.modified_at(response).unwrap_or_else(Timestamp::now),
        })
    }
}

#[async_trait]
impl RemoteStore for MoloniStore {
    fn system(&self) -> &str {
        "moloni"
    }

    fn external_ref_field(&self) -> &str {
        &self.config.reference_field
    }

    async fn authenticate(&self) -> SyncResult<()> {
        self.access_token().await.map(|_| ())
    }

    async fn list_changed_since(
        &self,
        entity_type: &EntityType,
        cursor: &ChangeCursor,
    ) -> SyncResult<Vec<Record>> {
        let mut records = Vec::new();
        for object in self.get_all(entity_type, json!({})).await? {
            let record = self.to_record(&object)?;
            if cursor.is_beginning() || record.last_modified > cursor.watermark {
                records.push(record);
            } else if record.last_modified.is_beginning() {
                warn!(
                    "Moloni: {} {} has no '{}', not listed",
                    entity_type, record.id, self.config.modified_field
                );
            }
        }
        records.sort_by_key(|r| r.last_modified);
        info!(
            "Moloni: {} {} changed since {}",
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
        let body = json!({
            "where": [{
                "field": self.config.reference_field,
                "operator": "=",
                "value": external_ref.to_string(),
            }]
        });
        self.get_all(entity_type, body)
            .await?
            .iter()
            .map(|object| self.to_record(object))
            .collect()
    }

    async fn create(&self, entity_type: &EntityType, fields: Fields) -> SyncResult<Record> {
        let url = self.endpoint(entity_type, "insert")?;
        let token = self.access_token().await?;
        let body = Value::Object(fields_to_object(&fields));
        let response: Map<String, Value> =
            http::send_json(&self.config.retry, "moloni insert", || {
                self.client.post(&url).bearer_auth(&token).json(&body)
            })
            .await?;
        let record = self.written_record(&response, fields, None)?;
        debug!("Moloni: inserted {} {}", entity_type, record.id);
        Ok(record)
    }

    async fn update(
        &self,
        entity_type: &EntityType,
        id: &RecordId,
        fields: Fields,
    ) -> SyncResult<Record> {
        let url = self.endpoint(entity_type, "update")?;
        let token = self.access_token().await?;
        let mut object = fields_to_object(&fields);
        let id_value = id
            .as_str()
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(id.to_string()));
        object.insert(self.config.id_field.clone(), id_value);
        let body = Value::Object(object);
        let response: Map<String, Value> =
            http::send_json(&self.config.retry, "moloni update", || {
                self.client.post(&url).bearer_auth(&token).json(&body)
            })
            .await?;
        let record = self.written_record(&response, fields, Some(id))?;
        debug!("Moloni: updated {} {}", entity_type, record.id);
        Ok(record)
    }
}
