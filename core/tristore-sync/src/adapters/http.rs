//! Shared HTTP plumbing for the store adapters.

use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::time::Duration;
use tristore_types::{FieldValue, Fields};

/// Wait used when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

pub(crate) fn build_client(timeout_secs: u64) -> SyncResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {e}")))
}

/// Maps a non-success HTTP status onto the error taxonomy.
pub fn classify_status(status: u16, retry_after_secs: Option<u64>, body: &str) -> SyncError {
    match status {
        401 | 403 => SyncError::Auth(format!("HTTP {status}: {body}")),
        429 => SyncError::RateLimited {
            retry_after_secs: retry_after_secs.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        500..=599 => SyncError::Network(format!("HTTP {status}: {body}")),
        _ => SyncError::Rejected {
            status,
            message: body.to_string(),
        },
    }
}

async fn check_status(response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok());
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status.as_u16(), retry_after, &body))
}

/// Sends the request produced by `build`, retrying transient failures, and
/// decodes the JSON body. `build` is called once per attempt.
pub(crate) async fn send_json<T, F>(retry: &RetryPolicy, what: &str, build: F) -> SyncResult<T>
where
    T: DeserializeOwned,
    F: Fn() -> RequestBuilder,
{
    retry
        .run(what, || {
            let request = build();
            async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| SyncError::Network(format!("{what} failed: {e}")))?;
                let response = check_status(response).await?;
                response
                    .json::<T>()
                    .await
                    .map_err(|e| SyncError::Protocol(format!("{what}: unexpected response: {e}")))
            }
        })
        .await
}

/// Converts a flat JSON value into a field value. Nulls, booleans and nested
/// objects have no field representation and yield `None`.
pub(crate) fn json_to_field(value: &Value) -> Option<FieldValue> {
    match value {
        Value::String(s) => Some(FieldValue::Text(s.clone())),
        Value::Number(n) => n.as_f64().map(FieldValue::Number),
        Value::Array(items) => {
            let ids: Option<Vec<String>> = items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect();
            ids.map(FieldValue::Reference)
        }
        Value::Null | Value::Bool(_) | Value::Object(_) => None,
    }
}

/// Converts a field value into flat JSON.
pub(crate) fn field_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text(s) | FieldValue::Select(s) => Value::String(s.clone()),
        FieldValue::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        FieldValue::RichText(runs) => Value::String(runs.concat()),
        FieldValue::Reference(ids) => {
            Value::Array(ids.iter().cloned().map(Value::String).collect())
        }
    }
}

pub(crate) fn fields_from_object(object: &Map<String, Value>) -> Fields {
    object
        .iter()
        .filter_map(|(name, value)| json_to_field(value).map(|v| (name.clone(), v)))
        .collect()
}

pub(crate) fn fields_to_object(fields: &Fields) -> Map<String, Value> {
    fields
        .iter()
        .map(|(name, value)| (name.clone(), field_to_json(value)))
        .collect()
}

/// Looks up the remote name configured for an entity type.
pub(crate) fn resolve<'a>(
    names: &'a std::collections::HashMap<String, String>,
    entity_type: &tristore_types::EntityType,
    what: &str,
) -> SyncResult<&'a str> {
    names
        .get(entity_type.as_str())
        .map(String::as_str)
        .ok_or_else(|| SyncError::Config(format!("no {what} configured for '{entity_type}'")))
}
