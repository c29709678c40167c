//! Client for the remote ERP authority.
//!
//! Resources live at `{base_url}/api/{resource}`; single records at
//! `{base_url}/api/{resource}/{id}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;

use crate::error::SyncError;
use crate::storage::entities::{id_from_value, EntityRecord};
use crate::storage::schema::EntitySchema;

/// Operations the engine needs from the remote authority.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Create a record and return the identifier the remote assigned.
    async fn create(&self, schema: &EntitySchema, payload: &Value) -> Result<String, SyncError>;

    /// Replace the fields of an existing record.
    async fn update(&self, schema: &EntitySchema, id: &str, payload: &Value) -> Result<(), SyncError>;

    /// Delete a record.
    async fn delete(&self, schema: &EntitySchema, id: &str) -> Result<(), SyncError>;

    /// Fetch every record of a resource.
    async fn fetch_all(&self, schema: &EntitySchema) -> Result<Vec<EntityRecord>, SyncError>;
}

/// [`RemoteApi`] over HTTP + JSON.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
}

impl HttpRemote {
    /// Create a client; every request is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn collection_url(&self, schema: &EntitySchema) -> String {
        format!("{}/api/{}", self.base_url, schema.resource)
    }

    fn record_url(&self, schema: &EntitySchema, id: &str) -> String {
        format!("{}/api/{}/{id}", self.base_url, schema.resource)
    }
}

/// Map a transport failure. Anything short of an HTTP answer means the
/// remote is unreachable.
fn transport_error(err: &reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Connectivity(format!("request timed out: {err}"))
    } else if err.is_decode() {
        SyncError::Parse(format!("invalid response body: {err}"))
    } else {
        SyncError::Connectivity(err.to_string())
    }
}

/// Turn a non-2xx answer into `SyncError::Remote`.
async fn check_status(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .text()
        .await
        .ok()
        .filter(|body| !body.trim().is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("no reason").to_string());

    Err(SyncError::Remote {
        status: status.as_u16(),
        message,
    })
}

/// The created record's id, either at the top level or under `data`.
pub(crate) fn extract_id(body: &Value) -> Option<String> {
    body.get("id")
        .and_then(id_from_value)
        .or_else(|| body.get("data").and_then(|d| d.get("id")).and_then(id_from_value))
}

/// Records from a list response: a bare array or `{"data": [...]}`.
pub(crate) fn extract_records(
    schema: &EntitySchema,
    body: Value,
) -> Result<Vec<EntityRecord>, SyncError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(SyncError::Parse(format!(
                    "expected a list of {} records",
                    schema.resource
                )))
            },
        },
        _ => {
            return Err(SyncError::Parse(format!(
                "expected a list of {} records",
                schema.resource
            )))
        },
    };

    items
        .into_iter()
        .map(|item| {
            let id = item
                .get("id")
                .and_then(id_from_value)
                .ok_or_else(|| SyncError::Parse(format!("{} record without id", schema.resource)))?;
            EntityRecord::from_value(schema.table, id, item)
        })
        .collect()
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn create(&self, schema: &EntitySchema, payload: &Value) -> Result<String, SyncError> {
        let response = self
            .client
            .post(self.collection_url(schema))
            .json(payload)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let body: Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(&e))?;

        extract_id(&body).ok_or_else(|| {
            SyncError::Parse(format!("create {} response carried no id", schema.resource))
        })
    }

    async fn update(&self, schema: &EntitySchema, id: &str, payload: &Value) -> Result<(), SyncError> {
        let response = self
            .client
            .put(self.record_url(schema, id))
            .json(payload)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        check_status(response).await?;
        Ok(())
    }

    async fn delete(&self, schema: &EntitySchema, id: &str) -> Result<(), SyncError> {
        let response = self
            .client
            .delete(self.record_url(schema, id))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        check_status(response).await?;
        Ok(())
    }

    async fn fetch_all(&self, schema: &EntitySchema) -> Result<Vec<EntityRecord>, SyncError> {
        let response = self
            .client
            .get(self.collection_url(schema))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let body: Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(&e))?;

        extract_records(schema, body)
    }
}
