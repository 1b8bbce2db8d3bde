// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! JSON REST backend.
//!
//! All endpoints live under `{base_url}/api/v1/projects/{project}`:
//!
//! | Operation        | Request                                           |
//! |------------------|---------------------------------------------------|
//! | upsert           | `POST models/instances`                           |
//! | exists           | `POST models/instances/byids`                     |
//! | ensure_database  | `POST raw/dbs`                                    |
//! | ensure_table     | `POST raw/dbs/{db}/tables`                        |
//! | insert_row       | `POST raw/dbs/{db}/tables/{table}/rows`           |
//! | ensure_timeseries| `POST timeseries`, then `POST models/instances`   |
//! | insert_datapoints| `POST timeseries/data`                            |
//! | report_status    | `POST extpipes/runs`                              |
//! | trigger_workflow | `POST workflows/{id}/versions/{version}/run`      |
//!
//! Error bodies have the shape `{"error": {"code": .., "message": "..",
//! "kind": ".."}}`. `kind == "dependencyMissing"` marks a missing referenced
//! record.

use super::{Backend, BackendError, CollectionRef, Columns, Datapoint, SeriesDefinition};
use crate::config::BackendConfig;
use crate::record::{Fields, Value};
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;

const DEPENDENCY_MISSING_KIND: &str = "dependencyMissing";
const DEFAULT_WORKFLOW_VERSION: &str = "1";
const SOURCE_CONTEXT: &str = "MQTT";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct Items<T> {
    items: Vec<T>,
}

/// Backend over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base: Url,
    project: String,
    token: Option<String>,
    client: Client,
}

impl HttpBackend {
    /// Create a client. Every request is bounded by the configured timeout.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| BackendError::Transport(format!("invalid base_url: {}", e)))?;
        if base.cannot_be_a_base() {
            return Err(BackendError::Transport(format!(
                "invalid base_url: {}",
                config.base_url
            )));
        }
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(Self {
            base,
            project: config.project.clone(),
            token: config.token.clone(),
            client,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["api", "v1", "projects", self.project.as_str()])
                .extend(segments);
        }
        url
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &T,
    ) -> Result<Response, BackendError> {
        let mut request = self.client.post(url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(classify_response(status, &body))
    }

    async fn create_if_missing<T: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &T,
    ) -> Result<(), BackendError> {
        match self.post(url, body).await {
            Ok(_) => Ok(()),
            Err(BackendError::Rejected { status, message })
                if status == 409 || message.contains("already") =>
            {
                tracing::debug!("already exists: {}", message);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Map a failed response to a [`BackendError`].
pub(crate) fn classify_response(status: u16, body: &str) -> BackendError {
    let detail = serde_json::from_str::<ErrorBody>(body).ok().map(|b| b.error);
    let message = match &detail {
        Some(d) if !d.message.is_empty() => d.message.clone(),
        _ => body.trim().to_string(),
    };

    if status == 401 || status == 403 {
        return BackendError::Auth(message);
    }
    if detail
        .as_ref()
        .and_then(|d| d.kind.as_deref())
        .is_some_and(|k| k == DEPENDENCY_MISSING_KIND)
    {
        return BackendError::DependencyMissing(message);
    }
    BackendError::Rejected { status, message }
}

fn source(collection: &CollectionRef) -> serde_json::Value {
    json!({
        "type": "view",
        "space": collection.schema_space,
        "externalId": collection.name,
        "version": collection.version,
    })
}

impl Backend for HttpBackend {
    async fn upsert(
        &self,
        collection: &CollectionRef,
        id: &str,
        fields: &Fields,
    ) -> Result<(), BackendError> {
        let body = Items {
            items: vec![json!({
                "instanceType": "node",
                "space": collection.instance_space,
                "externalId": id,
                "sources": [{
                    "source": source(collection),
                    "properties": fields,
                }],
            })],
        };
        self.post(self.url(&["models", "instances"]), &body)
            .await
            .map(|_| ())
    }

    async fn exists(&self, collection: &CollectionRef, id: &str) -> Result<bool, BackendError> {
        let body = Items {
            items: vec![json!({
                "instanceType": "node",
                "space": collection.instance_space,
                "externalId": id,
            })],
        };
        let response = match self
            .post(self.url(&["models", "instances", "byids"]), &body)
            .await
        {
            Ok(r) => r,
            Err(BackendError::Rejected { status: 404, .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        let items: ItemsResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(!items.items.is_empty())
    }

    async fn ensure_database(&self, db: &str) -> Result<(), BackendError> {
        let body = Items {
            items: vec![json!({ "name": db })],
        };
        self.create_if_missing(self.url(&["raw", "dbs"]), &body)
            .await
    }

    async fn ensure_table(&self, db: &str, table: &str) -> Result<(), BackendError> {
        let body = Items {
            items: vec![json!({ "name": table })],
        };
        self.create_if_missing(self.url(&["raw", "dbs", db, "tables"]), &body)
            .await
    }

    async fn insert_row(
        &self,
        db: &str,
        table: &str,
        key: &str,
        columns: &Columns,
    ) -> Result<(), BackendError> {
        let body = Items {
            items: vec![json!({ "key": key, "columns": columns })],
        };
        self.post(self.url(&["raw", "dbs", db, "tables", table, "rows"]), &body)
            .await
            .map(|_| ())
    }

    async fn ensure_timeseries(&self, series: &SeriesDefinition) -> Result<(), BackendError> {
        let body = Items {
            items: vec![json!({
                "externalId": series.external_id,
                "name": series.name,
                "description": series.description,
                "metadata": {
                    "sourceContext": SOURCE_CONTEXT,
                    "topic": series.topic,
                },
            })],
        };
        self.create_if_missing(self.url(&["timeseries"]), &body)
            .await?;

        let fields = {
            let mut fields = Fields::new();
            fields.insert("name", Value::String(series.name.clone()));
            fields.insert(
                "description",
                Value::String(series.description.clone()),
            );
            fields.insert("type", Value::String("numeric".into()));
            fields
        };
        self.upsert(&series.collection, &series.external_id, &fields)
            .await
    }

    async fn insert_datapoints(
        &self,
        instance_space: &str,
        external_id: &str,
        datapoints: &[Datapoint],
    ) -> Result<(), BackendError> {
        let body = Items {
            items: vec![json!({
                "instanceId": { "space": instance_space, "externalId": external_id },
                "datapoints": datapoints,
            })],
        };
        self.post(self.url(&["timeseries", "data"]), &body)
            .await
            .map(|_| ())
    }

    async fn report_status(&self, pipeline: &str) -> Result<(), BackendError> {
        let body = Items {
            items: vec![json!({ "extPipeId": pipeline, "status": "success" })],
        };
        self.post(self.url(&["extpipes", "runs"]), &body)
            .await
            .map(|_| ())
    }

    async fn trigger_workflow(
        &self,
        external_id: &str,
        version: Option<&str>,
    ) -> Result<(), BackendError> {
        let version = version.unwrap_or(DEFAULT_WORKFLOW_VERSION);
        let url = self.url(&["workflows", external_id, "versions", version, "run"]);
        self.post(url, &json!({})).await.map(|_| ())
    }
}
