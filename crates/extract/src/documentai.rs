//! Google Document AI client.
//!
//! Covers the two things the service needs from Document AI: running a
//! processor over an uploaded document, and toggling/querying that
//! processor's lifecycle state.

use std::time::Duration;

use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::normalizer::first_wins;

#[derive(Clone)]
pub struct DocumentAiClient {
    endpoint: String,
    /// Full processor resource name,
    /// e.g. "projects/my-project/locations/us/processors/abc123"
    processor_name: String,
    access_token: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest {
    raw_document: RawDocument,
    skip_human_review: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    content: String,
    mime_type: String,
}

#[derive(Deserialize)]
struct ProcessResponse {
    document: Option<ResponseDocument>,
}

#[derive(Deserialize)]
struct ResponseDocument {
    #[serde(default)]
    text: String,
    #[serde(default)]
    entities: Vec<Entity>,
}

/// One extracted entity as Document AI reports it.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default)]
    pub mention_text: Option<String>,
    #[serde(default)]
    pub properties: Vec<Entity>,
}

#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub text: String,
    pub entities: Vec<Entity>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorInfo {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(rename = "type", default)]
    pub processor_type: Option<String>,
    #[serde(default = "unknown_state")]
    pub state: String,
}

fn unknown_state() -> String {
    "STATE_UNSPECIFIED".to_string()
}

/// Long-running operation handle returned by enable/disable.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorAction {
    Enable,
    Disable,
}

impl ProcessorAction {
    fn verb(&self) -> &'static str {
        match self {
            ProcessorAction::Enable => "enable",
            ProcessorAction::Disable => "disable",
        }
    }
}

/// Regional endpoint for a processor, taken from its `locations/{loc}` segment.
pub fn regional_endpoint(processor_name: &str) -> String {
    let location = processor_name
        .split('/')
        .skip_while(|segment| *segment != "locations")
        .nth(1)
        .filter(|loc| !loc.is_empty())
        .unwrap_or("us");
    format!("https://{location}-documentai.googleapis.com")
}

impl DocumentAiClient {
    pub fn new(endpoint: Option<String>, processor_name: String, access_token: String) -> Self {
        Self::with_timeout(endpoint, processor_name, access_token, Duration::from_secs(60))
    }

    pub fn with_timeout(
        endpoint: Option<String>,
        processor_name: String,
        access_token: String,
        timeout: Duration,
    ) -> Self {
        let endpoint = endpoint.unwrap_or_else(|| regional_endpoint(&processor_name));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build Document AI HTTP client, using defaults without timeout");
                reqwest::Client::new()
            });
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            processor_name,
            access_token,
            client,
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/v1/{}{}", self.endpoint, self.processor_name, suffix)
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Document AI {} failed ({}): {}", what, status, body)
    }

    #[instrument(level = "debug", skip_all, fields(processor = %self.processor_name, mime_type = mime_type))]
    pub async fn process(&self, bytes: &[u8], mime_type: &str) -> Result<ProcessedDocument> {
        let request = ProcessRequest {
            raw_document: RawDocument {
                content: BASE64.encode(bytes),
                mime_type: mime_type.to_string(),
            },
            skip_human_review: true,
        };

        let response = self
            .client
            .post(self.url(":process"))
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Document AI")?;

        let process_response: ProcessResponse = Self::check(response, "processing")
            .await?
            .json()
            .await
            .context("Failed to parse Document AI response")?;

        let document = process_response
            .document
            .context("Document AI response did not contain a document")?;

        info!(
            chars = document.text.len(),
            entities = document.entities.len(),
            "Document AI processed document"
        );

        Ok(ProcessedDocument {
            text: document.text,
            entities: document.entities,
        })
    }

    pub async fn processor_state(&self) -> Result<ProcessorInfo> {
        let response = self
            .client
            .get(self.url(""))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("Failed to send request to Document AI")?;

        Self::check(response, "processor lookup")
            .await?
            .json()
            .await
            .context("Failed to parse Document AI processor")
    }

    #[instrument(level = "info", skip(self), fields(processor = %self.processor_name))]
    pub async fn set_enabled(&self, action: ProcessorAction) -> Result<Operation> {
        let response = self
            .client
            .post(self.url(&format!(":{}", action.verb())))
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .context("Failed to send request to Document AI")?;

        let operation: Operation = Self::check(response, action.verb())
            .await?
            .json()
            .await
            .context("Failed to parse Document AI operation")?;

        info!(operation = %operation.name, done = operation.done, "Processor state change requested");
        Ok(operation)
    }

    pub async fn enable(&self) -> Result<Operation> {
        self.set_enabled(ProcessorAction::Enable).await
    }

    pub async fn disable(&self) -> Result<Operation> {
        self.set_enabled(ProcessorAction::Disable).await
    }
}

fn entity_value(entity: &Entity) -> Value {
    if entity.properties.is_empty() {
        return entity
            .mention_text
            .as_ref()
            .map(|t| Value::String(t.trim().to_string()))
            .unwrap_or(Value::Null);
    }
    first_wins(
        entity
            .properties
            .iter()
            .map(|p| (p.entity_type.clone(), entity_value(p))),
    )
}

/// Flatten entities into a JSON object keyed by entity type.
/// Parent entities become nested objects of their properties.
pub fn entities_to_value(entities: &[Entity]) -> Value {
    first_wins(
        entities
            .iter()
            .filter(|e| !e.entity_type.is_empty())
            .map(|e| (e.entity_type.clone(), entity_value(e))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Path,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
    };
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    const PROCESSOR: &str = "projects/p/locations/eu/processors/abc";

    #[test]
    fn test_regional_endpoint() {
        assert_eq!(regional_endpoint(PROCESSOR), "https://eu-documentai.googleapis.com");
        assert_eq!(regional_endpoint("garbage"), "https://us-documentai.googleapis.com");
    }

    #[test]
    fn test_entities_to_value() {
        let entities = vec![
            Entity {
                entity_type: "Name".into(),
                mention_text: Some(" Maria Santos ".into()),
                properties: vec![],
            },
            Entity {
                entity_type: "Name".into(),
                mention_text: Some("Someone Else".into()),
                properties: vec![],
            },
            Entity {
                entity_type: "Passport".into(),
                mention_text: None,
                properties: vec![Entity {
                    entity_type: "number".into(),
                    mention_text: Some("P123".into()),
                    properties: vec![],
                }],
            },
            Entity {
                entity_type: "".into(),
                mention_text: Some("ignored".into()),
                properties: vec![],
            },
        ];

        assert_eq!(
            entities_to_value(&entities),
            json!({"Name": "Maria Santos", "Passport": {"number": "P123"}})
        );
    }

    #[tokio::test]
    async fn test_process_parses_entities() {
        let app = Router::new().route(
            "/v1/projects/p/locations/eu/processors/:call",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer token");
                assert_eq!(body["rawDocument"]["mimeType"], "image/png");
                Json(json!({
                    "document": {
                        "text": "Name: Ali",
                        "entities": [{"type": "Name", "mentionText": "Ali"}]
                    }
                }))
            }),
        );
        let base = serve(app).await;
        let client = DocumentAiClient::new(Some(base), PROCESSOR.into(), "token".into());

        let doc = client.process(b"png-bytes", "image/png").await.unwrap();
        assert_eq!(doc.text, "Name: Ali");
        assert_eq!(doc.entities[0].entity_type, "Name");
        assert_eq!(doc.entities[0].mention_text.as_deref(), Some("Ali"));
    }

    #[tokio::test]
    async fn test_processor_lifecycle() {
        let app = Router::new()
            .route(
                "/v1/projects/p/locations/eu/processors/:call",
                get(|Path(call): Path<String>| async move {
                    assert_eq!(call, "abc");
                    Json(json!({
                        "name": PROCESSOR,
                        "displayName": "cv-parser",
                        "type": "CUSTOM_EXTRACTION_PROCESSOR",
                        "state": "ENABLED"
                    }))
                })
                .post(|Path(call): Path<String>| async move {
                    let verb = call.rsplit(':').next().unwrap_or_default().to_string();
                    if verb == "enable" || verb == "disable" {
                        Ok(Json(json!({"name": format!("operations/{verb}-1")})))
                    } else {
                        Err(StatusCode::NOT_FOUND)
                    }
                }),
            );
        let base = serve(app).await;
        let client = DocumentAiClient::new(Some(base), PROCESSOR.into(), "token".into());

        let info = client.processor_state().await.unwrap();
        assert_eq!(info.state, "ENABLED");
        assert_eq!(info.display_name.as_deref(), Some("cv-parser"));

        let op = client.disable().await.unwrap();
        assert_eq!(op.name, "operations/disable-1");
        assert!(!op.done);
        let op = client.enable().await.unwrap();
        assert_eq!(op.name, "operations/enable-1");
    }

    #[tokio::test]
    async fn test_process_reports_http_errors() {
        let app = Router::new().route(
            "/v1/projects/p/locations/eu/processors/:call",
            post(|| async { (StatusCode::BAD_REQUEST, "processor disabled") }),
        );
        let base = serve(app).await;
        let client = DocumentAiClient::new(Some(base), PROCESSOR.into(), "token".into());

        let err = client.process(b"x", "application/pdf").await.unwrap_err();
        assert!(err.to_string().contains("processor disabled"));
    }
}
