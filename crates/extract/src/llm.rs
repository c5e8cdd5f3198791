use std::time::Duration;

use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// Document bytes sent alongside the prompt.
pub struct InlineDocument<'a> {
    pub mime_type: &'a str,
    pub bytes: &'a [u8],
}

#[derive(Clone)]
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum RequestPart {
    #[serde(rename = "text")]
    Text(String),
    InlineData(InlineData),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self::with_timeout(base_url, api_key, model, Duration::from_secs(60))
    }

    pub fn with_timeout(base_url: String, api_key: String, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build Gemini HTTP client, using defaults without timeout");
                reqwest::Client::new()
            });
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            client,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one prompt (optionally with a document) and return the reply text.
    pub async fn generate(&self, prompt: &str, document: Option<InlineDocument<'_>>) -> Result<String> {
        self.generate_with_model(&self.model, prompt, document).await
    }

    #[instrument(level = "debug", skip_all, fields(model = model))]
    pub async fn generate_with_model(
        &self,
        model: &str,
        prompt: &str,
        document: Option<InlineDocument<'_>>,
    ) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        let mut parts = vec![RequestPart::Text(prompt.to_string())];
        if let Some(document) = document {
            parts.push(RequestPart::InlineData(InlineData {
                mime_type: document.mime_type.to_string(),
                data: BASE64.encode(document.bytes),
            }));
        }

        let request = GenerateRequest {
            contents: vec![Content { role: "user", parts }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                temperature: 0.0,
            },
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Gemini")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini request failed ({}): {}", status, body);
        }

        let gemini_response: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        let candidate = gemini_response
            .candidates
            .into_iter()
            .next()
            .context("Gemini response did not contain any candidates")?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            anyhow::bail!("Gemini response did not contain any text");
        }

        debug!(chars = text.len(), "Gemini reply received");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::HeaderMap, routing::post};
    use serde_json::{Value, json};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_generate_sends_inline_document() {
        let app = Router::new().route(
            "/models/:call",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["x-goog-api-key"], "secret");
                let parts = &body["contents"][0]["parts"];
                assert_eq!(parts[0]["text"], "extract please");
                assert_eq!(parts[1]["inlineData"]["mimeType"], "application/pdf");
                assert_eq!(parts[1]["inlineData"]["data"], "JVBERg==");
                assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
                Json(json!({
                    "candidates": [{"content": {"parts": [{"text": "{\"Name\":"}, {"text": "\"Ali\"}"}]}}]
                }))
            }),
        );
        let base = serve(app).await;
        let client = GeminiClient::new(base, "secret".into(), "gemini-test".into());

        let text = client
            .generate(
                "extract please",
                Some(InlineDocument {
                    mime_type: "application/pdf",
                    bytes: b"%PDF",
                }),
            )
            .await
            .unwrap();
        assert_eq!(text, "{\"Name\":\"Ali\"}");
    }

    #[tokio::test]
    async fn test_generate_reports_errors() {
        let app = Router::new().route(
            "/models/:call",
            post(|| async { (axum::http::StatusCode::FORBIDDEN, "API key not valid") }),
        );
        let base = serve(app).await;
        let client = GeminiClient::new(base, "bad".into(), "gemini-test".into());

        let err = client.generate("hi", None).await.unwrap_err();
        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("API key not valid"));
    }

    #[tokio::test]
    async fn test_generate_rejects_empty_candidates() {
        let app = Router::new().route(
            "/models/:call",
            post(|| async { Json(json!({"candidates": []})) }),
        );
        let base = serve(app).await;
        let client = GeminiClient::new(base, "k".into(), "gemini-test".into());

        let err = client.generate("hi", None).await.unwrap_err();
        assert!(err.to_string().contains("candidates"));
    }
}
