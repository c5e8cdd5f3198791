use anyhow::Context;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    http::{StatusCode, header::CONTENT_TYPE},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use extract::{
    DocumentAiClient, ExtractError, ExtractionOutcome, ExtractionProfile, Extractor, GeminiClient,
    NormalizedResult, Operation, ProcessorAction, ProcessorInfo, Provider,
};
use ingest::{MAX_UPLOAD_BYTES, UploadedDocument};

mod config;
mod error;
mod metrics;

use config::{AppConfig, LogFormat};
use error::ApiError;
use metrics::{Metrics, MetricsSnapshot, TimedOperation};

struct AppState {
    config: AppConfig,
    extractor: Extractor,
    metrics: Arc<Metrics>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    gemini: bool,
    document_ai: bool,
}

#[derive(Serialize)]
struct ExtractResponse {
    #[serde(rename = "jsonResponse")]
    json_response: NormalizedResult,
}

#[derive(Deserialize)]
struct TextRequest {
    text: String,
    /// Optional: override the configured Gemini model
    model: Option<String>,
}

/// Fields collected from a multipart form.
#[derive(Default)]
struct UploadForm {
    file: Option<(Option<String>, Option<String>, Vec<u8>)>,
    text: Option<String>,
    model: Option<String>,
}

impl UploadForm {
    fn document(&mut self) -> Result<UploadedDocument, ApiError> {
        let (file_name, content_type, bytes) = self
            .file
            .take()
            .ok_or_else(|| ApiError::BadRequest("missing multipart field `file`".to_string()))?;
        Ok(UploadedDocument::from_upload(
            file_name,
            content_type.as_deref(),
            bytes,
        )?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_format);

    if config.gemini.is_none() {
        warn!("GEMINI_API_KEY not set, Gemini endpoints will return 503");
    }
    if config.document_ai.is_none() {
        warn!("DOCUMENT_AI_PROCESSOR/GOOGLE_ACCESS_TOKEN not set, Document AI endpoints will return 503");
    }
    info!(diagnostics = config.diagnostics, "Configuration loaded");

    let bind_addr = config.bind_addr();
    let state = Arc::new(build_state(config));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;

    info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

fn build_state(config: AppConfig) -> AppState {
    let timeout = config.upstream_timeout();

    let gemini = config.gemini.as_ref().map(|g| {
        GeminiClient::with_timeout(g.base_url.clone(), g.api_key.clone(), g.model.clone(), timeout)
    });
    let document_ai = config.document_ai.as_ref().map(|d| {
        DocumentAiClient::with_timeout(
            d.endpoint.clone(),
            d.processor_name.clone(),
            d.access_token.clone(),
            timeout,
        )
    });

    AppState {
        extractor: Extractor::new(ExtractionProfile::worker(), gemini, document_ai),
        metrics: Metrics::new(),
        config,
    }
}

fn router(state: Arc<AppState>) -> Router {
    let extraction = Router::new()
        .route("/extract/document", post(extract_document))
        .route("/extract/text", post(extract_text))
        .route("/extract/documentai", post(extract_documentai))
        .route_layer(middleware::from_fn_with_state(state.clone(), count_requests));

    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .route("/processor", get(processor_state))
        .route("/processor/:action", post(processor_action))
        .merge(extraction)
        // Leave headroom over the file limit for multipart framing.
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn count_requests(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    state.metrics.record_request(response.status().is_success());
    response
}

impl AppState {
    /// Record metrics for a finished extraction and shape the response.
    fn respond(
        &self,
        provider: Provider,
        timer: TimedOperation,
        outcome: Result<ExtractionOutcome, ExtractError>,
    ) -> Result<Json<ExtractResponse>, ApiError> {
        // A missing client never reaches the network.
        if !matches!(
            outcome,
            Err(ExtractError::GeminiNotConfigured | ExtractError::DocumentAiNotConfigured)
        ) {
            self.metrics.record_upstream(provider, timer.elapsed());
        }
        match outcome {
            Ok(outcome) => {
                self.metrics.record_fields(outcome.result.filled());
                Ok(Json(ExtractResponse {
                    json_response: outcome.result,
                }))
            }
            Err(e) => {
                if matches!(e, ExtractError::Normalize(_)) {
                    self.metrics.record_malformed();
                }
                Err(ApiError::from_extract(e, self.config.diagnostics))
            }
        }
    }
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                form.file = Some((file_name, content_type, bytes.to_vec()));
            }
            "text" => form.text = Some(field.text().await.map_err(multipart_error)?),
            "model" => {
                let model = field.text().await.map_err(multipart_error)?;
                form.model = Some(model.trim().to_string()).filter(|m| !m.is_empty());
            }
            other => warn!(field = other, "Ignoring unknown multipart field"),
        }
    }

    Ok(form)
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    body_error(err.status(), err.body_text())
}

/// Map a body extraction failure, keeping the 413 from `DefaultBodyLimit`.
fn body_error(status: StatusCode, message: String) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(message)
    } else {
        ApiError::BadRequest(message)
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        gemini: state.config.gemini.is_some(),
        document_ai: state.config.document_ai.is_some(),
    })
}

async fn extract_document(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ExtractResponse>, ApiError> {
    let mut form = read_form(multipart).await?;
    let document = form.document()?;
    info!(
        doc_id = %document.doc_id(),
        file_name = document.file_name.as_deref().unwrap_or("-"),
        kind = document.mime_type(),
        bytes = document.bytes.len(),
        "Extracting document with Gemini"
    );

    let timer = TimedOperation::start();
    let outcome = state
        .extractor
        .extract_document(&document, form.model.as_deref())
        .await;
    state.respond(Provider::Gemini, timer, outcome)
}

async fn extract_text(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<ExtractResponse>, ApiError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    let (text, model) = if is_multipart {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| body_error(e.status(), e.body_text()))?;
        let form = read_form(multipart).await?;
        (form.text, form.model)
    } else {
        let Json(req) = Json::<TextRequest>::from_request(request, &())
            .await
            .map_err(|e| body_error(e.status(), e.body_text()))?;
        (Some(req.text), req.model)
    };

    let text = text
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing or empty field `text`".to_string()))?;
    info!(chars = text.len(), "Extracting text with Gemini");

    let timer = TimedOperation::start();
    let outcome = state.extractor.extract_text(&text, model.as_deref()).await;
    state.respond(Provider::Gemini, timer, outcome)
}

async fn extract_documentai(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ExtractResponse>, ApiError> {
    let mut form = read_form(multipart).await?;
    let document = form.document()?;
    info!(
        doc_id = %document.doc_id(),
        file_name = document.file_name.as_deref().unwrap_or("-"),
        kind = document.mime_type(),
        bytes = document.bytes.len(),
        "Extracting document with Document AI"
    );

    let timer = TimedOperation::start();
    let outcome = state.extractor.extract_with_document_ai(&document).await;
    state.respond(Provider::DocumentAi, timer, outcome)
}

fn document_ai_client(state: &AppState) -> Result<&DocumentAiClient, ApiError> {
    state
        .extractor
        .document_ai()
        .map_err(|e| ApiError::from_extract(e, false))
}

async fn processor_state(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ProcessorInfo>, ApiError> {
    let client = document_ai_client(&state)?;
    let processor = client
        .processor_state()
        .await
        .map_err(|e| ApiError::Upstream(format!("{e:#}")))?;
    Ok(Json(processor))
}

async fn processor_action(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
) -> Result<Json<Operation>, ApiError> {
    let action = match action.as_str() {
        "enable" => ProcessorAction::Enable,
        "disable" => ProcessorAction::Disable,
        other => {
            return Err(ApiError::BadRequest(format!(
                "unknown processor action `{other}` (expected enable or disable)"
            )));
        }
    };

    let client = document_ai_client(&state)?;
    let operation = client
        .set_enabled(action)
        .await
        .map_err(|e| ApiError::Upstream(format!("{e:#}")))?;
    Ok(Json(operation))
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
