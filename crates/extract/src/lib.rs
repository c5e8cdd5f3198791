pub mod documentai;
pub mod llm;
pub mod normalizer;
pub mod prompt;
pub mod schema;

pub use documentai::{DocumentAiClient, Operation, ProcessorAction, ProcessorInfo};
pub use llm::GeminiClient;
pub use normalizer::{NormalizeError, normalize, normalize_value};
pub use schema::{AllowedValues, ExtractionProfile, ExtractionSchema, NormalizedResult, SchemaError};

use ingest::UploadedDocument;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Upstream service failed: {0:#}")]
    Upstream(#[from] anyhow::Error),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("Gemini is not configured")]
    GeminiNotConfigured,

    #[error("Document AI processor is not configured")]
    DocumentAiNotConfigured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    DocumentAi,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::DocumentAi => "document_ai",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub provider: Provider,
    pub result: NormalizedResult,
}

pub struct Extractor {
    profile: ExtractionProfile,
    gemini: Option<GeminiClient>,
    document_ai: Option<DocumentAiClient>,
}

impl Extractor {
    pub fn new(
        profile: ExtractionProfile,
        gemini: Option<GeminiClient>,
        document_ai: Option<DocumentAiClient>,
    ) -> Self {
        Self {
            profile,
            gemini,
            document_ai,
        }
    }

    pub fn profile(&self) -> &ExtractionProfile {
        &self.profile
    }

    pub fn document_ai(&self) -> Result<&DocumentAiClient, ExtractError> {
        self.document_ai
            .as_ref()
            .ok_or(ExtractError::DocumentAiNotConfigured)
    }

    fn gemini_client(&self) -> Result<&GeminiClient, ExtractError> {
        self.gemini.as_ref().ok_or(ExtractError::GeminiNotConfigured)
    }

    fn finish(&self, provider: Provider, raw: &str) -> Result<ExtractionOutcome, ExtractError> {
        let result = normalize(raw, &self.profile.schema).inspect_err(|e| {
            warn!(provider = provider.as_str(), reason = e.reason(), "Model output rejected");
        })?;
        info!(
            provider = provider.as_str(),
            filled = result.filled(),
            fields = result.len(),
            "Extraction normalized"
        );
        Ok(ExtractionOutcome { provider, result })
    }

    /// Send an uploaded document to Gemini and normalize its reply.
    pub async fn extract_document(
        &self,
        document: &UploadedDocument,
        model: Option<&str>,
    ) -> Result<ExtractionOutcome, ExtractError> {
        let gemini = self.gemini_client()?;
        let prompt = prompt::build_document_prompt(&self.profile);
        let inline = llm::InlineDocument {
            mime_type: document.mime_type(),
            bytes: &document.bytes,
        };

        let raw = gemini
            .generate_with_model(model.unwrap_or(gemini.model()), &prompt, Some(inline))
            .await?;
        self.finish(Provider::Gemini, &raw)
    }

    /// Send raw text to Gemini and normalize its reply.
    pub async fn extract_text(
        &self,
        text: &str,
        model: Option<&str>,
    ) -> Result<ExtractionOutcome, ExtractError> {
        let gemini = self.gemini_client()?;
        let prompt = prompt::build_text_prompt(&self.profile, text);

        let raw = gemini
            .generate_with_model(model.unwrap_or(gemini.model()), &prompt, None)
            .await?;
        self.finish(Provider::Gemini, &raw)
    }

    /// Run the Document AI processor and map its entities onto the schema.
    pub async fn extract_with_document_ai(
        &self,
        document: &UploadedDocument,
    ) -> Result<ExtractionOutcome, ExtractError> {
        let client = self.document_ai()?;
        let processed = client.process(&document.bytes, document.mime_type()).await?;

        let value = documentai::entities_to_value(&processed.entities);
        let result = normalize_value(value, &self.profile.schema).map_err(|reason| {
            NormalizeError::MalformedOutput {
                reason,
                raw: processed.text.clone(),
            }
        })?;
        info!(
            provider = Provider::DocumentAi.as_str(),
            filled = result.filled(),
            fields = result.len(),
            "Extraction normalized"
        );

        Ok(ExtractionOutcome {
            provider: Provider::DocumentAi,
            result,
        })
    }
}
