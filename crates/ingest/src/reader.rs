use thiserror::Error;
use tracing::debug;

/// Largest upload we forward upstream (20 MiB, the inline-data ceiling for Gemini).
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Png,
    Jpeg,
}

impl DocumentKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "application/pdf",
            DocumentKind::Png => "image/png",
            DocumentKind::Jpeg => "image/jpeg",
        }
    }

    fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/pdf" => Some(DocumentKind::Pdf),
            "image/png" => Some(DocumentKind::Png),
            "image/jpeg" | "image/jpg" => Some(DocumentKind::Jpeg),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Uploaded file is empty")]
    Empty,

    #[error("Uploaded file is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("Unsupported file type: {0} (expected PDF, PNG or JPEG)")]
    Unsupported(String),
}

/// A document received from a client, validated and ready to forward.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub file_name: Option<String>,
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
}

impl UploadedDocument {
    /// Validate an upload. The type sniffed from the bytes wins over the
    /// content type the client declared.
    pub fn from_upload(
        file_name: Option<String>,
        declared_content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<Self, IngestError> {
        if bytes.is_empty() {
            return Err(IngestError::Empty);
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(IngestError::TooLarge {
                size: bytes.len(),
                limit: MAX_UPLOAD_BYTES,
            });
        }

        let kind = match infer::get(&bytes) {
            Some(sniffed) => DocumentKind::from_mime(sniffed.mime_type())
                .ok_or_else(|| IngestError::Unsupported(sniffed.mime_type().to_string()))?,
            None => {
                let declared = declared_content_type.unwrap_or("unknown");
                return Err(IngestError::Unsupported(declared.to_string()));
            }
        };

        if let Some(declared) = declared_content_type {
            if DocumentKind::from_mime(declared) != Some(kind) {
                debug!(
                    declared = declared,
                    sniffed = kind.mime_type(),
                    "Declared content type disagrees with file contents"
                );
            }
        }

        Ok(Self {
            file_name,
            kind,
            bytes,
        })
    }

    pub fn mime_type(&self) -> &'static str {
        self.kind.mime_type()
    }

    pub fn doc_id(&self) -> String {
        crate::generate_doc_id(&self.bytes)
    }
}
