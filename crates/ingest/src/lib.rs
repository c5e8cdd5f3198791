pub mod reader;

pub use reader::{DocumentKind, IngestError, UploadedDocument, MAX_UPLOAD_BYTES};

use sha2::{Digest, Sha256};

/// Generate a stable document ID from the uploaded bytes
pub fn generate_doc_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    hex::encode(&result[..16])
}
