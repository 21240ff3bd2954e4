//! Attachment codec: raw user files to transport-safe base64

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::message::{Attachment, AttachmentKind};

/// Upload ceiling, 5 MiB
pub const MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("File {name} is too large ({size} bytes, max 5 MB).")]
    SizeExceeded { name: String, size: u64 },
    #[error("Could not read {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl AttachmentError {
    pub fn file_name(&self) -> &str {
        match self {
            AttachmentError::SizeExceeded { name, .. } | AttachmentError::Read { name, .. } => name,
        }
    }
}

/// Raw file selected by the user
#[derive(Clone, Debug)]
pub struct FileInput {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl FileInput {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

pub fn encode(file: &FileInput) -> Result<Attachment, AttachmentError> {
    check_size(&file.name, file.bytes.len() as u64)?;
    Ok(Attachment {
        kind: AttachmentKind::for_mime(&file.mime_type),
        mime_type: file.mime_type.clone(),
        data: BASE64.encode(&file.bytes),
        name: Some(file.name.clone()),
    })
}

/// Read and encode a file from disk.
///
/// The size is checked from metadata before the content is read, so an
/// oversized file is never loaded into memory.
pub async fn encode_path(path: &Path) -> Result<Attachment, AttachmentError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let read_error = |source| AttachmentError::Read {
        name: name.clone(),
        source,
    };

    let metadata = tokio::fs::metadata(path).await.map_err(read_error)?;
    check_size(&name, metadata.len())?;

    let bytes = tokio::fs::read(path).await.map_err(read_error)?;
    let mime_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    debug!(name = %name, mime_type = %mime_type, size = bytes.len(), "Encoding attachment");

    encode(&FileInput::new(name, mime_type, bytes))
}

/// Encode every file; failures are per-file and never abort the batch
pub fn encode_batch(files: &[FileInput]) -> (Vec<Attachment>, Vec<AttachmentError>) {
    let mut encoded = Vec::new();
    let mut errors = Vec::new();
    for file in files {
        match encode(file) {
            Ok(attachment) => encoded.push(attachment),
            Err(e) => errors.push(e),
        }
    }
    (encoded, errors)
}

fn check_size(name: &str, size: u64) -> Result<(), AttachmentError> {
    if size > MAX_ATTACHMENT_BYTES {
        warn!(name, size, "Attachment rejected: too large");
        return Err(AttachmentError::SizeExceeded {
            name: name.to_string(),
            size,
        });
    }
    Ok(())
}
