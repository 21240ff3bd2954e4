//! One-way export of model answers and generated images as named files

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use llm::GeneratedImage;
use std::path::{Path, PathBuf};

use crate::message::Message;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Text,
    Html,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Text => "txt",
            ExportFormat::Html => "html",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Text => "text/plain",
            ExportFormat::Html => "text/html",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "txt" | "text" => Some(ExportFormat::Text),
            "html" | "htm" => Some(ExportFormat::Html),
            _ => None,
        }
    }
}

/// A named file ready to be written or offered for download
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ExportArtifact {
    /// Write into `dir`, returning the full path
    pub async fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&self.file_name);
        tokio::fs::write(&path, &self.bytes).await?;
        Ok(path)
    }
}

/// Model entries only; the body is the content verbatim
pub fn export_message(message: &Message, format: ExportFormat) -> Option<ExportArtifact> {
    if !message.is_model() {
        return None;
    }
    Some(ExportArtifact {
        file_name: format!(
            "armin-ai-lesson-{}.{}",
            Utc::now().timestamp_millis(),
            format.extension()
        ),
        mime_type: format.mime_type().to_string(),
        bytes: message.content.as_bytes().to_vec(),
    })
}

/// Decode a generated image reference; `None` unless it is a base64 data URI
pub fn export_image(image: &GeneratedImage) -> Option<ExportArtifact> {
    let (mime_type, data) = image.inline_parts()?;
    let bytes = BASE64.decode(data).ok()?;
    let extension = mime_type
        .strip_prefix("image/")
        .map(|subtype| if subtype == "jpeg" { "jpg" } else { subtype })
        .unwrap_or("bin");
    Some(ExportArtifact {
        file_name: format!("armin-image-{}.{}", Utc::now().timestamp_millis(), extension),
        mime_type: mime_type.to_string(),
        bytes,
    })
}
