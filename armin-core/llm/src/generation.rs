use async_trait::async_trait;
use config::{AVAILABLE_MODELS, Settings};
use serde::{Deserialize, Serialize};

use crate::{ChatMessage, CompletionStream, ContentBlock, GenerationError, ModelDefinition};

/// Reference to a generated image, a `data:<mime>;base64,<data>` URI
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct GeneratedImage {
    pub uri: String,
}

impl GeneratedImage {
    pub fn from_inline(mime_type: &str, data: &str) -> Self {
        Self {
            uri: format!("data:{};base64,{}", mime_type, data),
        }
    }

    /// Split into (mime type, base64 payload) if this is a base64 data URI
    pub fn inline_parts(&self) -> Option<(&str, &str)> {
        let rest = self.uri.strip_prefix("data:")?;
        let (header, data) = rest.split_once(',')?;
        let mime_type = header.strip_suffix(";base64")?;
        Some((mime_type, data))
    }
}

/// Everything the conversation core needs from a generative backend.
///
/// Every call resolves its credential from `settings` first and fails with
/// [`GenerationError::AuthMissing`] before touching the network when none is
/// available.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Start a streamed completion of `history` (oldest first).
    async fn stream_completion(
        &self,
        model: &str,
        history: &[ChatMessage],
        system_instruction: &str,
        settings: &Settings,
    ) -> Result<CompletionStream, GenerationError>;

    async fn generate_image(
        &self,
        prompt: &str,
        settings: &Settings,
    ) -> Result<GeneratedImage, GenerationError>;

    /// One-shot analysis of inline files followed by `prompt`
    async fn analyze_content(
        &self,
        files: &[ContentBlock],
        prompt: &str,
        model: &str,
        system_instruction: &str,
        settings: &Settings,
    ) -> Result<String, GenerationError>;

    async fn explain_steps(
        &self,
        question: &str,
        answer: &str,
        model: &str,
        settings: &Settings,
    ) -> Result<String, GenerationError>;

    /// Models the user can pick from
    async fn list_models(&self, _settings: &Settings) -> Result<Vec<ModelDefinition>, GenerationError> {
        Ok(builtin_models())
    }
}

pub fn builtin_models() -> Vec<ModelDefinition> {
    AVAILABLE_MODELS
        .iter()
        .map(|(id, label)| ModelDefinition::with_display_name(*id, *label, vec![crate::ModelCapability::Text]))
        .collect()
}

/// Prompt used to ask for a step-by-step derivation of an earlier answer
pub fn explain_steps_prompt(question: &str, answer: &str) -> String {
    format!(
        "User question: {}\nYour previous answer: {}\n\n\
         Please explain, step by step, precisely and pedagogically, how to arrive at this answer.",
        question, answer
    )
}
