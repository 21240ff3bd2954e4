use async_trait::async_trait;
use config::{IMAGE_MODEL, Settings, resolve_api_key};
use tracing::{debug, info, instrument, warn};

use super::provider::{DEFAULT_BASE_URL, GeminiProvider};
use crate::{
    ChatMessage, ChatModel, ChatPayload, ChatRequest, CompletionStream, ContentBlock,
    GeneratedImage, GenerationClient, GenerationError, ModelDefinition, ModelProvider,
    explain_steps_prompt,
};

pub const EMPTY_ANALYSIS_FALLBACK: &str = "No response received.";
pub const EMPTY_EXPLANATION_FALLBACK: &str = "No explanation found.";

/// [`GenerationClient`] backed by the Gemini REST API.
///
/// The credential is resolved per call, so a key entered in settings takes
/// effect on the next request without rebuilding the client.
pub struct GeminiGenerationClient {
    base_url: String,
}

impl Default for GeminiGenerationClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl GeminiGenerationClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Honors `GEMINI_BASE_URL` for proxies and local fakes
    pub fn from_env() -> Self {
        match std::env::var("GEMINI_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => Self::new(url),
            _ => Self::default(),
        }
    }

    fn provider(&self, settings: &Settings) -> Result<GeminiProvider, GenerationError> {
        let Some(api_key) = resolve_api_key(settings) else {
            warn!("No API key in settings or environment");
            return Err(GenerationError::AuthMissing);
        };
        GeminiProvider::new(&self.base_url, &api_key)
    }
}

#[async_trait]
impl GenerationClient for GeminiGenerationClient {
    #[instrument(skip(self, history, system_instruction, settings), fields(history_len = history.len()))]
    async fn stream_completion(
        &self,
        model: &str,
        history: &[ChatMessage],
        system_instruction: &str,
        settings: &Settings,
    ) -> Result<CompletionStream, GenerationError> {
        let chat_model = self.provider(settings)?.create_chat_model(model);
        let request = ChatRequest::new(history)
            .with_system_instruction(system_instruction)
            .with_temperature(settings.temperature)
            .with_search(settings.enable_search);

        let stream = chat_model.stream_chat(&request).await?;
        debug!(model, "Completion stream opened");
        Ok(CompletionStream::new(stream))
    }

    #[instrument(skip(self, settings))]
    async fn generate_image(
        &self,
        prompt: &str,
        settings: &Settings,
    ) -> Result<GeneratedImage, GenerationError> {
        let chat_model = self.provider(settings)?.create_chat_model(IMAGE_MODEL);
        let messages = [ChatMessage::user(ChatPayload::text(prompt))];
        let response = chat_model.chat(&ChatRequest::new(&messages)).await?;

        if let Some((data, mime_type)) = response.payload.get_images().first() {
            info!(mime_type, "Image generated");
            return Ok(GeneratedImage::from_inline(mime_type, data));
        }

        if response.get_text().trim().is_empty() {
            Err(GenerationError::unknown("No image was generated."))
        } else {
            Err(GenerationError::unknown(
                "⚠️ No image was generated (the model answered with text).",
            ))
        }
    }

    #[instrument(skip(self, files, prompt, system_instruction, settings), fields(files = files.len()))]
    async fn analyze_content(
        &self,
        files: &[ContentBlock],
        prompt: &str,
        model: &str,
        system_instruction: &str,
        settings: &Settings,
    ) -> Result<String, GenerationError> {
        let chat_model = self.provider(settings)?.create_chat_model(model);

        let mut content: Vec<ContentBlock> = files.to_vec();
        content.push(ContentBlock::text(prompt));
        let messages = [ChatMessage::user(ChatPayload::new(content))];
        let request = ChatRequest::new(&messages).with_system_instruction(system_instruction);

        let text = chat_model.chat(&request).await?.get_text();
        Ok(non_empty_or(text, EMPTY_ANALYSIS_FALLBACK))
    }

    #[instrument(skip(self, question, answer, settings))]
    async fn explain_steps(
        &self,
        question: &str,
        answer: &str,
        model: &str,
        settings: &Settings,
    ) -> Result<String, GenerationError> {
        let chat_model = self.provider(settings)?.create_chat_model(model);
        let messages = [ChatMessage::user(ChatPayload::text(explain_steps_prompt(
            question, answer,
        )))];

        let text = chat_model.chat(&ChatRequest::new(&messages)).await?.get_text();
        Ok(non_empty_or(text, EMPTY_EXPLANATION_FALLBACK))
    }

    async fn list_models(&self, settings: &Settings) -> Result<Vec<ModelDefinition>, GenerationError> {
        self.provider(settings)?.list_models().await
    }
}

fn non_empty_or(text: String, fallback: &str) -> String {
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text
    }
}
