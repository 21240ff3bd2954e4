//! File analyzer and image studio: one-shot calls outside the conversation log

use config::DEFAULT_MODEL;
use llm::{ContentBlock, GeneratedImage, GenerationError};
use tracing::{info, instrument, warn};

use crate::engine::ConversationEngine;
use crate::message::{Attachment, AttachmentKind};

pub const IMAGE_ANALYST_INSTRUCTION: &str = "You are an expert image analyst.";

pub const DEFAULT_IMAGE_PROMPT: &str =
    "Describe this image in detail and point out its key educational takeaways.";

/// Appended to every studio image prompt
pub const STUDIO_IMAGE_STYLE: &str =
    " . Style: Photorealistic, 8k, Cinematic, Educational, Highly Detailed, No distortion.";

pub fn default_analysis_prompt(file_count: usize) -> String {
    format!("Please analyze these {} files.", file_count)
}

fn prompt_or(prompt: &str, fallback: impl FnOnce() -> String) -> String {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        fallback()
    } else {
        prompt.to_string()
    }
}

impl ConversationEngine {
    /// Analyze files under the active persona with the configured model
    #[instrument(skip(self, files, prompt), fields(files = files.len()))]
    pub async fn analyze_files(
        &self,
        files: &[Attachment],
        prompt: &str,
    ) -> Result<String, GenerationError> {
        if files.is_empty() {
            let error = GenerationError::unknown("Select at least one file to analyze.");
            self.inner.relay.error(error.user_message());
            return Err(error);
        }
        let prompt = prompt_or(prompt, || default_analysis_prompt(files.len()));
        let blocks: Vec<ContentBlock> = files.iter().map(Attachment::to_content_block).collect();
        let settings = self.inner.settings();
        let system_prompt = self.inner.persona.lock().system_prompt.clone();

        let result = self
            .inner
            .client
            .analyze_content(&blocks, &prompt, &settings.model, &system_prompt, &settings)
            .await;
        self.relay_failure(result, "File analysis failed")
    }

    /// Describe a single image with the default model
    #[instrument(skip(self, image, prompt))]
    pub async fn analyze_image(
        &self,
        image: &Attachment,
        prompt: &str,
    ) -> Result<String, GenerationError> {
        if image.kind != AttachmentKind::Image {
            let error = GenerationError::unknown("Please choose an image file.");
            self.inner.relay.error(error.user_message());
            return Err(error);
        }
        let prompt = prompt_or(prompt, || DEFAULT_IMAGE_PROMPT.to_string());
        let settings = self.inner.settings();

        let result = self
            .inner
            .client
            .analyze_content(
                &[image.to_content_block()],
                &prompt,
                DEFAULT_MODEL,
                IMAGE_ANALYST_INSTRUCTION,
                &settings,
            )
            .await;
        self.relay_failure(result, "Image analysis failed")
    }

    /// Generate a standalone image. A blank prompt does nothing.
    #[instrument(skip(self, prompt))]
    pub async fn generate_image(
        &self,
        prompt: &str,
    ) -> Result<Option<GeneratedImage>, GenerationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Ok(None);
        }
        let settings = self.inner.settings();
        let styled = format!("{}{}", prompt, STUDIO_IMAGE_STYLE);

        let result = self.inner.client.generate_image(&styled, &settings).await;
        self.relay_failure(result, "Image generation failed").map(Some)
    }

    fn relay_failure<T>(
        &self,
        result: Result<T, GenerationError>,
        context: &str,
    ) -> Result<T, GenerationError> {
        match &result {
            Ok(_) => info!("Studio request completed"),
            Err(error) => {
                warn!(error = %error, "{}", context);
                self.inner.relay.error(error.user_message());
            }
        }
        result
    }
}
