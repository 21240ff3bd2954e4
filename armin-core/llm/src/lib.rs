use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

pub mod api;
mod client;
pub mod error;
pub mod generation;
pub mod providers;
pub mod stream;
pub mod traffic_log;

pub use api::*;
pub use error::GenerationError;
pub use generation::{GeneratedImage, GenerationClient, builtin_models, explain_steps_prompt};
pub use providers::{GeminiChatModel, GeminiGenerationClient, GeminiProvider};
pub use stream::{Completion, CompletionStream, StreamStep};

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, GenerationError>> + Send>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelCapability {
    Text,
    Image,
}

#[derive(Clone, Debug)]
pub struct ModelDefinition {
    pub id: String,
    pub display_name: Option<String>,
    pub capabilities: Vec<ModelCapability>,
}

impl ModelDefinition {
    pub fn new(id: impl Into<String>, capabilities: Vec<ModelCapability>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            capabilities,
        }
    }

    pub fn with_display_name(
        id: impl Into<String>,
        display_name: impl Into<String>,
        capabilities: Vec<ModelCapability>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: Some(display_name.into()),
            capabilities,
        }
    }

    /// Get the display name, falling back to id if not set
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    pub fn has_capability(&self, capability: &ModelCapability) -> bool {
        self.capabilities.contains(capability)
    }
}

#[async_trait]
pub trait ChatModel {
    fn name(&self) -> &str;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatMessage, GenerationError>;

    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatStream, GenerationError>;
}

#[async_trait]
pub trait ModelProvider {
    type ModelType: ChatModel;

    /// List available models from the provider with their capabilities
    async fn list_models(&self) -> Result<Vec<ModelDefinition>, GenerationError>;

    fn create_chat_model(&self, model_name: &str) -> Self::ModelType;
}
