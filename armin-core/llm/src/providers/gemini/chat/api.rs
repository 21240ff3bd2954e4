use serde::{Deserialize, Serialize};

use crate::{ChatPayload, ChatRequest, GenerationError, Source};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ModelDefinition {
    pub(crate) name: String,

    pub(crate) display_name: Option<String>,

    pub(crate) supported_generation_methods: Option<Vec<String>>,
}

impl From<ModelDefinition> for crate::ModelDefinition {
    fn from(model: ModelDefinition) -> Self {
        let mut capabilities = Vec::new();

        for method in model.supported_generation_methods.iter().flatten() {
            match method.as_str() {
                "generateContent" => {
                    // generateContent models accept inline images as well as text
                    for capability in [crate::ModelCapability::Text, crate::ModelCapability::Image] {
                        if !capabilities.contains(&capability) {
                            capabilities.push(capability);
                        }
                    }
                }
                _ => {}
            }
        }

        let id = model
            .name
            .strip_prefix("models/")
            .unwrap_or(&model.name)
            .to_string();

        match model.display_name {
            Some(display_name) => crate::ModelDefinition::with_display_name(id, display_name, capabilities),
            None => crate::ModelDefinition::new(id, capabilities),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListModelsResponse {
    #[serde(default)]
    pub(crate) models: Vec<ModelDefinition>,

    pub(crate) next_page_token: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[default]
    Model,
}

impl From<crate::api::Role> for Role {
    fn from(value: crate::api::Role) -> Self {
        match value {
            crate::api::Role::Assistant => Role::Model,
            crate::api::Role::User => Role::User,
        }
    }
}

impl From<Role> for crate::api::Role {
    fn from(value: Role) -> Self {
        match value {
            Role::User => crate::api::Role::User,
            Role::Model => crate::api::Role::Assistant,
        }
    }
}

/// Gemini inline data for images and documents
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InlineData {
    pub(crate) mime_type: String,
    pub(crate) data: String, // base64-encoded
}

/// One part of a Gemini content. Unknown part kinds deserialize with every
/// field empty and are ignored.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) thought: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) inline_data: Option<InlineData>,
}

impl Part {
    pub fn new_text(text: String) -> Self {
        Part {
            text: Some(text),
            ..Part::default()
        }
    }

    pub fn new_inline(mime_type: String, data: String) -> Self {
        Part {
            inline_data: Some(InlineData { mime_type, data }),
            ..Part::default()
        }
    }
}

impl From<&Part> for Option<crate::api::ContentBlock> {
    fn from(part: &Part) -> Self {
        if part.thought == Some(true) {
            return None;
        }
        if let Some(text) = &part.text {
            return Some(crate::api::ContentBlock::text(text.clone()));
        }
        part.inline_data
            .as_ref()
            .map(|data| crate::api::ContentBlock::inline(data.data.clone(), data.mime_type.clone(), None))
    }
}

/// Text only when non-empty, inline data as-is
fn content_block_to_part(block: &crate::api::ContentBlock) -> Option<Part> {
    match block {
        crate::api::ContentBlock::Text { text } if text.is_empty() => None,
        crate::api::ContentBlock::Text { text } => Some(Part::new_text(text.clone())),
        crate::api::ContentBlock::Image { data, mime_type }
        | crate::api::ContentBlock::File { data, mime_type, .. } => {
            Some(Part::new_inline(mime_type.clone(), data.clone()))
        }
    }
}

// Gemini representation of messages.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub(crate) struct Content {
    #[serde(default)]
    pub(crate) role: Role,
    #[serde(default)]
    pub(crate) parts: Vec<Part>,
}

impl Content {
    fn to_payload(&self) -> ChatPayload {
        ChatPayload::new(
            self.parts
                .iter()
                .filter_map(|p| Option::<crate::api::ContentBlock>::from(p))
                .collect(),
        )
    }
}

impl From<&crate::ChatMessage> for Content {
    fn from(msg: &crate::ChatMessage) -> Self {
        Content {
            role: msg.role.into(),
            parts: msg.payload.content.iter().filter_map(content_block_to_part).collect(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub(crate) struct GoogleSearch {}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Tool {
    pub(crate) google_search: GoogleSearch,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) temperature: Option<f32>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentRequest {
    pub(crate) contents: Vec<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) tools: Option<Vec<Tool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) system_instruction: Option<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) generation_config: Option<GenerationConfig>,
}

impl From<&ChatRequest> for GenerateContentRequest {
    fn from(request: &ChatRequest) -> Self {
        let system_instruction = request.system_instruction.as_ref().map(|instruction| Content {
            role: Role::User, // Role is ignored for system instructions
            parts: vec![Part::new_text(instruction.clone())],
        });

        // Entries without any part (e.g. an aborted empty reply) are rejected upstream
        let contents = request
            .messages
            .iter()
            .map(Content::from)
            .filter(|c| !c.parts.is_empty())
            .collect();

        let tools = request.enable_search.then(|| {
            vec![Tool {
                google_search: GoogleSearch {},
            }]
        });

        let generation_config = request.temperature.map(|temperature| GenerationConfig {
            temperature: Some(temperature),
        });

        GenerateContentRequest {
            contents,
            tools,
            system_instruction,
            generation_config,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub(crate) struct WebSource {
    pub(crate) uri: Option<String>,
    pub(crate) title: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub(crate) struct GroundingChunk {
    pub(crate) web: Option<WebSource>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GroundingMetadata {
    #[serde(default)]
    pub(crate) grounding_chunks: Vec<GroundingChunk>,
}

impl GroundingMetadata {
    fn sources(&self) -> Vec<Source> {
        self.grounding_chunks
            .iter()
            .filter_map(|chunk| chunk.web.as_ref())
            .filter_map(|web| {
                let uri = web.uri.clone().filter(|u| !u.is_empty())?;
                let title = web.title.clone().filter(|t| !t.is_empty()).unwrap_or_else(|| uri.clone());
                Some(Source { uri, title })
            })
            .collect()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Candidate {
    #[serde(default)]
    pub(crate) content: Option<Content>,

    pub(crate) finish_reason: Option<String>,

    pub(crate) grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptFeedback {
    pub(crate) block_reason: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    pub(crate) candidates: Vec<Candidate>,

    pub(crate) prompt_feedback: Option<PromptFeedback>,
}

impl TryFrom<GenerateContentResponse> for crate::ChatChunk {
    type Error = GenerationError;

    fn try_from(response: GenerateContentResponse) -> Result<Self, Self::Error> {
        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            tracing::warn!(%reason, "Prompt blocked by backend");
            return Err(GenerationError::SafetyBlocked);
        }

        let Some(candidate) = response.candidates.into_iter().next() else {
            return Ok(crate::ChatChunk::assistant(ChatPayload::default()));
        };

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(GenerationError::SafetyBlocked);
        }

        let payload = candidate
            .content
            .as_ref()
            .map(Content::to_payload)
            .unwrap_or_default();
        let sources = candidate
            .grounding_metadata
            .as_ref()
            .map(GroundingMetadata::sources)
            .unwrap_or_default();

        Ok(crate::ChatChunk::assistant(payload).with_sources(sources))
    }
}

impl TryFrom<GenerateContentResponse> for crate::ChatMessage {
    type Error = GenerationError;

    fn try_from(response: GenerateContentResponse) -> Result<Self, Self::Error> {
        crate::ChatChunk::try_from(response).map(Into::into)
    }
}
