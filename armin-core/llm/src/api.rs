use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[default]
    Assistant,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        mime_type: String,
    },
    /// Any non-image document sent inline (PDF, plain text, ...)
    File {
        data: String,
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Inline binary content, classified as image or file by mime type
    pub fn inline(data: impl Into<String>, mime_type: impl Into<String>, name: Option<String>) -> Self {
        let mime_type = mime_type.into();
        if mime_type.starts_with("image/") {
            ContentBlock::Image {
                data: data.into(),
                mime_type,
            }
        } else {
            ContentBlock::File {
                data: data.into(),
                mime_type,
                name,
            }
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Default)]
pub struct ChatPayload {
    pub content: Vec<ContentBlock>,
}

impl From<&String> for ChatPayload {
    fn from(text: &String) -> Self {
        ChatPayload::text(text)
    }
}

impl From<String> for ChatPayload {
    fn from(text: String) -> Self {
        ChatPayload::text(text)
    }
}

impl From<&str> for ChatPayload {
    fn from(text: &str) -> Self {
        ChatPayload::text(text)
    }
}

impl ChatPayload {
    pub fn new(content: Vec<ContentBlock>) -> Self {
        ChatPayload { content }
    }

    pub fn text(text: impl Into<String>) -> Self {
        ChatPayload {
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.iter().all(|block| match block {
            ContentBlock::Text { text } => text.is_empty(),
            _ => false,
        })
    }

    pub fn get_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Get images from this payload as (data, mime_type)
    pub fn get_images(&self) -> Vec<(&str, &str)> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Image { data, mime_type } => Some((data.as_str(), mime_type.as_str())),
                _ => None,
            })
            .collect()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Default)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: Role,
    #[serde(flatten)]
    pub payload: ChatPayload,
}

impl ChatMessage {
    pub fn new(role: Role, payload: ChatPayload) -> Self {
        Self { role, payload }
    }

    pub fn user(payload: ChatPayload) -> Self {
        Self::new(Role::User, payload)
    }

    pub fn assistant(payload: ChatPayload) -> Self {
        Self::new(Role::Assistant, payload)
    }

    pub fn get_text(&self) -> String {
        self.payload.get_text()
    }
}

/// Grounding citation returned with search-augmented answers
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Source {
    pub uri: String,
    pub title: String,
}

impl Source {
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: title.into(),
        }
    }
}

/// Deduplicate citations by uri, keeping the first occurrence in order.
pub fn dedup_sources(sources: impl IntoIterator<Item = Source>) -> Vec<Source> {
    let mut seen = std::collections::HashSet::new();
    sources
        .into_iter()
        .filter(|source| seen.insert(source.uri.clone()))
        .collect()
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ChatChunk {
    pub role: Role,
    #[serde(flatten)]
    pub payload: ChatPayload,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
}

impl ChatChunk {
    pub fn new(role: Role, payload: ChatPayload) -> Self {
        Self {
            role,
            payload,
            sources: Vec::new(),
        }
    }

    pub fn assistant(payload: ChatPayload) -> Self {
        Self::new(Role::Assistant, payload)
    }

    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = sources;
        self
    }

    pub fn get_text(&self) -> String {
        self.payload.get_text()
    }
}

impl From<ChatChunk> for ChatMessage {
    fn from(chunk: ChatChunk) -> Self {
        ChatMessage {
            role: chunk.role,
            payload: chunk.payload,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChatRequest {
    pub(crate) messages: Vec<ChatMessage>,
    pub(crate) system_instruction: Option<String>,
    pub(crate) temperature: Option<f32>,
    pub(crate) enable_search: bool,
}

impl ChatRequest {
    /// Create a new chat request from an iterator of message references
    ///
    /// Messages are cloned only once when constructing the request.
    pub fn new<'a>(messages: impl IntoIterator<Item = &'a ChatMessage>) -> Self {
        ChatRequest {
            messages: messages.into_iter().cloned().collect(),
            system_instruction: None,
            temperature: None,
            enable_search: false,
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        let instruction = instruction.into();
        self.system_instruction = (!instruction.trim().is_empty()).then_some(instruction);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_search(mut self, enabled: bool) -> Self {
        self.enable_search = enabled;
        self
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_payload_text() {
        let payload = ChatPayload::text("Hello, world!");
        assert_eq!(payload.get_text(), "Hello, world!");
        assert_eq!(payload.content.len(), 1);
        assert!(matches!(payload.content[0], ContentBlock::Text { .. }));
    }

    #[test]
    fn test_chat_payload_multiple_text_blocks() {
        let payload = ChatPayload::new(vec![ContentBlock::text("First "), ContentBlock::text("Second")]);
        assert_eq!(payload.get_text(), "First Second");
    }

    #[test]
    fn test_payload_is_empty() {
        assert!(ChatPayload::text("").is_empty());
        assert!(ChatPayload::default().is_empty());
        assert!(!ChatPayload::new(vec![ContentBlock::inline("AAAA", "image/png", None)]).is_empty());
    }

    #[test]
    fn test_inline_classifies_by_mime() {
        assert!(matches!(
            ContentBlock::inline("AAAA", "image/jpeg", None),
            ContentBlock::Image { .. }
        ));
        let file = ContentBlock::inline("AAAA", "application/pdf", Some("notes.pdf".into()));
        assert!(matches!(file, ContentBlock::File { ref name, .. } if name.as_deref() == Some("notes.pdf")));
    }

    #[test]
    fn test_chat_message_constructors() {
        let payload = ChatPayload::text("Test");

        let user_msg = ChatMessage::user(payload.clone());
        assert_eq!(user_msg.role, Role::User);
        assert_eq!(user_msg.get_text(), "Test");

        let assistant_msg = ChatMessage::assistant(payload);
        assert_eq!(assistant_msg.role, Role::Assistant);
    }

    #[test]
    fn test_dedup_sources_first_wins() {
        let sources = vec![
            Source::new("a", "X"),
            Source::new("a", "Y"),
            Source::new("b", "Z"),
        ];
        assert_eq!(
            dedup_sources(sources),
            vec![Source::new("a", "X"), Source::new("b", "Z")]
        );
    }

    #[test]
    fn test_chat_request_builder() {
        let messages = vec![ChatMessage::user(ChatPayload::text("Hello"))];
        let request = ChatRequest::new(&messages)
            .with_system_instruction("Be brief")
            .with_temperature(0.5)
            .with_search(true);

        assert_eq!(request.messages().len(), 1);
        assert_eq!(request.system_instruction(), Some("Be brief"));
        assert_eq!(request.temperature, Some(0.5));
        assert!(request.enable_search);
    }

    #[test]
    fn test_blank_system_instruction_is_dropped() {
        let messages: Vec<ChatMessage> = Vec::new();
        let request = ChatRequest::new(&messages).with_system_instruction("   ");
        assert!(request.system_instruction().is_none());
    }

    #[test]
    fn test_content_block_serialization() {
        let json = serde_json::to_string(&ContentBlock::text("Hello")).unwrap();
        assert!(json.contains("\"type\":\"text\""));
        assert!(json.contains("\"text\":\"Hello\""));
    }
}
