//! Conversation entries and the attachments users send with them

use chrono::{DateTime, Utc};
use llm::{ChatMessage, ChatPayload, ContentBlock, Role, Source};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static LAST_ID: AtomicU64 = AtomicU64::new(0);

/// Creation-time millisecond id, strictly increasing within the process
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    pub fn next() -> Self {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let previous = LAST_ID
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        MessageId(now.max(previous + 1))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Model,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

impl AttachmentKind {
    pub fn for_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("image/") {
            AttachmentKind::Image
        } else {
            AttachmentKind::File
        }
    }
}

/// Encoded user upload, immutable once created
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub mime_type: String,
    /// Base64 without any data-URI prefix
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Attachment {
    pub fn to_content_block(&self) -> ContentBlock {
        match self.kind {
            AttachmentKind::Image => ContentBlock::Image {
                data: self.data.clone(),
                mime_type: self.mime_type.clone(),
            },
            AttachmentKind::File => ContentBlock::File {
                data: self.data.clone(),
                mime_type: self.mime_type.clone(),
                name: self.name.clone(),
            },
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.mime_type)
    }
}

/// Progress of the auto-image side effect for one message.
///
/// Only `None -> Pending` dispatches a request, and `Pending` resolves
/// exactly once, so `images` and `imageError` can never both be set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ImageState {
    #[default]
    None,
    Pending,
    Ready(Vec<String>),
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
    pub(crate) image: ImageState,
    pub sources: Vec<Source>,
    pub is_streaming: bool,
    pub is_error: bool,
}

impl Message {
    fn new(role: MessageRole, content: String) -> Self {
        Self {
            id: MessageId::next(),
            role,
            content,
            timestamp: Utc::now(),
            attachments: Vec::new(),
            image: ImageState::None,
            sources: Vec::new(),
            is_streaming: false,
            is_error: false,
        }
    }

    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            attachments,
            ..Self::new(MessageRole::User, content.into())
        }
    }

    /// Empty model entry that receives streamed text
    pub fn placeholder() -> Self {
        Self {
            is_streaming: true,
            ..Self::new(MessageRole::Model, String::new())
        }
    }

    /// Complete model entry, never streamed
    pub fn model(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Model, content.into())
    }

    pub fn is_model(&self) -> bool {
        self.role == MessageRole::Model
    }

    pub fn images(&self) -> &[String] {
        match &self.image {
            ImageState::Ready(images) => images,
            _ => &[],
        }
    }

    pub fn image_error(&self) -> bool {
        self.image == ImageState::Failed
    }

    pub fn image_pending(&self) -> bool {
        self.image == ImageState::Pending
    }

    pub fn image_state(&self) -> &ImageState {
        &self.image
    }

    /// Backend view: text first (when non-empty), then attachments in order
    pub fn to_chat_message(&self) -> ChatMessage {
        let mut content = Vec::with_capacity(self.attachments.len() + 1);
        if !self.content.is_empty() {
            content.push(ContentBlock::text(self.content.clone()));
        }
        content.extend(self.attachments.iter().map(Attachment::to_content_block));

        let role = match self.role {
            MessageRole::User => Role::User,
            MessageRole::Model => Role::Assistant,
        };
        ChatMessage::new(role, ChatPayload::new(content))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageRepr<'a> {
    id: MessageId,
    role: MessageRole,
    content: &'a str,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "<[Attachment]>::is_empty")]
    attachments: &'a [Attachment],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    images: &'a [String],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    image_error: bool,
    #[serde(skip_serializing_if = "<[Source]>::is_empty")]
    sources: &'a [Source],
    is_streaming: bool,
    is_error: bool,
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        MessageRepr {
            id: self.id,
            role: self.role,
            content: &self.content,
            timestamp: self.timestamp,
            attachments: &self.attachments,
            images: self.images(),
            image_error: self.image_error(),
            sources: &self.sources,
            is_streaming: self.is_streaming,
            is_error: self.is_error,
        }
        .serialize(serializer)
    }
}
