use llm::{ChatMessage, Source};

use crate::message::{ImageState, Message, MessageId};

/// Ordered conversation entries.
///
/// Append-only apart from in-place updates to a streaming model entry and
/// the edit truncation in [`ConversationLog::discard_last_exchange`].
#[derive(Clone, Debug, Default)]
pub struct ConversationLog {
    messages: Vec<Message>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) -> MessageId {
        let id = message.id;
        self.messages.push(message);
        id
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn find(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.id == id)
    }

    fn find_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    /// Backend history of every entry, oldest first
    pub fn history(&self) -> Vec<ChatMessage> {
        self.messages.iter().map(Message::to_chat_message).collect()
    }

    /// Drop the last user/model pair ahead of an edited resend
    pub fn discard_last_exchange(&mut self) {
        let keep = self.messages.len().saturating_sub(2);
        self.messages.truncate(keep);
    }

    /// Append streamed text. Refused unless the entry is a streaming model entry.
    pub fn append_chunk(&mut self, id: MessageId, delta: &str) -> Option<&Message> {
        let message = self.find_mut(id)?;
        if !message.is_model() || !message.is_streaming {
            return None;
        }
        message.content.push_str(delta);
        Some(message)
    }

    /// Close a stream successfully with the authoritative text and citations
    pub fn finalize(&mut self, id: MessageId, text: String, sources: Vec<Source>) -> bool {
        match self.find_mut(id) {
            Some(message) if message.is_streaming => {
                message.content = text;
                message.sources = sources;
                message.is_streaming = false;
                true
            }
            _ => false,
        }
    }

    pub fn mark_error(&mut self, id: MessageId, text: String) -> bool {
        match self.find_mut(id) {
            Some(message) if message.is_streaming => {
                message.content = text;
                message.is_error = true;
                message.is_streaming = false;
                true
            }
            _ => false,
        }
    }

    /// Stop streaming, keeping whatever content arrived
    pub fn stop_streaming(&mut self, id: MessageId) -> bool {
        match self.find_mut(id) {
            Some(message) if message.is_streaming => {
                message.is_streaming = false;
                true
            }
            _ => false,
        }
    }

    /// Reserve the single image attempt for a message. Only the first caller wins.
    pub fn claim_image(&mut self, id: MessageId) -> bool {
        match self.find_mut(id) {
            Some(message) if message.image == ImageState::None => {
                message.image = ImageState::Pending;
                true
            }
            _ => false,
        }
    }

    /// Resolve a pending image attempt without touching text, sources or flags
    pub fn merge_image(&mut self, id: MessageId, result: Option<String>) -> bool {
        match self.find_mut(id) {
            Some(message) if message.image == ImageState::Pending => {
                message.image = match result {
                    Some(uri) => ImageState::Ready(vec![uri]),
                    None => ImageState::Failed,
                };
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
