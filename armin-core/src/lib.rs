//! Conversation core for the Armin educational chat client
//!
//! This crate provides:
//! - **Engine**: `ConversationEngine`, the single-flight send/stream/cancel state machine
//! - **Log**: `Message`, `ConversationLog` with streaming and auto-image invariants
//! - **Markers**: code fence and `<<GENERATE_IMAGE: …>>` directive parsing
//! - **Attachments**: size-checked base64 encoding of user files
//! - **Personas**: the built-in catalog of system prompts and themes
//! - **Side surfaces**: notices, file/image studio, export, speech input
//!
//! # Example
//!
//! ```ignore
//! use armin_core::{ConversationEngine, PersonaCatalog};
//!
//! let engine = ConversationEngine::new(client, settings.subscribe(), PersonaCatalog::builtin());
//! let outcome = engine.send("Explain photosynthesis").await;
//! ```
pub mod attachment;
pub mod conversation;
pub mod engine;
pub mod export;
pub mod markers;
pub mod message;
pub mod notify;
pub mod persona;
pub mod speech;
pub mod studio;

pub use attachment::{AttachmentError, FileInput, MAX_ATTACHMENT_BYTES};
pub use conversation::ConversationLog;
pub use engine::{
    ConversationEngine, Draft, EngineEvent, EngineOptions, Phase, RejectReason, SendOutcome,
};
pub use export::{ExportArtifact, ExportFormat};
pub use markers::{Segment, detect_image_directive, segment};
pub use message::{Attachment, AttachmentKind, ImageState, Message, MessageId, MessageRole};
pub use notify::{Notice, NoticeKind, NotificationRelay};
pub use persona::{Persona, PersonaCatalog, PersonaError, Theme};
pub use speech::{SpeechError, SpeechRecognizer, UnavailableRecognizer};
