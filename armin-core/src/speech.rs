use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpeechError {
    #[error("Speech recognition is not available on this system.")]
    Unavailable,
    #[error("Speech recognition failed: {0}")]
    Capture(String),
}

/// Voice input provided by the host environment.
///
/// One call captures a single utterance and returns its final transcript.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn transcribe_once(&self) -> Result<String, SpeechError>;
}

/// Recognizer for hosts without voice capture
pub struct UnavailableRecognizer;

#[async_trait]
impl SpeechRecognizer for UnavailableRecognizer {
    async fn transcribe_once(&self) -> Result<String, SpeechError> {
        Err(SpeechError::Unavailable)
    }
}
