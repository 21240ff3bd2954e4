pub(crate) mod gemini;

pub use gemini::{GeminiChatModel, GeminiGenerationClient, GeminiProvider};
