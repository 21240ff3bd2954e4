pub(crate) mod chat;
mod generation;
mod provider;

pub use chat::model::GeminiChatModel;
pub use generation::GeminiGenerationClient;
pub use provider::GeminiProvider;
