use super::chat::api::ListModelsResponse;
use super::chat::model::GeminiChatModel;
use crate::client::Client;
use crate::{GenerationError, ModelProvider};
use async_trait::async_trait;
use reqwest::header::{self, HeaderValue};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const API_VERSION: &str = "v1beta";

pub struct GeminiProvider {
    client: Client,
    base_url: String,
}

impl GeminiProvider {
    pub fn default(api_key: &str) -> Result<Self, GenerationError> {
        Self::new(DEFAULT_BASE_URL, api_key)
    }

    /// Create a provider with a custom base URL (e.g., for proxying).
    /// The API version path (/v1beta) is automatically appended.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, GenerationError> {
        // A key that cannot be sent as a header is as good as no key
        let mut key = HeaderValue::from_str(api_key).map_err(|_| GenerationError::AuthMissing)?;
        key.set_sensitive(true);

        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-goog-api-key", key);

        let base_url = base_url.trim_end_matches('/');
        Ok(GeminiProvider {
            client: Client::with_headers(headers)?,
            base_url: format!("{}/{}", base_url, API_VERSION),
        })
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    type ModelType = GeminiChatModel;

    async fn list_models(&self) -> Result<Vec<crate::ModelDefinition>, GenerationError> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let url = match &page_token {
                Some(token) => format!("{}/models?pageToken={}", self.base_url, token),
                None => format!("{}/models", self.base_url),
            };
            let response: ListModelsResponse = self.client.get(&url).await?;
            models.extend(
                response
                    .models
                    .into_iter()
                    .map(crate::ModelDefinition::from)
                    .filter(|m| m.has_capability(&crate::ModelCapability::Text)),
            );

            match response.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(models)
    }

    fn create_chat_model(&self, model_name: &str) -> GeminiChatModel {
        GeminiChatModel::new(
            self.client.clone(),
            self.base_url.clone(),
            model_name.to_string(),
        )
    }
}
