use super::api::{GenerateContentRequest, GenerateContentResponse};
use crate::client::Client;
use crate::traffic_log;
use crate::{ChatChunk, ChatMessage, ChatModel, ChatRequest, ChatStream, GenerationError};
use async_trait::async_trait;
use futures::StreamExt;

pub struct GeminiChatModel {
    client: Client,
    base_url: String,
    model_name: String,
}

impl GeminiChatModel {
    pub fn new(client: Client, base_url: String, model_name: String) -> Self {
        GeminiChatModel {
            client,
            base_url,
            model_name,
        }
    }

    fn endpoint(&self, method: &str) -> String {
        let model = self.model_name.strip_prefix("models/").unwrap_or(&self.model_name);
        format!("{}/models/{}:{}", self.base_url, model, method)
    }
}

#[async_trait]
impl ChatModel for GeminiChatModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatMessage, GenerationError> {
        let url = self.endpoint("generateContent");

        let api_request = GenerateContentRequest::from(request);
        traffic_log::log_request(&self.model_name, &api_request);

        let response: GenerateContentResponse = match self.client.post(url, &api_request).await {
            Ok(response) => response,
            Err(e) => {
                traffic_log::log_error(&self.model_name, &e.to_string());
                return Err(e);
            }
        };
        traffic_log::log_response(&self.model_name, &response);
        ChatMessage::try_from(response)
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatStream, GenerationError> {
        let url = self.endpoint("streamGenerateContent?alt=sse");

        let api_request = GenerateContentRequest::from(request);
        traffic_log::log_stream_start(&self.model_name, &api_request);

        let model_name = self.model_name.clone();
        let streamed_response = self
            .client
            .post_stream(url, &api_request, |line: &str| line.strip_prefix("data: "))
            .await
            .inspect_err(|e| traffic_log::log_error(&model_name, &e.to_string()))?;

        Ok(Box::pin(streamed_response.map(
            move |chunk: Result<GenerateContentResponse, GenerationError>| {
                chunk.and_then(ChatChunk::try_from).inspect_err(|e| {
                    traffic_log::log_error(&model_name, &e.to_string());
                })
            },
        )))
    }
}
