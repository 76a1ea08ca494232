//! Text-generation client.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, ResponseFormat,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::config::ServiceConfig;
use crate::error::ConvergenceError;

/// One request to the text-generation service.
#[derive(Debug, Clone)]
pub struct ChatPrompt {
    pub system: String,
    pub user: String,
}

/// A service that answers a single-turn chat request.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Returns the raw reply text. `credential` overrides the client's
    /// default key when present.
    async fn complete(
        &self,
        prompt: &ChatPrompt,
        credential: Option<&str>,
    ) -> Result<String, ConvergenceError>;
}

/// [`TextGenerator`] backed by an OpenAI-compatible chat completions API.
pub struct OpenAiTextGenerator {
    http_client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    json_replies: bool,
}

impl OpenAiTextGenerator {
    pub fn new(service: &ServiceConfig, api_key: impl Into<String>) -> Result<Self, ConvergenceError> {
        let http_client = build_http_client(service)?;

        Ok(Self {
            http_client,
            api_base: service.api_base.clone(),
            api_key: api_key.into(),
            model: service.transcript_model.clone(),
            json_replies: service.json_replies,
        })
    }

    fn build_request(
        &self,
        prompt: &ChatPrompt,
    ) -> Result<CreateChatCompletionRequest, ConvergenceError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: prompt.system.clone().into(),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: prompt.user.clone().into(),
                name: None,
            }),
        ];

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(messages);
        if self.json_replies {
            args.response_format(ResponseFormat::JsonObject);
        }

        Ok(args.build()?)
    }
}

/// HTTP client shared by the service clients.
pub(crate) fn build_http_client(service: &ServiceConfig) -> Result<reqwest::Client, ConvergenceError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(service.request_timeout_secs))
        .connect_timeout(Duration::from_secs(service.connect_timeout_secs))
        .build()
        .map_err(|e| ConvergenceError::ConfigError(format!("Failed to create HTTP client: {}", e)))
}

#[async_trait]
impl TextGenerator for OpenAiTextGenerator {
    async fn complete(
        &self,
        prompt: &ChatPrompt,
        credential: Option<&str>,
    ) -> Result<String, ConvergenceError> {
        let config = OpenAIConfig::new()
            .with_api_key(credential.unwrap_or(&self.api_key))
            .with_api_base(&self.api_base);

        let client = Client::with_config(config).with_http_client(self.http_client.clone());

        let request = self.build_request(prompt)?;
        let response = client.chat().create(request).await?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        debug!(model = %self.model, chars = content.len(), "chat completion received");
        Ok(content)
    }
}
