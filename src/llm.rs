//! Chat completion client

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::config::OpenAiConfig;
use crate::{Result, TravelChatError};

const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

/// Sends a conversation to a chat model and returns the reply text.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Chat model backed by the OpenAI chat completions API
pub struct OpenAiChatModel {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| TravelChatError::Config("OPENAI_API_KEY is not set".to_string()))?;

        let mut openai = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base_url) = &config.base_url {
            openai = openai.with_api_base(base_url);
        }

        Ok(Self {
            client: Client::with_config(openai),
            model: config.chat_model.clone(),
            temperature: DEFAULT_TEMPERATURE,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
        let content = message.content.as_str();
        Ok(match message.role {
            ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(content)
                .build()?
                .into(),
            ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
                .content(content)
                .build()?
                .into(),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    #[instrument(level = "debug", skip(self, messages), fields(model = %self.model, messages = messages.len()))]
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request_messages = messages
            .iter()
            .map(Self::to_request_message)
            .collect::<Result<Vec<_>>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .temperature(self.temperature)
            .messages(request_messages)
            .build()?;

        let start_time = std::time::Instant::now();
        let response = self.client.chat().create(request).await?;
        info!(
            duration_ms = start_time.elapsed().as_millis(),
            choices = response.choices.len(),
            "Chat completion received"
        );

        let answer = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        debug!(answer_length = answer.len(), "Chat completion text extracted");

        Ok(answer.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_model_requires_api_key() {
        let result = OpenAiChatModel::new(&OpenAiConfig::default());
        assert!(matches!(result, Err(TravelChatError::Config(_))));
    }

    #[test]
    fn test_chat_model_creation() {
        let config = OpenAiConfig {
            api_key: Some("sk-test".to_string()),
            base_url: Some("http://localhost:1234/v1".to_string()),
            ..OpenAiConfig::default()
        };
        let model = OpenAiChatModel::new(&config).unwrap().with_temperature(0.0);
        assert_eq!(model.model, "gpt-3.5-turbo");
        assert_eq!(model.temperature, 0.0);
    }

    #[test]
    fn test_message_conversion() {
        for message in [ChatMessage::system("context"), ChatMessage::user("question")] {
            assert!(OpenAiChatModel::to_request_message(&message).is_ok());
        }
    }
}
