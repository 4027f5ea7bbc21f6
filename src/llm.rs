//! LLM invocation seam.

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, ResponseFormat,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::error::{ReferatError, Result};

/// Chat completion backend used by the stage runner.
///
/// One operation: send a system+user prompt pair to a named model and get
/// the raw response text back. Stages never talk to the API directly, which
/// keeps them testable with scripted responses.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, model: &str, system: &str, user: &str) -> Result<String>;
}

/// OpenAI-backed chat model. Requests JSON object responses since every
/// stage expects a structured reply.
pub struct OpenAiChat {
    client: Client<OpenAIConfig>,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(client: Client<OpenAIConfig>, temperature: f32) -> Self {
        Self {
            client,
            temperature,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, model: &str, system: &str, user: &str) -> Result<String> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(|e| ReferatError::LlmCall(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(|e| ReferatError::LlmCall(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .temperature(self.temperature)
            .response_format(ResponseFormat::JsonObject)
            .build()
            .map_err(|e| ReferatError::LlmCall(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| ReferatError::LlmCall(e.to_string()))?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .cloned()
            .ok_or_else(|| ReferatError::LlmCall("empty response".to_string()))
    }
}
