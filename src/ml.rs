//! OpenAI-backed classification provider, available behind the `ml` feature

use async_openai::config::OpenAIConfig;
use async_openai::types::{ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs};
use async_openai::Client;
use async_trait::async_trait;

use crate::error::{Result, TriageError};
use crate::provider::ClassificationProvider;

/// Chat-completions backend. Reads the API key from the environment the way
/// the `async-openai` client does by default.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
        }
    }

    pub fn with_client(client: Client<OpenAIConfig>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ClassificationProvider for OpenAiProvider {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| TriageError::Classification(e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages([message.into()])
            .build()
            .map_err(|e| TriageError::Classification(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| TriageError::Classification(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| TriageError::Classification("empty completion".to_string()))
    }
}
