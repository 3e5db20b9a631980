use super::prompts::{SYSTEM_PROMPT, recovery_prompt, transform_prompt, validation_prompt};
use super::{Planner, RecoveryRequest, TransformRequest, ValidationRequest};
use crate::config::LlmConfig;
use crate::error::{DatamuleError, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use secrecy::{ExposeSecret as _, SecretString};

/// Plans with an OpenAI chat model.
pub struct LlmPlanner {
    client: Client<OpenAIConfig>,
    config: LlmConfig,
}

impl LlmPlanner {
    pub fn new(api_key: &SecretString, config: LlmConfig) -> Self {
        let openai_config = OpenAIConfig::new().with_api_key(api_key.expose_secret());
        Self {
            client: Client::with_config(openai_config),
            config,
        }
    }

    /// Read the key from `OPENAI_API_KEY`.
    pub fn from_env(config: LlmConfig) -> Result<Self> {
        let key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| DatamuleError::Config("OPENAI_API_KEY is not set".to_owned()))?;
        Ok(Self::new(&SecretString::from(key), config))
    }

    async fn complete(&self, prompt: String) -> Result<String> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_PROMPT)
                .build()
                .map_err(planner_error)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(planner_error)?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.model)
            .messages(messages)
            .temperature(self.config.temperature)
            .max_tokens(self.config.max_tokens)
            .build()
            .map_err(planner_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| DatamuleError::Planner(format!("OpenAI API error: {e}")))?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| DatamuleError::Planner("No response content received".to_owned()))
    }
}

fn planner_error(err: impl std::fmt::Display) -> DatamuleError {
    DatamuleError::Planner(format!("Failed to build chat request: {err}"))
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan_transform(&self, request: &TransformRequest<'_>) -> Result<String> {
        self.complete(transform_prompt(request)).await
    }

    async fn plan_validation(&self, request: &ValidationRequest<'_>) -> Result<String> {
        self.complete(validation_prompt(request)).await
    }

    async fn recover(&self, request: &RecoveryRequest<'_>) -> Result<String> {
        self.complete(recovery_prompt(request)).await
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}
