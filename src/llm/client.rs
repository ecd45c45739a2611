use crate::llm::message::ChatMessage;
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        CreateChatCompletionRequestArgs, CreateImageRequestArgs, Image, ImageModel, ImageQuality,
        ImageResponseFormat, ImageSize,
    },
    Client,
};
use async_trait::async_trait;
use base64::Engine as _;
use thiserror::Error;
use tracing::debug;

/// Provider error code for prompts refused by the safety system.
const CONTENT_POLICY_CODE: &str = "content_policy_violation";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Content rejected by provider policy: {0}")]
    ContentPolicy(String),

    #[error("{0}")]
    Api(String),

    #[error("No response from the model")]
    EmptyResponse,

    #[error("Invalid image payload: {0}")]
    InvalidImage(#[from] base64::DecodeError),

    #[error("Request failed: {0}")]
    Transport(String),
}

impl From<OpenAIError> for LlmError {
    fn from(err: OpenAIError) -> Self {
        match err {
            OpenAIError::ApiError(api) => {
                if api.code.as_deref() == Some(CONTENT_POLICY_CODE) {
                    LlmError::ContentPolicy(api.message)
                } else {
                    LlmError::Api(api.message)
                }
            }
            other => LlmError::Transport(other.to_string()),
        }
    }
}

/// Sampling knobs for one completion request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompletionOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Completion and image generation as consumed by the chat service.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<String, LlmError>;

    /// Returns the decoded image bytes.
    async fn generate_image(
        &self,
        prompt: &str,
        size: ImageSize,
        quality: ImageQuality,
    ) -> Result<Vec<u8>, LlmError>;
}

/// Connection settings for one OpenAI-compatible endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub api_key: String,
    pub api_base: Option<String>,
    pub organization: Option<String>,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("organization", &self.organization)
            .finish()
    }
}

pub struct LlmClient {
    client: Client<OpenAIConfig>,
    image_model: String,
}

impl LlmClient {
    pub fn new(settings: &ProviderSettings, http_client: reqwest::Client, image_model: &str) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(&settings.api_key);

        if let Some(base) = &settings.api_base {
            config = config.with_api_base(base);
        }
        if let Some(org) = &settings.organization {
            config = config.with_org_id(org);
        }

        Self {
            client: Client::with_config(config).with_http_client(http_client),
            image_model: image_model.to_string(),
        }
    }

    fn image_model(&self) -> ImageModel {
        match self.image_model.as_str() {
            "dall-e-2" => ImageModel::DallE2,
            "dall-e-3" => ImageModel::DallE3,
            other => ImageModel::Other(other.to_string()),
        }
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<String, LlmError> {
        let messages = messages
            .iter()
            .map(ChatMessage::to_request)
            .collect::<Result<Vec<_>, _>>()?;

        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(model).messages(messages);
        if let Some(max) = options.max_tokens {
            request.max_completion_tokens(max);
        }
        if let Some(temperature) = options.temperature {
            request.temperature(temperature);
        }
        let request = request.build()?;

        debug!("Sending chat completion request to {}", model);
        let response = self.client.chat().create(request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(LlmError::EmptyResponse)
    }

    async fn generate_image(
        &self,
        prompt: &str,
        size: ImageSize,
        quality: ImageQuality,
    ) -> Result<Vec<u8>, LlmError> {
        let request = CreateImageRequestArgs::default()
            .prompt(prompt)
            .model(self.image_model())
            .n(1)
            .size(size)
            .quality(quality)
            .response_format(ImageResponseFormat::B64Json)
            .build()?;

        debug!("Sending image request to {}", self.image_model);
        let response = self.client.images().create(request).await?;

        let encoded = response
            .data
            .iter()
            .find_map(|image| match image.as_ref() {
                Image::B64Json { b64_json, .. } => Some(b64_json.clone()),
                _ => None,
            })
            .ok_or(LlmError::EmptyResponse)?;

        Ok(base64::engine::general_purpose::STANDARD.decode(encoded.as_bytes())?)
    }
}
