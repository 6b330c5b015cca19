//! Generation client for the two external backends: image style transfer and text completion.
//!
//! Each call is a single request/response with no retry; failures are returned to the caller as
//! `GenerationError`.

mod image;
mod text;

pub use self::image::{
    decode_artifact, encode_artifact, ImageBackendClient, ImageGenerationRequest, MediaInfo,
    MediaProfiles, RequestParameter, OUTPUT_FORMAT,
};
pub use self::text::{
    ChatCompletionRequest, ChatCompletionResponse, ChatTurn, SamplingParams, TextBackendClient,
};

use crate::config::{Config, Credentials};
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Connection-level failure talking to a backend. The request URL is stripped since the
    /// image backend carries credentials in the query string.
    #[error(transparent)]
    Transport(reqwest::Error),
    #[error("invalid response format: {0}")]
    Format(String),
    #[error("invalid artifact encoding: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("error getting response from text backend{}", detail_suffix(.0))]
    EmptyChoices(Option<String>),
    #[error("source image is empty")]
    EmptySource,
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        GenerationError::Transport(e.without_url())
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|d| format!(": {}", d))
        .unwrap_or_default()
}

/// The two generation operations handlers depend on.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate_image(&self, source: &[u8]) -> Result<Vec<u8>, GenerationError>;
    async fn generate_text(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// HTTP implementation backed by the configured image and text backends.
#[derive(Clone)]
pub struct GenerationClient {
    image: ImageBackendClient,
    text: TextBackendClient,
}

impl GenerationClient {
    pub fn new(image: ImageBackendClient, text: TextBackendClient) -> Self {
        Self { image, text }
    }

    /// Build both backend clients from config and resolved credentials, sharing one HTTP
    /// connection pool.
    pub fn from_config(config: &Config, credentials: &Credentials) -> Self {
        let http = reqwest::Client::new();
        let image = ImageBackendClient::with_client(
            http.clone(),
            Some(config.backends.image.endpoint.clone()),
            credentials.image_api_key.clone(),
            credentials.image_api_secret.clone(),
        );
        let text = TextBackendClient::with_client(
            http,
            Some(config.backends.text.endpoint.clone()),
            Some(config.backends.text.model.clone()),
            credentials.text_api_key.clone(),
        );
        Self::new(image, text)
    }
}

#[async_trait]
impl Generator for GenerationClient {
    async fn generate_image(&self, source: &[u8]) -> Result<Vec<u8>, GenerationError> {
        self.image.generate(source).await
    }

    async fn generate_text(&self, prompt: &str) -> Result<String, GenerationError> {
        self.text.generate(prompt).await
    }
}
