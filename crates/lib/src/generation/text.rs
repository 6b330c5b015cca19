//! Chat-completion backend client (OpenAI-compatible `/v1/chat/completions`).

use serde::{Deserialize, Serialize};

use super::GenerationError;
use crate::config::{DEFAULT_TEXT_ENDPOINT, DEFAULT_TEXT_MODEL};

/// Sampling settings sent with every completion request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    /// Number of choices to generate.
    pub n: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            n: 1,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }
}

/// One turn of the conversation sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatTurn>,
    #[serde(flatten)]
    pub sampling: SamplingParams,
}

impl ChatCompletionRequest {
    /// Single user turn with default sampling.
    pub fn for_prompt(model: &str, prompt: &str) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![ChatTurn {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            sampling: SamplingParams::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Present on API errors (bad key, quota, ...), in which case `choices` is empty.
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChatTurn,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
}

impl ChatCompletionResponse {
    /// Content of the first choice, verbatim.
    pub fn into_content(self) -> Result<String, GenerationError> {
        match self.choices.into_iter().next() {
            Some(choice) => Ok(choice.message.content),
            None => Err(GenerationError::EmptyChoices(
                self.error.map(|e| e.message).filter(|m| !m.is_empty()),
            )),
        }
    }
}

/// Client for the text backend. Authenticates with a bearer token.
#[derive(Clone)]
pub struct TextBackendClient {
    endpoint: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl TextBackendClient {
    pub fn new(endpoint: Option<String>, model: Option<String>, api_key: String) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint, model, api_key)
    }

    pub fn with_client(
        client: reqwest::Client,
        endpoint: Option<String>,
        model: Option<String>,
        api_key: String,
    ) -> Self {
        let endpoint = endpoint
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_TEXT_ENDPOINT.to_string());
        let model = model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string());
        Self {
            endpoint,
            model,
            api_key,
            client,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// POST a single-turn completion and return the first choice's content.
    pub async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = ChatCompletionRequest::for_prompt(&self.model, prompt);
        let res = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            log::debug!("text backend returned status {}", status);
        }
        let bytes = res.bytes().await?;
        let data: ChatCompletionResponse = serde_json::from_slice(&bytes).map_err(|e| {
            GenerationError::Format(format!("text backend returned {}: {}", status, e))
        })?;
        data.into_content()
    }
}
