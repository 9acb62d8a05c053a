use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use rkg_core::config::ResearchConfig;
use rkg_core::error::{Result, RkgError};
use rkg_core::llm::{LanguageModel, PromptKind};

use crate::prompts;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// `LanguageModel` backed by the Anthropic Messages API.
pub struct AnthropicLanguageModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

// ── Anthropic Messages API request/response types ──────────────────────────

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

// ── Implementation ─────────────────────────────────────────────────────────

impl AnthropicLanguageModel {
    pub fn new(config: &ResearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| RkgError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.anthropic_api_key.clone(),
            model: config.anthropic_model.clone(),
        })
    }

    fn build_user_prompt(kind: PromptKind, input: &Value) -> Result<String> {
        Ok(format!(
            "Task: {kind}\n\nInput:\n{}",
            serde_json::to_string_pretty(input)?
        ))
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> RkgError {
        let message = format!("Anthropic API returned status {status}: {body}");
        match status.as_u16() {
            401 | 403 => RkgError::Config(message),
            408 | 429 | 500..=599 => RkgError::LanguageModel(message),
            _ => RkgError::Internal(message),
        }
    }

    fn response_text(response: AnthropicResponse) -> Result<String> {
        let text = response
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(RkgError::MalformedOutput(
                "No text content block in API response".to_string(),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl LanguageModel for AnthropicLanguageModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, kind: PromptKind, input: &Value) -> Result<String> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: prompts::max_tokens(kind),
            system: prompts::system_prompt(kind).to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: Self::build_user_prompt(kind, input)?,
            }],
        };

        tracing::debug!(
            model = %self.model,
            prompt_kind = %kind,
            "Sending request to Anthropic API"
        );

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| RkgError::LanguageModel(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(Self::classify_status(status, &body));
        }

        let api_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| RkgError::LanguageModel(format!("Failed to parse API response: {e}")))?;

        let stop_reason = api_response.stop_reason.clone();
        let text = Self::response_text(api_response)?;

        tracing::debug!(
            prompt_kind = %kind,
            stop_reason = ?stop_reason,
            response_len = text.len(),
            "Received response from Anthropic API"
        );

        Ok(text)
    }
}
