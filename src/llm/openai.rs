use super::LlmClient;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_SECS: f64 = 2.0;
const MAX_BACKOFF_SECS: f64 = 10.0;

/// `LlmClient` backed by an OpenAI-compatible chat completions endpoint.
/// Retries up to 3 times with exponential backoff capped at 10s
/// (SPEC_FULL.md §4.4), matching the `2s -> 10s` curve named in the spec
/// rather than a raw `2^attempt` that would overshoot it.
pub struct OpenAiLlmClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    api_base: String,
}

impl OpenAiLlmClient {
    pub fn new(api_key: String, model: String, api_base: Option<String>) -> Self {
        OpenAiLlmClient {
            client: reqwest::Client::new(),
            api_key,
            model,
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        }
    }

    fn backoff_for_attempt(attempt: u32) -> Duration {
        let secs = (INITIAL_BACKOFF_SECS * 2f64.powi(attempt as i32 - 1)).min(MAX_BACKOFF_SECS);
        Duration::from_secs_f64(secs)
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: 0.2,
        };

        let mut last_error = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = Self::backoff_for_attempt(attempt);
                debug!("retrying LLM generate after {:?} (attempt {})", delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let body: ChatCompletionResponse = resp.json().await?;
                    let content = body
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| c.message.content)
                        .ok_or_else(|| {
                            PipelineError::LlmService("empty choices in LLM response".to_string())
                        })?;
                    return Ok(content);
                }
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS || resp.status().is_server_error() => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!("LLM request retriable failure ({}): {}", status, body);
                    last_error = Some(PipelineError::LlmService(format!(
                        "llm request failed with status {status}"
                    )));
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(PipelineError::LlmService(format!(
                        "llm request failed with non-retriable status {status}: {body}"
                    )));
                }
                Err(e) => {
                    warn!("LLM request transport error: {}", e);
                    last_error = Some(PipelineError::Http(e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            PipelineError::LlmService("exhausted retries against LLM provider".to_string())
        }))
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
