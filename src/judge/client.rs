//! OpenRouter-compatible chat-completions client for judgments

use super::parse::{parse_outcome, sanitize_api_response};
use super::prompts::{judge_user_prompt, judgment_schema, JUDGE_SYSTEM};
use super::{Judge, JudgmentOutcome, JudgmentRequest};
use crate::config::JudgmentConfig;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
    json_schema: JsonSchemaWrapper,
}

#[derive(Serialize)]
struct JsonSchemaWrapper {
    name: String,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    /// Null when the provider refused or failed to generate
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

fn create_http_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))
}

/// Judge backed by a chat-completions endpoint. One attempt per call, bounded
/// by the configured timeout; failures come back as outcomes, never errors.
pub struct OpenRouterJudge {
    config: JudgmentConfig,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl OpenRouterJudge {
    /// Build a judge using the API key from the environment.
    pub fn new(config: JudgmentConfig) -> anyhow::Result<Self> {
        let api_key = config.api_key();
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: JudgmentConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        url::Url::parse(&config.api_url)
            .map_err(|e| anyhow::anyhow!("Invalid judgment URL '{}': {}", config.api_url, e))?;
        let http = create_http_client(config.timeout_secs)?;
        Ok(Self {
            config,
            api_key,
            http,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    fn chat_request(&self, request: &JudgmentRequest) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: JUDGE_SYSTEM.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: judge_user_prompt(request),
                },
            ],
            max_tokens: self.config.max_tokens,
            stream: false,
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: JsonSchemaWrapper {
                    name: "judgment".to_string(),
                    strict: true,
                    schema: judgment_schema(),
                },
            },
        }
    }

    async fn call(&self, request: &JudgmentRequest) -> JudgmentOutcome {
        let Some(api_key) = self.api_key.as_deref() else {
            return JudgmentOutcome::TransportError {
                cause: "no judgment API key configured (set ARBITER_API_KEY)".to_string(),
            };
        };

        let started = Instant::now();
        let body = self.chat_request(request);
        let response = match self
            .http
            .post(&self.config.api_url)
            .header("Content-Type", "application/json")
            .header("X-Title", "Arbiter")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let cause = if err.is_timeout() {
                    format!("judgment request timed out after {}s", self.config.timeout_secs)
                } else {
                    format!("judgment request failed: {}", err)
                };
                warn!(%cause, "judgment service unavailable");
                return JudgmentOutcome::TransportError { cause };
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => {
                return JudgmentOutcome::TransportError {
                    cause: format!("failed to read judgment response: {}", err),
                }
            }
        };
        debug!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "judgment response received"
        );

        if !status.is_success() {
            let cause = match status.as_u16() {
                401 | 403 => "judgment API key was rejected".to_string(),
                429 => "judgment service rate limited the request".to_string(),
                500..=599 => format!("judgment service error ({})", status),
                _ => format!("judgment API error {}: {}", status, sanitize_api_response(&text)),
            };
            warn!(%cause, "judgment service unavailable");
            return JudgmentOutcome::TransportError { cause };
        }

        let parsed: ChatResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) => return JudgmentOutcome::ParseError { raw: text },
        };
        let Some(message) = parsed.choices.into_iter().next().map(|c| c.message) else {
            return JudgmentOutcome::ParseError { raw: text };
        };
        if let Some(refusal) = message.refusal {
            return JudgmentOutcome::ParseError { raw: refusal };
        }

        parse_outcome(message.content.as_deref().unwrap_or_default())
    }
}

impl Judge for OpenRouterJudge {
    fn judge<'a>(&'a self, request: &'a JudgmentRequest) -> BoxFuture<'a, JudgmentOutcome> {
        self.call(request).boxed()
    }
}
