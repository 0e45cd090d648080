// crates/core/src/chat_client.rs

//! Oracle backed by an OpenAI-compatible chat-completions endpoint.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::OracleError;
use crate::oracle::{CompletionRequest, Oracle, ResponseFormat};

/// Chat-completions client.
///
/// Environment variables (used by [`ChatCompletionsClient::from_env`]):
/// - LIBGEN_ORACLE_ENDPOINT: e.g. "https://api.openai.com/v1"
/// - LIBGEN_ORACLE_MODEL: e.g. "gpt-4o"
/// - LIBGEN_ORACLE_API_KEY: your API key
pub struct ChatCompletionsClient {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_attempts: u32,
}

impl ChatCompletionsClient {
    pub fn new(endpoint: &str, model: &str, api_key: &str) -> Result<Self> {
        let url = format!("{}/chat/completions", endpoint.trim_end_matches('/'));
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            url,
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature: 0.0,
            max_attempts: 3,
        })
    }

    pub fn from_env() -> Result<Self> {
        let endpoint =
            std::env::var("LIBGEN_ORACLE_ENDPOINT").context("LIBGEN_ORACLE_ENDPOINT not set")?;
        let model = std::env::var("LIBGEN_ORACLE_MODEL").context("LIBGEN_ORACLE_MODEL not set")?;
        let api_key =
            std::env::var("LIBGEN_ORACLE_API_KEY").context("LIBGEN_ORACLE_API_KEY not set")?;
        Self::new(&endpoint, &model, &api_key)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn body(&self, request: &CompletionRequest) -> ChatBody {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(json!({ "role": "system", "content": request.system }));
        for m in &request.messages {
            messages.push(json!({ "role": m.role, "content": m.content }));
        }
        ChatBody {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            response_format: match request.response_format {
                ResponseFormat::JsonObject => Some(json!({ "type": "json_object" })),
                ResponseFormat::Text => None,
            },
        }
    }
}

#[derive(Serialize)]
struct ChatBody {
    model: String,
    messages: Vec<Value>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Deserialize, Debug)]
struct ChatReply {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Deserialize, Debug)]
struct ChatReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

impl Oracle for ChatCompletionsClient {
    fn complete(&self, request: &CompletionRequest) -> Result<String, OracleError> {
        let body = self.body(request);
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            let resp = self
                .client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send();

            let r = match resp {
                Ok(r) => r,
                Err(e) => {
                    warn!(attempt, max = self.max_attempts, error = %e, "oracle network error, retrying");
                    last_error = Some(OracleError::Transport(e.to_string()));
                    std::thread::sleep(Duration::from_secs(attempt as u64));
                    continue;
                }
            };

            let status = r.status();
            if !status.is_success() {
                let text = r.text().unwrap_or_default();
                let err = OracleError::Status {
                    status: status.as_u16(),
                    body: text.chars().take(500).collect(),
                };
                if !err.is_transient() {
                    return Err(err);
                }
                // Rate limits back off quadratically, server errors linearly.
                let delay = if status.as_u16() == 429 {
                    5 * attempt as u64 * attempt as u64
                } else {
                    attempt as u64 * 2
                };
                warn!(attempt, max = self.max_attempts, %status, delay, "oracle request failed, backing off");
                last_error = Some(err);
                std::thread::sleep(Duration::from_secs(delay));
                continue;
            }

            let raw = r
                .text()
                .map_err(|e| OracleError::Transport(e.to_string()))?;
            debug!(bytes = raw.len(), "oracle reply received");

            let parsed: ChatReply = serde_json::from_str(&raw)
                .map_err(|e| OracleError::MalformedReply(e.to_string()))?;
            return parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .ok_or(OracleError::EmptyReply);
        }

        Err(last_error.unwrap_or_else(|| OracleError::Transport("request failed after retries".into())))
    }
}
