//! OpenAI-compatible chat completion client.
//!
//! Talks to `POST {base_url}/chat/completions`, so it works with OpenAI and
//! with any server exposing the same API (vLLM, Ollama's `/v1`, LM Studio).
//! Retries follow [`crate::http::send_with_retry`].

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use research_harness_core::traits::ChatModel;

use crate::config::LlmConfig;
use crate::http::send_with_retry;

pub struct OpenAiChat {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: Option<u32>,
    max_retries: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChat {
    /// Build a client from config. The API key is read from `api_key_env`;
    /// a missing key is allowed for local servers that do not need one.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::warn!(env = %config.api_key_env, "LLM API key not set; sending unauthenticated requests");
        }
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        let body = self.request_body(prompt);
        let response = send_with_retry("chat completion", self.max_retries, || {
            let req = self.client.post(&self.endpoint).json(&body);
            match &self.api_key {
                Some(key) => req.bearer_auth(key),
                None => req,
            }
        })
        .await?;
        let parsed: ChatResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat completion returned no content"))?;
        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), reply_chars = text.len(), "chat completion");
        Ok(text)
    }
}
