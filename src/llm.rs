//! OpenAI-compatible chat client.
//!
//! Both agent steps (query generation, answer synthesis) go through the
//! `ChatModel` trait so tests can substitute a scripted model for the network
//! client.

use crate::config::LlmConfig;
use crate::error::{InsightsError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Seam between the pipeline and the LLM transport.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send one system + user message pair, return the assistant text verbatim.
    async fn chat(&self, system: &str, user: &str) -> Result<String>;
}

pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| InsightsError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens
        });

        debug!("Calling chat model {} at {}", self.config.model, self.config.base_url);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| InsightsError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(InsightsError::Llm(format!(
                "LLM API returned {}: {}",
                status, text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InsightsError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| InsightsError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

/// Strip markdown code fences some models wrap around JSON payloads
/// (```json ... ```), returning the inner text untouched otherwise.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let without_open = trimmed.trim_start_matches('`');
    // First line after the fence may be a language tag like "json".
    let body = match without_open.split_once('\n') {
        Some((_, rest)) => rest,
        None => without_open,
    };
    body.rsplit_once("```").map(|(inner, _)| inner).unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"sql\": \"SELECT 1\"}\n```";
        assert_eq!(strip_code_fences(raw), "{\"sql\": \"SELECT 1\"}");
    }

    #[test]
    fn strips_bare_fence() {
        let raw = "```\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fences(raw), "{\"a\": 1}");
    }

    #[test]
    fn leaves_plain_text_alone() {
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }
}
