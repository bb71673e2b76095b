//! LLM configuration loaded once at startup.
//!
//! Credential lookup mirrors the deployment convention: OPENROUTER_API_KEY
//! takes priority and routes to OpenRouter, otherwise OPENAI_API_KEY with the
//! default OpenAI endpoint. A missing credential is a startup configuration
//! error, never a pipeline error.

use crate::error::{InsightsError, Result};
use serde::{Deserialize, Serialize};

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    /// Request timeout applied to every chat call, in seconds.
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self> {
        if let Ok(api_key) = std::env::var("OPENROUTER_API_KEY") {
            return Ok(Self {
                api_key,
                base_url: std::env::var("OPENROUTER_BASE_URL")
                    .unwrap_or_else(|_| OPENROUTER_BASE_URL.to_string()),
                model: std::env::var("OPENROUTER_MODEL")
                    .unwrap_or_else(|_| "openai/gpt-4o-mini".to_string()),
                ..Self::defaults()
            });
        }

        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            return Ok(Self {
                api_key,
                base_url: std::env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| OPENAI_BASE_URL.to_string()),
                model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                ..Self::defaults()
            });
        }

        Err(InsightsError::Config(
            "Neither OPENROUTER_API_KEY nor OPENAI_API_KEY is set".to_string(),
        ))
    }

    fn defaults() -> Self {
        Self {
            api_key: String::new(),
            base_url: OPENAI_BASE_URL.to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            timeout_secs: 60,
            max_tokens: 1500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credentials_is_config_error() {
        std::env::remove_var("OPENROUTER_API_KEY");
        std::env::remove_var("OPENAI_API_KEY");
        let err = LlmConfig::from_env().unwrap_err();
        assert!(matches!(err, InsightsError::Config(_)));
    }
}
