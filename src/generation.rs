//! Text-generation backends.
//!
//! | Config Value | Generator | Endpoint |
//! |-------------|-----------|----------|
//! | `"disabled"` | [`DisabledGenerator`] | none, always fails |
//! | `"ollama"` | [`OllamaGenerator`] | `POST {url}/api/generate` |
//! | `"openai"` | [`OpenAIGenerator`] | `POST {url}/v1/chat/completions` |
//!
//! Output length is bounded by `generation.max_new_tokens`. Every failure,
//! including exhausted retries, surfaces as [`RagError::GenerationFailure`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::error::{RagError, Result};
use crate::http::JsonEndpoint;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Provider name used in logs and errors.
    fn name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(RagError::generation(
            "disabled",
            "generation provider is disabled; set [generation] provider in config",
        ))
    }
}

/// Shared request settings for the HTTP generators.
struct RemoteSettings {
    model: String,
    url: String,
    max_new_tokens: u32,
    temperature: Option<f32>,
    timeout_secs: u64,
    max_retries: u32,
}

impl RemoteSettings {
    fn from_config(config: &GenerationConfig, default_url: &str) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            RagError::Config(format!(
                "generation.model required for provider '{}'",
                config.provider
            ))
        })?;
        Ok(Self {
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| default_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }

    fn endpoint<'a>(&self, label: &'a str, path: &str, bearer: Option<String>) -> JsonEndpoint<'a> {
        JsonEndpoint {
            label,
            url: format!("{}{}", self.url, path),
            bearer,
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
        }
    }
}

// ============ Ollama ============

pub struct OllamaGenerator {
    settings: RemoteSettings,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            settings: RemoteSettings::from_config(config, "http://localhost:11434")?,
        })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let mut options = serde_json::json!({ "num_predict": self.settings.max_new_tokens });
        if let Some(t) = self.settings.temperature {
            options["temperature"] = serde_json::json!(t);
        }
        serde_json::json!({
            "model": self.settings.model,
            "prompt": prompt,
            "stream": false,
            "options": options,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let json = self
            .settings
            .endpoint("Ollama", "/api/generate", None)
            .post(&self.request_body(prompt))
            .await
            .map_err(|e| RagError::generation("ollama", e))?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| RagError::generation("ollama", "invalid response: missing 'response'"))
    }
}

// ============ OpenAI ============

/// Chat-completions generator. Requires `OPENAI_API_KEY`.
pub struct OpenAIGenerator {
    settings: RemoteSettings,
    api_key: String,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let settings = RemoteSettings::from_config(config, "https://api.openai.com")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| RagError::Config("OPENAI_API_KEY environment variable not set".into()))?;
        Ok(Self { settings, api_key })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.settings.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.settings.max_new_tokens,
        });
        if let Some(t) = self.settings.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        body
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let json = self
            .settings
            .endpoint("OpenAI", "/v1/chat/completions", Some(self.api_key.clone()))
            .post(&self.request_body(prompt))
            .await
            .map_err(|e| RagError::generation("openai", e))?;

        parse_chat_completion(&json).map_err(|e| RagError::generation("openai", e))
    }
}

fn parse_chat_completion(json: &serde_json::Value) -> std::result::Result<String, String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| "invalid response: missing choices[0].message.content".to_string())
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        other => Err(RagError::Config(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ollama_config() -> GenerationConfig {
        GenerationConfig {
            provider: "ollama".into(),
            model: Some("llama3.2".into()),
            url: Some("http://127.0.0.1:9/".into()),
            max_retries: 0,
            timeout_secs: 2,
            ..GenerationConfig::default()
        }
    }

    #[tokio::test]
    async fn disabled_generator_fails() {
        let err = DisabledGenerator.generate("p").await.unwrap_err();
        assert!(matches!(err, RagError::GenerationFailure { .. }));
    }

    #[test]
    fn ollama_body_bounds_tokens() {
        let generator = OllamaGenerator::new(&ollama_config()).unwrap();
        let body = generator.request_body("hello");
        assert_eq!(body["options"]["num_predict"], 300);
        assert_eq!(body["stream"], false);
        assert!(body["options"].get("temperature").is_none());
        assert_eq!(generator.settings.url, "http://127.0.0.1:9");
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_generation_failure() {
        let generator = OllamaGenerator::new(&ollama_config()).unwrap();
        let err = generator.generate("hello").await.unwrap_err();
        match err {
            RagError::GenerationFailure { provider, .. } => assert_eq!(provider, "ollama"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn chat_completion_parsing() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "  Paris. " } }]
        });
        assert_eq!(parse_chat_completion(&json).unwrap(), "Paris.");
        assert!(parse_chat_completion(&serde_json::json!({ "choices": [] })).is_err());
    }

    #[test]
    fn create_generator_by_name() {
        assert_eq!(
            create_generator(&GenerationConfig::default()).unwrap().name(),
            "disabled"
        );
        assert_eq!(create_generator(&ollama_config()).unwrap().name(), "ollama");
        let bad = GenerationConfig {
            provider: "nope".into(),
            ..GenerationConfig::default()
        };
        assert!(create_generator(&bad).is_err());
    }
}
