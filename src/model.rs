//! Language-model capability abstraction and HTTP implementations.
//!
//! The orchestrator only sees [`LanguageModel::complete`]: prompt in, text
//! out, no state retained between calls. Providers:
//!
//! | Config Value | Model | Endpoint |
//! |-------------|-------|----------|
//! | `"gemini"` | [`GeminiModel`] | `POST /v1beta/models/{model}:generateContent` |
//! | `"openai"` | [`OpenAIChatModel`] | `POST /v1/chat/completions` |
//! | `"ollama"` | [`OllamaModel`] | `POST /api/generate` |
//! | `"disabled"` | [`DisabledModel`] | none |
//!
//! Each call runs under the configured timeout. Nothing is retried.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ModelConfig;
use crate::error::ModelError;

/// The "complete prompt → text" capability.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}

/// Run `model.complete` under a deadline, mapping expiry to [`ModelError::Timeout`].
pub async fn complete_with_timeout(
    model: &dyn LanguageModel,
    prompt: &str,
    timeout: Duration,
) -> Result<String, ModelError> {
    match tokio::time::timeout(timeout, model.complete(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(ModelError::Timeout(timeout)),
    }
}

pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
        Err(ModelError::Disabled)
    }
}

/// Shared HTTP plumbing for the providers below.
struct HttpSettings {
    model: String,
    temperature: f32,
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpSettings {
    fn new(config: &ModelConfig, default_model: &str, default_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            temperature: config.temperature,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| default_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout: config.timeout(),
            client: reqwest::Client::builder().timeout(config.timeout()).build()?,
        })
    }

    async fn post(
        &self,
        provider: &str,
        request: reqwest::RequestBuilder,
        body: &Value,
    ) -> Result<Value, ModelError> {
        let response = request.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout(self.timeout)
            } else {
                ModelError::Provider(format!("{} request failed: {}", provider, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ModelError::Provider(format!(
                "{} API error {}: {}",
                provider, status, body_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ModelError::Provider(format!("invalid {} response payload: {}", provider, e)))
    }
}

fn non_empty(text: Option<String>) -> Result<String, ModelError> {
    text.filter(|t| !t.trim().is_empty())
        .ok_or(ModelError::EmptyResponse)
}

// ============ Gemini ============

pub struct GeminiModel {
    http: HttpSettings,
    api_key: String,
}

impl GeminiModel {
    pub fn new(config: &ModelConfig, api_key: String) -> anyhow::Result<Self> {
        Ok(Self {
            http: HttpSettings::new(
                config,
                "gemini-2.5-pro",
                "https://generativelanguage.googleapis.com",
            )?,
            api_key,
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn model_name(&self) -> &str {
        &self.http.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": self.http.temperature },
        });
        let request = self
            .http
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.http.url, self.http.model
            ))
            .header("x-goog-api-key", &self.api_key);
        let payload = self.http.post("Gemini", request, &body).await?;
        non_empty(parse_gemini_response(&payload))
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_response(payload: &Value) -> Option<String> {
    let parts = payload
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    Some(text)
}

// ============ OpenAI ============

pub struct OpenAIChatModel {
    http: HttpSettings,
    api_key: String,
}

impl OpenAIChatModel {
    pub fn new(config: &ModelConfig, api_key: String) -> anyhow::Result<Self> {
        Ok(Self {
            http: HttpSettings::new(config, "gpt-4o-mini", "https://api.openai.com")?,
            api_key,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.http.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let body = json!({
            "model": self.http.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.http.temperature,
        });
        let request = self
            .http
            .client
            .post(format!("{}/v1/chat/completions", self.http.url))
            .bearer_auth(&self.api_key);
        let payload = self.http.post("OpenAI", request, &body).await?;
        non_empty(
            payload
                .get("choices")
                .and_then(Value::as_array)
                .and_then(|choices| choices.first())
                .and_then(|choice| choice.get("message"))
                .and_then(|message| message.get("content"))
                .and_then(Value::as_str)
                .map(str::to_string),
        )
    }
}

// ============ Ollama ============

pub struct OllamaModel {
    http: HttpSettings,
}

impl OllamaModel {
    pub fn new(config: &ModelConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: HttpSettings::new(config, "llama3.1", "http://localhost:11434")?,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.http.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let body = json!({
            "model": self.http.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": self.http.temperature },
        });
        let request = self
            .http
            .client
            .post(format!("{}/api/generate", self.http.url));
        let payload = self.http.post("Ollama", request, &body).await?;
        non_empty(
            payload
                .get("response")
                .and_then(Value::as_str)
                .map(str::to_string),
        )
    }
}

/// Create the [`LanguageModel`] named by `config.provider`.
///
/// API keys are read here, from `config.api_key_env` or the provider's
/// conventional variable (`GOOGLE_API_KEY`, `OPENAI_API_KEY`).
pub fn create_model(config: &ModelConfig) -> anyhow::Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "gemini" => {
            let key = read_api_key(config, "GOOGLE_API_KEY")?;
            Ok(Arc::new(GeminiModel::new(config, key)?))
        }
        "openai" => {
            let key = read_api_key(config, "OPENAI_API_KEY")?;
            Ok(Arc::new(OpenAIChatModel::new(config, key)?))
        }
        "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
        other => anyhow::bail!("Unknown model provider: {}", other),
    }
}

fn read_api_key(config: &ModelConfig, default_var: &str) -> anyhow::Result<String> {
    let var = config.api_key_env.as_deref().unwrap_or(default_var);
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow::anyhow!("{} environment variable not set", var))
}
