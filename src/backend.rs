//! Generative replies through Ollama's /api/generate endpoint.
//!
//! Never fails past this boundary: any transport or status problem turns
//! into a fixed apology that can be spoken as-is.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::OllamaConfig;
use crate::error::{AssistantError, Result};

pub const TROUBLE_THINKING: &str = "Sorry, I'm having trouble thinking right now.";
pub const CANNOT_THINK: &str = "Sorry, I can't access my thinking capabilities at the moment.";

#[async_trait]
pub trait ResponseBackend: Send + Sync {
    /// Generate a reply for `prompt`. Always returns speakable text.
    async fn generate(&self, prompt: &str, system: Option<&str>) -> String;
}

pub struct OllamaBackend {
    config: OllamaConfig,
    client: Client,
}

/// Whether the configured model is served by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    Available,
    Missing,
    Unreachable(String),
}

impl OllamaBackend {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| AssistantError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Look the configured model up in `/api/tags`.
    pub async fn check_model(&self) -> ModelStatus {
        let url = format!("{}/api/tags", self.config.host);
        let resp = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => return ModelStatus::Unreachable(e.to_string()),
        };
        let data = match resp.json::<serde_json::Value>().await {
            Ok(data) => data,
            Err(e) => return ModelStatus::Unreachable(e.to_string()),
        };
        let wanted = &self.config.model;
        let found = data["models"].as_array().is_some_and(|models| {
            models.iter().any(|m| {
                m["name"]
                    .as_str()
                    .is_some_and(|name| name == wanted || name == format!("{wanted}:latest"))
            })
        });
        if found {
            ModelStatus::Available
        } else {
            ModelStatus::Missing
        }
    }

    /// Log a warning if the model is missing or the backend is down.
    pub async fn report_model_status(&self) {
        match self.check_model().await {
            ModelStatus::Available => info!("Ollama model '{}' available", self.config.model),
            ModelStatus::Missing => {
                warn!("Model '{}' not found in Ollama. Install it with:", self.config.model);
                warn!("  ollama pull {}", self.config.model);
            }
            ModelStatus::Unreachable(e) => {
                warn!(
                    "Could not connect to Ollama at {} ({e}). Make sure it is running",
                    self.config.host
                );
            }
        }
    }
}

#[async_trait]
impl ResponseBackend for OllamaBackend {
    async fn generate(&self, prompt: &str, system: Option<&str>) -> String {
        debug!("Sending to Ollama model '{}': {}", self.config.model, prompt.trim());

        let mut body = json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.config.temperature,
                "num_predict": self.config.max_tokens
            }
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }

        let url = format!("{}/api/generate", self.config.host);

        match self.client.post(&url).json(&body).send().await {
            Ok(resp) => {
                if !resp.status().is_success() {
                    let err = AssistantError::BackendUnavailable(format!("status {}", resp.status()));
                    warn!("Ollama: {err}");
                    return TROUBLE_THINKING.to_string();
                }
                match resp.json::<serde_json::Value>().await {
                    Ok(data) => {
                        let result = data["response"].as_str().unwrap_or("").trim().to_string();
                        if result.is_empty() {
                            warn!("Ollama returned empty response");
                            TROUBLE_THINKING.to_string()
                        } else {
                            debug!("Ollama output: '{result}'");
                            result
                        }
                    }
                    Err(e) => {
                        warn!("Failed to parse Ollama response: {e}");
                        TROUBLE_THINKING.to_string()
                    }
                }
            }
            Err(e) => {
                if e.is_connect() {
                    warn!("Cannot connect to Ollama at {}", self.config.host);
                } else if e.is_timeout() {
                    warn!("Ollama request timed out");
                } else {
                    warn!("Ollama request failed: {e}");
                }
                CANNOT_THINK.to_string()
            }
        }
    }
}
