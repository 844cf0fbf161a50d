//! Speech synthesis through an OpenAI-compatible `/v1/audio/speech` server
//! (Kokoro-FastAPI by default).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::config::TtsConfig;
use crate::error::{AssistantError, Result};

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Render `text` into encoded audio bytes.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

pub struct HttpSynthesizer {
    config: TtsConfig,
    client: Client,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
}

impl HttpSynthesizer {
    pub fn new(config: TtsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AssistantError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let request = SpeechRequest {
            model: &self.config.model,
            input: text,
            voice: &self.config.voice,
            speed: self.config.speed,
            response_format: &self.config.format,
        };

        let url = format!("{}/v1/audio/speech", self.config.host.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AssistantError::SynthesisFailure(format!("TTS request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::SynthesisFailure(format!("TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| AssistantError::SynthesisFailure(format!("TTS body: {e}")))?;
        if audio.is_empty() {
            return Err(AssistantError::SynthesisFailure("TTS returned no audio".into()));
        }
        debug!("Synthesized {} bytes for \"{text}\"", audio.len());
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn synth(host: String) -> HttpSynthesizer {
        HttpSynthesizer::new(TtsConfig {
            host,
            ..TtsConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn posts_voice_settings_and_returns_audio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .and(body_partial_json(json!({
                "model": "kokoro",
                "input": "Drive safely.",
                "voice": "af_heart",
                "response_format": "mp3"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .expect(1)
            .mount(&server)
            .await;

        let audio = synth(server.uri()).synthesize("Drive safely.").await.unwrap();
        assert_eq!(audio, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn error_status_is_a_synthesis_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let err = synth(server.uri()).synthesize("hello").await.unwrap_err();
        assert!(matches!(err, AssistantError::SynthesisFailure(msg) if msg.contains("model not loaded")));
    }

    #[tokio::test]
    async fn empty_body_is_a_synthesis_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        assert!(synth(server.uri()).synthesize("hello").await.is_err());
    }
}
