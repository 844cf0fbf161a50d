//! Whisper transcription using whisper-rs (whisper.cpp bindings).
//!
//! Loads a GGML model once at startup, then transcribes 16kHz mono
//! samples on demand from a blocking task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::config::WhisperConfig;
use crate::error::{AssistantError, Result};

#[derive(Clone)]
pub struct WhisperTranscriber {
    ctx: Arc<WhisperContext>,
    language: String,
}

impl WhisperTranscriber {
    /// Load the Whisper GGML model. Blocking; call from `spawn_blocking`.
    pub fn load(config: &WhisperConfig) -> Result<Self> {
        let model_path = find_model(&config.model)?;
        let model_str = model_path.to_str().ok_or_else(|| {
            AssistantError::Config(format!("Non UTF-8 model path: {}", model_path.display()))
        })?;

        info!("Loading Whisper model from {}", model_path.display());
        let t0 = Instant::now();
        let ctx = WhisperContext::new_with_params(model_str, WhisperContextParameters::default())
            .map_err(|e| {
                AssistantError::SpeechServiceUnavailable(format!("Failed to load Whisper model: {e}"))
            })?;
        info!("Whisper model loaded in {}ms", t0.elapsed().as_millis());

        Ok(Self {
            ctx: Arc::new(ctx),
            language: config.language.clone(),
        })
    }

    /// Transcribe samples (f32, 16kHz, mono) to raw text.
    pub fn transcribe(&self, samples: &[f32]) -> Result<String> {
        let t0 = Instant::now();
        let unavailable = |what: &str, e: whisper_rs::WhisperError| {
            AssistantError::SpeechServiceUnavailable(format!("{what}: {e}"))
        };

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| unavailable("Failed to create whisper state", e))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(&self.language));
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_token_timestamps(false);

        state
            .full(params, samples)
            .map_err(|e| unavailable("Whisper inference failed", e))?;

        let mut text = String::new();
        for i in 0..state.full_n_segments() {
            if let Some(segment) = state.get_segment(i) {
                if let Ok(segment_text) = segment.to_str_lossy() {
                    let trimmed = segment_text.trim();
                    if !trimmed.is_empty() {
                        if !text.is_empty() {
                            text.push(' ');
                        }
                        text.push_str(trimmed);
                    }
                }
            }
        }

        debug!(
            "Transcribed {:.1}s audio in {}ms: \"{text}\"",
            samples.len() as f64 / 16000.0,
            t0.elapsed().as_millis()
        );
        Ok(text)
    }
}

/// Find the GGML model file for `model_name` (a path or a short name like `base.en`).
fn find_model(model_name: &str) -> Result<PathBuf> {
    let direct = PathBuf::from(model_name);
    if direct.exists() && direct.extension().is_some() {
        return Ok(direct);
    }

    let filename = format!("ggml-{}.bin", model_name.replace('/', "-"));
    let search_dirs: Vec<PathBuf> = [
        std::env::current_dir().ok(),
        std::env::current_dir().ok().map(|d| d.join("models")),
        dirs::home_dir().map(|h| h.join(".cache/whisper")),
    ]
    .into_iter()
    .flatten()
    .collect();

    search_dirs
        .iter()
        .map(|dir| dir.join(&filename))
        .find(|path| path.exists())
        .ok_or_else(|| {
            AssistantError::Config(format!(
                "Whisper model {filename} not found. Download it with:\n  \
                 wget https://huggingface.co/ggerganov/whisper.cpp/resolve/main/{filename}\n\
                 Searched in: {search_dirs:?}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_reports_download_hint() {
        let err = find_model("definitely-not-a-model").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("ggml-definitely-not-a-model.bin"));
        assert!(message.contains("huggingface.co"));
    }

    #[test]
    fn direct_path_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.bin");
        std::fs::write(&path, b"not really a model").unwrap();
        assert_eq!(find_model(path.to_str().unwrap()).unwrap(), path);
    }
}
