//! Speech recognition: bounded microphone capture followed by Whisper.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::capture::MicCapture;
use crate::error::{AssistantError, Result};
use crate::transcriber::WhisperTranscriber;

/// What a listen is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenPurpose {
    /// Short window while waiting for the wake phrase.
    Trigger,
    /// The driver's request after the prompt.
    Command,
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Listen for one utterance.
    ///
    /// Fails with `RecognitionTimeout` when nobody speaks within `timeout`,
    /// `RecognitionUnintelligible` when speech yields no text and
    /// `SpeechServiceUnavailable` when the engine itself fails.
    async fn listen(&self, purpose: ListenPurpose, timeout: Duration, phrase_limit: Duration) -> Result<String>;
}

/// Keeps the last captured command on disk for troubleshooting.
pub struct UtteranceDump {
    path: PathBuf,
}

impl UtteranceDump {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Overwrite the dump with `samples` if they were a command capture.
    pub fn record(&self, purpose: ListenPurpose, samples: &[f32], sample_rate: u32) {
        if purpose == ListenPurpose::Command {
            save_wav(&self.path, samples, sample_rate);
        }
    }
}

pub struct WhisperRecognizer {
    capture: MicCapture,
    transcriber: WhisperTranscriber,
    dump: Option<UtteranceDump>,
}

impl WhisperRecognizer {
    pub fn new(capture: MicCapture, transcriber: WhisperTranscriber, dump_last_utterance: bool) -> Self {
        let dump = dump_last_utterance
            .then(|| UtteranceDump::new(std::env::temp_dir().join("sheero-last-utterance.wav")));
        Self {
            capture,
            transcriber,
            dump,
        }
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperRecognizer {
    async fn listen(&self, purpose: ListenPurpose, timeout: Duration, phrase_limit: Duration) -> Result<String> {
        let samples = self.capture.capture(timeout, phrase_limit).await?;
        if samples.is_empty() {
            return Err(AssistantError::RecognitionUnintelligible);
        }

        if let Some(dump) = &self.dump {
            dump.record(purpose, &samples, self.capture.sample_rate());
        }

        let transcriber = self.transcriber.clone();
        let raw = tokio::task::spawn_blocking(move || transcriber.transcribe(&samples))
            .await
            .map_err(|e| AssistantError::SpeechServiceUnavailable(format!("transcription task failed: {e}")))??;

        let text = normalize_transcript(&raw);
        if text.is_empty() {
            debug!("Transcript had no words: \"{raw}\"");
            return Err(AssistantError::RecognitionUnintelligible);
        }
        Ok(text)
    }
}

/// Strip Whisper's non-speech annotations (`[BLANK_AUDIO]`, `(wind blowing)`)
/// and collapse whitespace.
pub fn normalize_transcript(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut depth = 0usize;
    let mut starred = false;
    for ch in raw.chars() {
        match ch {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            '*' => starred = !starred,
            _ if depth == 0 && !starred => out.push(ch),
            _ => {}
        }
    }
    let cleaned: Vec<&str> = out.split_whitespace().collect();
    let joined = cleaned.join(" ");
    if joined.chars().any(|c| c.is_alphanumeric()) {
        joined
    } else {
        String::new()
    }
}

/// Save captured audio as 16-bit WAV for troubleshooting.
fn save_wav(path: &Path, samples: &[f32], sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    match hound::WavWriter::create(path, spec) {
        Ok(mut writer) => {
            for &sample in samples {
                let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                if writer.write_sample(s).is_err() {
                    break;
                }
            }
            if writer.finalize().is_ok() {
                info!("Saved last utterance to {}", path.display());
            }
        }
        Err(e) => {
            warn!("Failed to save WAV: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotations_are_removed() {
        assert_eq!(normalize_transcript("[BLANK_AUDIO]"), "");
        assert_eq!(normalize_transcript(" (wind blowing) "), "");
        assert_eq!(normalize_transcript("*music*"), "");
        assert_eq!(
            normalize_transcript("Hey  Gogi [inaudible] what's the weather?"),
            "Hey Gogi what's the weather?"
        );
    }

    #[test]
    fn punctuation_only_is_unintelligible() {
        assert_eq!(normalize_transcript(" ... "), "");
        assert_eq!(normalize_transcript("Okay."), "Okay.");
    }

    #[test]
    fn wav_dump_round_trips_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.wav");
        save_wav(&path, &[0.0, 0.5, -0.5, 1.0], 16000);
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.len(), 4);
    }

    #[test]
    fn only_command_captures_are_dumped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last.wav");
        let dump = UtteranceDump::new(path.clone());

        dump.record(ListenPurpose::Trigger, &[0.1; 8], 16000);
        assert!(!path.exists());

        dump.record(ListenPurpose::Command, &[0.1; 8], 16000);
        assert_eq!(hound::WavReader::open(&path).unwrap().len(), 8);

        // A later trigger listen leaves the command on disk.
        dump.record(ListenPurpose::Trigger, &[0.1; 2], 16000);
        assert_eq!(hound::WavReader::open(&path).unwrap().len(), 8);
    }
}
