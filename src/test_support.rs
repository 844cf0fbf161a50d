//! In-crate fakes for the external collaborators.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::ResponseBackend;
use crate::error::{AssistantError, Result};
use crate::gate::Arbiter;
use crate::playback::AudioPlayer;
use crate::recognizer::{ListenPurpose, SpeechRecognizer};
use crate::state::AssistantMode;
use crate::synth::Synthesizer;

/// Replays a fixed list of recognition outcomes, then times out forever.
#[derive(Default)]
pub struct ScriptedRecognizer {
    script: Mutex<VecDeque<Result<String>>>,
    pub timeouts: Mutex<Vec<Duration>>,
    pub purposes: Mutex<Vec<ListenPurpose>>,
}

impl ScriptedRecognizer {
    pub fn new(script: Vec<Result<String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            timeouts: Mutex::new(Vec::new()),
            purposes: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn listen(&self, purpose: ListenPurpose, timeout: Duration, _phrase_limit: Duration) -> Result<String> {
        self.timeouts.lock().unwrap().push(timeout);
        self.purposes.lock().unwrap().push(purpose);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or(Err(AssistantError::RecognitionTimeout))
    }
}

/// Answers every prompt with the same text and remembers what it was asked.
pub struct RecordingBackend {
    reply: String,
    pub prompts: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingBackend {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ResponseBackend for RecordingBackend {
    async fn generate(&self, prompt: &str, system: Option<&str>) -> String {
        self.prompts
            .lock()
            .unwrap()
            .push((prompt.to_string(), system.map(str::to_string)));
        self.reply.clone()
    }
}

/// Returns the text's bytes as "audio", or fails for one chosen text.
#[derive(Default)]
pub struct FakeSynth {
    pub fail_on: Option<String>,
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Synthesizer for FakeSynth {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(text.to_string());
        if self.fail_on.as_deref() == Some(text) {
            return Err(AssistantError::SynthesisFailure("scripted failure".into()));
        }
        Ok(text.as_bytes().to_vec())
    }
}

/// Snapshot of the arbiter taken while audio was "playing".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackObservation {
    pub mode: AssistantMode,
    pub mic_active: bool,
}

/// Records what it plays and how the arbiter looked during playback.
#[derive(Default)]
pub struct FakePlayer {
    pub arbiter: Option<Arc<Arbiter>>,
    pub duration: Duration,
    pub fail: bool,
    pub played: Mutex<Vec<Vec<u8>>>,
    pub observed: Mutex<Vec<PlaybackObservation>>,
    pub ambient: Mutex<Vec<PathBuf>>,
}

impl FakePlayer {
    pub fn observing(arbiter: Arc<Arbiter>) -> Self {
        Self {
            arbiter: Some(arbiter),
            ..Self::default()
        }
    }

    fn observe(&self) {
        if let Some(arbiter) = &self.arbiter {
            self.observed.lock().unwrap().push(PlaybackObservation {
                mode: arbiter.mode(),
                mic_active: arbiter.mic_active(),
            });
        }
    }

    pub fn played_texts(&self) -> Vec<String> {
        self.played
            .lock()
            .unwrap()
            .iter()
            .map(|audio| String::from_utf8_lossy(audio).into_owned())
            .collect()
    }
}

#[async_trait]
impl AudioPlayer for FakePlayer {
    async fn play(&self, audio: Vec<u8>) -> Result<()> {
        self.observe();
        if !self.duration.is_zero() {
            tokio::time::sleep(self.duration).await;
        }
        self.observe();
        if self.fail {
            return Err(AssistantError::Playback("scripted failure".into()));
        }
        self.played.lock().unwrap().push(audio);
        Ok(())
    }

    async fn play_ambient(&self, track: &Path) -> Result<()> {
        self.ambient.lock().unwrap().push(track.to_path_buf());
        Ok(())
    }
}
