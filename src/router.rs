//! Command router: fixed intents first, generative backend last.

use std::path::PathBuf;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::ResponseBackend;
use crate::listener::DID_NOT_CATCH;
use crate::playback::AudioPlayer;
use crate::queues::{SpeechSource, Speaker};
use crate::state::DriverState;

const ASSISTANT_SYSTEM_PROMPT: &str = "You are an AI driving assistant. You should:
1. Provide helpful, concise responses to the driver's queries
2. Prioritize the driver's safety above all else
3. Suggest actions that keep the driver's attention on the road
4. Keep responses brief (1-3 sentences when possible)";

pub const CALM_MUSIC_ACK: &str = "Playing some calming music to help you relax.";
const WEATHER: &str = "Currently 36 degrees Celsius in Okhla, New Delhi with sunny skies, expected to hit 40 degrees Celsius at peak.";
const DISTANCE: &str = "You are about 20 kilometers from your destination, estimated time remaining is 45 minutes.";
const MUSIC_SERVICE: &str = "Now playing on Spotify.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CalmMusic,
    StopListening,
    Canned(&'static str),
}

pub struct Intent {
    pub name: &'static str,
    matches: fn(&str) -> bool,
    pub action: Action,
}

/// Tried in order; the first match wins.
const INTENTS: &[Intent] = &[
    Intent {
        name: "calm-music",
        matches: |c| c.contains("play") && ["calm", "relaxing", "music"].iter().any(|w| c.contains(w)),
        action: Action::CalmMusic,
    },
    Intent {
        name: "stop-listening",
        matches: |c| c.contains("stop") && c.contains("listening"),
        action: Action::StopListening,
    },
    Intent {
        name: "weather",
        matches: |c| c.contains("weather"),
        action: Action::Canned(WEATHER),
    },
    Intent {
        name: "distance",
        matches: |c| c.contains("distance"),
        action: Action::Canned(DISTANCE),
    },
    Intent {
        name: "music-service",
        matches: |c| c.contains("music"),
        action: Action::Canned(MUSIC_SERVICE),
    },
];

/// Reply to "stop listening", naming the phrase that wakes the assistant.
pub fn deactivated_reply(wake_phrase: &str) -> String {
    format!("Voice assistant deactivated. Say {wake_phrase} to reactivate.")
}

/// Find the fixed intent for a command, if any. Matching is case-insensitive.
pub fn match_intent(command: &str) -> Option<&'static Intent> {
    let lowered = command.to_lowercase();
    INTENTS.iter().find(|intent| (intent.matches)(&lowered))
}

pub struct CommandRouter {
    state: Arc<DriverState>,
    speaker: Speaker,
    backend: Arc<dyn ResponseBackend>,
    wake_phrase: String,
    tracks: Vec<PathBuf>,
    /// `None` unless ambient music is enabled.
    music: Option<Arc<dyn AudioPlayer>>,
}

impl CommandRouter {
    pub fn new(
        state: Arc<DriverState>,
        speaker: Speaker,
        backend: Arc<dyn ResponseBackend>,
        wake_phrase: String,
        tracks: Vec<PathBuf>,
        music: Option<Arc<dyn AudioPlayer>>,
    ) -> Self {
        Self {
            state,
            speaker,
            backend,
            wake_phrase,
            tracks,
            music,
        }
    }

    /// Answer one command with exactly one spoken reply, then close the
    /// conversation.
    pub async fn handle(&self, command: &str) {
        let command = command.trim();
        info!("Processing command: \"{command}\"");

        if command.is_empty() {
            self.speaker.speak(SpeechSource::Command, DID_NOT_CATCH);
        } else {
            match match_intent(command) {
                Some(intent) => {
                    debug!("Matched intent {}", intent.name);
                    self.run_action(intent.action).await;
                }
                None => {
                    let reply = self
                        .backend
                        .generate(command, Some(ASSISTANT_SYSTEM_PROMPT))
                        .await;
                    self.speaker.speak(SpeechSource::Command, reply);
                }
            }
        }

        self.state.set_conversation_active(false);
    }

    async fn run_action(&self, action: Action) {
        match action {
            Action::CalmMusic => {
                self.speaker.speak(SpeechSource::Command, CALM_MUSIC_ACK);
                self.start_calm_music().await;
            }
            Action::StopListening => {
                self.speaker
                    .speak(SpeechSource::Command, deactivated_reply(&self.wake_phrase));
            }
            Action::Canned(reply) => {
                self.speaker.speak(SpeechSource::Command, reply);
            }
        }
    }

    async fn start_calm_music(&self) {
        let Some(track) = self.tracks.choose(&mut rand::thread_rng()) else {
            warn!("No calm music tracks configured");
            return;
        };
        match &self.music {
            Some(player) => {
                if let Err(e) = player.play_ambient(track).await {
                    warn!("Could not start music: {e}");
                }
            }
            None => info!("Would play music: {}", track.display()),
        }
    }

    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<String>, cancel: CancellationToken) {
        info!("Command router started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => self.handle(&command).await,
                    None => break,
                },
            }
        }
        info!("Command router stopped");
    }
}
