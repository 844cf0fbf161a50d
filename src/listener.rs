//! Wake-word listener.
//!
//! IDLE → AWAITING_ANSWER → CAPTURING → IDLE

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WakeConfig;
use crate::error::AssistantError;
use crate::gate::Arbiter;
use crate::queues::{SpeechSource, Speaker};
use crate::recognizer::{ListenPurpose, SpeechRecognizer};
use crate::state::{AssistantMode, DriverState};

pub const WAKE_PROMPT: &str = "How can I help you?";
pub const DID_NOT_CATCH: &str = "Sorry, I didn't catch that.";
pub const SERVICE_UNAVAILABLE: &str = "Speech service is unavailable right now.";

#[derive(Debug)]
pub enum ListenerState {
    Idle,
    /// Holds the completion signal of the spoken prompt.
    AwaitingAnswer(oneshot::Receiver<()>),
    Capturing,
}

impl ListenerState {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::AwaitingAnswer(_) => "AWAITING_ANSWER",
            Self::Capturing => "CAPTURING",
        }
    }
}

impl std::fmt::Display for ListenerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub struct WakeListener {
    config: WakeConfig,
    phrase: String,
    recognizer: Arc<dyn SpeechRecognizer>,
    arbiter: Arc<Arbiter>,
    state: Arc<DriverState>,
    speaker: Speaker,
    commands: mpsc::UnboundedSender<String>,
}

impl WakeListener {
    pub fn new(
        config: WakeConfig,
        recognizer: Arc<dyn SpeechRecognizer>,
        arbiter: Arc<Arbiter>,
        state: Arc<DriverState>,
        speaker: Speaker,
        commands: mpsc::UnboundedSender<String>,
    ) -> Self {
        let phrase = config.phrase.to_lowercase();
        Self {
            config,
            phrase,
            recognizer,
            arbiter,
            state,
            speaker,
            commands,
        }
    }

    fn is_wake_phrase(&self, text: &str) -> bool {
        text.to_lowercase().contains(&self.phrase)
    }

    /// Run one state's worth of work and return the next state.
    pub async fn step(&self, current: ListenerState) -> ListenerState {
        match current {
            ListenerState::Idle => self.idle().await,
            ListenerState::AwaitingAnswer(prompt_done) => self.await_answer(prompt_done).await,
            ListenerState::Capturing => self.capture_command().await,
        }
    }

    async fn idle(&self) -> ListenerState {
        self.arbiter.wait_for_mic().await;

        let heard = self
            .recognizer
            .listen(
                ListenPurpose::Trigger,
                self.config.trigger_timeout(),
                self.config.trigger_phrase_limit(),
            )
            .await;

        match heard {
            Ok(text) if self.is_wake_phrase(&text) => {
                info!("Wake phrase detected: \"{text}\"");
                self.state.set_conversation_active(true);
                self.arbiter.set_mode(AssistantMode::Listening);
                self.arbiter.mute_mic();
                let prompt_done = self.speaker.speak_and_track(SpeechSource::WakePrompt, WAKE_PROMPT);
                ListenerState::AwaitingAnswer(prompt_done)
            }
            Ok(text) => {
                debug!("Ignoring \"{text}\"");
                ListenerState::Idle
            }
            Err(AssistantError::RecognitionTimeout | AssistantError::RecognitionUnintelligible) => {
                ListenerState::Idle
            }
            Err(e) => {
                warn!("Trigger listen failed: {e}");
                tokio::time::sleep(self.config.error_backoff()).await;
                ListenerState::Idle
            }
        }
    }

    async fn await_answer(&self, prompt_done: oneshot::Receiver<()>) -> ListenerState {
        // The prompt may sit behind other queued speech; wait as long as it takes.
        // A dropped sender still means the item left the queue.
        let _ = prompt_done.await;
        self.arbiter.wait_for_mic().await;

        self.arbiter.set_mode(AssistantMode::Listening);
        ListenerState::Capturing
    }

    async fn capture_command(&self) -> ListenerState {
        let heard = self
            .recognizer
            .listen(
                ListenPurpose::Command,
                self.config.command_timeout(),
                self.config.command_phrase_limit(),
            )
            .await;

        match heard {
            Ok(command) => {
                info!("Command: \"{command}\"");
                self.arbiter.set_mode(AssistantMode::Standby);
                if self.commands.send(command).is_err() {
                    warn!("Speech queue closed, dropping command");
                    self.state.set_conversation_active(false);
                }
            }
            Err(AssistantError::RecognitionTimeout | AssistantError::RecognitionUnintelligible) => {
                debug!("Command not understood");
                self.speaker.speak(SpeechSource::Listener, DID_NOT_CATCH);
                self.end_conversation();
            }
            Err(AssistantError::SpeechServiceUnavailable(e)) => {
                warn!("Speech service unavailable: {e}");
                self.speaker.speak(SpeechSource::Listener, SERVICE_UNAVAILABLE);
                self.end_conversation();
            }
            Err(e) => {
                warn!("Command listen failed: {e}");
                self.end_conversation();
            }
        }
        ListenerState::Idle
    }

    /// The router never sees a failed capture, so the listener closes it.
    fn end_conversation(&self) {
        self.state.set_conversation_active(false);
        self.arbiter.set_mode(AssistantMode::Standby);
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!("Listening for wake phrase \"{}\"", self.config.phrase);
        let mut current = ListenerState::Idle;
        loop {
            let from = current.name();
            current = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.step(current) => next,
            };
            if current.name() != from {
                info!("Listener: {from} → {current}");
            }
        }
        info!("Listener stopped");
    }
}
