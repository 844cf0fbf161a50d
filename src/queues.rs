//! The three FIFO queues between workers.
//!
//! Each queue is an unbounded tokio mpsc channel with exactly one consumer.
//! Producers hold cheap clones of the sender side.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::state::AlertKind;

/// Who asked for a piece of speech. Recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechSource {
    System,
    WakePrompt,
    Listener,
    Command,
    AlertNotice,
    Intervention,
    Crash,
}

impl std::fmt::Display for SpeechSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::System => "system",
            Self::WakePrompt => "wake_prompt",
            Self::Listener => "listener",
            Self::Command => "command",
            Self::AlertNotice => "alert_notice",
            Self::Intervention => "intervention",
            Self::Crash => "crash",
        };
        f.write_str(name)
    }
}

/// Text waiting for synthesis and playback.
#[derive(Debug)]
pub struct TtsRequest {
    pub text: String,
    pub source: SpeechSource,
    /// Fired once the item has been played (or has failed).
    pub done: Option<oneshot::Sender<()>>,
}

/// Handle used by every component to enqueue speech.
#[derive(Clone)]
pub struct Speaker {
    tx: mpsc::UnboundedSender<TtsRequest>,
}

impl Speaker {
    pub fn new(tx: mpsc::UnboundedSender<TtsRequest>) -> Self {
        Self { tx }
    }

    /// Queue `text` for playback.
    pub fn speak(&self, source: SpeechSource, text: impl Into<String>) {
        self.enqueue(source, text.into(), None);
    }

    /// Queue `text` and get a receiver that resolves after playback.
    pub fn speak_and_track(
        &self,
        source: SpeechSource,
        text: impl Into<String>,
    ) -> oneshot::Receiver<()> {
        let (done, rx) = oneshot::channel();
        self.enqueue(source, text.into(), Some(done));
        rx
    }

    fn enqueue(&self, source: SpeechSource, text: String, done: Option<oneshot::Sender<()>>) {
        debug!("Queued speech [{source}]: \"{text}\"");
        if self.tx.send(TtsRequest { text, source, done }).is_err() {
            warn!("TTS queue closed, dropping speech [{source}]");
        }
    }
}

/// Receiving ends, handed to the consumers at startup.
pub struct QueueReceivers {
    pub speech: mpsc::UnboundedReceiver<String>,
    pub tts: mpsc::UnboundedReceiver<TtsRequest>,
    pub alerts: mpsc::UnboundedReceiver<AlertKind>,
}

/// Sending ends, cloned into producers.
#[derive(Clone)]
pub struct QueueSenders {
    pub speech: mpsc::UnboundedSender<String>,
    pub speaker: Speaker,
    pub alerts: mpsc::UnboundedSender<AlertKind>,
}

pub fn channels() -> (QueueSenders, QueueReceivers) {
    let (speech_tx, speech_rx) = mpsc::unbounded_channel();
    let (tts_tx, tts_rx) = mpsc::unbounded_channel();
    let (alert_tx, alert_rx) = mpsc::unbounded_channel();
    (
        QueueSenders {
            speech: speech_tx,
            speaker: Speaker::new(tts_tx),
            alerts: alert_tx,
        },
        QueueReceivers {
            speech: speech_rx,
            tts: tts_rx,
            alerts: alert_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_is_delivered_in_order() {
        let (senders, mut receivers) = channels();
        senders.speaker.speak(SpeechSource::System, "one");
        senders.speaker.speak(SpeechSource::Command, "two");
        let first = receivers.tts.try_recv().unwrap();
        let second = receivers.tts.try_recv().unwrap();
        assert_eq!(first.text, "one");
        assert_eq!(second.text, "two");
        assert_eq!(second.source, SpeechSource::Command);
        assert!(first.done.is_none());
    }

    #[tokio::test]
    async fn tracked_speech_resolves_when_signalled() {
        let (senders, mut receivers) = channels();
        let done = senders.speaker.speak_and_track(SpeechSource::WakePrompt, "hi");
        let request = receivers.tts.recv().await.unwrap();
        request.done.unwrap().send(()).unwrap();
        done.await.unwrap();
    }

    #[test]
    fn speaking_into_a_closed_queue_does_not_panic() {
        let (senders, receivers) = channels();
        drop(receivers);
        senders.speaker.speak(SpeechSource::System, "nobody listens");
    }
}
