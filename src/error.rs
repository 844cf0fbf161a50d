//! Error types for the assistant workers.
//!
//! Nothing here is fatal once the workers are running: each worker matches
//! on the variant and picks a recovery action.

/// Failures surfaced by the assistant's collaborators.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    /// No speech started before the listen timeout elapsed.
    #[error("no speech before timeout")]
    RecognitionTimeout,

    /// Speech was captured but could not be turned into text.
    #[error("speech was not recognized")]
    RecognitionUnintelligible,

    /// The speech-to-text engine failed.
    #[error("speech service unavailable: {0}")]
    SpeechServiceUnavailable(String),

    /// The generative backend could not produce a reply.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Text could not be synthesized.
    #[error("synthesis failed: {0}")]
    SynthesisFailure(String),

    /// Synthesized or file audio could not be played.
    #[error("playback failed: {0}")]
    Playback(String),

    /// Microphone or speaker device could not be opened.
    #[error("audio device error: {0}")]
    AudioDevice(String),

    /// Alert payload that names no known alert type.
    #[error("invalid alert: {0}")]
    InvalidAlert(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AssistantError>;
