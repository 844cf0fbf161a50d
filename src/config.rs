//! Configuration management for sheero.
//!
//! Loads config from YAML files in standard locations. Every section has
//! its own defaults, so a partial file only overrides what it names.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Seconds from the config file as a `Duration`. Negative values clamp to
/// zero; values too large to represent fall back to `default`.
fn secs(value: f64, default: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or_else(|_| {
        warn!("Duration {value}s out of range, using {default}s");
        Duration::from_secs_f64(default)
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    pub phrase: String,
    pub trigger_timeout: f64,
    pub trigger_phrase_limit: f64,
    pub command_timeout: f64,
    pub command_phrase_limit: f64,
    pub error_backoff: f64,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            phrase: "gogi".into(),
            trigger_timeout: 2.0,
            trigger_phrase_limit: 2.0,
            command_timeout: 10.0,
            command_phrase_limit: 10.0,
            error_backoff: 1.0,
        }
    }
}

impl WakeConfig {
    pub fn trigger_timeout(&self) -> Duration {
        secs(self.trigger_timeout, Self::default().trigger_timeout)
    }

    pub fn trigger_phrase_limit(&self) -> Duration {
        secs(self.trigger_phrase_limit, Self::default().trigger_phrase_limit)
    }

    pub fn command_timeout(&self) -> Duration {
        secs(self.command_timeout, Self::default().command_timeout)
    }

    pub fn command_phrase_limit(&self) -> Duration {
        secs(self.command_phrase_limit, Self::default().command_phrase_limit)
    }

    pub fn error_backoff(&self) -> Duration {
        secs(self.error_backoff, Self::default().error_backoff)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_size: u32,
    /// RMS level above which a chunk counts as speech.
    pub energy_threshold: f32,
    /// Trailing silence that ends a phrase, in seconds.
    pub pause_duration: f64,
    /// Ambient noise calibration at startup, in seconds. 0 disables it.
    pub calibration: f64,
    pub dump_last_utterance: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_size: 1024,
            energy_threshold: 0.01,
            pause_duration: 0.8,
            calibration: 1.0,
            dump_last_utterance: false,
        }
    }
}

impl AudioConfig {
    pub fn pause_duration(&self) -> Duration {
        secs(self.pause_duration, Self::default().pause_duration)
    }

    pub fn calibration(&self) -> Duration {
        secs(self.calibration, Self::default().calibration)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    pub model: String,
    pub language: String,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model: "base.en".into(),
            language: "en".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub host: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".into(),
            model: "mistral".into(),
            temperature: 0.7,
            max_tokens: 500,
            timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub host: String,
    pub model: String,
    pub voice: String,
    pub speed: f32,
    pub format: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:8880".into(),
            model: "kokoro".into(),
            voice: "af_heart".into(),
            speed: 1.0,
            format: "mp3".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Alert window in seconds.
    pub window: u64,
    pub trigger_count: usize,
    /// Minimum seconds between two proactive suggestions.
    pub cooldown: u64,
    pub sweep_interval: u64,
    pub continuous_monitoring: bool,
    pub announce_on_arrival: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window: 300,
            trigger_count: 2,
            cooldown: 60,
            sweep_interval: 5,
            continuous_monitoring: true,
            announce_on_arrival: true,
        }
    }
}

impl MonitorConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MusicConfig {
    pub enabled: bool,
    pub tracks: Vec<PathBuf>,
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tracks: vec![
                "relaxing_melody_1.mp3".into(),
                "calm_piano_2.mp3".into(),
                "nature_sounds_3.mp3".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: String,
    pub alert_port: u16,
    pub dashboard_port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0".into(),
            alert_port: 8080,
            dashboard_port: 8081,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

impl JournalConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(".sheero-history")
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub wake: WakeConfig,
    pub audio: AudioConfig,
    pub whisper: WhisperConfig,
    pub ollama: OllamaConfig,
    pub tts: TtsConfig,
    pub monitor: MonitorConfig,
    pub music: MusicConfig,
    pub api: ApiConfig,
    pub journal: JournalConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/sheero/config.yaml
    /// 3. /etc/sheero/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/sheero/config.yaml")),
                Some(PathBuf::from("/etc/sheero/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }
}
