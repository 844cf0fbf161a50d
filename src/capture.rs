//! Microphone capture with cpal and energy-based endpointing.
//!
//! The input stream is opened once at startup and stays open for the
//! process lifetime on its own thread (cpal streams are not `Send`).
//! A capture arms the callback, waits for speech to start within a
//! timeout, and ends on trailing silence or the phrase limit.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AudioConfig;
use crate::error::{AssistantError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Calibrated threshold sits this far above the ambient RMS.
const DYNAMIC_RATIO: f32 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    Waiting,
    Speaking,
    Complete,
}

/// Splits a stream of chunks into one utterance.
///
/// Speech starts with the first chunk at or above the threshold. It ends
/// after `pause_samples` of consecutive sub-threshold audio or once
/// `max_samples` have been collected.
#[derive(Debug)]
pub struct Endpointer {
    threshold: f32,
    pause_samples: usize,
    max_samples: usize,
    silence_run: usize,
    status: EndpointStatus,
    pre_roll: Vec<f32>,
    buffer: Vec<f32>,
}

impl Endpointer {
    pub fn new(threshold: f32, pause_samples: usize, max_samples: usize) -> Self {
        Self {
            threshold,
            pause_samples,
            max_samples: max_samples.max(1),
            silence_run: 0,
            status: EndpointStatus::Waiting,
            pre_roll: Vec::new(),
            buffer: Vec::new(),
        }
    }

    pub fn status(&self) -> EndpointStatus {
        self.status
    }

    pub fn feed(&mut self, chunk: &[f32]) {
        if chunk.is_empty() || self.status == EndpointStatus::Complete {
            return;
        }
        let loud = rms_energy(chunk) >= self.threshold;

        if self.status == EndpointStatus::Waiting {
            if !loud {
                // Keep one chunk so the onset is not clipped.
                self.pre_roll.clear();
                self.pre_roll.extend_from_slice(chunk);
                return;
            }
            self.status = EndpointStatus::Speaking;
            self.buffer = std::mem::take(&mut self.pre_roll);
        }

        let remaining = self.max_samples.saturating_sub(self.buffer.len());
        let to_copy = chunk.len().min(remaining);
        self.buffer.extend_from_slice(&chunk[..to_copy]);
        if self.buffer.len() >= self.max_samples {
            debug!("Phrase limit reached");
            self.status = EndpointStatus::Complete;
            return;
        }

        if loud {
            self.silence_run = 0;
        } else {
            self.silence_run += chunk.len();
            if self.silence_run >= self.pause_samples {
                self.status = EndpointStatus::Complete;
            }
        }
    }

    pub fn take(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.buffer)
    }
}

struct CaptureInner {
    armed: bool,
    threshold: f32,
    endpointer: Endpointer,
    /// Running (sum of squares, sample count) while calibrating.
    ambient: Option<(f64, usize)>,
}

/// Always-open microphone.
pub struct MicCapture {
    config: AudioConfig,
    shared: Arc<Mutex<CaptureInner>>,
    /// Dropping this ends the stream thread.
    _shutdown: std_mpsc::Sender<()>,
}

impl MicCapture {
    /// Open the default input device. Fails if no microphone is usable.
    pub fn open(config: &AudioConfig) -> Result<Self> {
        let shared = Arc::new(Mutex::new(CaptureInner {
            armed: false,
            threshold: config.energy_threshold,
            endpointer: Endpointer::new(config.energy_threshold, 0, 1),
            ambient: None,
        }));

        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<std::result::Result<(), String>>(1);
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let thread_shared = Arc::clone(&shared);
        let thread_config = config.clone();
        std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || {
                let stream = match build_stream(&thread_config, thread_shared) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until the sender is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("Microphone stream closed");
            })
            .map_err(AssistantError::Io)?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(AssistantError::AudioDevice(e)),
            Err(_) => {
                return Err(AssistantError::AudioDevice(
                    "capture thread exited during startup".into(),
                ))
            }
        }

        Ok(Self {
            config: config.clone(),
            shared,
            _shutdown: shutdown_tx,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Measure ambient noise and raise the energy threshold above it.
    pub async fn calibrate(&self, duration: Duration) -> f32 {
        if duration.is_zero() {
            return self.shared.lock().unwrap().threshold;
        }
        self.shared.lock().unwrap().ambient = Some((0.0, 0));
        tokio::time::sleep(duration).await;

        let mut inner = self.shared.lock().unwrap();
        let (sum_sq, count) = inner.ambient.take().unwrap_or((0.0, 0));
        let ambient = if count == 0 {
            0.0
        } else {
            (sum_sq / count as f64).sqrt() as f32
        };
        inner.threshold = calibrated_threshold(self.config.energy_threshold, ambient);
        info!(
            "Ambient noise RMS {ambient:.4}, energy threshold {:.4}",
            inner.threshold
        );
        inner.threshold
    }

    /// Capture one utterance.
    ///
    /// Returns `RecognitionTimeout` if no speech starts within `timeout`.
    pub async fn capture(&self, timeout: Duration, phrase_limit: Duration) -> Result<Vec<f32>> {
        let rate = self.config.sample_rate as f64;
        let pause_samples = (self.config.pause_duration().as_secs_f64() * rate) as usize;
        let max_samples = (phrase_limit.as_secs_f64() * rate) as usize;
        {
            let mut inner = self.shared.lock().unwrap();
            inner.endpointer = Endpointer::new(inner.threshold, pause_samples, max_samples);
            inner.armed = true;
        }

        let started = Instant::now();
        // Guard against a stalled device that stops delivering chunks.
        let hard_limit = timeout + phrase_limit + Duration::from_secs(1);
        let mut tick = tokio::time::interval(POLL_INTERVAL);

        loop {
            tick.tick().await;
            let mut inner = self.shared.lock().unwrap();
            let status = inner.endpointer.status();
            let elapsed = started.elapsed();

            let outcome = match status {
                EndpointStatus::Complete => Some(Ok(inner.endpointer.take())),
                EndpointStatus::Waiting if elapsed >= timeout => {
                    Some(Err(AssistantError::RecognitionTimeout))
                }
                EndpointStatus::Speaking if elapsed >= hard_limit => {
                    warn!("Audio stopped arriving mid-phrase, using partial capture");
                    Some(Ok(inner.endpointer.take()))
                }
                _ => None,
            };

            if let Some(outcome) = outcome {
                inner.armed = false;
                if let Ok(samples) = &outcome {
                    debug!(
                        "Captured {:.1}s of audio",
                        samples.len() as f64 / rate
                    );
                }
                return outcome;
            }
        }
    }
}

fn calibrated_threshold(configured: f32, ambient: f32) -> f32 {
    configured.max(ambient * DYNAMIC_RATIO)
}

fn build_stream(
    config: &AudioConfig,
    shared: Arc<Mutex<CaptureInner>>,
) -> std::result::Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or("No input audio device available")?;

    info!(
        "Using audio device: {}",
        device.name().unwrap_or("unknown".into())
    );

    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(config.chunk_size),
    };
    let channels = usize::from(config.channels.max(1));

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = downmix(data, channels);
                let mut inner = shared.lock().unwrap();

                if let Some((sum_sq, count)) = inner.ambient.as_mut() {
                    *sum_sq += mono.iter().map(|s| f64::from(s * s)).sum::<f64>();
                    *count += mono.len();
                }

                if inner.armed {
                    inner.endpointer.feed(&mono);
                }
            },
            move |err| {
                warn!("Audio stream error: {err}");
            },
            None,
        )
        .map_err(|e| format!("Failed to build input stream: {e}"))?;

    stream.play().map_err(|e| format!("Failed to start audio stream: {e}"))?;
    info!("Microphone stream opened");
    Ok(stream)
}

fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// RMS energy of audio samples.
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: [f32; 100] = [0.001; 100];
    const LOUD: [f32; 100] = [0.2; 100];

    #[test]
    fn waits_until_speech_starts() {
        let mut ep = Endpointer::new(0.01, 300, 10_000);
        ep.feed(&QUIET);
        ep.feed(&QUIET);
        assert_eq!(ep.status(), EndpointStatus::Waiting);
        ep.feed(&LOUD);
        assert_eq!(ep.status(), EndpointStatus::Speaking);
    }

    #[test]
    fn trailing_silence_completes_the_phrase() {
        let mut ep = Endpointer::new(0.01, 300, 10_000);
        ep.feed(&QUIET);
        ep.feed(&LOUD);
        ep.feed(&QUIET);
        ep.feed(&QUIET);
        assert_eq!(ep.status(), EndpointStatus::Speaking);
        ep.feed(&QUIET);
        assert_eq!(ep.status(), EndpointStatus::Complete);
        // Pre-roll + speech + three silent chunks.
        assert_eq!(ep.take().len(), 500);
    }

    #[test]
    fn loud_chunk_resets_the_pause() {
        let mut ep = Endpointer::new(0.01, 300, 10_000);
        ep.feed(&LOUD);
        ep.feed(&QUIET);
        ep.feed(&QUIET);
        ep.feed(&LOUD);
        ep.feed(&QUIET);
        ep.feed(&QUIET);
        assert_eq!(ep.status(), EndpointStatus::Speaking);
    }

    #[test]
    fn phrase_limit_truncates() {
        let mut ep = Endpointer::new(0.01, 10_000, 250);
        ep.feed(&LOUD);
        ep.feed(&LOUD);
        assert_eq!(ep.status(), EndpointStatus::Speaking);
        ep.feed(&LOUD);
        assert_eq!(ep.status(), EndpointStatus::Complete);
        assert_eq!(ep.take().len(), 250);
        ep.feed(&LOUD);
        assert!(ep.take().is_empty());
    }

    #[test]
    fn calibration_never_lowers_the_threshold() {
        assert_eq!(calibrated_threshold(0.01, 0.001), 0.01);
        assert!((calibrated_threshold(0.01, 0.02) - 0.03).abs() < 1e-6);
    }

    #[test]
    fn downmix_averages_frames() {
        assert_eq!(downmix(&[0.25, 0.75, -0.5, 0.5], 2), vec![0.5, 0.0]);
        assert_eq!(downmix(&[0.5, 0.1], 1), vec![0.5, 0.1]);
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms_energy(&[]), 0.0);
        assert_eq!(rms_energy(&[0.0; 16]), 0.0);
    }
}
