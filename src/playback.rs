//! Audio output with rodio.
//!
//! The output stream lives on its own thread for the process lifetime.
//! Callers hand it jobs over a channel and get a oneshot reply once the
//! job has finished playing (speech) or started (ambient music).

use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;

use async_trait::async_trait;
use rodio::{Decoder, OutputStreamBuilder, Sink};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{AssistantError, Result};

#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Play encoded speech audio. Resolves when playback has finished.
    async fn play(&self, audio: Vec<u8>) -> Result<()>;

    /// Start a background track, replacing any track already playing.
    async fn play_ambient(&self, track: &Path) -> Result<()>;
}

enum Job {
    Speech(Vec<u8>),
    Ambient(PathBuf),
}

struct PlaybackJob {
    job: Job,
    reply: oneshot::Sender<Result<()>>,
}

pub struct RodioPlayer {
    jobs: std_mpsc::Sender<PlaybackJob>,
}

impl RodioPlayer {
    /// Open the default output device on a dedicated thread.
    pub fn spawn() -> Result<Self> {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<std::result::Result<(), String>>(1);
        let (jobs_tx, jobs_rx) = std_mpsc::channel::<PlaybackJob>();

        std::thread::Builder::new()
            .name("audio-out".into())
            .spawn(move || {
                let mut stream = match OutputStreamBuilder::open_default_stream() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("Failed to open audio output: {e}")));
                        return;
                    }
                };
                stream.log_on_drop(false);
                let _ = ready_tx.send(Ok(()));

                let mut ambient: Option<Sink> = None;
                // Ends once every sender is dropped.
                while let Ok(PlaybackJob { job, reply }) = jobs_rx.recv() {
                    let result = match job {
                        Job::Speech(audio) => {
                            let sink = Sink::connect_new(stream.mixer());
                            match Decoder::new(Cursor::new(audio)) {
                                Ok(source) => {
                                    sink.append(source);
                                    sink.sleep_until_end();
                                    Ok(())
                                }
                                Err(e) => Err(AssistantError::Playback(format!(
                                    "Failed to decode speech audio: {e}"
                                ))),
                            }
                        }
                        Job::Ambient(path) => {
                            if let Some(previous) = ambient.take() {
                                previous.stop();
                            }
                            match open_track(&path) {
                                Ok(source) => {
                                    let sink = Sink::connect_new(stream.mixer());
                                    sink.append(source);
                                    ambient = Some(sink);
                                    info!("Playing {}", path.display());
                                    Ok(())
                                }
                                Err(e) => Err(e),
                            }
                        }
                    };
                    let _ = reply.send(result);
                }
                debug!("Audio output closed");
            })
            .map_err(AssistantError::Io)?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { jobs: jobs_tx }),
            Ok(Err(e)) => Err(AssistantError::AudioDevice(e)),
            Err(_) => Err(AssistantError::AudioDevice(
                "audio output thread exited during startup".into(),
            )),
        }
    }

    async fn submit(&self, job: Job) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.jobs
            .send(PlaybackJob { job, reply })
            .map_err(|_| AssistantError::Playback("audio output thread is gone".into()))?;
        done.await
            .map_err(|_| AssistantError::Playback("audio output thread dropped the job".into()))?
    }
}

fn open_track(path: &Path) -> Result<Decoder<BufReader<std::fs::File>>> {
    let file = std::fs::File::open(path).map_err(|e| {
        warn!("Cannot open track {}: {e}", path.display());
        AssistantError::Playback(format!("{}: {e}", path.display()))
    })?;
    Decoder::new(BufReader::new(file))
        .map_err(|e| AssistantError::Playback(format!("Failed to decode {}: {e}", path.display())))
}

#[async_trait]
impl AudioPlayer for RodioPlayer {
    async fn play(&self, audio: Vec<u8>) -> Result<()> {
        self.submit(Job::Speech(audio)).await
    }

    async fn play_ambient(&self, track: &Path) -> Result<()> {
        self.submit(Job::Ambient(track.to_path_buf())).await
    }
}
