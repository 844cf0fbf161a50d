//! sheero: voice assistant for an in-vehicle driver safety monitor.

mod api;
mod backend;
mod capture;
mod config;
mod error;
mod gate;
mod ingest;
mod journal;
mod listener;
mod monitor;
mod playback;
mod queues;
mod recognizer;
mod router;
mod state;
mod supervisor;
mod synth;
mod threshold;
mod transcriber;
mod tts_worker;

#[cfg(test)]
mod test_support;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::backend::{OllamaBackend, ResponseBackend};
use crate::gate::Arbiter;
use crate::ingest::AlertIngest;
use crate::journal::Journal;
use crate::playback::{AudioPlayer, RodioPlayer};
use crate::queues::SpeechSource;
use crate::state::DriverState;
use crate::supervisor::Supervisor;
use crate::synth::HttpSynthesizer;

/// Upper bound on draining queued speech at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(name = "sheero", about = "Voice assistant for a driver safety monitor")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    /// Run without the microphone (alerts and dashboard only)
    #[arg(long)]
    no_listener: bool,

    /// Print the speech journal report for a date (YYYY-MM-DD or "today") and exit
    #[arg(long, value_name = "DATE")]
    report: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy whisper.cpp internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,whisper_rs=info,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("info,whisper_rs=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = config::Config::load(args.config.as_deref());

    if let Some(date) = args.report {
        let journal = Journal::new(config.journal.resolved_dir());
        println!("{}", journal.report(&date));
        return Ok(());
    }

    info!("sheero starting");
    info!(
        "Wake phrase \"{}\", alert window {}s, trigger count {}, cooldown {}s",
        config.wake.phrase, config.monitor.window, config.monitor.trigger_count, config.monitor.cooldown
    );

    // The microphone comes first: without it there is no point starting.
    let recognizer = if args.no_listener {
        info!("Listener disabled, running alert-only");
        None
    } else {
        let mic = capture::MicCapture::open(&config.audio)?;
        mic.calibrate(config.audio.calibration()).await;

        info!("Loading Whisper model...");
        let transcriber = tokio::task::spawn_blocking({
            let whisper_config = config.whisper.clone();
            move || transcriber::WhisperTranscriber::load(&whisper_config)
        })
        .await??;
        Some(Arc::new(recognizer::WhisperRecognizer::new(
            mic,
            transcriber,
            config.audio.dump_last_utterance,
        )))
    };

    let player: Arc<dyn AudioPlayer> = Arc::new(RodioPlayer::spawn()?);
    let synth = Arc::new(HttpSynthesizer::new(config.tts.clone())?);
    let ollama = OllamaBackend::new(config.ollama.clone())?;
    ollama.report_model_status().await;
    let backend: Arc<dyn ResponseBackend> = Arc::new(ollama);

    let state = Arc::new(DriverState::new(config.monitor.continuous_monitoring));
    let arbiter = Arc::new(Arbiter::new(state.clone()));
    let (senders, receivers) = queues::channels();
    let journal = config
        .journal
        .enabled
        .then(|| Journal::new(config.journal.resolved_dir()));

    let mut supervisor = Supervisor::new();

    let tts = tts_worker::TtsWorker::new(arbiter.clone(), synth, player.clone(), journal);
    supervisor.spawn("tts", |cancel| tts.run(receivers.tts, cancel));

    let router = router::CommandRouter::new(
        state.clone(),
        senders.speaker.clone(),
        backend.clone(),
        config.wake.phrase.clone(),
        config.music.tracks.clone(),
        config.music.enabled.then(|| player.clone()),
    );
    supervisor.spawn("router", |cancel| router.run(receivers.speech, cancel));

    let monitor = monitor::AlertMonitor::new(
        state.clone(),
        threshold::InterventionPolicy::from_config(&config.monitor),
        backend,
        senders.speaker.clone(),
        config.monitor.sweep_interval(),
    );
    supervisor.spawn("monitor", |cancel| monitor.run(receivers.alerts, cancel));

    if let Some(recognizer) = recognizer {
        let listener = listener::WakeListener::new(
            config.wake.clone(),
            recognizer,
            arbiter.clone(),
            state.clone(),
            senders.speaker.clone(),
            senders.speech.clone(),
        );
        supervisor.spawn("listener", |cancel| listener.run(cancel));
    }

    if config.api.enabled {
        let ingest = AlertIngest::new(
            state.clone(),
            senders.alerts.clone(),
            senders.speaker.clone(),
            config.monitor.announce_on_arrival,
        );
        api::serve(
            "Alert",
            format!("{}:{}", config.api.bind, config.api.alert_port),
            api::alert_router(ingest),
            supervisor.token(),
        )
        .await;
        api::serve(
            "Dashboard",
            format!("{}:{}", config.api.bind, config.api.dashboard_port),
            api::dashboard_router(state.clone()),
            supervisor.token(),
        )
        .await;
    } else {
        warn!("HTTP API disabled, no alerts will be received");
    }

    senders.speaker.speak(SpeechSource::System, "Assistant starting up.");
    info!("All systems initialized. Assistant is running (Ctrl-C to stop)");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    senders.speaker.speak(SpeechSource::System, "Assistant shutting down. Drive safely.");
    supervisor.shutdown(SHUTDOWN_GRACE).await;

    Ok(())
}
