//! TTS worker: the only consumer of the TTS queue and the only owner of
//! the speaker.
//!
//! Items are handled strictly one at a time. For each item the arbiter
//! shows `SPEAKING` with the mic muted from dequeue until playback ends,
//! and the playback guard restores `STANDBY` and the gate on every path.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::gate::Arbiter;
use crate::journal::{Journal, SpeechRecord};
use crate::playback::AudioPlayer;
use crate::queues::TtsRequest;
use crate::synth::Synthesizer;

pub struct TtsWorker {
    arbiter: Arc<Arbiter>,
    synth: Arc<dyn Synthesizer>,
    player: Arc<dyn AudioPlayer>,
    journal: Option<Journal>,
}

impl TtsWorker {
    pub fn new(
        arbiter: Arc<Arbiter>,
        synth: Arc<dyn Synthesizer>,
        player: Arc<dyn AudioPlayer>,
        journal: Option<Journal>,
    ) -> Self {
        Self {
            arbiter,
            synth,
            player,
            journal,
        }
    }

    /// Speak one item. Never fails; problems are logged and journaled.
    pub async fn handle(&self, request: TtsRequest) {
        let TtsRequest { text, source, done } = request;
        let mut record = SpeechRecord::now(source, &text);

        {
            let _playback = self.arbiter.begin_playback();
            debug!("Speaking [{source}]: \"{text}\"");
            if let Err(e) = self.synth_and_play(&text, &mut record).await {
                warn!("Speech [{source}] failed: {e}");
                record.failed = true;
            }
        }

        if let Some(journal) = &self.journal {
            journal.save(&record);
        }
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    async fn synth_and_play(&self, text: &str, record: &mut SpeechRecord) -> Result<()> {
        let t0 = Instant::now();
        let audio = self.synth.synthesize(text).await?;
        record.synth_ms = t0.elapsed().as_millis() as u64;

        let t1 = Instant::now();
        self.player.play(audio).await?;
        record.playback_ms = t1.elapsed().as_millis() as u64;
        Ok(())
    }

    /// Consume the queue until cancelled, then drain what is left.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<TtsRequest>, cancel: CancellationToken) {
        info!("TTS worker started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => {
                        warn!("TTS queue closed");
                        return;
                    }
                },
            }
        }

        rx.close();
        let mut drained = 0usize;
        while let Some(request) = rx.recv().await {
            self.handle(request).await;
            drained += 1;
        }
        info!("TTS worker stopped ({drained} queued items spoken on shutdown)");
    }
}
