//! Mic/speaker arbiter.
//!
//! One boolean gate decides whether the listener may sample the microphone.
//! The TTS worker closes it for the whole of a playback and reopens it when
//! playback ends, successfully or not. Waiters are woken by a `Notify`
//! instead of polling the flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, info};

use crate::state::{AssistantMode, DriverState};

/// Microphone gate: `true` while the listener may sample audio.
pub struct VoiceGate {
    mic_active: AtomicBool,
    rearmed: Notify,
}

impl VoiceGate {
    fn new() -> Self {
        Self {
            mic_active: AtomicBool::new(true),
            rearmed: Notify::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.mic_active.load(Ordering::SeqCst)
    }

    fn set(&self, active: bool) {
        self.mic_active.store(active, Ordering::SeqCst);
        if active {
            self.rearmed.notify_waiters();
        }
    }

    /// Wait until the gate is open.
    pub async fn wait_active(&self) {
        loop {
            let notified = self.rearmed.notified();
            tokio::pin!(notified);
            // Register before checking so a re-arm between the check and the
            // await is not lost.
            notified.as_mut().enable();
            if self.is_active() {
                return;
            }
            notified.await;
        }
    }
}

pub struct Arbiter {
    gate: VoiceGate,
    playing: AtomicBool,
    state: Arc<DriverState>,
}

impl Arbiter {
    pub fn new(state: Arc<DriverState>) -> Self {
        Self {
            gate: VoiceGate::new(),
            playing: AtomicBool::new(false),
            state,
        }
    }

    pub fn mode(&self) -> AssistantMode {
        self.state.mode()
    }

    /// Update the visible mode and publish it to the dashboard.
    ///
    /// While a playback is in progress only `Speaking` is accepted; any
    /// other request is dropped and `false` is returned.
    pub fn set_mode(&self, mode: AssistantMode) -> bool {
        if self.is_playing() && mode != AssistantMode::Speaking {
            debug!("Mode {mode} ignored during playback");
            return false;
        }
        let previous = self.state.publish_mode(mode);
        if previous != mode {
            info!("Mode: {previous} → {mode}");
        }
        true
    }

    pub fn mic_active(&self) -> bool {
        self.gate.is_active()
    }

    pub fn mute_mic(&self) {
        self.gate.set(false);
    }

    /// Reopen the gate. Only a finished (or failed) playback does this.
    fn unmute_mic(&self) {
        self.gate.set(true);
    }

    pub async fn wait_for_mic(&self) {
        self.gate.wait_active().await;
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Take the output channel: mutes the mic and shows `Speaking` until the
    /// returned guard is dropped.
    pub fn begin_playback(&self) -> PlaybackGuard<'_> {
        self.mute_mic();
        self.playing.store(true, Ordering::SeqCst);
        self.set_mode(AssistantMode::Speaking);
        PlaybackGuard { arbiter: self }
    }

    fn end_playback(&self) {
        self.playing.store(false, Ordering::SeqCst);
        self.set_mode(AssistantMode::Standby);
        self.unmute_mic();
    }
}

/// Releases the output channel on drop, on every exit path.
pub struct PlaybackGuard<'a> {
    arbiter: &'a Arbiter,
}

impl Drop for PlaybackGuard<'_> {
    fn drop(&mut self) {
        self.arbiter.end_playback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn arbiter() -> Arbiter {
        Arbiter::new(Arc::new(DriverState::new(true)))
    }

    #[test]
    fn playback_guard_mutes_and_restores() {
        let arbiter = arbiter();
        assert!(arbiter.mic_active());
        {
            let _guard = arbiter.begin_playback();
            assert!(!arbiter.mic_active());
            assert_eq!(arbiter.mode(), AssistantMode::Speaking);
            assert!(arbiter.is_playing());
        }
        assert!(arbiter.mic_active());
        assert_eq!(arbiter.mode(), AssistantMode::Standby);
        assert!(!arbiter.is_playing());
    }

    #[test]
    fn listening_is_rejected_while_speaking() {
        let arbiter = arbiter();
        let guard = arbiter.begin_playback();
        assert!(!arbiter.set_mode(AssistantMode::Listening));
        assert_eq!(arbiter.mode(), AssistantMode::Speaking);
        drop(guard);
        assert!(arbiter.set_mode(AssistantMode::Listening));
        assert_eq!(arbiter.mode(), AssistantMode::Listening);
    }

    #[test]
    fn guard_releases_even_when_unwinding() {
        let arbiter = arbiter();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = arbiter.begin_playback();
            panic!("synthesis blew up");
        }));
        assert!(result.is_err());
        assert!(arbiter.mic_active());
        assert_eq!(arbiter.mode(), AssistantMode::Standby);
    }

    #[tokio::test]
    async fn waiter_wakes_on_rearm() {
        let arbiter = Arc::new(arbiter());
        arbiter.mute_mic();

        let waiter = {
            let arbiter = arbiter.clone();
            tokio::spawn(async move { arbiter.wait_for_mic().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(arbiter.begin_playback());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
