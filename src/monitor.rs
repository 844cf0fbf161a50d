//! Alert monitor: reacts to dequeued alerts and sweeps periodically so a
//! sustained condition still gets a nudge once the cooldown lapses.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::ResponseBackend;
use crate::queues::{SpeechSource, Speaker};
use crate::state::{AlertKind, DriverState};
use crate::threshold::{Decision, InterventionPolicy, SkipReason, Trigger};

pub const CRASH_CHECK: &str =
    "I've detected a possible collision. Are you okay? Please respond or I'll call emergency services.";

/// What the monitor did with one alert or sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    CrashCheck,
    Intervened,
    /// The threshold said yes but no flag is active to talk about.
    NothingToSay,
    Skipped(SkipReason),
}

pub struct AlertMonitor {
    state: Arc<DriverState>,
    policy: InterventionPolicy,
    backend: Arc<dyn ResponseBackend>,
    speaker: Speaker,
    sweep_interval: Duration,
}

impl AlertMonitor {
    pub fn new(
        state: Arc<DriverState>,
        policy: InterventionPolicy,
        backend: Arc<dyn ResponseBackend>,
        speaker: Speaker,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            state,
            policy,
            backend,
            speaker,
            sweep_interval,
        }
    }

    pub async fn react(&self, kind: AlertKind) -> Reaction {
        debug!("Processing alert: {kind}");
        if kind == AlertKind::Crash {
            // Bypasses threshold, cooldown and conversation suppression.
            self.speaker.speak(SpeechSource::Crash, CRASH_CHECK);
            return Reaction::CrashCheck;
        }
        self.evaluate(Trigger::NewAlert).await
    }

    pub async fn sweep(&self) -> Reaction {
        self.evaluate(Trigger::Sweep).await
    }

    async fn evaluate(&self, trigger: Trigger) -> Reaction {
        let now = Instant::now();
        if let Decision::Skip(reason) = self.policy.decide(trigger, &self.state, now) {
            return Reaction::Skipped(reason);
        }

        let Some(prompt) = self.context_prompt(now) else {
            return Reaction::NothingToSay;
        };
        info!("Intervening ({trigger:?})");
        let suggestion = self.backend.generate(&prompt, None).await;
        self.speaker.speak(SpeechSource::Intervention, suggestion);
        self.state.stamp_suggestion(Instant::now());
        Reaction::Intervened
    }

    /// Describe the driver's condition for the backend. `None` when no
    /// alert flag is raised.
    pub fn context_prompt(&self, now: Instant) -> Option<String> {
        let flags = self.state.flags();
        let mut conditions = Vec::new();
        if flags.drowsy {
            conditions.push("drowsiness");
        }
        if flags.drunk {
            conditions.push("possible impairment or unwellness");
        }
        if flags.stress {
            conditions.push("signs of stress");
        }
        if conditions.is_empty() {
            return None;
        }

        let recent = self.policy.recent_count(&self.state, now);
        let minutes = self.policy.window.as_secs() / 60;
        Some(format!(
            "BE EXTREMELY SHORT IN YOUR RESPONSES. GIVE 1 line answer.\n\
             As a driving assistant, I need to help a driver who is showing {}.\n\
             The driver has had {recent} safety alerts in the past {minutes} minutes.\n\
             Current steering direction: {}\n\n\
             Provide a brief, helpful suggestion that is:\n\
             1. Calming and supportive in tone\n\
             2. Safety-focused without being judgmental\n\
             3. Actionable (something the driver can do immediately)\n\
             4. Brief (under 20 words if possible)",
            conditions.join(" and "),
            self.state.steer(),
        ))
    }

    pub async fn run(self, mut alerts: mpsc::UnboundedReceiver<AlertKind>, cancel: CancellationToken) {
        info!("Alert monitor started (sweep every {:?})", self.sweep_interval);
        let mut sweep = tokio::time::interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let reaction = tokio::select! {
                _ = cancel.cancelled() => break,
                alert = alerts.recv() => match alert {
                    Some(kind) => self.react(kind).await,
                    None => break,
                },
                _ = sweep.tick() => self.sweep().await,
            };
            debug!("Monitor: {reaction:?}");
        }
        info!("Alert monitor stopped");
    }
}
