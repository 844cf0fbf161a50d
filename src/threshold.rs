//! Alert threshold engine.
//!
//! Decides whether a proactive spoken intervention is warranted from the
//! alert history, a trailing window, a trigger count and a cooldown
//! measured from the last suggestion. Both the per-alert path and the
//! periodic sweep go through [`InterventionPolicy::decide`].

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::MonitorConfig;
use crate::state::{AlertRecord, DriverState};

/// What caused the evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A DROWSY/DRUNK/STRESS alert was just dequeued.
    NewAlert,
    /// The periodic sweep fired.
    Sweep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MonitoringDisabled,
    NoActiveCondition,
    ConversationActive,
    Cooldown,
    BelowThreshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Intervene,
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy)]
pub struct InterventionPolicy {
    pub window: Duration,
    pub trigger_count: usize,
    pub cooldown: Duration,
}

impl Default for InterventionPolicy {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

impl InterventionPolicy {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            window: Duration::from_secs(config.window),
            trigger_count: config.trigger_count,
            cooldown: Duration::from_secs(config.cooldown),
        }
    }

    /// Drop entries that are `window` old or older.
    pub fn prune(&self, history: &mut VecDeque<AlertRecord>, now: Instant) {
        history.retain(|r| {
            let keep = now.saturating_duration_since(r.at) < self.window;
            if !keep {
                debug!("{} alert aged out of the window", r.kind);
            }
            keep
        });
    }

    pub fn cooldown_active(&self, last_suggestion: Option<Instant>, now: Instant) -> bool {
        last_suggestion.is_some_and(|at| now.saturating_duration_since(at) < self.cooldown)
    }

    /// Prune, then apply cooldown before count.
    pub fn should_intervene(
        &self,
        history: &mut VecDeque<AlertRecord>,
        last_suggestion: Option<Instant>,
        now: Instant,
    ) -> bool {
        self.prune(history, now);
        if self.cooldown_active(last_suggestion, now) {
            return false;
        }
        history.len() >= self.trigger_count
    }

    /// Full decision including the trigger-specific preconditions and
    /// conversation suppression. A new alert needs `trigger_count` alerts in
    /// the window; a sweep only needs the cooldown to have lapsed. CRASH never reaches this; it is handled
    /// unconditionally by the monitor.
    pub fn decide(&self, trigger: Trigger, state: &DriverState, now: Instant) -> Decision {
        if trigger == Trigger::Sweep {
            if !state.continuous_monitoring() {
                return Decision::Skip(SkipReason::MonitoringDisabled);
            }
            let any_condition = state.flags().any()
                || state.crash_detected()
                || state.conversation_active();
            if !any_condition {
                return Decision::Skip(SkipReason::NoActiveCondition);
            }
        }

        if state.conversation_active() {
            return Decision::Skip(SkipReason::ConversationActive);
        }

        let last = state.last_suggestion();
        let intervene = state.with_history(|h| match trigger {
            Trigger::NewAlert => self.should_intervene(h, last, now),
            // A sustained condition only waits out the cooldown.
            Trigger::Sweep => {
                self.prune(h, now);
                !self.cooldown_active(last, now)
            }
        });
        if intervene {
            Decision::Intervene
        } else if self.cooldown_active(last, now) {
            Decision::Skip(SkipReason::Cooldown)
        } else {
            Decision::Skip(SkipReason::BelowThreshold)
        }
    }

    /// Number of history entries still inside the window.
    pub fn recent_count(&self, state: &DriverState, now: Instant) -> usize {
        state.with_history(|h| {
            self.prune(h, now);
            h.len()
        })
    }
}
