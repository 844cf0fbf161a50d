//! Shared driver state.
//!
//! One instance lives for the whole process and is handed to every worker
//! as an `Arc<DriverState>`. Fields are individually atomic (atomics or a
//! short per-field mutex); there is no lock over the whole record, so
//! cross-field reads may interleave with writers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// Kind of event reported by the driver-state detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    Drowsy,
    Drunk,
    Stress,
    Steer,
    Crash,
}

impl AlertKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "DROWSY" => Some(Self::Drowsy),
            "DRUNK" => Some(Self::Drunk),
            "STRESS" => Some(Self::Stress),
            "STEER" => Some(Self::Steer),
            "CRASH" => Some(Self::Crash),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Drowsy => write!(f, "DROWSY"),
            Self::Drunk => write!(f, "DRUNK"),
            Self::Stress => write!(f, "STRESS"),
            Self::Steer => write!(f, "STEER"),
            Self::Crash => write!(f, "CRASH"),
        }
    }
}

/// Last reported steering direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SteerDirection {
    Straight,
    Left,
    Right,
    Other(String),
}

impl SteerDirection {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "" | "STRAIGHT" => Self::Straight,
            "LEFT" => Self::Left,
            "RIGHT" => Self::Right,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for SteerDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Straight => write!(f, "STRAIGHT"),
            Self::Left => write!(f, "LEFT"),
            Self::Right => write!(f, "RIGHT"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Externally visible assistant state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistantMode {
    #[default]
    Standby,
    Listening,
    Speaking,
}

impl std::fmt::Display for AssistantMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standby => write!(f, "STANDBY"),
            Self::Listening => write!(f, "LISTENING"),
            Self::Speaking => write!(f, "SPEAKING"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AlertFlags {
    pub drowsy: bool,
    pub drunk: bool,
    pub stress: bool,
}

impl AlertFlags {
    pub fn any(&self) -> bool {
        self.drowsy || self.drunk || self.stress
    }
}

/// Payload shown by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DashboardState {
    pub state: AssistantMode,
    pub alert: AlertFlags,
}

/// One entry of the alert history.
#[derive(Debug, Clone, Copy)]
pub struct AlertRecord {
    pub at: Instant,
    pub kind: AlertKind,
}

pub struct DriverState {
    drowsy: AtomicBool,
    drunk: AtomicBool,
    stress: AtomicBool,
    steer: Mutex<SteerDirection>,
    history: Mutex<VecDeque<AlertRecord>>,
    conversation_active: AtomicBool,
    crash_detected: AtomicBool,
    last_suggestion: Mutex<Option<Instant>>,
    continuous_monitoring: bool,
    dashboard: watch::Sender<DashboardState>,
}

impl DriverState {
    pub fn new(continuous_monitoring: bool) -> Self {
        let (dashboard, _) = watch::channel(DashboardState::default());
        Self {
            drowsy: AtomicBool::new(false),
            drunk: AtomicBool::new(false),
            stress: AtomicBool::new(false),
            steer: Mutex::new(SteerDirection::Straight),
            history: Mutex::new(VecDeque::new()),
            conversation_active: AtomicBool::new(false),
            crash_detected: AtomicBool::new(false),
            last_suggestion: Mutex::new(None),
            continuous_monitoring,
            dashboard,
        }
    }

    // --- Alert flags ---

    pub fn flags(&self) -> AlertFlags {
        AlertFlags {
            drowsy: self.drowsy.load(Ordering::SeqCst),
            drunk: self.drunk.load(Ordering::SeqCst),
            stress: self.stress.load(Ordering::SeqCst),
        }
    }

    /// Set the flag for a DROWSY/DRUNK/STRESS alert. Other kinds carry no flag.
    pub fn set_flag(&self, kind: AlertKind, active: bool) {
        let flag = match kind {
            AlertKind::Drowsy => &self.drowsy,
            AlertKind::Drunk => &self.drunk,
            AlertKind::Stress => &self.stress,
            AlertKind::Steer | AlertKind::Crash => return,
        };
        if flag.swap(active, Ordering::SeqCst) != active {
            let flags = self.flags();
            self.dashboard.send_modify(|d| d.alert = flags);
        }
    }

    // --- History ---

    pub fn record_alert(&self, kind: AlertKind, at: Instant) {
        self.history.lock().unwrap().push_back(AlertRecord { at, kind });
    }

    /// Run `f` with exclusive access to the alert history.
    pub fn with_history<R>(&self, f: impl FnOnce(&mut VecDeque<AlertRecord>) -> R) -> R {
        f(&mut self.history.lock().unwrap())
    }

    // --- Steering ---

    pub fn steer(&self) -> SteerDirection {
        self.steer.lock().unwrap().clone()
    }

    pub fn set_steer(&self, direction: SteerDirection) {
        *self.steer.lock().unwrap() = direction;
    }

    // --- Conversation / crash / monitoring ---

    pub fn conversation_active(&self) -> bool {
        self.conversation_active.load(Ordering::SeqCst)
    }

    pub fn set_conversation_active(&self, active: bool) {
        if self.conversation_active.swap(active, Ordering::SeqCst) != active {
            debug!("Conversation active: {active}");
        }
    }

    pub fn crash_detected(&self) -> bool {
        self.crash_detected.load(Ordering::SeqCst)
    }

    /// Sticky; nothing in the assistant clears it.
    pub fn mark_crash(&self) {
        self.crash_detected.store(true, Ordering::SeqCst);
    }

    pub fn continuous_monitoring(&self) -> bool {
        self.continuous_monitoring
    }

    pub fn last_suggestion(&self) -> Option<Instant> {
        *self.last_suggestion.lock().unwrap()
    }

    pub fn stamp_suggestion(&self, at: Instant) {
        *self.last_suggestion.lock().unwrap() = Some(at);
    }

    // --- Mode / dashboard ---

    pub fn mode(&self) -> AssistantMode {
        self.dashboard.borrow().state
    }

    /// Only the arbiter calls this; everyone else goes through `Arbiter::set_mode`.
    pub(crate) fn publish_mode(&self, mode: AssistantMode) -> AssistantMode {
        let mut previous = mode;
        self.dashboard.send_modify(|d| {
            previous = d.state;
            d.state = mode;
        });
        previous
    }

    pub fn dashboard(&self) -> DashboardState {
        *self.dashboard.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.dashboard.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_alert_kinds_case_insensitively() {
        assert_eq!(AlertKind::parse("drowsy"), Some(AlertKind::Drowsy));
        assert_eq!(AlertKind::parse(" CRASH "), Some(AlertKind::Crash));
        assert_eq!(AlertKind::parse("sleepy"), None);
    }

    #[test]
    fn steer_direction_keeps_unknown_names() {
        assert_eq!(SteerDirection::parse("left"), SteerDirection::Left);
        assert_eq!(SteerDirection::parse(""), SteerDirection::Straight);
        assert_eq!(SteerDirection::parse("hard_left").to_string(), "HARD_LEFT");
    }

    #[test]
    fn flag_changes_are_pushed_to_subscribers() {
        let state = DriverState::new(true);
        let mut rx = state.subscribe();
        state.set_flag(AlertKind::Drowsy, true);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().alert.drowsy);

        // Same value again is not a change.
        state.set_flag(AlertKind::Drowsy, true);
        assert!(!rx.has_changed().unwrap());

        state.set_flag(AlertKind::Steer, true);
        assert!(!state.flags().stress);
    }

    #[test]
    fn crash_flag_is_sticky() {
        let state = DriverState::new(true);
        assert!(!state.crash_detected());
        state.mark_crash();
        state.set_flag(AlertKind::Crash, false);
        assert!(state.crash_detected());
    }

    #[test]
    fn dashboard_serializes_like_the_ui_expects() {
        let state = DriverState::new(true);
        state.set_flag(AlertKind::Stress, true);
        state.publish_mode(AssistantMode::Listening);
        let json = serde_json::to_value(state.dashboard()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "state": "listening",
                "alert": {"drowsy": false, "drunk": false, "stress": true}
            })
        );
    }
}
