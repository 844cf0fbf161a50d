//! Alert ingestion from the driver-state detector.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{AssistantError, Result};
use crate::queues::{SpeechSource, Speaker};
use crate::state::{AlertKind, DriverState, SteerDirection};

/// Wire format of an alert: `{type, state, direction?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertPayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_state")]
    pub state: bool,
    #[serde(default)]
    pub direction: Option<String>,
}

fn default_state() -> bool {
    true
}

fn arrival_notice(kind: AlertKind) -> Option<&'static str> {
    match kind {
        AlertKind::Drowsy => Some("You seem a bit drowsy. Maybe pull over and rest."),
        AlertKind::Drunk => Some("You seem impaired. Consider stopping driving."),
        AlertKind::Stress => Some("You seem stressed. Take a moment to relax before continuing."),
        AlertKind::Steer | AlertKind::Crash => None,
    }
}

#[derive(Clone)]
pub struct AlertIngest {
    state: Arc<DriverState>,
    alerts: mpsc::UnboundedSender<AlertKind>,
    speaker: Speaker,
    announce_on_arrival: bool,
}

impl AlertIngest {
    pub fn new(
        state: Arc<DriverState>,
        alerts: mpsc::UnboundedSender<AlertKind>,
        speaker: Speaker,
        announce_on_arrival: bool,
    ) -> Self {
        Self {
            state,
            alerts,
            speaker,
            announce_on_arrival,
        }
    }

    /// Apply one alert to the shared state and queue it when it needs a reaction.
    pub fn ingest(&self, payload: &AlertPayload) -> Result<AlertKind> {
        let kind = AlertKind::parse(&payload.kind)
            .ok_or_else(|| AssistantError::InvalidAlert(payload.kind.clone()))?;
        info!("Received alert: {kind}, state: {}", payload.state);

        match kind {
            AlertKind::Drowsy | AlertKind::Drunk | AlertKind::Stress => {
                self.state.set_flag(kind, payload.state);
                if payload.state {
                    self.state.record_alert(kind, Instant::now());
                    self.enqueue(kind);
                    if self.announce_on_arrival {
                        if let Some(notice) = arrival_notice(kind) {
                            self.speaker.speak(SpeechSource::AlertNotice, notice);
                        }
                    }
                }
            }
            AlertKind::Steer => {
                let direction = SteerDirection::parse(payload.direction.as_deref().unwrap_or(""));
                self.state.set_steer(direction);
            }
            AlertKind::Crash => {
                self.state.mark_crash();
                self.enqueue(kind);
            }
        }

        Ok(kind)
    }

    fn enqueue(&self, kind: AlertKind) {
        if self.alerts.send(kind).is_err() {
            warn!("Alert queue closed, dropping {kind}");
        }
    }
}
