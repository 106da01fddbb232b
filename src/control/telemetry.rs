use super::control_state::ControlState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Published on every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionEvent {
    pub state: ControlState,
    /// `None` only before the first transition.
    pub previous_state: Option<ControlState>,
    pub timestamp: DateTime<Utc>,
}

/// Progress of the current observation, published after each exposure and periodically.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub current_exp_num: usize,
    pub observation_name: String,
    pub merit: f64,
}

/// Outbound telemetry. Serializes to the bare event shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Telemetry {
    Transition(TransitionEvent),
    Status(StatusEvent),
}

impl Telemetry {
    pub fn to_json(&self) -> String { serde_json::to_string(self).unwrap_or_default() }
}

/// Fan-out of telemetry events over a `broadcast` channel.
///
/// Slow subscribers lose the oldest events once [`Self::CAPACITY`] are buffered.
#[derive(Debug, Clone)]
pub struct TelemetryPublisher {
    sender: broadcast::Sender<Telemetry>,
}

impl TelemetryPublisher {
    /// Events buffered per subscriber.
    const CAPACITY: usize = 64;

    pub fn new() -> Self { Self { sender: broadcast::Sender::new(Self::CAPACITY) } }

    pub fn subscribe(&self) -> broadcast::Receiver<Telemetry> { self.sender.subscribe() }

    /// Publishes to all current subscribers. Without subscribers the event is dropped.
    pub fn publish(&self, telemetry: Telemetry) { let _ = self.sender.send(telemetry); }
}

impl Default for TelemetryPublisher {
    fn default() -> Self { Self::new() }
}
