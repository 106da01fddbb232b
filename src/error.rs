use crate::control::ControlState;
use std::time::Duration;
use thiserror::Error;

/// Errors that make a configuration unusable. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed transition table: {0}")]
    TransitionTable(String),
    #[error("unknown merit function '{0}'")]
    UnknownMerit(String),
    #[error("invalid weight {weight} for merit function '{id}'")]
    InvalidWeight { id: String, weight: f64 },
    #[error("invalid field '{name}': {reason}")]
    InvalidField { name: String, reason: String },
    #[error("invalid observation '{name}': {reason}")]
    InvalidObservation { name: String, reason: String },
    #[error("cannot parse sky position '{0}'")]
    InvalidPosition(String),
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("config i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("config decoding failed: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("json decoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Recoverable equipment failure. The control loop resolves every one of these to `parking`.
#[derive(Debug, Error, Clone)]
pub enum HardwareFault {
    #[error("{operation} failed: {reason}")]
    Device { operation: &'static str, reason: String },
    /// A facade call exceeded its bound.
    #[error("{operation} timed out after {}s", after.as_secs_f64())]
    Timeout { operation: &'static str, after: Duration },
    #[error("pointing not converged after {attempts} iterations")]
    PointingBudgetExceeded { attempts: usize },
    #[error("no current observation while in {0}")]
    NoCurrentObservation(ControlState),
    /// A panic caught around the state logic.
    #[error("state logic of {state} panicked: {message}")]
    Panic { state: ControlState, message: String },
}

impl HardwareFault {
    /// Shorthand for [`HardwareFault::Device`].
    pub fn device(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Device { operation, reason: reason.into() }
    }
}

/// Rejected pool mutations. These come from runtime commands and are never fatal.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("field '{0}' is already registered")]
    DuplicateField(String),
    #[error("field '{0}' is not registered")]
    UnknownField(String),
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}
