use super::{field::Field, observation::Observation};
use crate::astro::{Frame, SkyPosition};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

const DEFAULT_PRIORITY: f64 = 100.0;
const DEFAULT_EXP_TIME_S: f64 = 120.0;
const DEFAULT_MIN_NEXP: usize = 60;
const DEFAULT_EXP_SET_SIZE: usize = 10;

fn default_priority() -> f64 { DEFAULT_PRIORITY }
fn default_exp_time() -> f64 { DEFAULT_EXP_TIME_S }
fn default_min_nexp() -> usize { DEFAULT_MIN_NEXP }
fn default_exp_set_size() -> usize { DEFAULT_EXP_SET_SIZE }

/// Wire and config shape of one target, as carried by `add`/`modify`/`remove` commands
/// and by the startup target list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Field name.
    pub target: String,
    /// Two coordinates, decimal or sexagesimal. Required by `add` and `modify`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default)]
    pub frame: Frame,
    #[serde(default = "default_priority")]
    pub priority: f64,
    /// Seconds per exposure.
    #[serde(default = "default_exp_time")]
    pub exp_time: f64,
    #[serde(default = "default_min_nexp")]
    pub min_nexp: usize,
    #[serde(default = "default_exp_set_size")]
    pub exp_set_size: usize,
}

impl TargetDescriptor {
    /// Descriptor carrying only a name, as used by `remove`.
    pub fn named(target: &str) -> Self {
        Self {
            target: target.to_string(),
            position: None,
            frame: Frame::default(),
            priority: DEFAULT_PRIORITY,
            exp_time: DEFAULT_EXP_TIME_S,
            min_nexp: DEFAULT_MIN_NEXP,
            exp_set_size: DEFAULT_EXP_SET_SIZE,
        }
    }

    /// Descriptor with a position and default exposure plan.
    pub fn at(target: &str, position: &str) -> Self {
        Self { position: Some(position.to_string()), ..Self::named(target) }
    }
}

impl TryFrom<&TargetDescriptor> for Observation {
    type Error = ConfigError;

    fn try_from(desc: &TargetDescriptor) -> Result<Self, Self::Error> {
        let position = desc.position.as_deref().ok_or_else(|| ConfigError::InvalidField {
            name: desc.target.clone(),
            reason: "no position given".to_string(),
        })?;
        let field = Field::new(&desc.target, SkyPosition::parse(position, desc.frame)?, desc.priority)?;
        Observation::with_seconds(field, desc.exp_time, desc.min_nexp, desc.exp_set_size)
    }
}
