mod simulated_observatory;
#[cfg(test)]
mod tests;

use crate::astro::SkyPosition;
use crate::error::HardwareFault;
use crate::observation::ObservationStatus;
use async_trait::async_trait;
use chrono::TimeDelta;
use std::fmt::Display;

pub use simulated_observatory::{ObservatoryCall, SimulatedObservatory};

/// What an exposure is for. Decides where the simulator files it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ExposureKind {
    /// Counts towards the observation's exposure plan.
    Science,
    /// Short image used only for plate solving.
    Pointing,
}

/// Everything the camera side needs to take one exposure.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureRequest {
    /// Unique within the observation, also used as the file name.
    pub id: String,
    pub field_name: String,
    pub position: SkyPosition,
    /// Requested shutter time.
    pub exposure_time: TimeDelta,
    pub kind: ExposureKind,
}

/// Pointing error reported by plate-solving, target minus actual, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointingOffset {
    pub delta_ra_deg: f64,
    pub delta_dec_deg: f64,
}

impl PointingOffset {
    /// Size of the offset on the sky, evaluated at declination `dec_deg`.
    pub fn magnitude_deg(&self, dec_deg: f64) -> f64 {
        (self.delta_ra_deg * dec_deg.to_radians().cos()).hypot(self.delta_dec_deg)
    }
}

impl Display for PointingOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ΔRA {:+.4}° ΔDec {:+.4}°", self.delta_ra_deg, self.delta_dec_deg)
    }
}

/// Facade over the mount, camera and plate solver.
///
/// Every call may block for as long as the hardware needs. The control loop bounds each call
/// with its own timeout, implementations don't have to.
#[async_trait]
pub trait Observatory: Send + Sync {
    /// Connects and verifies all devices. Must be idempotent.
    async fn initialize(&self) -> Result<(), HardwareFault>;
    /// Moves the mount to `position` and returns once it is tracking there.
    async fn slew_to(&self, position: &SkyPosition) -> Result<(), HardwareFault>;
    /// Takes an exposure and returns a reference to the stored file.
    async fn take_exposure(&self, request: &ExposureRequest) -> Result<String, HardwareFault>;
    /// Plate-solves `file` and reports how far the mount is off `target`.
    ///
    /// # Arguments
    /// * `file` - Reference returned by [`Observatory::take_exposure`].
    /// * `target` - Where the mount was supposed to point.
    async fn solve_pointing(&self, file: &str, target: &SkyPosition) -> Result<PointingOffset, HardwareFault>;
    /// Nudges the mount by `offset`.
    async fn correct_pointing(&self, offset: &PointingOffset) -> Result<(), HardwareFault>;
    /// Post-processing hook after an exposure set.
    async fn analyze(&self, status: &ObservationStatus) -> Result<(), HardwareFault>;
    /// Moves the mount to its park position.
    async fn park(&self) -> Result<(), HardwareFault>;
    /// End-of-run cleanup.
    async fn housekeeping(&self) -> Result<(), HardwareFault>;
}
