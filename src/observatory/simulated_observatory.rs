use super::{ExposureKind, ExposureRequest, Observatory, PointingOffset};
use crate::astro::SkyPosition;
use crate::error::HardwareFault;
use crate::event;
use crate::observation::ObservationStatus;
use async_trait::async_trait;
use rand::Rng;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tokio::sync::Mutex;

/// Journal entry of one facade call, recorded before the call resolves.
#[derive(Debug, Clone, PartialEq, strum_macros::Display)]
pub enum ObservatoryCall {
    Initialize,
    Slew(SkyPosition),
    Exposure { id: String, kind: ExposureKind },
    Solve(String),
    Correct(PointingOffset),
    Analyze(String),
    Park,
    Housekeeping,
}

/// Injected misbehavior for the next calls of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Injected {
    /// Return an error from the next `n` calls.
    Fail(usize),
    /// Never return from the next `n` calls.
    Hang(usize),
}

/// Software stand-in for the whole observatory.
///
/// Exposures take `exposure_time * time_scale` of real time, slews take `slew_delay`.
/// After every slew the mount is off by a random amount up to `pointing_jitter_deg` per axis
/// and each pointing correction leaves `correction_factor` of the error behind.
pub struct SimulatedObservatory {
    /// Real seconds per requested exposure second.
    time_scale: f64,
    slew_delay: Duration,
    pointing_jitter_deg: f64,
    correction_factor: f64,
    /// Current pointing error of the simulated mount.
    residual: Mutex<PointingOffset>,
    /// Pending misbehavior keyed by operation name.
    injected: Mutex<HashMap<&'static str, Injected>>,
    journal: Mutex<Vec<ObservatoryCall>>,
    initialized: AtomicBool,
    parked: AtomicBool,
}

impl Default for SimulatedObservatory {
    fn default() -> Self { Self::new() }
}

impl SimulatedObservatory {
    /// Operation names accepted by [`Self::fail_next`] and [`Self::hang_next`].
    pub const INITIALIZE: &'static str = "initialize";
    pub const SLEW: &'static str = "slew";
    pub const EXPOSURE: &'static str = "exposure";
    pub const SOLVE: &'static str = "solve";
    pub const CORRECT: &'static str = "correct";
    pub const ANALYZE: &'static str = "analyze";
    pub const PARK: &'static str = "park";
    pub const HOUSEKEEPING: &'static str = "housekeeping";

    /// Instant, perfectly pointed observatory.
    pub fn new() -> Self {
        Self {
            time_scale: 0.0,
            slew_delay: Duration::ZERO,
            pointing_jitter_deg: 0.0,
            correction_factor: 0.1,
            residual: Mutex::new(PointingOffset { delta_ra_deg: 0.0, delta_dec_deg: 0.0 }),
            injected: Mutex::new(HashMap::new()),
            journal: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
            parked: AtomicBool::new(true),
        }
    }

    /// Scales every exposure's real duration by `time_scale`. Negative values count as zero.
    #[must_use]
    pub fn with_time_scale(mut self, time_scale: f64) -> Self {
        self.time_scale = time_scale.max(0.0);
        self
    }

    /// Time each slew and park takes.
    #[must_use]
    pub fn with_slew_delay(mut self, slew_delay: Duration) -> Self {
        self.slew_delay = slew_delay;
        self
    }

    /// Enables pointing errors.
    ///
    /// # Arguments
    /// * `jitter_deg` - Largest error per axis after a slew.
    /// * `correction_factor` - Fraction of the error left after a correction, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_pointing(mut self, jitter_deg: f64, correction_factor: f64) -> Self {
        self.pointing_jitter_deg = jitter_deg.abs();
        self.correction_factor = correction_factor.clamp(0.0, 1.0);
        self
    }

    /// The next `count` calls of `operation` return an error.
    pub async fn fail_next(&self, operation: &'static str, count: usize) {
        self.injected.lock().await.insert(operation, Injected::Fail(count));
    }

    /// The next `count` calls of `operation` never return.
    pub async fn hang_next(&self, operation: &'static str, count: usize) {
        self.injected.lock().await.insert(operation, Injected::Hang(count));
    }

    /// Every call received so far, oldest first.
    pub async fn journal(&self) -> Vec<ObservatoryCall> { self.journal.lock().await.clone() }

    /// Whether the mount is at its park position. True before the first slew.
    pub fn is_parked(&self) -> bool { self.parked.load(Ordering::Acquire) }

    /// Journals `call` and applies any injected misbehavior for `operation`.
    ///
    /// Hangs are implemented as a future that never resolves, so only the caller's timeout ends them.
    async fn enter(&self, operation: &'static str, call: ObservatoryCall) -> Result<(), HardwareFault> {
        event!("Simulated observatory: {call}");
        self.journal.lock().await.push(call);
        let action = {
            let mut injected = self.injected.lock().await;
            let action = injected.get(operation).copied();
            match action {
                Some(Injected::Fail(n) | Injected::Hang(n)) if n <= 1 => {
                    injected.remove(operation);
                }
                Some(Injected::Fail(n)) => {
                    injected.insert(operation, Injected::Fail(n - 1));
                }
                Some(Injected::Hang(n)) => {
                    injected.insert(operation, Injected::Hang(n - 1));
                }
                None => {}
            }
            action
        };
        match action {
            Some(Injected::Fail(_)) => Err(HardwareFault::device(operation, "injected failure")),
            Some(Injected::Hang(_)) => std::future::pending().await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Observatory for SimulatedObservatory {
    async fn initialize(&self) -> Result<(), HardwareFault> {
        self.enter(Self::INITIALIZE, ObservatoryCall::Initialize).await?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn slew_to(&self, position: &SkyPosition) -> Result<(), HardwareFault> {
        self.enter(Self::SLEW, ObservatoryCall::Slew(*position)).await?;
        if !self.initialized.load(Ordering::Acquire) {
            return Err(HardwareFault::device(Self::SLEW, "mount not initialized"));
        }
        tokio::time::sleep(self.slew_delay).await;
        let jitter = self.pointing_jitter_deg;
        let offset = if jitter > 0.0 {
            let mut rng = rand::rng();
            PointingOffset {
                delta_ra_deg: rng.random_range(-jitter..=jitter),
                delta_dec_deg: rng.random_range(-jitter..=jitter),
            }
        } else {
            PointingOffset { delta_ra_deg: 0.0, delta_dec_deg: 0.0 }
        };
        *self.residual.lock().await = offset;
        self.parked.store(false, Ordering::Release);
        Ok(())
    }

    async fn take_exposure(&self, request: &ExposureRequest) -> Result<String, HardwareFault> {
        let call = ObservatoryCall::Exposure { id: request.id.clone(), kind: request.kind };
        self.enter(Self::EXPOSURE, call).await?;
        let duration = request.exposure_time.to_std().unwrap_or_default().mul_f64(self.time_scale);
        tokio::time::sleep(duration).await;
        Ok(format!("sim://{}/{}.fits", request.kind, request.id))
    }

    async fn solve_pointing(&self, file: &str, _target: &SkyPosition) -> Result<PointingOffset, HardwareFault> {
        self.enter(Self::SOLVE, ObservatoryCall::Solve(file.to_string())).await?;
        Ok(*self.residual.lock().await)
    }

    async fn correct_pointing(&self, offset: &PointingOffset) -> Result<(), HardwareFault> {
        self.enter(Self::CORRECT, ObservatoryCall::Correct(*offset)).await?;
        let mut residual = self.residual.lock().await;
        residual.delta_ra_deg *= self.correction_factor;
        residual.delta_dec_deg *= self.correction_factor;
        Ok(())
    }

    async fn analyze(&self, status: &ObservationStatus) -> Result<(), HardwareFault> {
        self.enter(Self::ANALYZE, ObservatoryCall::Analyze(status.name.clone())).await
    }

    async fn park(&self) -> Result<(), HardwareFault> {
        self.enter(Self::PARK, ObservatoryCall::Park).await?;
        tokio::time::sleep(self.slew_delay).await;
        self.parked.store(true, Ordering::Release);
        Ok(())
    }

    async fn housekeeping(&self) -> Result<(), HardwareFault> {
        self.enter(Self::HOUSEKEEPING, ObservatoryCall::Housekeeping).await
    }
}
