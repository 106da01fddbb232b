use crate::astro::{HorizonProfile, Site};
use crate::error::ConfigError;
use crate::observation::{Observation, TargetDescriptor};
use crate::safety::{SafetyOverride, SimulatedCondition};
use crate::scheduling::{MeritRegistry, MeritWeights};
use crate::{info, warn};
use chrono::TimeDelta;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

/// Largest duration, in seconds, any timing key may hold (one year).
const MAX_SECONDS: f64 = 365.0 * 24.0 * 3600.0;

/// Converts a validated number of seconds. Out-of-range input saturates instead of panicking.
fn seconds(value: f64) -> Duration { Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX) }

#[allow(clippy::cast_possible_truncation)]
fn time_delta(value: f64) -> TimeDelta { TimeDelta::milliseconds((value * 1000.0).round() as i64) }

/// Accepts finite values in `(0, MAX_SECONDS]`.
fn ensure_positive(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        Err(ConfigError::InvalidValue { key, reason: format!("{value} must be a positive number") })
    } else if value > MAX_SECONDS {
        Err(ConfigError::InvalidValue { key, reason: format!("{value} exceeds {MAX_SECONDS} seconds") })
    } else {
        Ok(())
    }
}

/// Accepts counts of one or more.
fn ensure_at_least_one(key: &'static str, value: usize) -> Result<(), ConfigError> {
    if value >= 1 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue { key, reason: "must be at least 1".to_string() })
    }
}

/// `[site]`: where the telescope stands and what it can see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    pub name: String,
    /// Geodetic latitude, north positive.
    pub latitude_deg: f64,
    /// East positive.
    pub longitude_deg: f64,
    pub elevation_m: f64,
    /// Flat observing horizon.
    pub horizon_deg: f64,
    /// Sun depression below which the sky counts as dark.
    pub twilight_horizon_deg: f64,
    /// `[azimuth, altitude]` points of local obstructions.
    pub obstructions: Vec<(f64, f64)>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: "Mauna Loa".to_string(),
            latitude_deg: 19.54,
            longitude_deg: -155.58,
            elevation_m: 3400.0,
            horizon_deg: 30.0,
            twilight_horizon_deg: 18.0,
            obstructions: Vec::new(),
        }
    }
}

/// `[safety]`: weather feed and simulated conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SafetyConfig {
    /// Readings older than this count as unsafe.
    pub weather_max_age_s: f64,
    pub weather_poll_interval_s: f64,
    /// JSON weather record written by an external station. The simulated station is used without it.
    pub weather_file: Option<PathBuf>,
    /// Conditions to simulate: `night`, `weather` or `all`.
    pub simulator: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            weather_max_age_s: 180.0,
            weather_poll_interval_s: 30.0,
            weather_file: None,
            simulator: Vec::new(),
        }
    }
}

/// `[scheduler]`: merit weights by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Weight per merit function, in evaluation order.
    pub merit_weights: IndexMap<String, f64>,
    /// Veto radius of the `moon_separation` merit.
    pub min_moon_separation_deg: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            merit_weights: IndexMap::from([("observable".to_string(), 1.0)]),
            min_moon_separation_deg: 15.0,
        }
    }
}

/// `[control]`: timeouts and retry budgets of the control loop.
///
/// All `_s` keys are seconds. Each must be positive and at most one year, except
/// `readout_margin_s` which may be zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlConfig {
    /// Limit for a slew, a pointing correction and each initialization attempt.
    pub slew_timeout_s: f64,
    /// Extra time granted on top of the exposure time before an exposure counts as hung.
    pub readout_margin_s: f64,
    /// Limit for a plate solve and for the analysis hook.
    pub solve_timeout_s: f64,
    /// Limit for each park attempt and for housekeeping.
    pub park_timeout_s: f64,
    pub park_retry_delay_s: f64,
    /// Longest wait between two checks while sleeping.
    pub sleep_recheck_s: f64,
    /// Idle time in `parked` before housekeeping when there is nothing to observe.
    pub parked_sleep_s: f64,
    /// Initialization attempts per pass before giving up.
    pub init_retry_attempts: usize,
    /// Faults in a row after which the unit stands down until housekeeping.
    pub max_consecutive_faults: usize,
    /// Minimum spacing of periodic status events.
    pub status_interval_s: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            slew_timeout_s: 300.0,
            readout_margin_s: 60.0,
            solve_timeout_s: 120.0,
            park_timeout_s: 300.0,
            park_retry_delay_s: 30.0,
            sleep_recheck_s: 300.0,
            parked_sleep_s: 1800.0,
            init_retry_attempts: 3,
            max_consecutive_faults: 5,
            status_interval_s: 60.0,
        }
    }
}

impl ControlConfig {
    /// See [`ControlConfig::slew_timeout_s`].
    pub fn slew_timeout(&self) -> Duration { seconds(self.slew_timeout_s) }
    pub fn readout_margin(&self) -> Duration { seconds(self.readout_margin_s) }
    pub fn solve_timeout(&self) -> Duration { seconds(self.solve_timeout_s) }
    pub fn park_timeout(&self) -> Duration { seconds(self.park_timeout_s) }
    pub fn park_retry_delay(&self) -> Duration { seconds(self.park_retry_delay_s) }
    pub fn sleep_recheck(&self) -> Duration { seconds(self.sleep_recheck_s) }
    /// See [`ControlConfig::parked_sleep_s`].
    pub fn parked_sleep(&self) -> Duration { seconds(self.parked_sleep_s) }
    pub fn status_interval(&self) -> Duration { seconds(self.status_interval_s) }

    /// Checks every key of the section.
    fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive("control.slew_timeout_s", self.slew_timeout_s)?;
        ensure_positive("control.solve_timeout_s", self.solve_timeout_s)?;
        ensure_positive("control.park_timeout_s", self.park_timeout_s)?;
        ensure_positive("control.park_retry_delay_s", self.park_retry_delay_s)?;
        ensure_positive("control.sleep_recheck_s", self.sleep_recheck_s)?;
        ensure_positive("control.parked_sleep_s", self.parked_sleep_s)?;
        ensure_positive("control.status_interval_s", self.status_interval_s)?;
        if !(0.0..=MAX_SECONDS).contains(&self.readout_margin_s) {
            return Err(ConfigError::InvalidValue {
                key: "control.readout_margin_s",
                reason: format!("{} is not between 0 and {MAX_SECONDS} seconds", self.readout_margin_s),
            });
        }
        ensure_at_least_one("control.init_retry_attempts", self.init_retry_attempts)?;
        ensure_at_least_one("control.max_consecutive_faults", self.max_consecutive_faults)
    }
}

/// `[pointing]`: closed-loop pointing before the first exposure of a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PointingConfig {
    pub enabled: bool,
    /// Exposure and correction rounds before the pointing budget is spent.
    pub max_iterations: usize,
    /// Exposure time of a pointing image.
    pub exptime_s: f64,
    /// Residual at or below which the mount counts as on target.
    pub threshold_deg: f64,
    /// Whether residuals are corrected. When off the first residual is accepted.
    pub auto_correct: bool,
}

impl Default for PointingConfig {
    fn default() -> Self {
        Self { enabled: true, max_iterations: 3, exptime_s: 30.0, threshold_deg: 0.05, auto_correct: true }
    }
}

impl PointingConfig {
    /// Pointing exposure time as a [`TimeDelta`].
    pub fn exptime(&self) -> TimeDelta { time_delta(self.exptime_s) }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure_at_least_one("pointing.max_iterations", self.max_iterations)?;
        ensure_positive("pointing.exptime_s", self.exptime_s)?;
        ensure_positive("pointing.threshold_deg", self.threshold_deg)
    }
}

/// Complete configuration of one telescope unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnitConfig {
    pub site: SiteConfig,
    pub safety: SafetyConfig,
    pub scheduler: SchedulerConfig,
    pub control: ControlConfig,
    pub pointing: PointingConfig,
    /// JSON file holding an array of target descriptors.
    pub targets_file: Option<PathBuf>,
    pub targets: Vec<TargetDescriptor>,
}

impl UnitConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    /// [`ConfigError::Toml`] for syntax errors and unknown keys. Out-of-range values fail with the
    /// error of the check that rejected them.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates the TOML file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Loads `path`, or the defaults if there is no such file.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            info!("Loading unit configuration from {}", path.display());
            Self::from_file(path)
        } else {
            warn!("No configuration at {}, running on defaults", path.display());
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Checks everything that can be checked without touching the outside world.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.site()?;
        ensure_positive("safety.weather_max_age_s", self.safety.weather_max_age_s)?;
        ensure_positive("safety.weather_poll_interval_s", self.safety.weather_poll_interval_s)?;
        if !(0.0..90.0).contains(&self.site.twilight_horizon_deg) {
            return Err(ConfigError::InvalidValue {
                key: "site.twilight_horizon_deg",
                reason: format!("{} is not a sun depression", self.site.twilight_horizon_deg),
            });
        }
        self.simulator()?;
        self.merit_weights()?;
        if !self.scheduler.min_moon_separation_deg.is_finite() || self.scheduler.min_moon_separation_deg < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.min_moon_separation_deg",
                reason: format!("{} is not an angle", self.scheduler.min_moon_separation_deg),
            });
        }
        self.control.validate()?;
        self.pointing.validate()
    }

    /// Builds the [`Site`] with its horizon profile.
    pub fn site(&self) -> Result<Site, ConfigError> {
        let horizon = HorizonProfile::new(self.site.horizon_deg, &self.site.obstructions)?;
        Site::new(
            &self.site.name,
            self.site.latitude_deg,
            self.site.longitude_deg,
            self.site.elevation_m,
            horizon,
        )
    }

    /// Resolves the simulated conditions.
    ///
    /// # Errors
    /// [`ConfigError::InvalidValue`] for a condition name other than `night`, `weather` or `all`.
    pub fn simulator(&self) -> Result<SafetyOverride, ConfigError> {
        let conditions = self
            .safety
            .simulator
            .iter()
            .map(|raw| {
                SimulatedCondition::from_str(raw).map_err(|_| ConfigError::InvalidValue {
                    key: "safety.simulator",
                    reason: format!("unknown condition '{raw}'"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SafetyOverride::from_conditions(&conditions))
    }

    /// Oldest weather reading still trusted by the safety monitor.
    pub fn max_weather_age(&self) -> TimeDelta { time_delta(self.safety.weather_max_age_s) }

    /// Pause between two weather polls.
    pub fn weather_poll_interval(&self) -> Duration { seconds(self.safety.weather_poll_interval_s) }

    /// Configured weights resolved to merit identifiers.
    pub fn merit_weights(&self) -> Result<MeritWeights, ConfigError> {
        MeritWeights::from_names(&self.scheduler.merit_weights)
    }

    /// Every built-in merit function with the configured moon separation.
    pub fn merit_registry(&self) -> MeritRegistry { MeritRegistry::builtin(self.scheduler.min_moon_separation_deg) }

    /// Startup targets from the inline list followed by the targets file.
    pub fn startup_targets(&self) -> Result<Vec<Observation>, ConfigError> {
        let mut descriptors = self.targets.clone();
        if let Some(path) = &self.targets_file {
            let raw = std::fs::read_to_string(path)?;
            descriptors.extend(serde_json::from_str::<Vec<TargetDescriptor>>(&raw)?);
        }
        descriptors.iter().map(Observation::try_from).collect()
    }
}
