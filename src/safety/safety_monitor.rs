use super::weather::WeatherRecord;
use crate::astro::{Site, ephemeris};
use crate::warn;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::{fmt::Display, sync::Arc};
use tokio::sync::watch;

/// Conditions a simulator may pretend are fulfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SimulatedCondition {
    /// Darkness regardless of the sun.
    Night,
    /// Safe weather regardless of telemetry.
    Weather,
    /// Both of the above.
    All,
}

/// Which safety inputs are forced to safe. Testing aid, loudly logged when active.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SafetyOverride {
    night: bool,
    weather: bool,
}

impl SafetyOverride {
    /// No override, every input is real.
    pub fn none() -> Self { Self::default() }

    /// Combines configured conditions. Duplicates are harmless.
    pub fn from_conditions(conditions: &[SimulatedCondition]) -> Self {
        conditions.iter().fold(Self::default(), |acc, c| match c {
            SimulatedCondition::Night => Self { night: true, ..acc },
            SimulatedCondition::Weather => Self { weather: true, ..acc },
            SimulatedCondition::All => Self { night: true, weather: true },
        })
    }

    pub fn night(&self) -> bool { self.night }
    pub fn weather(&self) -> bool { self.weather }
    /// Whether any input is simulated.
    pub fn is_active(&self) -> bool { self.night || self.weather }
}

/// Result of a single safety evaluation. Never stored beyond the decision it feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SafetyVerdict {
    /// Sun below the twilight horizon (or simulated night).
    pub is_dark: bool,
    pub weather_safe: bool,
    pub evaluated_at: DateTime<Utc>,
    /// At least one of the two inputs was forced by a simulator override.
    pub simulated: bool,
}

impl SafetyVerdict {
    /// Safe only when it is dark and the weather allows observing.
    pub fn is_safe(&self) -> bool { self.is_dark && self.weather_safe }
}

impl Display for SafetyVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (dark: {}, weather: {}{})",
            if self.is_safe() { "SAFE" } else { "UNSAFE" },
            self.is_dark,
            self.weather_safe,
            if self.simulated { ", simulated" } else { "" }
        )
    }
}

/// Combines darkness and the latest weather snapshot into a safe/unsafe verdict.
///
/// Missing, stale or unsafe weather data all evaluate to unsafe.
pub struct SafetyMonitor {
    site: Arc<Site>,
    twilight_horizon_deg: f64,
    /// Readings further than this from the evaluation time are stale.
    max_weather_age: TimeDelta,
    /// Latest snapshot published by the weather [`Supervisor`](super::Supervisor).
    weather: watch::Receiver<Option<WeatherRecord>>,
    simulator: SafetyOverride,
}

impl SafetyMonitor {
    /// Creates the monitor and warns about every active override.
    ///
    /// # Arguments
    /// * `site` - Site the sun altitude is computed for.
    /// * `twilight_horizon_deg` - Sun depression below which the sky counts as dark.
    /// * `max_weather_age` - Largest accepted distance between a reading and the evaluation time.
    /// * `weather` - Receiver of the weather snapshot.
    /// * `simulator` - Inputs to force to safe.
    pub fn new(
        site: Arc<Site>,
        twilight_horizon_deg: f64,
        max_weather_age: TimeDelta,
        weather: watch::Receiver<Option<WeatherRecord>>,
        simulator: SafetyOverride,
    ) -> Self {
        if simulator.night() {
            warn!("SAFETY OVERRIDE: darkness is simulated, the sun position is ignored");
        }
        if simulator.weather() {
            warn!("SAFETY OVERRIDE: weather is simulated, telemetry is ignored");
        }
        Self { site, twilight_horizon_deg, max_weather_age, weather, simulator }
    }

    pub fn site(&self) -> &Arc<Site> { &self.site }
    pub fn simulator(&self) -> SafetyOverride { self.simulator }
    pub fn max_weather_age(&self) -> TimeDelta { self.max_weather_age }

    /// A fresh handle on the weather snapshot, e.g. to await its next change.
    pub fn weather_feed(&self) -> watch::Receiver<Option<WeatherRecord>> { self.weather.clone() }

    /// Altitude of the sun in degrees at `time` for the configured site.
    pub fn sun_altitude(&self, time: DateTime<Utc>) -> f64 {
        self.site.altaz(&ephemeris::sun_position(time), time).alt_deg
    }

    /// True iff the sun is more than `horizon_deg` below the horizon at `time`.
    pub fn is_dark(&self, time: DateTime<Utc>, horizon_deg: f64) -> bool {
        self.simulator.night() || self.sun_altitude(time) < -horizon_deg
    }

    /// Evaluates the most recent weather record against the wall clock.
    pub fn weather_safe(&self, max_age: TimeDelta) -> bool { self.weather_safe_at(Utc::now(), max_age) }

    /// Evaluates the most recent weather record as of `now`. Records further than `max_age`
    /// from `now` in either direction count as stale.
    pub fn weather_safe_at(&self, now: DateTime<Utc>, max_age: TimeDelta) -> bool {
        if self.simulator.weather() {
            return true;
        }
        let latest = *self.weather.borrow();
        latest.is_some_and(|record| record.safe && (now - record.timestamp).abs() <= max_age)
    }

    /// Takes a safety decision for `time`.
    ///
    /// The verdict is computed from scratch on every call. Nothing is cached between decisions.
    pub fn verdict(&self, time: DateTime<Utc>) -> SafetyVerdict {
        SafetyVerdict {
            is_dark: self.is_dark(time, self.twilight_horizon_deg),
            weather_safe: self.weather_safe_at(time, self.max_weather_age),
            evaluated_at: time,
            simulated: self.simulator.is_active(),
        }
    }

    /// Shorthand for `verdict(time).is_safe()`.
    pub fn is_safe(&self, time: DateTime<Utc>) -> bool { self.verdict(time).is_safe() }
}
