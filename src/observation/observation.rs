use super::field::Field;
use crate::error::ConfigError;
use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt::Display;

/// Snapshot of an observation's progress as published in status telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationStatus {
    pub name: String,
    pub field_name: String,
    pub priority: f64,
    pub exposure_time_s: f64,
    pub min_nexp: usize,
    pub exp_set_size: usize,
    pub current_exp_num: usize,
    pub merit: f64,
    pub seq_time: Option<DateTime<Utc>>,
    pub minimum_duration_s: f64,
    pub set_duration_s: f64,
}

/// A unit of work over one [`Field`]: an exposure plan plus the progress made on it.
#[derive(Debug, Clone)]
pub struct Observation {
    field: Field,
    exposure_time: TimeDelta,
    min_nexp: usize,
    exp_set_size: usize,
    /// Exposure id to file reference, in capture order.
    exposure_list: IndexMap<String, String>,
    /// Score of the last scheduling pass, 0 when vetoed.
    merit: f64,
    /// Time of the first exposure since the last reset.
    seq_time: Option<DateTime<Utc>>,
}

impl Observation {
    /// Longest single exposure a plan may ask for.
    pub const MAX_EXPOSURE_TIME: TimeDelta = TimeDelta::hours(1);
    /// Upper bound on `exposure_time * min_nexp`.
    pub const MAX_PLAN_DURATION: TimeDelta = TimeDelta::days(7);

    /// Validates the exposure plan: a positive exposure time of at most
    /// [`Self::MAX_EXPOSURE_TIME`], at least one exposure per set, a minimum that is a whole
    /// number of sets, and a total plan no longer than [`Self::MAX_PLAN_DURATION`].
    pub fn new(
        field: Field,
        exposure_time: TimeDelta,
        min_nexp: usize,
        exp_set_size: usize,
    ) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidObservation {
            name: field.name().to_string(),
            reason,
        };
        if exposure_time <= TimeDelta::zero() {
            return Err(invalid(format!("exposure time {exposure_time} must be positive")));
        }
        if exposure_time > Self::MAX_EXPOSURE_TIME {
            return Err(invalid(format!(
                "exposure time {exposure_time} exceeds {}",
                Self::MAX_EXPOSURE_TIME
            )));
        }
        if min_nexp == 0 || exp_set_size == 0 {
            return Err(invalid("min_nexp and exp_set_size must be at least 1".to_string()));
        }
        if min_nexp % exp_set_size != 0 {
            return Err(invalid(format!(
                "min_nexp {min_nexp} is not a multiple of exp_set_size {exp_set_size}"
            )));
        }
        let plan = i32::try_from(min_nexp).ok().and_then(|n| exposure_time.checked_mul(n));
        if plan.is_none_or(|total| total > Self::MAX_PLAN_DURATION) {
            return Err(invalid(format!(
                "{min_nexp} exposures of {exposure_time} exceed {}",
                Self::MAX_PLAN_DURATION
            )));
        }
        Ok(Self {
            field,
            exposure_time,
            min_nexp,
            exp_set_size,
            exposure_list: IndexMap::new(),
            merit: 0.0,
            seq_time: None,
        })
    }

    /// Same as [`Observation::new`] with the exposure time given in (fractional) seconds.
    /// Values too large for a [`TimeDelta`] are rejected by the bounds of `new`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_seconds(
        field: Field,
        exposure_time_s: f64,
        min_nexp: usize,
        exp_set_size: usize,
    ) -> Result<Self, ConfigError> {
        if !exposure_time_s.is_finite() || exposure_time_s <= 0.0 {
            return Err(ConfigError::InvalidObservation {
                name: field.name().to_string(),
                reason: format!("exposure time {exposure_time_s}s must be positive"),
            });
        }
        let exposure_time = TimeDelta::microseconds((exposure_time_s * 1e6).round() as i64);
        Self::new(field, exposure_time, min_nexp, exp_set_size)
    }

    pub fn field(&self) -> &Field { &self.field }
    pub fn name(&self) -> &str { self.field.name() }
    pub fn exposure_time(&self) -> TimeDelta { self.exposure_time }
    pub fn min_nexp(&self) -> usize { self.min_nexp }
    pub fn exp_set_size(&self) -> usize { self.exp_set_size }
    pub fn exposure_list(&self) -> &IndexMap<String, String> { &self.exposure_list }
    pub fn merit(&self) -> f64 { self.merit }
    pub fn seq_time(&self) -> Option<DateTime<Utc>> { self.seq_time }
    /// Exposures taken so far.
    pub fn current_exp_num(&self) -> usize { self.exposure_list.len() }

    pub fn set_merit(&mut self, merit: f64) { self.merit = merit; }

    /// True while fewer than `min_nexp` exposures have been taken.
    pub fn has_visits(&self) -> bool { self.current_exp_num() < self.min_nexp }

    /// Exposures still missing from the minimum.
    pub fn remaining_nexp(&self) -> usize { self.min_nexp.saturating_sub(self.current_exp_num()) }

    /// True once the exposure set in progress is finished (or none was started).
    pub fn set_complete(&self) -> bool { self.current_exp_num() % self.exp_set_size == 0 }

    /// Estimated wall-clock time for the remaining exposures.
    pub fn visit_duration(&self) -> TimeDelta { Self::scaled(self.exposure_time, self.remaining_nexp()) }

    /// Time needed for the full plan of `min_nexp` exposures.
    pub fn minimum_duration(&self) -> TimeDelta { Self::scaled(self.exposure_time, self.min_nexp) }

    /// Time needed for one exposure set.
    pub fn set_duration(&self) -> TimeDelta { Self::scaled(self.exposure_time, self.exp_set_size) }

    /// `exposure_time * count`, saturating at [`TimeDelta::MAX`].
    fn scaled(exposure_time: TimeDelta, count: usize) -> TimeDelta {
        i32::try_from(count)
            .ok()
            .and_then(|n| exposure_time.checked_mul(n))
            .unwrap_or(TimeDelta::MAX)
    }

    /// Identifier for the next exposure, unique within this observation.
    pub fn next_exposure_id(&self) -> String {
        format!("{}_{:04}", self.field.field_name(), self.current_exp_num())
    }

    /// Records a finished exposure. The first one stamps the sequence start time.
    pub fn add_exposure(&mut self, id: String, file: String, time: DateTime<Utc>) {
        if self.seq_time.is_none() {
            self.seq_time = Some(time);
        }
        self.exposure_list.insert(id, file);
    }

    /// Drops all progress. The exposure plan is kept.
    pub fn reset(&mut self) {
        self.exposure_list.clear();
        self.seq_time = None;
        self.merit = 0.0;
    }

    /// Snapshot for status telemetry.
    #[allow(clippy::cast_precision_loss)]
    pub fn status(&self) -> ObservationStatus {
        let secs = |t: TimeDelta| t.num_milliseconds() as f64 / 1000.0;
        ObservationStatus {
            name: self.name().to_string(),
            field_name: self.field.field_name(),
            priority: self.field.priority(),
            exposure_time_s: secs(self.exposure_time),
            min_nexp: self.min_nexp,
            exp_set_size: self.exp_set_size,
            current_exp_num: self.current_exp_num(),
            merit: self.merit,
            seq_time: self.seq_time,
            minimum_duration_s: secs(self.minimum_duration()),
            set_duration_s: secs(self.set_duration()),
        }
    }
}

impl Display for Observation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}s exposures in blocks of {}, minimum of {} exposures ({}/{} done)",
            self.name(),
            self.exposure_time.num_milliseconds() / 1000,
            self.exp_set_size,
            self.min_nexp,
            self.current_exp_num(),
            self.min_nexp
        )
    }
}
