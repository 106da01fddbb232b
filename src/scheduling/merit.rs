use crate::astro::{Site, SkyPosition, angular_separation, ephemeris};
use crate::error::ConfigError;
use crate::observation::Observation;
use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use std::{fmt::Debug, str::FromStr};

/// Closed set of merit functions known to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum_macros::Display, strum_macros::EnumString, strum_macros::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum MeritId {
    /// Horizon check over the remaining visit.
    Observable,
    /// Angular distance from the moon.
    MoonSeparation,
}

/// Outcome of one merit function for one observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeritValue {
    /// Unweighted merit, multiplied by the configured weight.
    Score(f64),
    /// Excludes the observation from this scheduling pass.
    Veto,
}

impl MeritValue {
    /// Whether the observation was excluded.
    pub fn is_veto(&self) -> bool { matches!(self, MeritValue::Veto) }
}

/// Everything a merit function may look at besides the observation itself.
pub struct MeritContext<'a> {
    time: DateTime<Utc>,
    site: &'a Site,
    moon: SkyPosition,
}

impl<'a> MeritContext<'a> {
    /// Context for evaluations at `time`. The moon position is computed once here.
    pub fn new(site: &'a Site, time: DateTime<Utc>) -> Self {
        Self { time, site, moon: ephemeris::moon_position(time) }
    }

    /// Start of the visit being evaluated.
    pub fn time(&self) -> DateTime<Utc> { self.time }
    pub fn site(&self) -> &Site { self.site }
    pub fn moon(&self) -> &SkyPosition { &self.moon }
}

/// A single scoring strategy.
///
/// Implementations either score an observation or veto it. Scores are combined by the scheduler as
/// a weighted sum, and any veto drops the observation from the pass.
pub trait MeritFunction: Send + Sync + Debug {
    /// Identifier this strategy is registered and weighted under.
    fn id(&self) -> MeritId;
    /// Scores `observation` at the time and site of `context`.
    ///
    /// # Arguments
    /// * `observation` - Candidate with its remaining exposure plan.
    /// * `context` - Evaluation time, site and moon position.
    ///
    /// # Returns
    /// A [`MeritValue::Score`] or a [`MeritValue::Veto`].
    fn evaluate(&self, observation: &Observation, context: &MeritContext<'_>) -> MeritValue;
}

/// Vetoes targets that drop below the local horizon at any point of their remaining visit.
#[derive(Debug, Clone, Copy, Default)]
pub struct Observable;

impl Observable {
    /// Spacing of the altitude samples along the visit.
    pub const SAMPLE_INTERVAL: TimeDelta = TimeDelta::seconds(30);
}

impl MeritFunction for Observable {
    fn id(&self) -> MeritId { MeritId::Observable }

    fn evaluate(&self, observation: &Observation, context: &MeritContext<'_>) -> MeritValue {
        let position = observation.field().position();
        // a visit that runs past the end of representable time can never be finished
        let Some(end) = context.time().checked_add_signed(observation.visit_duration()) else {
            return MeritValue::Veto;
        };
        let mut t = context.time();
        loop {
            if !context.site().is_above_horizon(position, t) {
                return MeritValue::Veto;
            }
            if t >= end {
                return MeritValue::Score(1.0);
            }
            t = t.checked_add_signed(Self::SAMPLE_INTERVAL).map_or(end, |next| next.min(end));
        }
    }
}

/// Rewards distance from the moon and vetoes anything closer than `min_separation_deg`.
#[derive(Debug, Clone, Copy)]
pub struct MoonSeparation {
    min_separation_deg: f64,
}

impl MoonSeparation {
    /// Vetoes targets closer to the moon than `min_separation_deg`.
    pub fn new(min_separation_deg: f64) -> Self { Self { min_separation_deg } }
}

impl MeritFunction for MoonSeparation {
    fn id(&self) -> MeritId { MeritId::MoonSeparation }

    fn evaluate(&self, observation: &Observation, context: &MeritContext<'_>) -> MeritValue {
        let separation = angular_separation(observation.field().position(), context.moon());
        if separation < self.min_separation_deg {
            MeritValue::Veto
        } else {
            MeritValue::Score(separation / 180.0)
        }
    }
}

/// Maps each [`MeritId`] to the strategy implementing it.
#[derive(Debug, Default)]
pub struct MeritRegistry {
    strategies: IndexMap<MeritId, Box<dyn MeritFunction>>,
}

impl MeritRegistry {
    /// Registry holding every built-in merit function.
    pub fn builtin(min_moon_separation_deg: f64) -> Self {
        let mut registry = Self::default();
        registry.register(Box::new(Observable));
        registry.register(Box::new(MoonSeparation::new(min_moon_separation_deg)));
        registry
    }

    /// Adds or replaces the strategy for its id.
    pub fn register(&mut self, strategy: Box<dyn MeritFunction>) {
        self.strategies.insert(strategy.id(), strategy);
    }

    /// Strategy registered for `id`.
    pub fn get(&self, id: MeritId) -> Option<&dyn MeritFunction> {
        self.strategies.get(&id).map(AsRef::as_ref)
    }

    pub fn contains(&self, id: MeritId) -> bool { self.strategies.contains_key(&id) }
}

/// Weight per merit function.
#[derive(Debug, Clone, PartialEq)]
pub struct MeritWeights(IndexMap<MeritId, f64>);

impl Default for MeritWeights {
    fn default() -> Self { Self(IndexMap::from([(MeritId::Observable, 1.0)])) }
}

impl MeritWeights {
    /// Builds a weight table, keeping the given order.
    ///
    /// # Errors
    /// [`ConfigError::InvalidWeight`] for a negative or non-finite weight.
    pub fn new(weights: impl IntoIterator<Item = (MeritId, f64)>) -> Result<Self, ConfigError> {
        let mut map = IndexMap::new();
        for (id, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidWeight { id: id.to_string(), weight });
            }
            map.insert(id, weight);
        }
        Ok(Self(map))
    }

    /// Resolves configured identifiers. Unknown identifiers are an error.
    pub fn from_names<'a>(names: impl IntoIterator<Item = (&'a String, &'a f64)>) -> Result<Self, ConfigError> {
        let resolved = names
            .into_iter()
            .map(|(name, weight)| {
                MeritId::from_str(name)
                    .map(|id| (id, *weight))
                    .map_err(|_| ConfigError::UnknownMerit(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(resolved)
    }

    pub fn get(&self, id: MeritId) -> Option<f64> { self.0.get(&id).copied() }
    /// Weights in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = (MeritId, f64)> + '_ { self.0.iter().map(|(id, w)| (*id, *w)) }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}
