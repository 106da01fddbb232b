use super::merit::{MeritContext, MeritRegistry, MeritValue, MeritWeights};
use crate::astro::Site;
use crate::error::{ConfigError, SchedulerError};
use crate::observation::Observation;
use crate::{event, log, obs, warn};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::sync::Arc;

/// Holds the pool of candidate observations and picks the best one on request.
///
/// The pool keeps registration order, which decides ties between equally scored
/// observations. It is owned by the control loop and only mutated between states.
#[derive(Debug)]
pub struct Scheduler {
    site: Arc<Site>,
    /// Strategies that may be weighted.
    registry: MeritRegistry,
    /// Weights used by [`Scheduler::get_target`].
    weights: MeritWeights,
    /// Candidates keyed by field name, in registration order.
    pool: IndexMap<String, Observation>,
    /// Name of the observation being worked on.
    current: Option<String>,
    /// Every selection of this run with its time.
    observed_list: Vec<(DateTime<Utc>, String)>,
}

impl Scheduler {
    /// Creates a scheduler with an empty pool.
    ///
    /// # Arguments
    /// * `site` - Observing site the horizon checks run against.
    /// * `registry` - Available merit functions.
    /// * `weights` - Default weights, each of which must name a registered function.
    ///
    /// # Errors
    /// [`ConfigError::UnknownMerit`] if a weight refers to an unregistered merit function.
    pub fn new(site: Arc<Site>, registry: MeritRegistry, weights: MeritWeights) -> Result<Self, ConfigError> {
        if let Some((id, _)) = weights.iter().find(|(id, _)| !registry.contains(*id)) {
            return Err(ConfigError::UnknownMerit(id.to_string()));
        }
        if weights.is_empty() {
            warn!("No merit functions configured, every observation will score 0");
        }
        Ok(Self {
            site,
            registry,
            weights,
            pool: IndexMap::new(),
            current: None,
            observed_list: Vec::new(),
        })
    }

    pub fn site(&self) -> &Arc<Site> { &self.site }
    pub fn weights(&self) -> &MeritWeights { &self.weights }
    pub fn pool(&self) -> &IndexMap<String, Observation> { &self.pool }
    /// Looks up an observation by its field name.
    pub fn get(&self, name: &str) -> Option<&Observation> { self.pool.get(name) }
    pub fn len(&self) -> usize { self.pool.len() }
    pub fn is_empty(&self) -> bool { self.pool.is_empty() }
    /// Selections made since the last [`Scheduler::end_run`].
    pub fn observed_list(&self) -> &[(DateTime<Utc>, String)] { &self.observed_list }

    /// Appends a new observation to the pool.
    ///
    /// # Errors
    /// [`SchedulerError::DuplicateField`] if the field name is already registered.
    pub fn add(&mut self, observation: Observation) -> Result<(), SchedulerError> {
        let name = observation.name().to_string();
        if self.pool.contains_key(&name) {
            return Err(SchedulerError::DuplicateField(name));
        }
        log!("Added {observation}");
        self.pool.insert(name, observation);
        Ok(())
    }

    /// Replaces a registered observation. Progress of the old one is discarded and the
    /// pool position is kept.
    pub fn modify(&mut self, observation: Observation) -> Result<(), SchedulerError> {
        let name = observation.name().to_string();
        let Some(slot) = self.pool.get_mut(&name) else {
            return Err(SchedulerError::UnknownField(name));
        };
        log!("Modified {observation}");
        *slot = observation;
        if self.current.as_deref() == Some(name.as_str()) {
            self.current = None;
        }
        Ok(())
    }

    /// Removes an observation by name. The name is trimmed the way [`Field`] names are, and
    /// absent names are ignored.
    ///
    /// [`Field`]: crate::observation::Field
    pub fn remove(&mut self, name: &str) -> Option<Observation> {
        let key = name.trim();
        let removed = self.pool.shift_remove(key);
        match &removed {
            Some(_) => log!("Removed {key}"),
            None => event!("Ignoring removal of unknown field {key}"),
        }
        if removed.is_some() && self.current.as_deref() == Some(key) {
            self.current = None;
        }
        removed
    }

    /// Priority-weighted score of one observation, `None` if any merit function vetoes it.
    fn score(&self, observation: &Observation, weights: &MeritWeights, context: &MeritContext<'_>) -> Option<f64> {
        let mut total = 0.0;
        for (id, weight) in weights.iter() {
            let Some(strategy) = self.registry.get(id) else {
                warn!("Merit function {id} is not registered, skipping it");
                continue;
            };
            match strategy.evaluate(observation, context) {
                MeritValue::Veto => {
                    event!("{} vetoed by {id}", observation.name());
                    return None;
                }
                MeritValue::Score(merit) => total += weight * merit,
            }
        }
        Some(observation.field().priority() * total)
    }

    /// Scores for every observation with visits left, `None` meaning vetoed.
    fn evaluate_pool(&self, weights: &MeritWeights, time: DateTime<Utc>) -> Vec<(usize, Option<f64>)> {
        let context = MeritContext::new(&self.site, time);
        self.pool
            .values()
            .enumerate()
            .filter(|(_, obs)| obs.has_visits())
            .map(|(i, obs)| (i, self.score(obs, weights, &context)))
            .collect()
    }

    /// Best observable candidate under the configured weights.
    pub fn get_target(&mut self, time: DateTime<Utc>) -> Option<&Observation> {
        let weights = self.weights.clone();
        self.get_target_with(&weights, time)
    }

    /// Best observable candidate under `weights`, or `None` if the pool is empty or every
    /// observation is vetoed or finished. Ties go to the earliest registered observation.
    /// Computed scores are stored as each observation's merit.
    pub fn get_target_with(&mut self, weights: &MeritWeights, time: DateTime<Utc>) -> Option<&Observation> {
        let scores = self.evaluate_pool(weights, time);
        let mut best: Option<(usize, f64)> = None;
        for &(index, score) in &scores {
            if let Some((_, observation)) = self.pool.get_index_mut(index) {
                observation.set_merit(score.unwrap_or(0.0));
            }
            if let Some(score) = score {
                if best.is_none_or(|(_, best_score)| score > best_score) {
                    best = Some((index, score));
                }
            }
        }
        let (index, score) = best?;
        let (_, observation) = self.pool.get_index(index)?;
        obs!("Best target: {} with merit {score:.3}", observation.name());
        Some(observation)
    }

    /// All candidates that survive the vetoes, best first.
    pub fn rank(&self, time: DateTime<Utc>) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .evaluate_pool(&self.weights, time)
            .into_iter()
            .filter_map(|(index, score)| {
                let (name, _) = self.pool.get_index(index)?;
                Some((name.clone(), score?))
            })
            .collect();
        // stable, so equal scores keep registration order
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    /// Whether any unfinished observation survives every veto at `time`.
    pub fn has_observable(&self, time: DateTime<Utc>) -> bool {
        self.evaluate_pool(&self.weights, time).iter().any(|(_, score)| score.is_some())
    }

    /// The observation currently being worked on.
    pub fn current(&self) -> Option<&Observation> { self.pool.get(self.current.as_deref()?) }

    pub fn current_mut(&mut self) -> Option<&mut Observation> {
        let name = self.current.as_deref()?;
        self.pool.get_mut(name)
    }

    /// Makes `name` the current observation. The observation it replaces is reset, finished
    /// or not, so it can be scheduled again from scratch. Returns whether the current
    /// observation changed.
    pub fn set_current(&mut self, name: &str, time: DateTime<Utc>) -> bool {
        if !self.pool.contains_key(name) {
            warn!("Cannot select unknown field {name}");
            return false;
        }
        if self.current.as_deref() == Some(name) {
            return false;
        }
        self.release_current();
        self.current = Some(name.to_string());
        self.observed_list.push((time, name.to_string()));
        obs!("Current observation is now {name}");
        true
    }

    /// Drops the current observation and resets any progress made on it.
    pub fn release_current(&mut self) {
        let Some(previous) = self.current.take().and_then(|name| self.pool.get_mut(&name)) else {
            return;
        };
        if previous.current_exp_num() > 0 {
            let outcome = if previous.has_visits() { "unfinished" } else { "completed" };
            log!("Resetting {outcome} observation {}", previous.name());
            previous.reset();
        }
    }

    /// End-of-run bookkeeping: no current observation, no progress carried into the next
    /// run, and an empty observed list.
    pub fn end_run(&mut self) {
        self.release_current();
        for observation in self.pool.values_mut().filter(|o| !o.has_visits()) {
            log!("Resetting completed observation {} for the next run", observation.name());
            observation.reset();
        }
        self.observed_list.clear();
    }
}
