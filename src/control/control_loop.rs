use super::{
    command::{CommandInbox, CommandSender, ControlCommand},
    control_state::{ControlState, Transition, TransitionReason, validate_transition_table},
    state_record::StateRecord,
    telemetry::{StatusEvent, Telemetry, TelemetryPublisher, TransitionEvent},
};
use crate::astro::SkyPosition;
use crate::config::{ControlConfig, PointingConfig};
use crate::error::{ConfigError, HardwareFault, SchedulerError};
use crate::observation::Observation;
use crate::observatory::{ExposureKind, ExposureRequest, Observatory};
use crate::safety::SafetyMonitor;
use crate::scheduling::Scheduler;
use crate::{error, info, log, obs, warn};
use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use std::{any::Any, future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

/// The unit's state machine.
///
/// One state runs to completion before the next one starts. Before every transition the
/// safety verdict is taken and the requested edge is checked against the transition table.
/// Errors and panics inside state logic end in `parking`.
pub struct ControlLoop {
    /// Current, previous and next state with their timestamps.
    record: StateRecord,
    /// Exclusively owned, mutated only between states.
    scheduler: Scheduler,
    safety: Arc<SafetyMonitor>,
    observatory: Arc<dyn Observatory>,
    /// Pending operator commands, applied at sequence boundaries.
    inbox: CommandInbox,
    telemetry: TelemetryPublisher,
    control: ControlConfig,
    pointing: PointingConfig,
    /// Set by a `shutdown` command, honoured at the next parked checkpoint.
    shutdown_pending: bool,
    /// Whether the last hardware initialization succeeded.
    initialized: bool,
    /// Observation the mount was last pointed at since it left park.
    pointed: Option<String>,
    /// Faults since the last completed exposure or housekeeping.
    consecutive_faults: usize,
    /// When the last status event went out.
    last_status: Option<DateTime<Utc>>,
}

impl ControlLoop {
    /// Creates the loop in `sleeping` and returns the sender for its command queue.
    pub fn new(
        scheduler: Scheduler,
        safety: Arc<SafetyMonitor>,
        observatory: Arc<dyn Observatory>,
        control: ControlConfig,
        pointing: PointingConfig,
    ) -> Result<(ControlLoop, CommandSender), ConfigError> {
        validate_transition_table()?;
        let (inbox, sender) = CommandInbox::new();
        let control_loop = Self {
            record: StateRecord::new(ControlState::INITIAL, Utc::now()),
            scheduler,
            safety,
            observatory,
            inbox,
            telemetry: TelemetryPublisher::new(),
            control,
            pointing,
            shutdown_pending: false,
            initialized: false,
            pointed: None,
            consecutive_faults: 0,
            last_status: None,
        };
        Ok((control_loop, sender))
    }

    /// The state the loop is currently in.
    pub fn state(&self) -> ControlState { self.record.current() }
    pub fn record(&self) -> &StateRecord { &self.record }
    pub fn scheduler(&self) -> &Scheduler { &self.scheduler }
    pub fn telemetry(&self) -> &TelemetryPublisher { &self.telemetry }
    pub fn shutdown_pending(&self) -> bool { self.shutdown_pending }
    /// Number of fault transitions since the last successful exposure.
    pub fn consecutive_faults(&self) -> usize { self.consecutive_faults }

    /// Runs until the loop reaches `exit`.
    pub async fn run(&mut self) {
        info!("Control loop starting in {} with {} observations", self.state(), self.scheduler.len());
        while self.step().await {}
        info!("Control loop reached {}", self.state());
    }

    /// Executes the current state and carries out the resolved transition.
    /// Returns `false` once the loop is in its terminal state.
    pub async fn step(&mut self) -> bool {
        let state = self.record.current();
        if state.is_terminal() {
            return false;
        }
        let outcome = AssertUnwindSafe(self.execute(state)).catch_unwind().await;
        let now = Utc::now();
        let transition = match outcome {
            Ok(Ok(requested)) => {
                let verdict = self.safety.verdict(now);
                let transition = Transition::resolve(state, requested, verdict.is_safe());
                match transition.reason {
                    TransitionReason::Unsafe => warn!("{verdict}: {state} requested {requested}, parking instead"),
                    TransitionReason::Undeclared => error!("{state} requested undeclared transition to {requested}"),
                    TransitionReason::Requested | TransitionReason::Fault => {}
                }
                transition
            }
            Ok(Err(fault)) => {
                error!("{state} failed: {fault}");
                Transition::fault(state)
            }
            Err(payload) => {
                let fault = HardwareFault::Panic { state, message: panic_message(&*payload) };
                error!("{fault}");
                Transition::fault(state)
            }
        };
        if matches!(transition.reason, TransitionReason::Fault | TransitionReason::Undeclared) {
            self.consecutive_faults += 1;
        }
        self.transition(transition, now);
        true
    }

    /// Carries out a resolved transition.
    ///
    /// Commands queued in the meantime are applied first, unless the destination is part of an
    /// exposure sequence. The transition is then recorded and published, followed by a status event
    /// if one is due.
    ///
    /// # Arguments
    /// * `transition` - The edge chosen by [`Transition::resolve`] or [`Transition::fault`].
    /// * `now` - Timestamp stamped on the new state.
    fn transition(&mut self, transition: Transition, now: DateTime<Utc>) {
        self.record.set_next(transition.to);
        if !transition.to.is_sequence_active() {
            self.apply_commands();
        }
        self.record.advance(now);
        info!("{} -> {} ({})", transition.from, transition.to, transition.reason);
        self.telemetry.publish(Telemetry::Transition(TransitionEvent {
            state: transition.to,
            previous_state: self.record.previous(),
            timestamp: now,
        }));
        self.publish_status_if_due(now);
    }

    /// Dispatches to the handler of `state`.
    ///
    /// # Returns
    /// The state the handler requests, or the fault that ended it.
    async fn execute(&mut self, state: ControlState) -> Result<ControlState, HardwareFault> {
        match state {
            ControlState::Sleeping => Ok(self.sleeping().await),
            ControlState::Ready => self.ready().await,
            ControlState::Scheduling => Ok(self.scheduling()),
            ControlState::Slewing => self.slewing().await,
            ControlState::Pointing => self.pointing().await,
            ControlState::Observing => self.observing().await,
            ControlState::Analyzing => self.analyzing().await,
            ControlState::Parking => Ok(self.parking().await),
            ControlState::Parked => Ok(self.parked().await),
            ControlState::Housekeeping => Ok(self.housekeeping().await),
            ControlState::Exit => Ok(ControlState::Exit),
        }
    }

    /// Bounds a facade call by `limit`.
    async fn bounded<T>(
        operation: &'static str,
        limit: Duration,
        call: impl Future<Output = Result<T, HardwareFault>>,
    ) -> Result<T, HardwareFault> {
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| HardwareFault::Timeout { operation, after: limit })?
    }

    /// Initializes the observatory, making up to `init_retry_attempts` bounded attempts.
    ///
    /// # Returns
    /// The fault of the last attempt if every attempt failed.
    async fn initialize_hardware(&mut self) -> Result<(), HardwareFault> {
        let attempts = self.control.init_retry_attempts;
        let mut last_fault = None;
        for attempt in 1..=attempts {
            let limit = self.control.slew_timeout();
            match Self::bounded("initialize", limit, self.observatory.initialize()).await {
                Ok(()) => {
                    self.initialized = true;
                    return Ok(());
                }
                Err(fault) => {
                    warn!("Initialization attempt {attempt}/{attempts} failed: {fault}");
                    last_fault = Some(fault);
                }
            }
        }
        self.initialized = false;
        Err(last_fault.unwrap_or_else(|| HardwareFault::device("initialize", "no attempt made")))
    }

    /// Waits for safe conditions and working hardware.
    ///
    /// Uninitialized hardware is retried on every pass. Between passes the loop waits for a new
    /// weather reading or a command, at most `sleep_recheck`. A command ends the state so it gets
    /// applied at the boundary.
    async fn sleeping(&mut self) -> ControlState {
        loop {
            if self.shutdown_pending {
                return ControlState::Parking;
            }
            if !self.initialized {
                if let Err(fault) = self.initialize_hardware().await {
                    error!("Hardware not available: {fault}");
                }
            }
            let verdict = self.safety.verdict(Utc::now());
            if self.initialized && verdict.is_safe() {
                return ControlState::Ready;
            }
            log!("Sleeping, {verdict}, hardware initialized: {}", self.initialized);

            let mut weather = self.safety.weather_feed();
            weather.borrow_and_update();
            let recheck = self.control.sleep_recheck();
            let command_arrived = tokio::select! {
                Ok(()) = weather.changed() => false,
                true = self.inbox.wait_and_defer() => true,
                () = tokio::time::sleep(recheck) => false,
            };
            if command_arrived {
                return ControlState::Sleeping;
            }
        }
    }

    /// Confirms the hardware is up before the night's first scheduling pass.
    async fn ready(&mut self) -> Result<ControlState, HardwareFault> {
        if self.shutdown_pending {
            return Ok(ControlState::Parking);
        }
        self.initialize_hardware().await?;
        info!("Hardware ready, {} observations in the pool", self.scheduler.len());
        Ok(ControlState::Scheduling)
    }

    /// Asks the scheduler for the best target right now and makes it current.
    ///
    /// # Returns
    /// * [`ControlState::Slewing`] when a target was selected.
    /// * [`ControlState::Parking`] when nothing is observable or a shutdown is pending.
    fn scheduling(&mut self) -> ControlState {
        if self.shutdown_pending {
            return ControlState::Parking;
        }
        let now = Utc::now();
        let Some(name) = self.scheduler.get_target(now).map(|o| o.name().to_string()) else {
            info!("No observable target among {} observations", self.scheduler.len());
            return ControlState::Parking;
        };
        self.scheduler.set_current(&name, now);
        ControlState::Slewing
    }

    /// Name and position of the current observation, a fault if there is none.
    fn current_target(&self, state: ControlState) -> Result<(String, SkyPosition), HardwareFault> {
        self.scheduler
            .current()
            .map(|o| (o.name().to_string(), *o.field().position()))
            .ok_or(HardwareFault::NoCurrentObservation(state))
    }

    /// Moves the mount to the current observation.
    ///
    /// Pointing is only requested the first time the mount reaches an observation after leaving park.
    async fn slewing(&mut self) -> Result<ControlState, HardwareFault> {
        let (name, position) = self.current_target(ControlState::Slewing)?;
        log!("Slewing to {name} at {position}");
        let limit = self.control.slew_timeout();
        Self::bounded("slew", limit, self.observatory.slew_to(&position)).await?;
        if self.pointing.enabled && self.pointed.as_deref() != Some(name.as_str()) {
            Ok(ControlState::Pointing)
        } else {
            Ok(ControlState::Observing)
        }
    }

    /// Closed-loop pointing refinement.
    ///
    /// Each iteration takes a short pointing exposure, solves it and corrects the mount until the
    /// residual is within `threshold_deg`. With `auto_correct` disabled the first residual is accepted.
    ///
    /// # Errors
    /// [`HardwareFault::PointingBudgetExceeded`] after `max_iterations` without convergence, or the
    /// fault of any pointing step that fails or times out.
    async fn pointing(&mut self) -> Result<ControlState, HardwareFault> {
        let (name, position) = self.current_target(ControlState::Pointing)?;
        let field_name = self.scheduler.current().map(|o| o.field().field_name()).unwrap_or_default();
        let exptime = self.pointing.exptime();
        let exposure_limit = exptime.to_std().unwrap_or_default() + self.control.readout_margin();
        for iteration in 1..=self.pointing.max_iterations {
            let request = ExposureRequest {
                id: format!("{field_name}_pointing_{iteration:02}"),
                field_name: field_name.clone(),
                position,
                exposure_time: exptime,
                kind: ExposureKind::Pointing,
            };
            let file =
                Self::bounded("pointing exposure", exposure_limit, self.observatory.take_exposure(&request)).await?;
            let solve_limit = self.control.solve_timeout();
            let offset =
                Self::bounded("plate solve", solve_limit, self.observatory.solve_pointing(&file, &position)).await?;
            let error_deg = offset.magnitude_deg(position.dec_deg());
            log!("Pointing iteration {iteration} on {name}: {offset} ({error_deg:.4}°)");
            if error_deg <= self.pointing.threshold_deg {
                self.pointed = Some(name.clone());
                return Ok(ControlState::Observing);
            }
            if !self.pointing.auto_correct {
                warn!("Pointing off by {error_deg:.4}° and auto correction is disabled");
                self.pointed = Some(name.clone());
                return Ok(ControlState::Observing);
            }
            let limit = self.control.slew_timeout();
            Self::bounded("pointing correction", limit, self.observatory.correct_pointing(&offset)).await?;
        }
        Err(HardwareFault::PointingBudgetExceeded { attempts: self.pointing.max_iterations })
    }

    /// Takes exactly one science exposure of the current observation.
    ///
    /// The exposure is bounded by its exposure time plus `readout_margin`. A successful exposure
    /// clears the fault counter and publishes a status event.
    ///
    /// # Returns
    /// [`ControlState::Observing`] while the current set is unfinished, otherwise
    /// [`ControlState::Analyzing`].
    async fn observing(&mut self) -> Result<ControlState, HardwareFault> {
        let missing = || HardwareFault::NoCurrentObservation(ControlState::Observing);
        let (request, limit) = {
            let current = self.scheduler.current().ok_or_else(missing)?;
            if !current.has_visits() {
                return Ok(ControlState::Analyzing);
            }
            let request = ExposureRequest {
                id: current.next_exposure_id(),
                field_name: current.field().field_name(),
                position: *current.field().position(),
                exposure_time: current.exposure_time(),
                kind: ExposureKind::Science,
            };
            let limit = current.exposure_time().to_std().unwrap_or_default() + self.control.readout_margin();
            (request, limit)
        };
        let file = Self::bounded("exposure", limit, self.observatory.take_exposure(&request)).await?;
        let now = Utc::now();
        let current = self.scheduler.current_mut().ok_or_else(missing)?;
        current.add_exposure(request.id.clone(), file, now);
        obs!("{}: exposure {}/{} done ({})", current.name(), current.current_exp_num(), current.min_nexp(), request.id);
        let next = if current.has_visits() && !current.set_complete() {
            ControlState::Observing
        } else {
            ControlState::Analyzing
        };
        self.consecutive_faults = 0;
        self.publish_status(now);
        Ok(next)
    }

    /// Hands the finished set to the analysis hook.
    ///
    /// A failed analysis is only logged. Observations with visits left go back to scheduling, finished
    /// ones park.
    async fn analyzing(&mut self) -> Result<ControlState, HardwareFault> {
        let status = self
            .scheduler
            .current()
            .map(Observation::status)
            .ok_or(HardwareFault::NoCurrentObservation(ControlState::Analyzing))?;
        let limit = self.control.solve_timeout();
        if let Err(fault) = Self::bounded("analysis", limit, self.observatory.analyze(&status)).await {
            warn!("Analysis of {} failed: {fault}", status.name);
        }
        if self.scheduler.current().is_some_and(Observation::has_visits) {
            Ok(ControlState::Scheduling)
        } else {
            obs!("{} complete with {} exposures", status.name, status.current_exp_num);
            Ok(ControlState::Parking)
        }
    }

    /// Parks the mount, retrying until it succeeds. Never returns a fault.
    async fn parking(&mut self) -> ControlState {
        let (limit, delay) = (self.control.park_timeout(), self.control.park_retry_delay());
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match Self::bounded("park", limit, self.observatory.park()).await {
                Ok(()) => break,
                Err(fault) => {
                    error!("Park attempt {attempt} failed: {fault}, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
            }
        }
        self.pointed = None;
        info!("Mount parked after {attempt} attempt(s)");
        ControlState::Parked
    }

    /// Decides between a new night and a long parked sleep.
    ///
    /// Goes back to `ready` when it is safe to observe some target and the fault budget is not spent. Otherwise sleeps for `parked_sleep` (cut short by commands) and hands over to
    /// housekeeping. A pending shutdown skips the sleep.
    async fn parked(&mut self) -> ControlState {
        if self.shutdown_pending {
            info!("Shutdown pending, finishing the run");
            return ControlState::Housekeeping;
        }
        let now = Utc::now();
        let within_fault_budget = self.consecutive_faults < self.control.max_consecutive_faults;
        if within_fault_budget && self.safety.is_safe(now) && self.scheduler.has_observable(now) {
            return ControlState::Ready;
        }
        if !within_fault_budget {
            warn!("{} consecutive faults, standing down until the next run", self.consecutive_faults);
        }
        let delay = self.control.parked_sleep();
        info!("Nothing to do, staying parked for {delay:?}");
        tokio::select! {
            true = self.inbox.wait_and_defer() => log!("Parked sleep cut short by an incoming command"),
            () = tokio::time::sleep(delay) => {}
        }
        ControlState::Housekeeping
    }

    /// End-of-run cleanup after the facade's housekeeping hook. Also clears the fault counter.
    async fn housekeeping(&mut self) -> ControlState {
        let limit = self.control.park_timeout();
        if let Err(fault) = Self::bounded("housekeeping", limit, self.observatory.housekeeping()).await {
            warn!("Housekeeping failed: {fault}");
        }
        self.scheduler.end_run();
        self.consecutive_faults = 0;
        if self.shutdown_pending { ControlState::Exit } else { ControlState::Sleeping }
    }

    /// Applies every queued command to the scheduler pool.
    ///
    /// Rejected `add` and `modify` entries are logged and skipped, the rest of the batch still applies.
    fn apply_commands(&mut self) {
        for command in self.inbox.drain() {
            log!("Applying {} command", command.kind());
            match command {
                ControlCommand::Add { targets } => {
                    for desc in &targets {
                        let added = Observation::try_from(desc)
                            .map_err(SchedulerError::from)
                            .and_then(|o| self.scheduler.add(o));
                        if let Err(e) = added {
                            warn!("Rejected add of {}: {e}", desc.target);
                        }
                    }
                }
                ControlCommand::Modify { targets } => {
                    for desc in &targets {
                        let modified = Observation::try_from(desc)
                            .map_err(SchedulerError::from)
                            .and_then(|o| self.scheduler.modify(o));
                        if let Err(e) = modified {
                            warn!("Rejected modify of {}: {e}", desc.target);
                        }
                    }
                }
                ControlCommand::Remove { targets } => {
                    for desc in &targets {
                        self.scheduler.remove(&desc.target);
                    }
                }
                ControlCommand::Shutdown => {
                    info!("Shutdown requested, exiting at the next parked checkpoint");
                    self.shutdown_pending = true;
                }
            }
        }
    }

    /// Publishes the progress of the current observation, if there is one.
    fn publish_status(&mut self, now: DateTime<Utc>) {
        let event = self.scheduler.current().map(|o| StatusEvent {
            current_exp_num: o.current_exp_num(),
            observation_name: o.name().to_string(),
            merit: o.merit(),
        });
        if let Some(event) = event {
            self.telemetry.publish(Telemetry::Status(event));
            self.last_status = Some(now);
        }
    }

    fn publish_status_if_due(&mut self, now: DateTime<Utc>) {
        let interval = TimeDelta::from_std(self.control.status_interval()).unwrap_or_else(|_| TimeDelta::days(1));
        if self.last_status.is_none_or(|last| now - last >= interval) {
            self.publish_status(now);
        }
    }

    #[cfg(test)]
    pub(crate) fn force_state(&mut self, state: ControlState) { self.record.force(state, Utc::now()); }
}

/// Extracts the message of a caught panic.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
