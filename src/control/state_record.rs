use super::control_state::ControlState;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Last entry and exit time of one state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateTiming {
    pub entered: Option<DateTime<Utc>>,
    pub exited: Option<DateTime<Utc>>,
}

/// Current, previous and next state of the loop plus per-state timestamps.
#[derive(Debug, Clone)]
pub struct StateRecord {
    current: ControlState,
    previous: Option<ControlState>,
    next: Option<ControlState>,
    timings: HashMap<ControlState, StateTiming>,
}

impl StateRecord {
    /// Starts in `initial`, entered at `now`.
    pub fn new(initial: ControlState, now: DateTime<Utc>) -> Self {
        let timings = HashMap::from([(initial, StateTiming { entered: Some(now), exited: None })]);
        Self { current: initial, previous: None, next: None, timings }
    }

    pub fn current(&self) -> ControlState { self.current }
    pub fn previous(&self) -> Option<ControlState> { self.previous }
    pub fn next(&self) -> Option<ControlState> { self.next }
    /// Last entry and exit of `state`. Empty for states never visited.
    pub fn timing(&self, state: ControlState) -> StateTiming { self.timings.get(&state).copied().unwrap_or_default() }

    /// Records the resolved next state before the transition is carried out.
    pub fn set_next(&mut self, next: ControlState) { self.next = Some(next); }

    /// Leaves the current state for the recorded next one.
    pub fn advance(&mut self, now: DateTime<Utc>) {
        let Some(next) = self.next.take() else { return };
        self.timings.entry(self.current).or_default().exited = Some(now);
        self.timings.entry(next).or_default().entered = Some(now);
        self.previous = Some(self.current);
        self.current = next;
    }

    #[cfg(test)]
    pub(crate) fn force(&mut self, state: ControlState, now: DateTime<Utc>) {
        self.next = Some(state);
        self.advance(now);
    }
}
