use crate::error::ConfigError;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use strum::IntoEnumIterator;

/// States of the control loop.
///
/// Exactly one is current at any time. The declared edges between them are listed by
/// [`ControlState::successors`], everything else is rejected by [`Transition::resolve`].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize)]
#[derive(strum_macros::Display, strum_macros::EnumString, strum_macros::EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ControlState {
    /// Daytime or bad weather. Waits for safe conditions and working hardware.
    Sleeping,
    /// Safe and initialized, about to pick the night's first target.
    Ready,
    Scheduling,
    Slewing,
    Pointing,
    /// One science exposure per visit of this state.
    Observing,
    Analyzing,
    Parking,
    /// Mount parked. Either back to `ready` or into a long idle wait.
    Parked,
    Housekeeping,
    /// Terminal. The loop stops.
    Exit,
}

impl ControlState {
    /// State a freshly created loop starts in.
    pub const INITIAL: ControlState = ControlState::Sleeping;

    /// Declared successors of each state.
    pub fn successors(self) -> &'static [ControlState] {
        use ControlState::{
            Analyzing, Exit, Housekeeping, Observing, Parked, Parking, Pointing, Ready, Scheduling,
            Sleeping, Slewing,
        };
        match self {
            Sleeping => &[Ready, Sleeping, Parking],
            Ready => &[Scheduling, Parking],
            Scheduling => &[Slewing, Parking],
            Slewing => &[Pointing, Observing, Parking],
            Pointing => &[Observing, Parking],
            Observing => &[Observing, Analyzing, Parking],
            Analyzing => &[Scheduling, Parking],
            Parking => &[Parked],
            Parked => &[Ready, Housekeeping, Parking],
            Housekeeping => &[Sleeping, Exit, Parking],
            Exit => &[],
        }
    }

    /// Whether `self -> next` is a declared edge.
    pub fn allows(self, next: ControlState) -> bool { self.successors().contains(&next) }

    pub fn is_terminal(self) -> bool { self == ControlState::Exit }

    /// States on the way to or at the park position. Entering them never needs a safe sky.
    pub fn is_safe_harbor(self) -> bool {
        matches!(
            self,
            ControlState::Parking
                | ControlState::Parked
                | ControlState::Housekeeping
                | ControlState::Sleeping
                | ControlState::Exit
        )
    }

    /// States that belong to an observation sequence in flight. The pool must not change
    /// while one of them is next.
    pub fn is_sequence_active(self) -> bool {
        matches!(
            self,
            ControlState::Slewing
                | ControlState::Pointing
                | ControlState::Observing
                | ControlState::Analyzing
        )
    }
}

/// Checks the structural properties the control loop relies on.
///
/// Only the terminal state may lack successors and no edge may be declared twice. Every live state
/// must reach `parking`, `parking` must lead to `parked`, and every state must be reachable from the
/// initial one.
///
/// # Errors
/// [`ConfigError::TransitionTable`] naming the first violation.
pub fn validate_transition_table() -> Result<(), ConfigError> {
    let malformed = |msg: String| Err(ConfigError::TransitionTable(msg));
    for state in ControlState::iter() {
        let successors = state.successors();
        if state.is_terminal() != successors.is_empty() {
            return malformed(format!("{state} must have successors iff it is not terminal"));
        }
        if successors.iter().collect::<HashSet<_>>().len() != successors.len() {
            return malformed(format!("{state} declares an edge twice"));
        }
        let needs_parking = !state.is_terminal() && state != ControlState::Parking;
        if needs_parking && !state.allows(ControlState::Parking) {
            return malformed(format!("{state} cannot reach parking"));
        }
    }
    if !ControlState::Parking.allows(ControlState::Parked) {
        return malformed("parking must lead to parked".to_string());
    }
    let mut reachable = HashSet::from([ControlState::INITIAL]);
    let mut queue = VecDeque::from([ControlState::INITIAL]);
    while let Some(state) = queue.pop_front() {
        for &next in state.successors() {
            if reachable.insert(next) {
                queue.push_back(next);
            }
        }
    }
    if let Some(orphan) = ControlState::iter().find(|s| !reachable.contains(s)) {
        return malformed(format!("{orphan} is unreachable from {}", ControlState::INITIAL));
    }
    Ok(())
}

/// Why the loop ended up where it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransitionReason {
    /// The state logic's request, granted.
    Requested,
    /// Redirected to `parking` by the safety gate.
    Unsafe,
    /// The request was not a declared edge.
    Undeclared,
    /// State logic returned an error or panicked.
    Fault,
}

/// One resolved edge, with the original request kept for the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ControlState,
    pub requested: ControlState,
    pub to: ControlState,
    pub reason: TransitionReason,
}

impl Transition {
    /// Applies the safety guard and edge validation to a requested transition.
    ///
    /// Unsafe conditions redirect every destination outside the park chain to `parking`.
    /// Undeclared edges are treated as faults and also end in `parking`.
    pub fn resolve(from: ControlState, requested: ControlState, is_safe: bool) -> Self {
        let (to, reason) = if !from.allows(requested) {
            (ControlState::Parking, TransitionReason::Undeclared)
        } else if !is_safe && !requested.is_safe_harbor() {
            (ControlState::Parking, TransitionReason::Unsafe)
        } else {
            (requested, TransitionReason::Requested)
        };
        Self { from, requested, to, reason }
    }

    /// State logic failed, no matter what it wanted the mount goes to park.
    pub fn fault(from: ControlState) -> Self {
        Self { from, requested: ControlState::Parking, to: ControlState::Parking, reason: TransitionReason::Fault }
    }
}
