mod command;
mod control_loop;
mod control_state;
mod state_record;
mod telemetry;

pub use command::{CommandSender, ControlCommand};
pub use control_loop::ControlLoop;
pub use control_state::{ControlState, Transition, TransitionReason, validate_transition_table};
pub use state_record::StateRecord;
pub use telemetry::Telemetry;
