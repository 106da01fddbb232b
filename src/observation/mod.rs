mod field;
#[allow(clippy::module_inception)]
mod observation;
mod target_descriptor;

pub use field::Field;
pub use observation::{Observation, ObservationStatus};
pub use target_descriptor::TargetDescriptor;
