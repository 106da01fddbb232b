mod merit;
mod scheduler;
#[cfg(test)]
mod tests;

pub use merit::{
    MeritContext, MeritFunction, MeritId, MeritRegistry, MeritValue, MeritWeights, MoonSeparation,
    Observable,
};
pub use scheduler::Scheduler;
