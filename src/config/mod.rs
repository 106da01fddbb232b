#[cfg(test)]
mod tests;
mod unit_config;

pub use unit_config::{ControlConfig, PointingConfig, SafetyConfig, SchedulerConfig, SiteConfig, UnitConfig};
