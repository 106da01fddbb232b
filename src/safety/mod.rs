mod safety_monitor;
mod supervisor;
#[cfg(test)]
mod tests;
mod weather;

pub use safety_monitor::{SafetyMonitor, SafetyOverride, SafetyVerdict, SimulatedCondition};
pub use supervisor::Supervisor;
pub use weather::{FileWeatherSource, SimulatedWeatherStation, WeatherRecord, WeatherSource};
