#![allow(dead_code, clippy::similar_names)]
#![warn(clippy::shadow_reuse, clippy::shadow_same, clippy::builtin_type_shadow)]
mod astro;
mod config;
mod control;
mod error;
mod logger;
mod observation;
mod observatory;
mod safety;
mod scheduling;

use crate::config::UnitConfig;
use crate::control::{CommandSender, ControlCommand, ControlLoop, Telemetry};
use crate::observatory::{Observatory, SimulatedObservatory};
use crate::safety::{FileWeatherSource, SafetyMonitor, SimulatedWeatherStation, Supervisor, WeatherSource};
use crate::scheduling::Scheduler;
use std::{env, path::PathBuf, sync::Arc, time::Duration};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Configuration file used when `SCOPE_CONFIG` is not set.
const DEFAULT_CONFIG_PATH: &str = "unit.toml";
/// Fraction of the requested exposure time a simulated exposure really takes.
const SIM_TIME_SCALE: f64 = 0.01;
/// Duration of every simulated slew and park.
const SIM_SLEW_DELAY: Duration = Duration::from_secs(2);
/// Largest pointing error per axis after a simulated slew.
const SIM_POINTING_JITTER_DEG: f64 = 0.2;
/// Fraction of the pointing error left after a simulated correction.
const SIM_CORRECTION_FACTOR: f64 = 0.1;
/// Chance that a simulated weather poll reports unsafe conditions.
const SIM_UNSAFE_PROBABILITY: f64 = 0.0;

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    let config_var = env::var("SCOPE_CONFIG");
    let config_path = PathBuf::from(config_var.as_ref().map_or(DEFAULT_CONFIG_PATH, |v| v.as_str()));
    let config = UnitConfig::load_or_default(&config_path)
        .unwrap_or_else(|e| fatal!("Invalid configuration in {}: {e}", config_path.display()));

    let cancel = CancellationToken::new();
    let (mut control_loop, commands) = init(&config, cancel.clone());
    spawn_telemetry_printer(control_loop.telemetry().subscribe());
    spawn_command_reader(commands.clone());
    spawn_shutdown_on_ctrl_c(commands);

    control_loop.run().await;
    cancel.cancel();
    info!("Unit {} shut down", config.site.name);
}

/// Builds the unit from its configuration.
///
/// Spawns the weather supervisor, wires the safety monitor to it and fills the scheduler with the
/// startup targets. Startup targets the scheduler rejects are skipped with a warning. Any other
/// configuration problem is fatal.
///
/// # Arguments
/// * `config` - Validated unit configuration.
/// * `cancel` - Stops the weather supervisor once the loop has exited.
///
/// # Returns
/// The control loop in `sleeping` and the sender for its command queue.
fn init(config: &UnitConfig, cancel: CancellationToken) -> (ControlLoop, CommandSender) {
    let site = Arc::new(config.site().unwrap_or_else(|e| fatal!("Invalid site: {e}")));
    info!(
        "Site {} at {:.4}°, {:.4}°, {:.0} m",
        site.name(),
        site.latitude_deg(),
        site.longitude_deg(),
        site.elevation_m()
    );

    let source: Arc<dyn WeatherSource> = match &config.safety.weather_file {
        Some(path) => Arc::new(FileWeatherSource::new(path.clone())),
        None => Arc::new(SimulatedWeatherStation::new(SIM_UNSAFE_PROBABILITY)),
    };
    info!("Weather from the {}", source.name());
    let (supervisor, weather_rx) = Supervisor::new(source, config.weather_poll_interval());
    tokio::spawn(async move {
        supervisor.run(cancel).await;
    });

    let simulator = config.simulator().unwrap_or_else(|e| fatal!("{e}"));
    let safety = Arc::new(SafetyMonitor::new(
        Arc::clone(&site),
        config.site.twilight_horizon_deg,
        config.max_weather_age(),
        weather_rx,
        simulator,
    ));

    let weights = config.merit_weights().unwrap_or_else(|e| fatal!("{e}"));
    let mut scheduler = Scheduler::new(site, config.merit_registry(), weights)
        .unwrap_or_else(|e| fatal!("Scheduler setup failed: {e}"));
    let targets = config.startup_targets().unwrap_or_else(|e| fatal!("Invalid startup targets: {e}"));
    for observation in targets {
        let name = observation.name().to_string();
        if let Err(e) = scheduler.add(observation) {
            warn!("Skipping startup target {name}: {e}");
        }
    }

    let observatory: Arc<dyn Observatory> = Arc::new(
        SimulatedObservatory::new()
            .with_time_scale(SIM_TIME_SCALE)
            .with_slew_delay(SIM_SLEW_DELAY)
            .with_pointing(SIM_POINTING_JITTER_DEG, SIM_CORRECTION_FACTOR),
    );
    ControlLoop::new(scheduler, safety, observatory, config.control.clone(), config.pointing.clone())
        .unwrap_or_else(|e| fatal!("Control loop setup failed: {e}"))
}

/// Publishes telemetry as JSON lines on stdout.
fn spawn_telemetry_printer(mut telemetry: broadcast::Receiver<Telemetry>) {
    tokio::spawn(async move {
        loop {
            match telemetry.recv().await {
                Ok(event) => println!("{}", event.to_json()),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("Telemetry printer skipped {n} events"),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Reads one JSON command per stdin line.
fn spawn_command_reader(commands: CommandSender) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match ControlCommand::from_json(&line) {
                Ok(command) => {
                    log!("Received {} command", command.kind());
                    if commands.send(command).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Ignoring malformed command: {e}"),
            }
        }
    });
}

/// Turns an interrupt into a cooperative `shutdown` command.
fn spawn_shutdown_on_ctrl_c(commands: CommandSender) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, shutting down after parking");
            let _ = commands.send(ControlCommand::Shutdown);
        }
    });
}
