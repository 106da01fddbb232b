use super::UnitConfig;
use crate::error::ConfigError;
use crate::info;
use crate::scheduling::MeritId;
use chrono::TimeDelta;
use std::time::Duration;

const FULL_CONFIG: &str = r#"
targets_file = "does-not-matter-here.json"

[site]
name = "Siding Spring"
latitude_deg = -31.27
longitude_deg = 149.06
elevation_m = 1165.0
horizon_deg = 25.0
obstructions = [[0.0, 40.0], [90.0, 30.0]]

[safety]
weather_max_age_s = 120
simulator = ["night"]

[scheduler]
merit_weights = { observable = 1.0, moon_separation = 0.5 }
min_moon_separation_deg = 20.0

[control]
slew_timeout_s = 90.0
parked_sleep_s = 2400.0

[pointing]
enabled = false

[[targets]]
target = "NGC 300"
position = "00h54m53.5s -37d41m04s"
exp_time = 60
min_nexp = 20
exp_set_size = 5
"#;

#[test]
fn test_empty_config_is_all_defaults() {
    let config = UnitConfig::from_toml_str("").unwrap();
    assert_eq!(config, UnitConfig::default());
    assert_eq!(config.max_weather_age(), TimeDelta::seconds(180));
    assert_eq!(config.control.parked_sleep(), Duration::from_secs(1800));
    assert_eq!(config.merit_weights().unwrap().get(MeritId::Observable), Some(1.0));
    assert!(!config.simulator().unwrap().is_active());
    assert!(config.startup_targets().unwrap().is_empty());
    assert_eq!(config.pointing.max_iterations, 3);
}

#[test]
fn test_full_config() {
    let config = UnitConfig::from_toml_str(FULL_CONFIG).unwrap();
    info!("Parsed config for {}", config.site.name);
    let site = config.site().unwrap();
    assert!((site.horizon().limit_at(45.0) - 35.0).abs() < 1e-9);
    assert_eq!(config.max_weather_age(), TimeDelta::seconds(120));
    assert!(config.simulator().unwrap().night());
    assert!(!config.simulator().unwrap().weather());
    assert_eq!(config.merit_weights().unwrap().get(MeritId::MoonSeparation), Some(0.5));
    assert_eq!(config.control.slew_timeout(), Duration::from_secs(90));
    assert_eq!(config.control.park_retry_delay(), Duration::from_secs(30));
    assert!(!config.pointing.enabled);
    assert_eq!(config.targets.len(), 1);
    assert_eq!(config.targets[0].min_nexp, 20);
}

#[test]
fn test_invalid_configs_are_rejected() {
    let unknown_merit = "[scheduler]\nmerit_weights = { observable = 1.0, airmass = 2.0 }";
    assert!(matches!(UnitConfig::from_toml_str(unknown_merit), Err(ConfigError::UnknownMerit(id)) if id == "airmass"));

    let negative_weight = "[scheduler]\nmerit_weights = { observable = -1.0 }";
    assert!(matches!(UnitConfig::from_toml_str(negative_weight), Err(ConfigError::InvalidWeight { .. })));

    let bad_simulator = "[safety]\nsimulator = [\"clouds\"]";
    assert!(UnitConfig::from_toml_str(bad_simulator).is_err());

    let bad_latitude = "[site]\nlatitude_deg = 123.0";
    assert!(UnitConfig::from_toml_str(bad_latitude).is_err());

    let zero_timeout = "[control]\nslew_timeout_s = 0";
    assert!(matches!(
        UnitConfig::from_toml_str(zero_timeout),
        Err(ConfigError::InvalidValue { key: "control.slew_timeout_s", .. })
    ));

    let typo = "[control]\nslew_timout_s = 10";
    assert!(matches!(UnitConfig::from_toml_str(typo), Err(ConfigError::Toml(_))));

    let no_iterations = "[pointing]\nmax_iterations = 0";
    assert!(UnitConfig::from_toml_str(no_iterations).is_err());
}

#[test]
fn test_oversized_durations_fail_at_load() {
    let huge_park = "[control]\npark_timeout_s = 1e30";
    let err = UnitConfig::from_toml_str(huge_park).unwrap_err();
    info!("Rejected configuration: {err}");
    assert!(matches!(err, ConfigError::InvalidValue { key: "control.park_timeout_s", .. }));

    let huge_margin = "[control]\nreadout_margin_s = 1e300";
    assert!(matches!(
        UnitConfig::from_toml_str(huge_margin),
        Err(ConfigError::InvalidValue { key: "control.readout_margin_s", .. })
    ));
    let huge_age = "[safety]\nweather_max_age_s = 1e20";
    assert!(matches!(
        UnitConfig::from_toml_str(huge_age),
        Err(ConfigError::InvalidValue { key: "safety.weather_max_age_s", .. })
    ));

    let one_day = UnitConfig::from_toml_str("[control]\nparked_sleep_s = 86400.0").unwrap();
    assert_eq!(one_day.control.parked_sleep(), Duration::from_secs(86_400));

    // accessors saturate even when validation is bypassed
    let mut unchecked = UnitConfig::default();
    unchecked.control.park_timeout_s = 1e30;
    assert_eq!(unchecked.control.park_timeout(), Duration::MAX);
}

#[test]
fn test_startup_targets() {
    let path = std::env::temp_dir().join(format!("scope-ob-targets-{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"[{"target": "Wasp 104", "position": "160.665 7.435", "exp_time": 30, "min_nexp": 6, "exp_set_size": 3}]"#,
    )
    .unwrap();
    let mut config = UnitConfig::from_toml_str(FULL_CONFIG).unwrap();
    config.targets_file = Some(path.clone());
    let targets = config.startup_targets().unwrap();
    assert_eq!(targets.iter().map(|o| o.name()).collect::<Vec<_>>(), ["NGC 300", "Wasp 104"]);

    config.targets[0].exp_set_size = 3;
    assert!(matches!(config.startup_targets(), Err(ConfigError::InvalidObservation { .. })));
    std::fs::remove_file(&path).unwrap();

    config.targets.clear();
    assert!(matches!(config.startup_targets(), Err(ConfigError::Io(_))));
}
