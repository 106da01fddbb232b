use super::{
    FileWeatherSource, SafetyMonitor, SafetyOverride, SimulatedCondition, SimulatedWeatherStation,
    Supervisor, WeatherRecord, WeatherSource,
};
use crate::astro::{HorizonProfile, Site};
use crate::error::HardwareFault;
use crate::{info, log};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::{str::FromStr, sync::Arc, time::Duration};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

const MAX_AGE: TimeDelta = TimeDelta::seconds(180);

fn greenwich() -> Arc<Site> {
    Arc::new(Site::new("Greenwich", 51.4769, 0.0, 46.0, HorizonProfile::flat(30.0)).unwrap())
}

fn winter_midnight() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 12, 21, 0, 0, 0).unwrap() }
fn summer_noon() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 6, 21, 12, 0, 0).unwrap() }

fn monitor_with(
    record: Option<WeatherRecord>,
    simulator: SafetyOverride,
) -> (SafetyMonitor, watch::Sender<Option<WeatherRecord>>) {
    let (tx, rx) = watch::channel(record);
    (SafetyMonitor::new(greenwich(), 18.0, MAX_AGE, rx, simulator), tx)
}

#[test]
fn test_is_dark_follows_the_sun() {
    let (monitor, _tx) = monitor_with(None, SafetyOverride::none());
    assert!(monitor.is_dark(winter_midnight(), 18.0));
    assert!(!monitor.is_dark(summer_noon(), 18.0));
    // at midsummer midnight the sun at Greenwich stays above -18°
    let summer_midnight = Utc.with_ymd_and_hms(2024, 6, 21, 0, 0, 0).unwrap();
    log!("Sun altitude at midsummer midnight: {:.2}°", monitor.sun_altitude(summer_midnight));
    assert!(!monitor.is_dark(summer_midnight, 18.0));
    assert!(monitor.is_dark(summer_midnight, 12.0));
}

#[test]
fn test_stale_safe_record_is_unsafe() {
    let now = winter_midnight();
    let stale = WeatherRecord::new(true, now - TimeDelta::seconds(200));
    let (monitor, _tx) = monitor_with(Some(stale), SafetyOverride::none());
    assert!(!monitor.weather_safe_at(now, MAX_AGE));
    assert!(monitor.weather_safe_at(now, TimeDelta::seconds(300)));
    assert!(!monitor.is_safe(now));
}

#[test]
fn test_weather_fail_closed() {
    let now = winter_midnight();
    let (monitor, tx) = monitor_with(None, SafetyOverride::none());
    assert!(!monitor.weather_safe_at(now, MAX_AGE));

    tx.send_replace(Some(WeatherRecord::new(false, now)));
    assert!(!monitor.weather_safe_at(now, MAX_AGE));

    tx.send_replace(Some(WeatherRecord::new(true, now - TimeDelta::seconds(10))));
    assert!(monitor.weather_safe_at(now, MAX_AGE));
    assert!(monitor.is_safe(now));

    tx.send_replace(Some(WeatherRecord::new(true, now + TimeDelta::hours(1))));
    assert!(!monitor.weather_safe_at(now, MAX_AGE));
}

#[test]
fn test_is_safe_is_dark_and_weather() {
    let (monitor, tx) = monitor_with(None, SafetyOverride::none());
    let mut t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    for i in 0..96 {
        tx.send_replace(Some(WeatherRecord::new(i % 3 != 0, t - TimeDelta::seconds(i % 5 * 60))));
        let expected = monitor.is_dark(t, 18.0) && monitor.weather_safe_at(t, MAX_AGE);
        let verdict = monitor.verdict(t);
        assert_eq!(verdict.is_safe(), expected);
        assert_eq!(monitor.is_safe(t), expected);
        assert_eq!(verdict.evaluated_at, t);
        t += TimeDelta::minutes(15);
    }
}

#[test]
fn test_simulator_override_is_explicit() {
    assert_eq!(SimulatedCondition::from_str("Night").unwrap(), SimulatedCondition::Night);
    assert!(SimulatedCondition::from_str("clouds").is_err());

    let night = SafetyOverride::from_conditions(&[SimulatedCondition::Night]);
    let (monitor, _tx) = monitor_with(Some(WeatherRecord::new(true, summer_noon())), night);
    let verdict = monitor.verdict(summer_noon());
    info!("Verdict with simulated night: {verdict}");
    assert!(verdict.is_safe());
    assert!(verdict.simulated);

    let all = SafetyOverride::from_conditions(&[SimulatedCondition::All]);
    let (monitor, _tx) = monitor_with(None, all);
    assert!(monitor.is_safe(summer_noon()));

    let (monitor, _tx) = monitor_with(None, SafetyOverride::none());
    assert!(!monitor.verdict(winter_midnight()).simulated);
}

#[test]
fn test_weather_message_parsing() {
    let record =
        WeatherRecord::from_json(r#"{"type": "weather", "data": {"safe": true}, "date": "2024-12-21T00:00:00Z"}"#)
            .unwrap();
    assert!(record.safe);
    assert_eq!(record.timestamp, winter_midnight());
    assert_eq!(WeatherRecord::from_json(&record.to_json()).unwrap(), record);
    assert!(WeatherRecord::from_json(r#"{"type": "environment", "data": {"safe": true}, "date": "2024-12-21T00:00:00Z"}"#).is_err());
    assert!(WeatherRecord::from_json("{}").is_err());
}

/// Replays a fixed list of poll results.
struct ScriptedSource {
    script: Mutex<Vec<Result<Option<WeatherRecord>, HardwareFault>>>,
}

#[async_trait]
impl WeatherSource for ScriptedSource {
    fn name(&self) -> &'static str { "scripted" }

    async fn latest(&self) -> Result<Option<WeatherRecord>, HardwareFault> {
        self.script.lock().await.pop().unwrap_or(Ok(None))
    }
}

#[tokio::test]
async fn test_supervisor_keeps_last_record_on_failure() {
    let first = WeatherRecord::new(true, Utc::now());
    let source = ScriptedSource {
        // popped from the back
        script: Mutex::new(vec![
            Ok(None),
            Err(HardwareFault::device("weather read", "station offline")),
            Ok(Some(first)),
        ]),
    };
    let (supervisor, rx) = Supervisor::new(Arc::new(source), Duration::from_millis(10));
    assert!(rx.borrow().is_none());
    assert!(supervisor.poll_once().await);
    assert_eq!(*rx.borrow(), Some(first));
    assert!(!supervisor.poll_once().await);
    assert!(!supervisor.poll_once().await);
    assert_eq!(*rx.borrow(), Some(first));
}

#[tokio::test]
async fn test_supervisor_run_until_cancelled() {
    let (supervisor, mut rx) =
        Supervisor::new(Arc::new(SimulatedWeatherStation::new(0.0)), Duration::from_millis(5));
    let supervisor = Arc::new(supervisor);
    let cancel = CancellationToken::new();
    let handle = {
        let (supervisor, cancel) = (Arc::clone(&supervisor), cancel.clone());
        tokio::spawn(async move { supervisor.run(cancel).await })
    };
    tokio::time::timeout(Duration::from_secs(2), rx.changed()).await.unwrap().unwrap();
    assert!(rx.borrow().is_some_and(|r| r.safe));
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_file_weather_source() {
    let path = std::env::temp_dir().join(format!("scope-ob-weather-{}.json", std::process::id()));
    let source = FileWeatherSource::new(path.clone());
    assert_eq!(source.latest().await.unwrap(), None);

    let record = WeatherRecord::new(false, winter_midnight());
    tokio::fs::write(&path, record.to_json()).await.unwrap();
    assert_eq!(source.latest().await.unwrap(), Some(record));

    tokio::fs::write(&path, "not json").await.unwrap();
    assert!(source.latest().await.is_err());
    tokio::fs::remove_file(&path).await.unwrap();
}
