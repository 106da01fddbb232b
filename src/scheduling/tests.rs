use super::{
    MeritContext, MeritFunction, MeritId, MeritRegistry, MeritValue, MeritWeights, MoonSeparation,
    Observable, Scheduler,
};
use crate::astro::{HorizonProfile, Site, SkyPosition, angular_separation, ephemeris};
use crate::error::{ConfigError, SchedulerError};
use crate::observation::{Field, Observation};
use crate::{info, log};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use indexmap::IndexMap;
use std::sync::Arc;

fn site(horizon_deg: f64) -> Arc<Site> {
    Arc::new(Site::new("Greenwich", 51.4769, 0.0, 46.0, HorizonProfile::flat(horizon_deg)).unwrap())
}

fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 12, 21, 0, 0, 0).unwrap() }

fn observation(name: &str, ra: f64, dec: f64, priority: f64) -> Observation {
    let field = Field::new(name, SkyPosition::new(ra, dec), priority).unwrap();
    Observation::with_seconds(field, 60.0, 10, 5).unwrap()
}

fn scheduler(horizon_deg: f64, weights: MeritWeights) -> Scheduler {
    Scheduler::new(site(horizon_deg), MeritRegistry::builtin(15.0), weights).unwrap()
}

/// A target at hour angle `ha_h` hours on the celestial equator at `t0`.
fn equatorial_at_hour_angle(name: &str, ha_h: f64, exp_time: f64, min_nexp: usize) -> Observation {
    let ra = site(0.0).local_sidereal_deg(t0()) - ha_h * 15.0;
    let field = Field::new(name, SkyPosition::new(ra, 0.0), 100.0).unwrap();
    Observation::with_seconds(field, exp_time, min_nexp, 10).unwrap()
}

#[test]
fn test_higher_priority_wins() {
    let mut sched = scheduler(30.0, MeritWeights::default());
    sched.add(observation("low", 10.0, 88.0, 50.0)).unwrap();
    sched.add(observation("high", 200.0, 88.5, 100.0)).unwrap();
    let target = sched.get_target(t0()).unwrap();
    assert_eq!(target.name(), "high");
    assert!((target.merit() - 100.0).abs() < 1e-9);
    assert!((sched.get("low").unwrap().merit() - 50.0).abs() < 1e-9);
}

#[test]
fn test_ties_go_to_earliest_registration() {
    let mut sched = scheduler(30.0, MeritWeights::default());
    sched.add(observation("first", 10.0, 88.0, 70.0)).unwrap();
    sched.add(observation("second", 200.0, 88.0, 70.0)).unwrap();
    for _ in 0..5 {
        assert_eq!(sched.get_target(t0()).unwrap().name(), "first");
    }
    let ranked = sched.rank(t0());
    assert_eq!(ranked.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(), ["first", "second"]);
}

#[test]
fn test_never_returns_vetoed_observation() {
    let mut sched = scheduler(30.0, MeritWeights::default());
    sched.add(observation("southern", 10.0, -80.0, 1000.0)).unwrap();
    assert!(sched.get_target(t0()).is_none());
    assert!(!sched.has_observable(t0()));
    sched.add(observation("northern", 10.0, 88.0, 1.0)).unwrap();
    assert_eq!(sched.get_target(t0()).unwrap().name(), "northern");
    assert!(sched.get("southern").unwrap().merit().abs() < f64::EPSILON);
}

#[test]
fn test_observable_samples_the_whole_visit() {
    let sched = scheduler(5.0, MeritWeights::default());
    let context = MeritContext::new(sched.site(), t0());
    let short = equatorial_at_hour_angle("short", 5.0, 60.0, 10);
    let long = equatorial_at_hour_angle("long", 5.0, 60.0, 120);
    let altaz = sched.site().altaz(short.field().position(), t0());
    log!("Setting target starts at {altaz}");
    assert_eq!(Observable.evaluate(&short, &context), MeritValue::Score(1.0));
    assert_eq!(Observable.evaluate(&long, &context), MeritValue::Veto);

    // progress shortens the remaining visit and with it the sampled window
    let mut almost_done = equatorial_at_hour_angle("almost", 5.0, 60.0, 120);
    for _ in 0..110 {
        almost_done.add_exposure(almost_done.next_exposure_id(), String::new(), t0());
    }
    assert_eq!(almost_done.visit_duration(), TimeDelta::minutes(10));
    assert_eq!(Observable.evaluate(&almost_done, &context), MeritValue::Score(1.0));
}

#[test]
fn test_visit_past_the_end_of_time_is_vetoed() {
    let sched = scheduler(30.0, MeritWeights::default());
    let pole = observation("pole", 10.0, 88.0, 1.0);
    let late = DateTime::<Utc>::MAX_UTC - TimeDelta::minutes(5);
    let context = MeritContext::new(sched.site(), late);
    assert_eq!(Observable.evaluate(&pole, &context), MeritValue::Veto);

    let mut sched = scheduler(30.0, MeritWeights::default());
    sched.add(pole).unwrap();
    assert!(sched.get_target(late).is_none());
    assert!(!sched.has_observable(late));
    assert_eq!(sched.get_target(t0()).unwrap().name(), "pole");
}

#[test]
fn test_moon_separation_merit() {
    let t = t0();
    let moon = ephemeris::moon_position(t);
    let site = site(0.0);
    let context = MeritContext::new(&site, t);
    let merit = MoonSeparation::new(15.0);

    let near = observation("near", moon.ra_deg() + 5.0, moon.dec_deg(), 1.0);
    assert!(merit.evaluate(&near, &context).is_veto());

    let far = observation("far", moon.ra_deg() + 180.0, -moon.dec_deg(), 1.0);
    let MeritValue::Score(score) = merit.evaluate(&far, &context) else {
        panic!("far target vetoed");
    };
    info!("Moon at {moon}, far target merit {score:.3}");
    assert!((score - 1.0).abs() < 1e-6);
}

#[test]
fn test_weighted_sum_of_merits() {
    let weights = MeritWeights::new([(MeritId::Observable, 1.0), (MeritId::MoonSeparation, 0.5)]).unwrap();
    let mut sched = scheduler(30.0, weights);
    let obs = observation("pole", 10.0, 88.0, 80.0);
    let sep = angular_separation(obs.field().position(), &ephemeris::moon_position(t0()));
    sched.add(obs).unwrap();
    let target = sched.get_target(t0()).unwrap();
    let expected = 80.0 * (1.0 + 0.5 * sep / 180.0);
    assert!((target.merit() - expected).abs() < 1e-9, "{} != {expected}", target.merit());
}

#[test]
fn test_finished_observations_are_skipped() {
    let mut sched = scheduler(30.0, MeritWeights::default());
    let mut done = observation("done", 10.0, 88.0, 100.0);
    for _ in 0..10 {
        done.add_exposure(done.next_exposure_id(), String::new(), t0());
    }
    assert!(!done.has_visits());
    sched.add(done).unwrap();
    assert!(sched.get_target(t0()).is_none());
    sched.add(observation("open", 10.0, 87.0, 1.0)).unwrap();
    assert_eq!(sched.get_target(t0()).unwrap().name(), "open");
}

#[test]
fn test_pool_mutations() {
    let mut sched = scheduler(30.0, MeritWeights::default());
    assert!(sched.get_target(t0()).is_none());
    sched.add(observation("a", 10.0, 88.0, 10.0)).unwrap();
    sched.add(observation("b", 20.0, 88.0, 10.0)).unwrap();
    assert!(matches!(
        sched.add(observation("a", 30.0, 88.0, 99.0)),
        Err(SchedulerError::DuplicateField(name)) if name == "a"
    ));
    assert!(matches!(
        sched.modify(observation("zzz", 30.0, 88.0, 99.0)),
        Err(SchedulerError::UnknownField(_))
    ));

    // absent names are a silent no-op
    assert!(sched.remove("not-there").is_none());
    assert_eq!(sched.len(), 2);

    sched.set_current("a", t0());
    sched.current_mut().unwrap().add_exposure("x".to_string(), String::new(), t0());
    sched.modify(observation("a", 10.0, 88.0, 5.0)).unwrap();
    assert!(sched.current().is_none());
    let a = sched.get("a").unwrap();
    assert_eq!(a.current_exp_num(), 0);
    assert!((a.field().priority() - 5.0).abs() < f64::EPSILON);
    assert_eq!(sched.pool().keys().collect::<Vec<_>>(), ["a", "b"]);

    sched.set_current("b", t0());
    assert!(sched.remove("b").is_some());
    assert!(sched.current().is_none());
    assert_eq!(sched.len(), 1);
}

#[test]
fn test_remove_matches_trimmed_names() {
    let mut sched = scheduler(30.0, MeritWeights::default());
    sched.add(observation(" M42 ", 83.82, 88.0, 10.0)).unwrap();
    assert_eq!(sched.pool().keys().collect::<Vec<_>>(), ["M42"]);
    sched.set_current("M42", t0());
    assert_eq!(sched.remove(" M42 ").map(|o| o.name().to_string()).as_deref(), Some("M42"));
    assert!(sched.is_empty());
    assert!(sched.current().is_none());
}

#[test]
fn test_switching_current_resets_unfinished() {
    let mut sched = scheduler(30.0, MeritWeights::default());
    sched.add(observation("a", 10.0, 88.0, 10.0)).unwrap();
    sched.add(observation("b", 20.0, 88.0, 10.0)).unwrap();
    assert!(sched.set_current("a", t0()));
    assert!(!sched.set_current("a", t0()));
    assert!(!sched.set_current("missing", t0()));
    for _ in 0..5 {
        let obs = sched.current_mut().unwrap();
        obs.add_exposure(obs.next_exposure_id(), String::new(), t0());
    }
    assert!(sched.set_current("b", t0() + TimeDelta::minutes(5)));
    assert_eq!(sched.get("a").unwrap().current_exp_num(), 0);
    assert_eq!(sched.observed_list().len(), 2);
    assert_eq!(sched.observed_list()[1].1, "b");

    sched.end_run();
    assert!(sched.current().is_none());
    assert!(sched.observed_list().is_empty());
}

#[test]
fn test_completed_observations_return_for_the_next_run() {
    let mut sched = scheduler(30.0, MeritWeights::default());
    sched.add(observation("polaris", 10.0, 89.0, 100.0)).unwrap();
    sched.add(observation("other", 20.0, 88.0, 10.0)).unwrap();
    assert_eq!(sched.get_target(t0()).unwrap().name(), "polaris");
    sched.set_current("polaris", t0());
    for _ in 0..10 {
        let obs = sched.current_mut().unwrap();
        obs.add_exposure(obs.next_exposure_id(), String::new(), t0());
    }
    assert!(!sched.current().unwrap().has_visits());
    assert_eq!(sched.get_target(t0()).unwrap().name(), "other");

    sched.end_run();
    let polaris = sched.get("polaris").unwrap();
    assert_eq!(polaris.current_exp_num(), 0);
    assert!(polaris.seq_time().is_none());
    assert_eq!(sched.get_target(t0() + TimeDelta::days(1)).unwrap().name(), "polaris");

    // replacing a completed current observation resets it as well
    sched.set_current("polaris", t0());
    for _ in 0..10 {
        let obs = sched.current_mut().unwrap();
        obs.add_exposure(obs.next_exposure_id(), String::new(), t0());
    }
    assert!(sched.set_current("other", t0()));
    assert!(sched.get("polaris").unwrap().has_visits());
}

#[test]
fn test_merit_configuration_errors() {
    let mut names = IndexMap::new();
    names.insert("observable".to_string(), 1.0);
    names.insert("moon_separation".to_string(), 0.25);
    let weights = MeritWeights::from_names(&names).unwrap();
    assert_eq!(weights.get(MeritId::MoonSeparation), Some(0.25));

    names.insert("airmass".to_string(), 1.0);
    assert!(matches!(MeritWeights::from_names(&names), Err(ConfigError::UnknownMerit(id)) if id == "airmass"));
    assert!(MeritWeights::new([(MeritId::Observable, -1.0)]).is_err());
    assert!(MeritWeights::new([(MeritId::Observable, f64::INFINITY)]).is_err());

    let mut registry = MeritRegistry::default();
    registry.register(Box::new(Observable));
    let both = MeritWeights::new([(MeritId::Observable, 1.0), (MeritId::MoonSeparation, 1.0)]).unwrap();
    assert!(matches!(Scheduler::new(site(30.0), registry, both), Err(ConfigError::UnknownMerit(_))));
}
