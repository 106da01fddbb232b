use super::{ExposureKind, ExposureRequest, Observatory, ObservatoryCall, PointingOffset, SimulatedObservatory};
use crate::astro::SkyPosition;
use crate::error::HardwareFault;
use crate::log;
use chrono::TimeDelta;
use rand::Rng;
use std::time::Duration;

fn request(id: &str, kind: ExposureKind) -> ExposureRequest {
    ExposureRequest {
        id: id.to_string(),
        field_name: "Vega".to_string(),
        position: SkyPosition::new(279.23, 38.78),
        exposure_time: TimeDelta::seconds(30),
        kind,
    }
}

#[test]
fn test_offset_magnitude_shrinks_towards_the_pole() {
    let mut rng = rand::rng();
    for _ in 0..200 {
        let offset = PointingOffset {
            delta_ra_deg: rng.random_range(-1.0..=1.0),
            delta_dec_deg: rng.random_range(-1.0..=1.0),
        };
        let dec: f64 = rng.random_range(0.0..89.0);
        let at_equator = offset.magnitude_deg(0.0);
        let at_dec = offset.magnitude_deg(dec);
        assert!(at_dec <= at_equator + 1e-12);
        assert!(at_dec >= offset.delta_dec_deg.abs() - 1e-12);
    }
    let pure_ra = PointingOffset { delta_ra_deg: 1.0, delta_dec_deg: 0.0 };
    assert!((pure_ra.magnitude_deg(60.0) - 0.5).abs() < 1e-12);
}

#[tokio::test]
async fn test_slew_requires_initialization() {
    let observatory = SimulatedObservatory::new();
    let target = SkyPosition::new(279.23, 38.78);
    assert!(matches!(observatory.slew_to(&target).await, Err(HardwareFault::Device { operation: "slew", .. })));
    assert!(observatory.is_parked());

    observatory.initialize().await.unwrap();
    observatory.slew_to(&target).await.unwrap();
    assert!(!observatory.is_parked());
    observatory.park().await.unwrap();
    assert!(observatory.is_parked());
    assert_eq!(
        observatory.journal().await,
        [ObservatoryCall::Slew(target), ObservatoryCall::Initialize, ObservatoryCall::Slew(target), ObservatoryCall::Park]
    );
}

#[tokio::test]
async fn test_exposure_file_reference() {
    let observatory = SimulatedObservatory::new();
    let file = observatory.take_exposure(&request("Vega_0001", ExposureKind::Science)).await.unwrap();
    assert_eq!(file, "sim://science/Vega_0001.fits");
    let file = observatory.take_exposure(&request("Vega_pointing_01", ExposureKind::Pointing)).await.unwrap();
    assert_eq!(file, "sim://pointing/Vega_pointing_01.fits");
}

#[tokio::test]
async fn test_injected_failures_are_consumed() {
    let observatory = SimulatedObservatory::new();
    observatory.fail_next(SimulatedObservatory::PARK, 2).await;
    assert!(observatory.park().await.is_err());
    assert!(observatory.park().await.is_err());
    assert!(observatory.park().await.is_ok());

    observatory.hang_next(SimulatedObservatory::HOUSEKEEPING, 1).await;
    let hung = tokio::time::timeout(Duration::from_millis(50), observatory.housekeeping()).await;
    assert!(hung.is_err());
    observatory.housekeeping().await.unwrap();
    assert_eq!(observatory.journal().await.iter().filter(|c| **c == ObservatoryCall::Housekeeping).count(), 2);
}

#[tokio::test]
async fn test_corrections_reduce_the_residual() {
    let observatory = SimulatedObservatory::new().with_pointing(0.5, 0.1);
    let target = SkyPosition::new(10.0, 20.0);
    observatory.initialize().await.unwrap();
    observatory.slew_to(&target).await.unwrap();

    let first = observatory.solve_pointing("a.fits", &target).await.unwrap();
    observatory.correct_pointing(&first).await.unwrap();
    let second = observatory.solve_pointing("b.fits", &target).await.unwrap();
    log!("Residual {first} corrected to {second}");
    assert!((second.delta_ra_deg - first.delta_ra_deg * 0.1).abs() < 1e-12);
    assert!((second.delta_dec_deg - first.delta_dec_deg * 0.1).abs() < 1e-12);
    assert!(second.magnitude_deg(20.0) <= first.magnitude_deg(20.0));
}
