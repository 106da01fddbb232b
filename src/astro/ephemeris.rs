use super::sky_position::SkyPosition;
use chrono::{DateTime, Utc};

const JD_UNIX_EPOCH: f64 = 2_440_587.5;
const JD_J2000: f64 = 2_451_545.0;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Julian date of a UTC instant.
#[allow(clippy::cast_precision_loss)]
pub fn julian_day(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / MILLIS_PER_DAY + JD_UNIX_EPOCH
}

fn days_since_j2000(time: DateTime<Utc>) -> f64 { julian_day(time) - JD_J2000 }

/// Greenwich mean sidereal time in degrees.
pub fn gmst_deg(time: DateTime<Utc>) -> f64 {
    (280.460_618_37 + 360.985_647_366_29 * days_since_j2000(time)).rem_euclid(360.0)
}

fn mean_obliquity_rad(n: f64) -> f64 { (23.439 - 0.000_000_4 * n).to_radians() }

/// Converts ecliptic longitude and latitude at `n` days after J2000.
fn ecliptic_to_equatorial(lambda_deg: f64, beta_deg: f64, n: f64) -> SkyPosition {
    let (lambda, beta, eps) = (lambda_deg.to_radians(), beta_deg.to_radians(), mean_obliquity_rad(n));
    let sin_dec = beta.sin() * eps.cos() + beta.cos() * eps.sin() * lambda.sin();
    let y = lambda.sin() * eps.cos() - beta.tan() * eps.sin();
    let ra = y.atan2(lambda.cos());
    SkyPosition::new(ra.to_degrees(), sin_dec.clamp(-1.0, 1.0).asin().to_degrees())
}

/// Apparent position of the sun, accurate to about 0.01° over this century.
pub fn sun_position(time: DateTime<Utc>) -> SkyPosition {
    let n = days_since_j2000(time);
    let mean_lon = (280.460 + 0.985_647_4 * n).rem_euclid(360.0);
    let g = (357.528 + 0.985_600_3 * n).rem_euclid(360.0).to_radians();
    let lambda = mean_lon + 1.915 * g.sin() + 0.020 * (2.0 * g).sin();
    ecliptic_to_equatorial(lambda, 0.0, n)
}

/// Geocentric position of the moon from its principal periodic terms, good to well under a
/// degree. Parallax is ignored, which is fine for separation limits of several degrees.
pub fn moon_position(time: DateTime<Utc>) -> SkyPosition {
    let n = days_since_j2000(time);
    let mean_lon = (218.316 + 13.176_396 * n).rem_euclid(360.0);
    let anomaly = (134.963 + 13.064_993 * n).rem_euclid(360.0).to_radians();
    let arg_lat = (93.272 + 13.229_350 * n).rem_euclid(360.0).to_radians();
    let lambda = mean_lon + 6.289 * anomaly.sin();
    let beta = 5.128 * arg_lat.sin();
    ecliptic_to_equatorial(lambda, beta, n)
}
