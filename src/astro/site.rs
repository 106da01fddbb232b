use super::{ephemeris, sky_position::SkyPosition};
use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::fmt::Display;

/// Horizontal coordinates, azimuth measured from north through east.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AltAz {
    pub alt_deg: f64,
    pub az_deg: f64,
}

impl Display for AltAz {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "alt {:.2}° az {:.2}°", self.alt_deg, self.az_deg)
    }
}

/// Lowest usable altitude per azimuth: a flat limit raised by local obstructions.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonProfile {
    min_alt_deg: f64,
    obstructions: Vec<(f64, f64)>,
}

impl HorizonProfile {
    /// Profile with the same limit at every azimuth.
    pub fn flat(min_alt_deg: f64) -> Self { Self { min_alt_deg, obstructions: Vec::new() } }

    /// Builds a profile from `(azimuth, altitude)` points. Points are sorted by azimuth and
    /// joined linearly, wrapping through north.
    pub fn new(min_alt_deg: f64, points: &[(f64, f64)]) -> Result<Self, ConfigError> {
        if !(-90.0..90.0).contains(&min_alt_deg) {
            return Err(ConfigError::InvalidValue {
                key: "site.horizon_deg",
                reason: format!("{min_alt_deg} is not an altitude"),
            });
        }
        if let Some(p) = points.iter().find(|(az, alt)| !az.is_finite() || !(-90.0..=90.0).contains(alt)) {
            return Err(ConfigError::InvalidValue {
                key: "site.obstructions",
                reason: format!("bad point ({}, {})", p.0, p.1),
            });
        }
        let obstructions = points
            .iter()
            .map(|&(az, alt)| (az.rem_euclid(360.0), alt))
            .sorted_by(|a, b| a.0.total_cmp(&b.0))
            .dedup_by(|a, b| (a.0 - b.0).abs() < f64::EPSILON)
            .collect();
        Ok(Self { min_alt_deg, obstructions })
    }

    pub fn min_alt_deg(&self) -> f64 { self.min_alt_deg }

    /// The altitude a target must exceed at the given azimuth.
    pub fn limit_at(&self, az_deg: f64) -> f64 {
        let az = az_deg.rem_euclid(360.0);
        let obstruction = match self.obstructions.as_slice() {
            [] => return self.min_alt_deg,
            [(_, alt)] => *alt,
            points => {
                let upper = points.partition_point(|(p_az, _)| *p_az <= az);
                let (lo, hi) = match upper {
                    0 => (points[points.len() - 1], points[0]),
                    i if i == points.len() => (points[i - 1], points[0]),
                    i => (points[i - 1], points[i]),
                };
                let span = (hi.0 - lo.0).rem_euclid(360.0);
                let offset = (az - lo.0).rem_euclid(360.0);
                if span <= f64::EPSILON { lo.1 } else { lo.1 + (hi.1 - lo.1) * offset / span }
            }
        };
        obstruction.max(self.min_alt_deg)
    }
}

/// Geographic location of the telescope together with its horizon.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    name: String,
    latitude_deg: f64,
    longitude_deg: f64,
    elevation_m: f64,
    horizon: HorizonProfile,
}

impl Site {
    /// Creates a site.
    ///
    /// # Errors
    /// [`ConfigError::InvalidValue`] for a latitude outside `[-90, 90]` or a non-finite longitude.
    pub fn new(
        name: &str,
        latitude_deg: f64,
        longitude_deg: f64,
        elevation_m: f64,
        horizon: HorizonProfile,
    ) -> Result<Self, ConfigError> {
        if !(-90.0..=90.0).contains(&latitude_deg) {
            return Err(ConfigError::InvalidValue {
                key: "site.latitude_deg",
                reason: format!("{latitude_deg} out of range"),
            });
        }
        if !longitude_deg.is_finite() {
            return Err(ConfigError::InvalidValue {
                key: "site.longitude_deg",
                reason: "not finite".to_string(),
            });
        }
        Ok(Self { name: name.to_string(), latitude_deg, longitude_deg, elevation_m, horizon })
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn latitude_deg(&self) -> f64 { self.latitude_deg }
    pub fn longitude_deg(&self) -> f64 { self.longitude_deg }
    pub fn elevation_m(&self) -> f64 { self.elevation_m }
    pub fn horizon(&self) -> &HorizonProfile { &self.horizon }

    /// Local mean sidereal time in degrees.
    pub fn local_sidereal_deg(&self, time: DateTime<Utc>) -> f64 {
        (ephemeris::gmst_deg(time) + self.longitude_deg).rem_euclid(360.0)
    }

    /// Altitude and azimuth of a position as seen from this site. Refraction is ignored.
    pub fn altaz(&self, position: &SkyPosition, time: DateTime<Utc>) -> AltAz {
        let (ra, dec) = position.equatorial();
        let ha = (self.local_sidereal_deg(time) - ra).to_radians();
        let (dec, lat) = (dec.to_radians(), self.latitude_deg.to_radians());
        let sin_alt = lat.sin() * dec.sin() + lat.cos() * dec.cos() * ha.cos();
        let alt = sin_alt.clamp(-1.0, 1.0).asin();
        let y = -dec.cos() * ha.sin();
        let x = dec.sin() * lat.cos() - dec.cos() * ha.cos() * lat.sin();
        AltAz { alt_deg: alt.to_degrees(), az_deg: y.atan2(x).to_degrees().rem_euclid(360.0) }
    }

    /// True if the position clears the horizon profile at `time`.
    pub fn is_above_horizon(&self, position: &SkyPosition, time: DateTime<Utc>) -> bool {
        let altaz = self.altaz(position, time);
        altaz.alt_deg >= self.horizon.limit_at(altaz.az_deg)
    }
}
