use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr, sync::LazyLock};

/// Galactic north pole and the galactic longitude of the celestial north pole (J2000).
const NGP_RA_DEG: f64 = 192.859_48;
const NGP_DEC_DEG: f64 = 27.128_25;
const NCP_L_DEG: f64 = 122.931_92;

static SEXAGESIMAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-])?(\d{1,3})([hd:°])(\d{1,2})[m:']((?:\d{1,2})(?:\.\d*)?)(?:s|\x22)?$")
        .unwrap()
});
static DECIMAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-]?\d+(?:\.\d*)?)(?:d|deg|°)?$")
        .unwrap()
});

/// Reference frame a position was given in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(strum_macros::Display, strum_macros::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Frame {
    #[default]
    Icrs,
    Fk5,
    /// Galactic longitude and latitude, rotated to equatorial on use.
    Galactic,
}

/// A point on the celestial sphere, stored in degrees in its native frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyPosition {
    lon_deg: f64,
    lat_deg: f64,
    frame: Frame,
}

impl SkyPosition {
    /// Creates an equatorial position from right ascension and declination in degrees.
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        Self::in_frame(ra_deg, dec_deg, Frame::Icrs)
    }

    /// Creates a position from its two native coordinates in `frame`.
    pub fn in_frame(lon_deg: f64, lat_deg: f64, frame: Frame) -> Self {
        Self { lon_deg: lon_deg.rem_euclid(360.0), lat_deg: lat_deg.clamp(-90.0, 90.0), frame }
    }

    pub fn frame(&self) -> Frame { self.frame }
    pub fn lon_deg(&self) -> f64 { self.lon_deg }
    pub fn lat_deg(&self) -> f64 { self.lat_deg }

    /// Right ascension and declination in degrees. ICRS and FK5 are treated as identical,
    /// the difference is far below the precision of anything built on top of this.
    pub fn equatorial(&self) -> (f64, f64) {
        match self.frame {
            Frame::Icrs | Frame::Fk5 => (self.lon_deg, self.lat_deg),
            Frame::Galactic => galactic_to_equatorial(self.lon_deg, self.lat_deg),
        }
    }

    /// Equatorial right ascension in degrees, converted from the native frame if needed.
    pub fn ra_deg(&self) -> f64 { self.equatorial().0 }
    pub fn dec_deg(&self) -> f64 { self.equatorial().1 }

    /// Parses a position in the given frame.
    ///
    /// Accepted forms are two decimal-degree numbers (`"83.82 -5.39"`) or two sexagesimal
    /// tokens (`"05h35m17.3s -05d23m28s"`, `"05:35:17.3 -05:23:28"`). A sexagesimal first
    /// coordinate written with `h` or `:` is read as hours.
    pub fn parse(input: &str, frame: Frame) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidPosition(input.to_string());
        let tokens: Vec<&str> =
            input.split(|c: char| c.is_whitespace() || c == ',').filter(|t| !t.is_empty()).collect();
        let [lon_token, lat_token] = tokens.as_slice() else {
            return Err(invalid());
        };
        let lon = parse_angle(lon_token, frame != Frame::Galactic).ok_or_else(invalid)?;
        let lat = parse_angle(lat_token, false).ok_or_else(invalid)?;
        if !(-90.0..=90.0).contains(&lat) || !lon.is_finite() {
            return Err(invalid());
        }
        Ok(Self::in_frame(lon, lat, frame))
    }
}

impl FromStr for SkyPosition {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s, Frame::Icrs) }
}

impl Display for SkyPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.4}°, {:+.4}°) {}", self.lon_deg, self.lat_deg, self.frame)
    }
}

/// Parses one angle token into degrees. `hours_allowed` enables the `h`/`:` hour forms.
fn parse_angle(token: &str, hours_allowed: bool) -> Option<f64> {
    if let Some(caps) = DECIMAL.captures(token) {
        return caps[1].parse().ok();
    }
    let caps = SEXAGESIMAL.captures(token)?;
    let sign = if caps.get(1).is_some_and(|m| m.as_str() == "-") { -1.0 } else { 1.0 };
    let whole: f64 = caps[2].parse().ok()?;
    let minutes: f64 = caps[4].parse().ok()?;
    let seconds: f64 = caps[5].parse().ok()?;
    if minutes >= 60.0 || seconds >= 60.0 {
        return None;
    }
    let value = sign * (whole + minutes / 60.0 + seconds / 3600.0);
    match &caps[3] {
        "h" | ":" if hours_allowed => Some(value * 15.0),
        "h" => None,
        _ => Some(value),
    }
}

/// Rotates galactic coordinates into J2000 right ascension and declination.
fn galactic_to_equatorial(l_deg: f64, b_deg: f64) -> (f64, f64) {
    let (b, dl) = (b_deg.to_radians(), (NCP_L_DEG - l_deg).to_radians());
    let dec_ngp = NGP_DEC_DEG.to_radians();
    let sin_dec = dec_ngp.sin() * b.sin() + dec_ngp.cos() * b.cos() * dl.cos();
    let dec = sin_dec.clamp(-1.0, 1.0).asin();
    let y = b.cos() * dl.sin();
    let x = dec_ngp.cos() * b.sin() - dec_ngp.sin() * b.cos() * dl.cos();
    let ra = NGP_RA_DEG + y.atan2(x).to_degrees();
    (ra.rem_euclid(360.0), dec.to_degrees())
}

/// Great-circle distance between two positions in degrees (haversine form).
pub fn angular_separation(a: &SkyPosition, b: &SkyPosition) -> f64 {
    let (ra_a, dec_a) = a.equatorial();
    let (ra_b, dec_b) = b.equatorial();
    let (dec_a, dec_b) = (dec_a.to_radians(), dec_b.to_radians());
    let d_dec = dec_b - dec_a;
    let d_ra = (ra_b - ra_a).to_radians();
    let h = (d_dec / 2.0).sin().powi(2) + dec_a.cos() * dec_b.cos() * (d_ra / 2.0).sin().powi(2);
    (2.0 * h.sqrt().clamp(0.0, 1.0).asin()).to_degrees()
}
