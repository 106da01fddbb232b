pub mod ephemeris;
mod site;
mod sky_position;

pub use site::{AltAz, HorizonProfile, Site};
pub use sky_position::{Frame, SkyPosition, angular_separation};
