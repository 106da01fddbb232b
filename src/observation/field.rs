use crate::astro::SkyPosition;
use crate::error::ConfigError;
use serde::Serialize;
use std::fmt::Display;

/// An immutable celestial target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    /// Trimmed, unique within a pool.
    name: String,
    position: SkyPosition,
    /// Finite and non-negative. Multiplies every merit score.
    priority: f64,
}

impl Field {
    /// Creates a field with a trimmed name.
    ///
    /// # Errors
    /// [`ConfigError::InvalidField`] for an empty name or a negative or non-finite priority.
    pub fn new(name: &str, position: SkyPosition, priority: f64) -> Result<Self, ConfigError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::InvalidField {
                name: String::new(),
                reason: "name must not be empty".to_string(),
            });
        }
        if !priority.is_finite() || priority < 0.0 {
            return Err(ConfigError::InvalidField {
                name: name.to_string(),
                reason: format!("priority {priority} must be a finite value >= 0"),
            });
        }
        Ok(Self { name: name.to_string(), position, priority })
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn position(&self) -> &SkyPosition { &self.position }
    pub fn priority(&self) -> f64 { self.priority }

    /// Name flattened into a token usable in file and exposure identifiers,
    /// e.g. `"m42 orion-nebula"` becomes `"M42OrionNebula"`.
    pub fn field_name(&self) -> String {
        self.name
            .split(|c: char| !c.is_alphanumeric())
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                chars.next().map_or_else(String::new, |first| {
                    first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
                })
            })
            .collect()
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {} (priority {})", self.name, self.position, self.priority)
    }
}
