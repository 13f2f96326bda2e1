use serde::{Deserialize, Serialize};

use crate::coords::{CoordSystem, DEFAULT_TOLERANCE};
use crate::error::Result;

/// Knobs for a resolution episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveSettings {
    /// Relative tolerance for frame comparisons made by the resolver.
    pub tolerance: f64,
    /// Log a warning for every child no constraint placed.
    pub warn_unconstrained: bool,
    /// World frame of the root component. `None` is the canonical identity.
    pub root_coords: Option<CoordSystem>,
}

impl Default for ResolveSettings {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            warn_unconstrained: true,
            root_coords: None,
        }
    }
}

impl ResolveSettings {
    pub fn with_root_coords(mut self, coords: CoordSystem) -> Self {
        self.root_coords = Some(coords);
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn root_frame(&self) -> CoordSystem {
        self.root_coords.unwrap_or_default()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
