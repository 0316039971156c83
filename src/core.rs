use crate::error::{ShotkitError, ShotkitResult};

pub use kurbo::{Point, Vec2};

/// Self-similar scale factor between successive spiral arcs, (1+√5)/2.
pub const GOLDEN_RATIO: f64 = 1.618033988749895;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct EntityId(pub u64);

/// A scalar attribute slot on an entity, e.g. `camera.focal_length`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Plug {
    pub entity: EntityId,
    pub attr: String,
}

impl Plug {
    pub fn new(entity: EntityId, attr: impl Into<String>) -> Self {
        Self {
            entity,
            attr: attr.into(),
        }
    }
}

impl std::fmt::Display for Plug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.entity.0, self.attr)
    }
}

/// Inclusive time range in frames, e.g. the scene playback range.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimeRange {
    pub min: f64,
    pub max: f64,
}

impl TimeRange {
    pub fn new(min: f64, max: f64) -> ShotkitResult<Self> {
        if !min.is_finite() || !max.is_finite() {
            return Err(ShotkitError::scene("TimeRange bounds must be finite"));
        }
        if min > max {
            return Err(ShotkitError::scene("TimeRange min must be <= max"));
        }
        Ok(Self { min, max })
    }

    pub fn contains(self, t: f64) -> bool {
        self.min <= t && t <= self.max
    }

    pub fn span(self) -> f64 {
        self.max - self.min
    }
}
