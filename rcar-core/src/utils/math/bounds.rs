//! Closed integer ranges with saturating delta arithmetic.
//!
//! Every bounded actuator value (speed, steering, camera pan/tilt, buzzer
//! frequency) is adjusted through [`Bounds`]. Deltas are applied with
//! saturating integer addition and then clamped, so repeated increments pin
//! the value to the nearest bound instead of wrapping or erroring.
//!
//! # Example
//! ```rust
//! use rcar_core::utils::math::Bounds;
//! let steering = Bounds::new(-45, 45);
//! assert_eq!(steering.apply_delta(20, 30), 45);
//! assert_eq!(steering.apply_delta(45, i32::MAX), 45);
//! ```

use serde::{Deserialize, Serialize};

/// Inclusive `[min, max]` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: i32,
    pub max: i32,
}

impl Bounds {
    /// Create a new range. Callers are expected to keep `min <= max`; see
    /// [`Bounds::is_valid`].
    pub const fn new(
        min: i32,
        max: i32,
    ) -> Self {
        Self { min, max }
    }

    pub const fn is_valid(&self) -> bool {
        self.min <= self.max
    }

    pub const fn contains(
        &self,
        value: i32,
    ) -> bool {
        value >= self.min && value <= self.max
    }

    /// Clamp an absolute value into the range.
    ///
    /// Never panics, even on an inverted range.
    pub fn clamp(
        &self,
        value: i32,
    ) -> i32 {
        value.max(self.min).min(self.max)
    }

    /// Add `delta` to `current` and clamp the result.
    pub fn apply_delta(
        &self,
        current: i32,
        delta: i32,
    ) -> i32 {
        self.clamp(current.saturating_add(delta))
    }

    /// Subtract `delta` from `current` and clamp the result.
    pub fn apply_negative_delta(
        &self,
        current: i32,
        delta: i32,
    ) -> i32 {
        self.clamp(current.saturating_sub(delta))
    }
}

/// Linearly map `value` from `[from_low, from_high]` onto `[to_low, to_high]`.
///
/// A degenerate source range maps everything to `to_low`.
pub fn map_range(
    value: f32,
    from_low: f32,
    from_high: f32,
    to_low: f32,
    to_high: f32,
) -> f32 {
    if from_high == from_low {
        return to_low;
    }
    (to_high - to_low) * (value - from_low) / (from_high - from_low) + to_low
}
