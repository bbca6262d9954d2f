//! Operator speed intents to protocol velocities.
//!
//! Speed tiers are percentages of full scale (`-100..=100`). Dividing by 100
//! lands in the protocol's nominal `[-1, 1]` convention, and the result is then
//! clamped into the axis bounds the camera reported, so a camera with a narrow
//! velocity space never receives an out-of-range value.

use crate::types::AxisRange;

/// Full-scale intent, in percent
pub const FULL_SCALE: f32 = 100.0;

/// Map `intent_percent` onto an axis bounded by `[axis_min, axis_max]`.
pub fn scale(intent_percent: f32, axis_min: f32, axis_max: f32) -> f32 {
    if !intent_percent.is_finite() {
        return 0.0;
    }
    let normalized = intent_percent.clamp(-FULL_SCALE, FULL_SCALE) / FULL_SCALE;
    normalized.max(axis_min).min(axis_max)
}

/// [`scale`] against a discovered [`AxisRange`].
pub fn scale_to(intent_percent: f32, range: AxisRange) -> f32 {
    scale(intent_percent, range.min, range.max)
}
