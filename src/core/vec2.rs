//! 2D Fixed-Point Vector
//!
//! Positions on the SoL map. Movement is resolved per axis so no square
//! root is ever needed, keeping large map coordinates well inside Q16.16.

use serde::{Serialize, Deserialize};
use std::fmt;
use std::ops::{Add, Sub};

use super::fixed::{Fixed, from_int, fixed_mul, to_float};

/// 2D vector with Q16.16 components.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct FixedVec2 {
    /// X component
    pub x: Fixed,
    /// Y component
    pub y: Fixed,
}

impl FixedVec2 {
    /// Origin.
    pub const ZERO: Self = Self { x: 0, y: 0 };

    /// Create from raw fixed-point components.
    #[inline]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Create from whole map units.
    #[inline]
    pub const fn from_ints(x: i32, y: i32) -> Self {
        Self { x: from_int(x), y: from_int(y) }
    }

    /// Multiply both components by a fixed-point scalar.
    #[inline]
    pub fn scale(self, scalar: Fixed) -> Self {
        Self::new(fixed_mul(self.x, scalar), fixed_mul(self.y, scalar))
    }

    /// Move toward `target` by at most `max_step` on each axis.
    ///
    /// Lands exactly on the target once within range.
    pub fn step_toward(self, target: Self, max_step: Fixed) -> Self {
        Self::new(
            step_axis(self.x, target.x, max_step),
            step_axis(self.y, target.y, max_step),
        )
    }

    /// Clamp into the rectangle `[-half_w, half_w] x [-half_h, half_h]`.
    #[inline]
    pub fn clamp_to_bounds(self, half_w: Fixed, half_h: Fixed) -> Self {
        Self::new(self.x.clamp(-half_w, half_w), self.y.clamp(-half_h, half_h))
    }

    /// Convert to floats for display.
    #[inline]
    pub fn to_floats(self) -> (f32, f32) {
        (to_float(self.x), to_float(self.y))
    }
}

#[inline]
fn step_axis(from: Fixed, to: Fixed, max_step: Fixed) -> Fixed {
    let diff = to.wrapping_sub(from);
    if diff.abs() <= max_step {
        to
    } else if diff > 0 {
        from + max_step
    } else {
        from - max_step
    }
}

impl Add for FixedVec2 {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.x.wrapping_add(other.x), self.y.wrapping_add(other.y))
    }
}

impl Sub for FixedVec2 {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.x.wrapping_sub(other.x), self.y.wrapping_sub(other.y))
    }
}

impl fmt::Debug for FixedVec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (x, y) = self.to_floats();
        write!(f, "FixedVec2({:.3}, {:.3})", x, y)
    }
}

impl fmt::Display for FixedVec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (x, y) = self.to_floats();
        write!(f, "({:.2}, {:.2})", x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::{to_fixed, FIXED_ONE};

    #[test]
    fn test_step_toward_reaches_target() {
        let mut pos = FixedVec2::from_ints(0, 0);
        let target = FixedVec2::from_ints(3, -2);
        for _ in 0..10 {
            pos = pos.step_toward(target, FIXED_ONE);
        }
        assert_eq!(pos, target);
    }

    #[test]
    fn test_step_toward_is_bounded() {
        let pos = FixedVec2::from_ints(-500, 0);
        let next = pos.step_toward(FixedVec2::from_ints(500, 0), to_fixed(0.5));
        assert_eq!(next, FixedVec2::new(to_fixed(-499.5), 0));
    }

    #[test]
    fn test_ops() {
        let a = FixedVec2::from_ints(1, 2);
        let b = FixedVec2::from_ints(3, 4);
        assert_eq!(a + b, FixedVec2::from_ints(4, 6));
        assert_eq!(b - a, FixedVec2::from_ints(2, 2));
        assert_eq!(b.scale(to_fixed(0.5)), FixedVec2::new(to_fixed(1.5), to_fixed(2.0)));
    }

    #[test]
    fn test_clamp_to_bounds() {
        let p = FixedVec2::from_ints(900, -900).clamp_to_bounds(from_int(600), from_int(400));
        assert_eq!(p, FixedVec2::from_ints(600, -400));
    }
}
