//! Q16.16 Fixed-Point Arithmetic
//!
//! Integer-only math used by simulation code so that fingerprints never
//! depend on the host's floating-point behaviour.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Q16.16 (32-bit signed integer)                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  [S][IIIIIIIIIIIIIIII][FFFFFFFFFFFFFFFF]                    │
//! │  Range: -32768.0 to +32767.99998                            │
//! │  Precision: 1/65536                                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

/// Q16.16 fixed-point number stored as i32.
pub type Fixed = i32;

/// Number of fractional bits (16)
pub const FIXED_SCALE: i32 = 16;

/// 1.0 in fixed-point (65536)
pub const FIXED_ONE: Fixed = 1 << FIXED_SCALE;

/// 0.5 in fixed-point (32768)
pub const FIXED_HALF: Fixed = FIXED_ONE >> 1;

/// Convert a compile-time float to fixed-point.
///
/// Only use for constants and configuration. Never inside a tick.
///
/// ```
/// use sol_lockstep::core::fixed::{to_fixed, FIXED_ONE};
/// const HALF_SECOND: i32 = to_fixed(0.5);
/// assert_eq!(HALF_SECOND, FIXED_ONE / 2);
/// ```
#[inline]
pub const fn to_fixed(f: f64) -> Fixed {
    (f * (FIXED_ONE as f64)) as Fixed
}

/// Convert an integer to fixed-point.
#[inline]
pub const fn from_int(i: i32) -> Fixed {
    i << FIXED_SCALE
}

/// Convert fixed-point to float for display only.
#[inline]
pub fn to_float(f: Fixed) -> f32 {
    f as f32 / FIXED_ONE as f32
}

/// Multiply two fixed-point numbers through an i64 intermediate.
#[inline]
pub fn fixed_mul(a: Fixed, b: Fixed) -> Fixed {
    let wide = (a as i64) * (b as i64);
    (wide >> FIXED_SCALE) as Fixed
}

/// Divide two fixed-point numbers. Divide-by-zero yields 0.
#[inline]
pub fn fixed_div(a: Fixed, b: Fixed) -> Fixed {
    if b == 0 {
        return 0;
    }
    let wide = (a as i64) << FIXED_SCALE;
    (wide / b as i64) as Fixed
}

/// Clamp a fixed-point number to `[min, max]`.
#[inline]
pub fn fixed_clamp(value: Fixed, min: Fixed, max: Fixed) -> Fixed {
    value.max(min).min(max)
}

/// Length of one tick at `tick_rate` Hz, as fixed-point seconds.
///
/// Truncates, so 60 Hz gives 1092 (not 1092.27). Every peer computes the
/// same value from the same rate.
#[inline]
pub fn tick_delta(tick_rate: u32) -> Fixed {
    if tick_rate == 0 {
        return 0;
    }
    FIXED_ONE / tick_rate as Fixed
}
