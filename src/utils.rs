//! Utility functions and types.
pub mod fixed;

/// Relative tolerance used by [`is_close`].
pub const CLOSE_TOL_REL: f64 = 1e-5;
/// Absolute tolerance used by [`is_close`].
pub const CLOSE_TOL_ABS: f64 = 1e-8;

/// Check whether two times are equal up to a small relative and absolute tolerance.
pub fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= CLOSE_TOL_ABS + CLOSE_TOL_REL * b.abs()
}
