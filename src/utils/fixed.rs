//! Fixed-point decimal numbers for exact time step arithmetic.
//!
//! A [`Fixed`] value stores a decimal number as an integer count of `10^-18` units. Converting
//! an `f64` goes through its shortest round-trip decimal representation, so `0.1` becomes
//! exactly one tenth rather than the nearest binary fraction. Remainders, greatest common
//! divisors and multiples computed on such values are therefore free of representation error.
use std::fmt;
use std::str::FromStr;

use crate::error::NetworkError;

/// Number of fractional decimal digits of a [`Fixed`] value.
pub const FRACTIONAL_DIGITS: u32 = 18;
/// Raw value of one unit.
const SCALE: i128 = 10_i128.pow(FRACTIONAL_DIGITS);

/// A signed fixed-point decimal with [`FRACTIONAL_DIGITS`] fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Fixed(i128);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);
    pub const ONE: Fixed = Fixed(SCALE);

    /// Create a value from its raw representation, i.e., a count of `10^-18` units.
    pub fn from_raw(raw: i128) -> Self {
        Fixed(raw)
    }

    /// Returns the raw representation of the value.
    pub fn raw(&self) -> i128 {
        self.0
    }

    /// Convert a float through its shortest decimal representation.
    /// Returns an error for non-finite values or values too large to be represented.
    pub fn from_f64(value: f64) -> Result<Self, NetworkError> {
        if !value.is_finite() {
            return Err(NetworkError::InvalidParameter(format!(
                "{} cannot be represented as a fixed-point decimal",
                value
            )));
        }
        value.to_string().parse()
    }

    /// Returns the float closest to the decimal value.
    pub fn to_f64(&self) -> f64 {
        self.to_string().parse().unwrap_or(f64::NAN)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn abs(&self) -> Self {
        Fixed(self.0.abs())
    }

    pub fn checked_add(self, other: Fixed) -> Option<Fixed> {
        self.0.checked_add(other.0).map(Fixed)
    }

    pub fn checked_sub(self, other: Fixed) -> Option<Fixed> {
        self.0.checked_sub(other.0).map(Fixed)
    }

    /// Multiply two values, truncating digits beyond the fixed precision.
    /// Returns `None` on overflow.
    pub fn checked_mul(self, other: Fixed) -> Option<Fixed> {
        // Split self into integer and fractional parts so that the intermediate products stay small.
        let int_part = self.0 / SCALE;
        let frac_part = self.0 % SCALE;
        let high = int_part.checked_mul(other.0)?;
        let low = frac_part.checked_mul(other.0 / SCALE)?;
        let lowest = mul_div_scale(frac_part, other.0 % SCALE);
        high.checked_add(low)?.checked_add(lowest).map(Fixed)
    }

    /// Multiply by an integer. Returns `None` on overflow.
    pub fn checked_mul_int(self, n: i128) -> Option<Fixed> {
        self.0.checked_mul(n).map(Fixed)
    }

    /// Euclidean remainder of the division by a non-zero value.
    pub fn rem_euclid(self, other: Fixed) -> Fixed {
        Fixed(self.0.rem_euclid(other.0))
    }

    /// Quotient of the division by a positive value, rounded to the nearest integer (ties away from zero),
    /// together with the residual `self - quotient * other`.
    pub fn div_round(self, other: Fixed) -> (i128, Fixed) {
        let q = self.0.div_euclid(other.0);
        let r = self.0.rem_euclid(other.0);
        if r >= other.0 - r {
            (q + 1, Fixed(r - other.0))
        } else {
            (q, Fixed(r))
        }
    }

    /// Greatest common divisor of two values, computed with the Euclidean algorithm.
    pub fn gcd(self, other: Fixed) -> Fixed {
        Fixed(gcd_int(self.0.abs(), other.0.abs()))
    }
}

/// Greatest common divisor of two non-negative integers.
pub fn gcd_int(mut a: i128, mut b: i128) -> i128 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Product of two fractional parts (both below `SCALE` in magnitude), rescaled to `SCALE`.
fn mul_div_scale(a: i128, b: i128) -> i128 {
    // Both operands are below 10^18, their product is below 10^36 and fits into an i128.
    a * b / SCALE
}

fn pow10(exp: u32) -> Option<i128> {
    10_i128.checked_pow(exp)
}

impl FromStr for Fixed {
    type Err = NetworkError;

    /// Parse a decimal in plain (`-12.5`) or scientific (`1.25e-3`) notation.
    /// Digits beyond the fixed precision are rounded half away from zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid =
            || NetworkError::InvalidParameter(format!("`{}` is not a valid decimal number", s));
        let overflow = || {
            NetworkError::InvalidParameter(format!(
                "`{}` is too large to be represented as a fixed-point decimal",
                s
            ))
        };

        let s = s.trim();
        let (negative, unsigned) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };

        let (mantissa, exponent) = match unsigned.split_once(|c: char| c == 'e' || c == 'E') {
            Some((m, e)) => (m, e.parse::<i32>().map_err(|_| invalid())?),
            None => (unsigned, 0),
        };
        let (int_digits, frac_digits) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        if int_digits.is_empty() && frac_digits.is_empty() {
            return Err(invalid());
        }
        if !int_digits
            .chars()
            .chain(frac_digits.chars())
            .all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }

        let digits = format!("{}{}", int_digits, frac_digits);
        let digits = digits.trim_start_matches('0');
        let shift = exponent as i64 - frac_digits.len() as i64 + FRACTIONAL_DIGITS as i64;

        let raw = if digits.is_empty() {
            0
        } else if shift >= 0 {
            let significand: i128 = digits.parse().map_err(|_| overflow())?;
            let factor = u32::try_from(shift)
                .ok()
                .and_then(pow10)
                .ok_or_else(overflow)?;
            significand.checked_mul(factor).ok_or_else(overflow)?
        } else {
            // Drop the digits below the fixed precision, rounding on the first dropped digit.
            let drop = (-shift) as usize;
            if drop > digits.len() {
                0
            } else {
                let (kept, dropped) = digits.split_at(digits.len() - drop);
                let kept: i128 = if kept.is_empty() {
                    0
                } else {
                    kept.parse().map_err(|_| overflow())?
                };
                let round_up = dropped.as_bytes().first().map_or(false, |d| *d >= b'5');
                if round_up {
                    kept.checked_add(1).ok_or_else(overflow)?
                } else {
                    kept
                }
            }
        };

        Ok(Fixed(if negative { -raw } else { raw }))
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = SCALE as u128;
        let int_part = abs / scale;
        let frac_part = abs % scale;
        if frac_part == 0 {
            return write!(f, "{}{}", sign, int_part);
        }
        let frac = format!("{:0width$}", frac_part, width = FRACTIONAL_DIGITS as usize);
        write!(f, "{}{}.{}", sign, int_part, frac.trim_end_matches('0'))
    }
}
