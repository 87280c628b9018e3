//! Exact arithmetic on time steps.
//!
//! Layers of a network may run at time steps differing by orders of magnitude (e.g., `1e-4` and
//! `1e-1`). The network advances at a common multiple of all of them, which is computed on
//! fixed-point decimals (see [`Fixed`]) rather than on binary floats.
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::NetworkError;
use crate::utils::fixed::{gcd_int, Fixed};
use crate::{DECIMAL_BASE, MAX_FACTOR, TOL_ABS, TOL_REL};

/// Tolerances governing the time step arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeStepConfig {
    /// Relative tolerance of the multiple checks, relative to the divisor.
    pub tol_rel: f64,
    /// Absolute tolerance of the multiple checks.
    pub tol_abs: f64,
    /// Resolution to which time steps are rounded before computing least common multiples.
    pub decimal_base: f64,
    /// By which factor the network time step may exceed the largest layer time step before the
    /// least common multiple is considered unusable.
    pub max_factor: f64,
}

impl Default for TimeStepConfig {
    fn default() -> Self {
        TimeStepConfig {
            tol_rel: TOL_REL,
            tol_abs: TOL_ABS,
            decimal_base: DECIMAL_BASE,
            max_factor: MAX_FACTOR,
        }
    }
}

impl TimeStepConfig {
    /// Returns an error if one of the tolerances is negative or not finite, if the decimal base is not
    /// positive, or if the maximum factor is below one.
    pub fn validate(&self) -> Result<(), NetworkError> {
        if !(self.tol_rel.is_finite() && self.tol_rel >= 0.0) {
            return Err(NetworkError::InvalidParameter(format!(
                "Relative tolerance must be finite and non-negative, got {}",
                self.tol_rel
            )));
        }
        if !(self.tol_abs.is_finite() && self.tol_abs >= 0.0) {
            return Err(NetworkError::InvalidParameter(format!(
                "Absolute tolerance must be finite and non-negative, got {}",
                self.tol_abs
            )));
        }
        if !(self.decimal_base.is_finite() && self.decimal_base > 0.0) {
            return Err(NetworkError::InvalidParameter(format!(
                "Decimal base must be finite and positive, got {}",
                self.decimal_base
            )));
        }
        if !(self.max_factor.is_finite() && self.max_factor >= 1.0) {
            return Err(NetworkError::InvalidParameter(format!(
                "Maximum factor must be finite and at least one, got {}",
                self.max_factor
            )));
        }
        Ok(())
    }
}

/// Check whether `a` is a multiple of `b` within some tolerance, i.e., whether
/// `min(a mod b, b - a mod b) < tol_rel * b + tol_abs`.
///
/// The check is carried out on exact decimals, so `is_multiple(0.3, 0.1, ..)` holds even though
/// `0.3 % 0.1` is close to `0.1` in binary floating point. Returns false whenever `b` is not
/// positive or one of the values cannot be represented.
pub fn is_multiple(a: f64, b: f64, tol_rel: f64, tol_abs: f64) -> bool {
    let values = (
        Fixed::from_f64(a),
        Fixed::from_f64(b),
        Fixed::from_f64(tol_rel),
        Fixed::from_f64(tol_abs),
    );
    let (a, b, tol_rel, tol_abs) = match values {
        (Ok(a), Ok(b), Ok(tol_rel), Ok(tol_abs)) => (a, b, tol_rel, tol_abs),
        _ => return false,
    };
    if !b.is_positive() {
        return false;
    }

    let remainder = a.rem_euclid(b);
    let min_remainder = remainder.min(b.checked_sub(remainder).unwrap_or(remainder));
    match tol_rel.checked_mul(b).and_then(|t| t.checked_add(tol_abs)) {
        Some(tolerance) => min_remainder < tolerance,
        None => false,
    }
}

/// Returns the greatest common divisor of two time steps, computed with the Euclidean algorithm
/// on exact decimals.
pub fn gcd(a: f64, b: f64) -> Result<f64, NetworkError> {
    let a = Fixed::from_f64(a)?;
    let b = Fixed::from_f64(b)?;
    Ok(a.gcd(b).to_f64())
}

/// Returns the least common multiple of two positive time steps.
///
/// Both values are first expressed as integer multiples of `config.decimal_base`. If this
/// rescaling is not lossless within `config.tol_rel`, a [`NetworkError::StepTooSmall`] error is
/// returned. The multiple is then computed on the integers and rescaled back.
pub fn lcm(a: f64, b: f64, config: &TimeStepConfig) -> Result<f64, NetworkError> {
    let base = Fixed::from_f64(config.decimal_base)?;
    if !base.is_positive() {
        return Err(NetworkError::InvalidParameter(format!(
            "Decimal base must be positive, got {}",
            config.decimal_base
        )));
    }

    let a_int = to_base_units(a, base, config)?;
    let b_int = to_base_units(b, base, config)?;

    let lcm_int = (a_int / gcd_int(a_int, b_int))
        .checked_mul(b_int)
        .ok_or_else(|| {
            NetworkError::NoCommonTimeStep(format!(
                "the least common multiple of {} and {} overflows",
                a, b
            ))
        })?;
    let lcm = base.checked_mul_int(lcm_int).ok_or_else(|| {
        NetworkError::NoCommonTimeStep(format!(
            "the least common multiple of {} and {} overflows",
            a, b
        ))
    })?;

    Ok(lcm.to_f64())
}

/// Express a positive time step as an integer number of decimal base units.
fn to_base_units(value: f64, base: Fixed, config: &TimeStepConfig) -> Result<i128, NetworkError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(NetworkError::InvalidTimeStep(value));
    }
    let (units, residual) = Fixed::from_f64(value)?.div_round(base);
    let deviation = residual.abs().to_f64() / base.to_f64();
    if units == 0 || deviation > config.tol_rel {
        return Err(NetworkError::StepTooSmall {
            value,
            decimal_base: config.decimal_base,
        });
    }
    Ok(units)
}

/// Returns a common time step for a collection of named time steps.
///
/// The least common multiple is folded over all time steps. The result is rejected with
/// [`NetworkError::NoCommonTimeStep`] if it exceeds `config.max_factor` times the largest time
/// step, or if it fails to be a multiple of any of them.
pub fn common_time_step(dts: &[(&str, f64)], config: &TimeStepConfig) -> Result<f64, NetworkError> {
    let (first, rest) = dts.split_first().ok_or(NetworkError::EmptyNetwork)?;
    for (_, dt) in dts {
        if !(dt.is_finite() && *dt > 0.0) {
            return Err(NetworkError::InvalidTimeStep(*dt));
        }
    }

    let dt_lcm = rest
        .iter()
        .try_fold(first.1, |acc, (_, dt)| lcm(acc, *dt, config))?;

    let max_dt = dts.iter().map(|(_, dt)| *dt).fold(f64::NEG_INFINITY, f64::max);
    if dt_lcm > config.max_factor * max_dt
        || dts
            .iter()
            .any(|(_, dt)| !is_multiple(dt_lcm, *dt, config.tol_rel, config.tol_abs))
    {
        return Err(NetworkError::NoCommonTimeStep(format!(
            "layer time steps: {}, found: {}",
            dts.iter()
                .map(|(name, dt)| format!("`{}`={}", name, dt))
                .join(", "),
            dt_lcm
        )));
    }

    Ok(dt_lcm)
}

/// Returns the number of layer time steps per network time step.
pub fn timesteps_per_network_dt(network_dt: f64, layer_dt: f64) -> usize {
    (network_dt / layer_dt).round() as usize
}

/// Due to rounding errors, a duration can fall slightly below its intended value, e.g., `0.3` is
/// stored below three times `0.1`, which makes a floor division lose a time step. Returns the
/// duration increased by `tol_abs` if it lies within `tol_abs` below a multiple of one of the
/// time steps, and the duration itself otherwise.
pub fn fix_duration(duration: f64, dts: &[f64], tol_abs: f64) -> f64 {
    let just_below_multiple = dts.iter().any(|dt| {
        let remainder = duration.rem_euclid(*dt);
        remainder > tol_abs && dt - remainder < tol_abs
    });
    if just_below_multiple {
        duration + tol_abs
    } else {
        duration
    }
}

/// Returns the number of whole network time steps fitting into a duration.
pub fn num_timesteps(duration: f64, network_dt: f64, layer_dts: &[f64], tol_abs: f64) -> usize {
    let mut dts = layer_dts.to_vec();
    dts.push(network_dt);
    let duration = fix_duration(duration, &dts, tol_abs);
    (duration / network_dt).floor().max(0.0) as usize
}
