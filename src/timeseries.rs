//! Module implementing the time series exchanged between layers.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::NetworkError;
use crate::TOL_ABS;

/// The kind of signal carried by a time series, used as capability tag of layer inputs and outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    /// Sampled continuous values, e.g., currents or rates.
    Continuous,
    /// Event counts per channel (e.g., spikes), binned on the time base of the series.
    Event,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SignalType::Continuous => write!(f, "Continuous"),
            SignalType::Event => write!(f, "Event"),
        }
    }
}

/// Returns `num_samples` sampling times starting at `t_start`, spaced by `dt`.
pub fn time_base(t_start: f64, dt: f64, num_samples: usize) -> Vec<f64> {
    (0..num_samples).map(|k| t_start + k as f64 * dt).collect()
}

/// Represents a multi-channel time series, with one row of samples per time point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    times: Vec<f64>,
    samples: Vec<Vec<f64>>,
    num_channels: usize,
    kind: SignalType,
    periodic: bool,
    t_start: f64,
    t_stop: f64,
    name: Option<String>,
    trial_starts: Option<Vec<f64>>,
}

impl TimeSeries {
    /// Create a new time series from sorted sampling times and one row of samples per time.
    /// The bounds of the series are the first and last sampling times.
    /// Returns an error if the times are not finite and sorted, or if the sample rows do not match.
    pub fn new(
        times: Vec<f64>,
        samples: Vec<Vec<f64>>,
        kind: SignalType,
    ) -> Result<Self, NetworkError> {
        if times.len() != samples.len() {
            return Err(NetworkError::InvalidParameter(format!(
                "Number of samples ({}) does not match number of time points ({})",
                samples.len(),
                times.len()
            )));
        }
        if times.iter().any(|t| !t.is_finite()) {
            return Err(NetworkError::InvalidParameter(
                "Sampling times must be finite".to_string(),
            ));
        }
        if times.windows(2).any(|w| w[1] < w[0]) {
            return Err(NetworkError::InvalidParameter(
                "Sampling times must be sorted".to_string(),
            ));
        }
        let num_channels = samples.first().map_or(0, |row| row.len());
        if samples.iter().any(|row| row.len() != num_channels) {
            return Err(NetworkError::InvalidParameter(
                "All sample rows must have the same number of channels".to_string(),
            ));
        }

        let t_start = times.first().copied().unwrap_or(0.0);
        let t_stop = times.last().copied().unwrap_or(0.0);
        Ok(TimeSeries {
            times,
            samples,
            num_channels,
            kind,
            periodic: false,
            t_start,
            t_stop,
            name: None,
            trial_starts: None,
        })
    }

    /// Create a series by sampling `f` at `num_samples` times starting at `t_start`, spaced by `dt`.
    /// The series ends one time step after its last sample.
    pub fn from_fn<F>(
        t_start: f64,
        dt: f64,
        num_samples: usize,
        kind: SignalType,
        f: F,
    ) -> Result<Self, NetworkError>
    where
        F: Fn(f64) -> Vec<f64>,
    {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(NetworkError::InvalidTimeStep(dt));
        }
        let times = time_base(t_start, dt, num_samples);
        let samples = times.iter().map(|t| f(*t)).collect();
        TimeSeries::new(times, samples, kind)?.with_bounds(t_start, t_start + num_samples as f64 * dt)
    }

    /// Create an empty series with a given number of channels, e.g., the output of a layer evolved for zero time steps.
    pub fn empty(num_channels: usize, kind: SignalType, t: f64) -> Self {
        TimeSeries {
            times: vec![],
            samples: vec![],
            num_channels,
            kind,
            periodic: false,
            t_start: t,
            t_stop: t,
            name: None,
            trial_starts: None,
        }
    }

    /// Set the bounds of the series, e.g., to include the time after its last sample.
    pub fn with_bounds(mut self, t_start: f64, t_stop: f64) -> Result<Self, NetworkError> {
        if !(t_start <= t_stop) {
            return Err(NetworkError::InvalidParameter(format!(
                "Invalid bounds [{}, {}]",
                t_start, t_stop
            )));
        }
        self.t_start = t_start;
        self.t_stop = t_stop;
        Ok(self)
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Mark the series as periodic with period `t_stop - t_start`.
    pub fn with_periodic(mut self, periodic: bool) -> Self {
        self.periodic = periodic;
        self
    }

    pub fn with_trial_starts(mut self, trial_starts: Vec<f64>) -> Self {
        self.trial_starts = Some(trial_starts);
        self
    }

    /// Returns the sampling times.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Returns the rows of samples, one per sampling time.
    pub fn samples(&self) -> &[Vec<f64>] {
        &self.samples
    }

    pub fn kind(&self) -> SignalType {
        self.kind
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Returns the number of sampling times.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn periodic(&self) -> bool {
        self.periodic
    }

    pub fn t_start(&self) -> f64 {
        self.t_start
    }

    pub fn t_stop(&self) -> f64 {
        self.t_stop
    }

    /// Returns the duration of the series (its period if periodic).
    pub fn duration(&self) -> f64 {
        self.t_stop - self.t_start
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }

    pub fn trial_starts(&self) -> Option<&[f64]> {
        self.trial_starts.as_deref()
    }

    pub fn set_trial_starts(&mut self, trial_starts: Option<Vec<f64>>) {
        self.trial_starts = trial_starts;
    }

    /// Returns the samples at time `t`, holding the last sample before `t` (zero-order hold).
    /// Periodic series wrap around their period. Returns `None` before the first sample.
    pub fn sample_at(&self, t: f64) -> Option<&[f64]> {
        let t = self.wrap(t);
        let idx = self.times.partition_point(|&s| s <= t + TOL_ABS);
        if idx == 0 {
            return None;
        }
        self.samples.get(idx - 1).map(|row| row.as_slice())
    }

    fn wrap(&self, t: f64) -> f64 {
        let period = self.duration();
        if self.periodic && period > 0.0 {
            self.t_start + (t - self.t_start).rem_euclid(period)
        } else {
            t
        }
    }

    /// Returns the part of the series between `t0` and `t1`, including samples at `t1` if `include_stop`.
    /// Periodic series are repeated over the window; the result is not periodic.
    ///
    /// A continuous series without a sample at `t0` starts with the value it holds at `t0`, so that
    /// the clipped series reads the same as the original over the window. Event counts are not held.
    pub fn clip(&self, t0: f64, t1: f64, include_stop: bool) -> TimeSeries {
        let in_window = |t: f64| t >= t0 - TOL_ABS && (t < t1 - TOL_ABS || (include_stop && t <= t1 + TOL_ABS));

        let (mut times, mut samples): (Vec<f64>, Vec<Vec<f64>>) = if self.periodic && self.duration() > 0.0 {
            let period = self.duration();
            let first = ((t0 - self.t_start) / period).floor() as i64;
            let last = ((t1 - self.t_start) / period).ceil() as i64;
            (first..=last)
                .flat_map(|k| {
                    self.times
                        .iter()
                        .zip(self.samples.iter())
                        .filter(|(t, _)| **t < self.t_stop)
                        .map(move |(t, row)| (t + k as f64 * period, row.clone()))
                })
                .filter(|(t, _)| in_window(*t))
                .unzip()
        } else {
            self.times
                .iter()
                .zip(self.samples.iter())
                .filter(|(t, _)| in_window(**t))
                .map(|(t, row)| (*t, row.clone()))
                .unzip()
        };

        let starts_late = times.first().map_or(true, |t| *t > t0 + TOL_ABS);
        if self.kind == SignalType::Continuous && starts_late && in_window(t0) {
            if let Some(held) = self.sample_at(t0) {
                times.insert(0, t0);
                samples.insert(0, held.to_vec());
            }
        }

        let (t_start, t_stop) = if self.periodic {
            (t0, t1)
        } else {
            (t0.max(self.t_start), t1.min(self.t_stop).max(t0.max(self.t_start)))
        };

        TimeSeries {
            times,
            samples,
            num_channels: self.num_channels,
            kind: self.kind,
            periodic: false,
            t_start,
            t_stop,
            name: self.name.clone(),
            trial_starts: self.trial_starts.as_ref().map(|starts| {
                starts
                    .iter()
                    .copied()
                    .filter(|t| *t >= t0 && *t <= t1)
                    .collect()
            }),
        }
    }

    /// Returns the half-open window `[t0, t1)` of the series.
    pub fn window(&self, t0: f64, t1: f64) -> TimeSeries {
        self.clip(t0, t1, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> TimeSeries {
        TimeSeries::new(
            vec![0.0, 0.1, 0.2, 0.3],
            vec![vec![0.0, 1.0], vec![1.0, 1.0], vec![2.0, 1.0], vec![3.0, 1.0]],
            SignalType::Continuous,
        )
        .unwrap()
    }

    #[test]
    fn test_new() {
        let ts = ramp();
        assert_eq!(ts.len(), 4);
        assert_eq!(ts.num_channels(), 2);
        assert_eq!(ts.t_start(), 0.0);
        assert_eq!(ts.t_stop(), 0.3);
        assert_eq!(ts.name(), None);

        assert!(TimeSeries::new(vec![0.0, 1.0], vec![vec![1.0]], SignalType::Continuous).is_err());
        assert!(TimeSeries::new(
            vec![1.0, 0.0],
            vec![vec![1.0], vec![1.0]],
            SignalType::Continuous
        )
        .is_err());
        assert!(TimeSeries::new(
            vec![0.0, 1.0],
            vec![vec![1.0], vec![1.0, 2.0]],
            SignalType::Continuous
        )
        .is_err());
    }

    #[test]
    fn test_sample_at() {
        let ts = ramp();
        assert_eq!(ts.sample_at(-0.1), None);
        assert_eq!(ts.sample_at(0.0), Some(&[0.0, 1.0][..]));
        assert_eq!(ts.sample_at(0.15), Some(&[1.0, 1.0][..]));
        assert_eq!(ts.sample_at(0.3), Some(&[3.0, 1.0][..]));
        assert_eq!(ts.sample_at(10.0), Some(&[3.0, 1.0][..]));

        // Periodic series wrap around
        let ts = ramp().with_periodic(true);
        assert_eq!(ts.sample_at(0.35), Some(&[0.0, 1.0][..]));
        assert_eq!(ts.sample_at(0.45), Some(&[1.0, 1.0][..]));
    }

    #[test]
    fn test_clip() {
        let ts = ramp().with_name("input").with_trial_starts(vec![0.0, 0.2]);

        let clipped = ts.clip(0.1, 0.3, false);
        assert_eq!(clipped.times(), &[0.1, 0.2]);
        assert_eq!(clipped.t_start(), 0.1);
        assert_eq!(clipped.t_stop(), 0.3);
        assert_eq!(clipped.name(), Some("input"));
        assert_eq!(clipped.trial_starts(), Some(&[0.2][..]));

        let clipped = ts.clip(0.1, 0.3, true);
        assert_eq!(clipped.times(), &[0.1, 0.2, 0.3]);

        let window = ts.window(0.0, 0.2);
        assert_eq!(window.samples(), &[vec![0.0, 1.0], vec![1.0, 1.0]]);

        let outside = ts.clip(-2.0, -1.0, true);
        assert!(outside.is_empty());
        assert_eq!(outside.num_channels(), 2);
    }

    #[test]
    fn test_clip_holds_value() {
        let ts = ramp();
        let clipped = ts.clip(0.15, 0.3, false);
        assert_eq!(clipped.times(), &[0.15, 0.2]);
        assert_eq!(clipped.samples(), &[vec![1.0, 1.0], vec![2.0, 1.0]]);
        assert_eq!(clipped.sample_at(0.17), ts.sample_at(0.17));

        // After the last sample
        let after = ts.clip(1.0, 2.0, true);
        assert_eq!(after.times(), &[1.0]);
        assert_eq!(after.samples(), &[vec![3.0, 1.0]]);

        // Periodic series hold the value of the previous period
        let clipped = ts.clone().with_periodic(true).clip(0.55, 0.7, false);
        assert_eq!(clipped.times()[0], 0.55);
        assert_eq!(clipped.samples()[0], vec![2.0, 1.0]);

        // Empty windows stay empty
        assert!(ts.clip(0.15, 0.15, false).is_empty());

        let events = TimeSeries::new(
            vec![0.0, 0.1, 0.2],
            vec![vec![1.0], vec![0.0], vec![2.0]],
            SignalType::Event,
        )
        .unwrap();
        assert_eq!(events.clip(0.05, 0.3, false).times(), &[0.1, 0.2]);
    }

    #[test]
    fn test_clip_periodic() {
        let ts = ramp().with_periodic(true);
        let clipped = ts.clip(0.3, 0.6, false);
        assert!(!clipped.periodic());
        assert_eq!(clipped.len(), 3);
        assert_eq!(clipped.samples(), &[vec![0.0, 1.0], vec![1.0, 1.0], vec![2.0, 1.0]]);
        assert_eq!(clipped.t_start(), 0.3);
        assert_eq!(clipped.t_stop(), 0.6);
    }

    #[test]
    fn test_empty_and_bounds() {
        let ts = TimeSeries::empty(3, SignalType::Event, 1.5);
        assert!(ts.is_empty());
        assert_eq!(ts.num_channels(), 3);
        assert_eq!(ts.duration(), 0.0);

        let ts = ramp().with_bounds(0.0, 0.4).unwrap();
        assert_eq!(ts.duration(), 0.4);
        assert!(ramp().with_bounds(1.0, 0.0).is_err());
    }

    #[test]
    fn test_from_fn() {
        let ts = TimeSeries::from_fn(0.0, 0.5, 3, SignalType::Event, |t| vec![t, 2.0 * t]).unwrap();
        assert_eq!(ts.times(), &[0.0, 0.5, 1.0]);
        assert_eq!(ts.samples()[2], vec![1.0, 2.0]);
        assert_eq!(ts.t_stop(), 1.5);
        assert_eq!(ts.kind(), SignalType::Event);
        assert!(TimeSeries::from_fn(0.0, 0.0, 3, SignalType::Event, |_| vec![]).is_err());
    }

    #[test]
    fn test_time_base() {
        let times = time_base(1.0, 0.5, 3);
        assert_eq!(times, vec![1.0, 1.5, 2.0]);
        assert!(time_base(0.0, 0.1, 0).is_empty());
    }
}
