//! Evolution of a network: batch-wise over many time steps, in training batches, or streamed one
//! network time step at a time.
//!
//! Layers are evolved one after the other, in evolution order, so that every layer receives the
//! output its predecessor just produced. Each layer performs a whole number of its own time
//! steps per network time step, and the layer clocks are checked against the network clock
//! before and after every evolution.
use std::collections::{BTreeMap, HashMap};

use itertools::Itertools;
use log::{debug, info, warn};

use super::network::{LayerId, Network};
use crate::error::NetworkError;
use crate::timeseries::{time_base, TimeSeries};
use crate::timestep::num_timesteps;
use crate::EXTERNAL_INPUT_KEY;

/// Default name of an unnamed external input.
pub const EXTERNAL_INPUT_NAME: &str = "External input";

/// The output of every layer of an evolution, keyed by layer name.
/// The external input, if any, is stored under [`EXTERNAL_INPUT_KEY`].
pub type Signals = BTreeMap<String, TimeSeries>;

/// How long to evolve a network for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Span {
    /// A number of network time steps.
    Timesteps(usize),
    /// A duration, rounded down to whole network time steps.
    Duration(f64),
}

/// How to split a training run into batches.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BatchSizing {
    /// A single batch over the whole run.
    #[default]
    Single,
    /// Batches of a fixed number of time steps, the last one possibly shorter.
    Timesteps(usize),
    /// Batches with individual numbers of time steps.
    ExplicitTimesteps(Vec<usize>),
    /// Batches of a fixed duration, the last one possibly shorter.
    Duration(f64),
    /// Batches with individual durations.
    ExplicitDurations(Vec<f64>),
}

/// Receives progress updates while a network is trained.
pub trait ProgressReporter {
    fn start(&mut self, _num_batches: usize) {}

    /// Called before batch `batch` (counted from zero) is evolved from `t_start` to `t_stop`.
    fn batch(&mut self, batch: usize, num_batches: usize, t_start: f64, t_stop: f64);

    fn finish(&mut self) {}
}

/// Reports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn batch(&mut self, _batch: usize, _num_batches: usize, _t_start: f64, _t_stop: f64) {}
}

/// Reports training progress through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn start(&mut self, num_batches: usize) {
        info!("Network training in {} batches", num_batches);
    }

    fn batch(&mut self, batch: usize, num_batches: usize, t_start: f64, t_stop: f64) {
        info!(
            "Training batch {} of {} from t = {:.3} to {:.3}",
            batch + 1,
            num_batches,
            t_start,
            t_stop
        );
    }

    fn finish(&mut self) {
        info!("Training successful");
    }
}

/// Where a layer takes its input from.
#[derive(Clone, Copy)]
enum Source {
    External,
    Layer(LayerId),
    Nothing,
}

impl Network {
    /// Evolve the network and return the output of every layer.
    ///
    /// Layers flagged as external inputs receive `input`, other layers receive the output of
    /// their predecessor, if any. The number of network time steps is given by `span`; without
    /// it, the network evolves over the period of a periodic input, or up to the end of the input
    /// otherwise. Trial starts of the input are copied to every layer output.
    pub fn evolve(
        &mut self,
        input: Option<&TimeSeries>,
        span: Option<Span>,
        verbose: bool,
    ) -> Result<Signals, NetworkError> {
        if self.is_empty() {
            return Err(NetworkError::EmptyNetwork);
        }
        if let Some(input) = input {
            self.check_external_input(input)?;
        }
        let num_steps = self.resolve_num_timesteps(input, span)?;
        self.check_sync(false)?;

        let external = input.map(named_input);
        let trial_starts = external
            .as_ref()
            .and_then(|ts| ts.trial_starts())
            .map(|starts| starts.to_vec());

        let mut outputs: HashMap<LayerId, TimeSeries> = HashMap::with_capacity(self.layers.len());
        for id in self.order.clone() {
            let source = self.source_of(id);
            let layer_input = match source {
                Source::External => external.as_ref(),
                Source::Layer(source) => outputs.get(&source),
                Source::Nothing => None,
            };
            let ratio = self.ratio(id);
            let layer = self.layers.get_mut(&id).ok_or_else(|| {
                NetworkError::LayerNotFound(format!("#{}", id.0))
            })?;

            debug!(
                "Evolving layer `{}` for {} time steps with {} as input",
                layer.name(),
                num_steps * ratio,
                match source {
                    Source::External => "external input",
                    Source::Layer(_) => "its predecessor's output",
                    Source::Nothing => "nothing",
                }
            );
            let mut output = layer.evolve(layer_input, num_steps * ratio, verbose)?;
            if let Some(starts) = trial_starts.as_ref() {
                output.set_trial_starts(Some(starts.clone()));
            }
            if output.name().is_none() {
                output.set_name(layer.name());
            }
            outputs.insert(id, output);
        }

        self.timestep += num_steps;
        self.check_sync(false)?;

        let mut signals: Signals = outputs
            .into_iter()
            .filter_map(|(id, output)| self.name_of(id).map(|name| (name.to_string(), output)))
            .collect();
        if let Some(external) = external {
            signals.insert(EXTERNAL_INPUT_KEY.to_string(), external);
        }
        Ok(signals)
    }

    /// Train the network batch-wise, see [`Network::train_with_progress`].
    pub fn train<F>(
        &mut self,
        training_fn: F,
        input: Option<&TimeSeries>,
        span: Option<Span>,
        batches: BatchSizing,
    ) -> Result<(), NetworkError>
    where
        F: FnMut(&mut Network, &Signals, bool, bool),
    {
        self.train_with_progress(training_fn, input, span, batches, &mut NoProgress, false)
    }

    /// Train the network batch-wise.
    ///
    /// The total number of time steps is resolved as in [`Network::evolve`] and split into
    /// batches. For every batch, the network evolves over the part of the input covering the
    /// batch, and `training_fn` is called with the network, the outputs of the batch, and whether
    /// the batch is the first and the last one. Batches run strictly one after the other.
    pub fn train_with_progress<F>(
        &mut self,
        mut training_fn: F,
        input: Option<&TimeSeries>,
        span: Option<Span>,
        batches: BatchSizing,
        progress: &mut dyn ProgressReporter,
        verbose: bool,
    ) -> Result<(), NetworkError>
    where
        F: FnMut(&mut Network, &Signals, bool, bool),
    {
        if self.is_empty() {
            return Err(NetworkError::EmptyNetwork);
        }
        if let Some(input) = input {
            self.check_external_input(input)?;
        }
        let total = self.resolve_num_timesteps(input, span)?;
        let dt = self.network_dt()?;
        let layer_dts: Vec<f64> = self.layers.values().map(|layer| layer.dt()).collect();
        let sizes = batch_sizes(total, &batches, |duration| {
            num_timesteps(duration, dt, &layer_dts, self.config.tol_abs)
        })?;

        let num_batches = sizes.len();
        progress.start(num_batches);
        for (k, size) in sizes.into_iter().enumerate() {
            let t_start = self.t();
            let t_stop = t_start + size as f64 * dt;
            progress.batch(k, num_batches, t_start, t_stop);

            let batch_input = input.map(|ts| ts.clip(t_start, t_stop, true));
            let signals = self.evolve(batch_input.as_ref(), Some(Span::Timesteps(size)), verbose)?;
            training_fn(self, &signals, k == 0, k + 1 == num_batches);
        }
        progress.finish();

        Ok(())
    }

    /// Stream the input through the network one network time step at a time.
    /// See [`Network::stream_with_callback`].
    pub fn stream(
        &mut self,
        input: Option<&TimeSeries>,
        span: Option<Span>,
    ) -> Result<Signals, NetworkError> {
        self.stream_with_callback(input, span, |_, _| {})
    }

    /// Stream the input through the network one network time step at a time.
    ///
    /// Every layer must support streaming. At each step, every layer receives the output its
    /// predecessor produced at the previous step, or the current sample of the external input.
    /// The output of each layer starts with its initial output and has one more sample per step.
    /// `step_fn` is called with the network and the step index after every step.
    pub fn stream_with_callback<F>(
        &mut self,
        input: Option<&TimeSeries>,
        span: Option<Span>,
        mut step_fn: F,
    ) -> Result<Signals, NetworkError>
    where
        F: FnMut(&Network, usize),
    {
        if self.is_empty() {
            return Err(NetworkError::EmptyNetwork);
        }
        let not_streamable: Vec<String> = self
            .layers
            .values_mut()
            .filter_map(|layer| {
                let streamable = layer.as_streaming().is_some();
                (!streamable).then(|| layer.name().to_string())
            })
            .collect();
        if !not_streamable.is_empty() {
            return Err(NetworkError::NotStreamable(not_streamable.join(", ")));
        }
        if let Some(input) = input {
            self.check_external_input(input)?;
        }

        let num_steps = self.resolve_num_timesteps(input, span)?;
        let dt = self.network_dt()?;
        self.check_sync(false)?;

        let times = time_base(self.t(), dt, num_steps + 1);
        let order = self.order.clone();
        let mut last: HashMap<LayerId, Vec<f64>> = HashMap::with_capacity(order.len());
        let mut rows: HashMap<LayerId, Vec<Vec<f64>>> = HashMap::with_capacity(order.len());
        for id in order.iter() {
            let initial = self.streaming_layer(*id)?.initial_output();
            rows.insert(*id, vec![initial.clone()]);
            last.insert(*id, initial);
        }

        for (step, t) in times.iter().take(num_steps).enumerate() {
            let external = input.and_then(|ts| ts.sample_at(*t));
            let mut current: HashMap<LayerId, Vec<f64>> = HashMap::with_capacity(order.len());
            for id in order.iter() {
                let layer_input = match self.source_of(*id) {
                    Source::External => external,
                    Source::Layer(source) => last.get(&source).map(|row| row.as_slice()),
                    Source::Nothing => None,
                };
                let ratio = self.ratio(*id);
                let output = self.streaming_layer(*id)?.step(layer_input, ratio)?;
                if let Some(layer_rows) = rows.get_mut(id) {
                    layer_rows.push(output.clone());
                }
                current.insert(*id, output);
            }
            last = current;
            self.timestep += 1;
            step_fn(self, step);
        }
        self.check_sync(false)?;

        let mut signals = Signals::new();
        for id in order.iter() {
            let layer = self.get(*id)?;
            let samples = rows.remove(id).unwrap_or_default();
            let output = TimeSeries::new(times.clone(), samples, layer.output_type())?
                .with_name(layer.name());
            signals.insert(layer.name().to_string(), output);
        }
        if let Some(input) = input {
            signals.insert(EXTERNAL_INPUT_KEY.to_string(), named_input(input));
        }
        Ok(signals)
    }

    /// Reset the time of every layer and of the network, keeping their state.
    pub fn reset_time(&mut self) {
        self.layers.values_mut().for_each(|layer| layer.reset_time());
        self.timestep = 0;
    }

    /// Reset the state of every layer, keeping the time.
    pub fn reset_state(&mut self) {
        self.layers.values_mut().for_each(|layer| layer.reset_state());
    }

    /// Reset the state and time of every layer and of the network.
    pub fn reset_all(&mut self) {
        self.layers.values_mut().for_each(|layer| layer.reset_all());
        self.timestep = 0;
    }

    /// Check that every layer performed exactly its number of time steps per network time step
    /// times the number of network time steps. With `verbose`, the time of every layer is logged.
    ///
    /// Returns an error naming the first layer out of sync. This indicates that a layer does not
    /// keep track of its own time correctly.
    pub fn check_sync(&self, verbose: bool) -> Result<(), NetworkError> {
        if verbose {
            debug!(
                "Network time is {}, layer times: {}",
                self.t(),
                self.order
                    .iter()
                    .filter_map(|id| self.layers.get(id))
                    .map(|layer| format!("`{}`: {}", layer.name(), layer.t()))
                    .join(", ")
            );
        }

        for id in self.order.iter() {
            let layer = self.get(*id)?;
            let expected = self.timestep * self.ratio(*id);
            if layer.timestep() != expected {
                warn!(
                    "Layer `{}` is not in sync with the network (t={})",
                    layer.name(),
                    layer.t()
                );
                return Err(NetworkError::Desynchronized {
                    layer: layer.name().to_string(),
                    layer_timestep: layer.timestep(),
                    expected,
                });
            }
        }

        if verbose {
            debug!("All layers are in sync with the network");
        }
        Ok(())
    }

    /// Resolve the number of network time steps to evolve for.
    fn resolve_num_timesteps(
        &self,
        input: Option<&TimeSeries>,
        span: Option<Span>,
    ) -> Result<usize, NetworkError> {
        let duration = match (span, input) {
            (Some(Span::Timesteps(n)), _) => return Ok(n),
            (Some(Span::Duration(duration)), _) => {
                if !(duration.is_finite() && duration >= 0.0) {
                    return Err(NetworkError::InvalidParameter(format!(
                        "Duration must be finite and non-negative, got {}",
                        duration
                    )));
                }
                duration
            }
            (None, Some(input)) if input.periodic() => input.duration(),
            (None, Some(input)) => {
                let duration = input.t_stop() - self.t();
                if !(duration > 0.0) {
                    return Err(NetworkError::NonPositiveDuration {
                        t_stop: input.t_stop(),
                        t: self.t(),
                    });
                }
                duration
            }
            (None, None) => return Err(NetworkError::MissingDuration),
        };

        let dt = self.network_dt()?;
        let layer_dts: Vec<f64> = self.layers.values().map(|layer| layer.dt()).collect();
        Ok(num_timesteps(duration, dt, &layer_dts, self.config.tol_abs))
    }

    fn network_dt(&self) -> Result<f64, NetworkError> {
        self.dt.ok_or(NetworkError::EmptyNetwork)
    }

    fn ratio(&self, id: LayerId) -> usize {
        self.ratios.get(&id).copied().unwrap_or(1)
    }

    fn source_of(&self, id: LayerId) -> Source {
        if self.external.contains(&id) {
            Source::External
        } else if let Some(source) = self.predecessors.get(&id) {
            Source::Layer(*source)
        } else {
            Source::Nothing
        }
    }

    fn streaming_layer(
        &mut self,
        id: LayerId,
    ) -> Result<&mut dyn crate::layer::StreamingLayer, NetworkError> {
        let layer = self
            .layers
            .get_mut(&id)
            .ok_or_else(|| NetworkError::LayerNotFound(format!("#{}", id.0)))?;
        let name = layer.name().to_string();
        layer
            .as_streaming()
            .ok_or(NetworkError::NotStreamable(name))
    }

    /// Check that the external input fits every layer receiving it.
    fn check_external_input(&self, input: &TimeSeries) -> Result<(), NetworkError> {
        for id in self.external.iter() {
            let layer = self.get(*id)?;
            if input.num_channels() != layer.size_in() {
                return Err(NetworkError::InputMismatch(format!(
                    "layer `{}` expects {} channels, got {}",
                    layer.name(),
                    layer.size_in(),
                    input.num_channels()
                )));
            }
            if input.kind() != layer.input_type() {
                return Err(NetworkError::InputMismatch(format!(
                    "layer `{}` expects {} input, got {}",
                    layer.name(),
                    layer.input_type(),
                    input.kind()
                )));
            }
        }
        Ok(())
    }
}

/// Returns a copy of the external input, named if it has no name yet.
fn named_input(input: &TimeSeries) -> TimeSeries {
    let mut input = input.clone();
    if input.name().is_none() {
        input.set_name(EXTERNAL_INPUT_NAME);
    }
    input
}

/// Split `total` time steps into batches.
///
/// Batch sizes falling short of `total` are completed with a final batch; batch sizes exceeding
/// it are truncated, shortening the last remaining batch. `to_timesteps` converts durations into
/// numbers of time steps.
pub fn batch_sizes<F>(
    total: usize,
    batches: &BatchSizing,
    to_timesteps: F,
) -> Result<Vec<usize>, NetworkError>
where
    F: Fn(f64) -> usize,
{
    let uniform = |size: usize| -> Result<Vec<usize>, NetworkError> {
        if size == 0 {
            return Err(NetworkError::InvalidParameter(
                "Batches must contain at least one time step".to_string(),
            ));
        }
        let num_batches = total.div_ceil(size);
        Ok((0..num_batches)
            .map(|k| size.min(total - k * size))
            .collect())
    };

    let sizes = match batches {
        BatchSizing::Single => vec![total],
        BatchSizing::Timesteps(size) => uniform(*size)?,
        BatchSizing::Duration(duration) => uniform(to_timesteps(*duration))?,
        BatchSizing::ExplicitTimesteps(sizes) => sizes.clone(),
        BatchSizing::ExplicitDurations(durations) => {
            durations.iter().map(|duration| to_timesteps(*duration)).collect()
        }
    };
    if sizes.iter().any(|size| *size == 0) && total > 0 {
        return Err(NetworkError::InvalidParameter(
            "Batches must contain at least one time step".to_string(),
        ));
    }

    let mut clipped = Vec::with_capacity(sizes.len() + 1);
    let mut sum = 0;
    for size in sizes {
        if sum >= total {
            break;
        }
        let size = size.min(total - sum);
        clipped.push(size);
        sum += size;
    }
    if sum < total {
        clipped.push(total - sum);
    }
    if clipped.is_empty() {
        clipped.push(0);
    }
    Ok(clipped)
}
