//! Monte Carlo forecast of project completion.
//!
//! Each trial samples every task's duration from a triangular distribution
//! over its estimate range, reruns the forward pass, and records the
//! completion time. Trials are independent and run on the rayon pool; each
//! owns its RNG and duration vector, so nothing mutable is shared.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::config::ForecastConfig;
use crate::critical_chain::{forward_pass, makespan};
use crate::error::CcpmError;
use crate::graph::TaskGraph;
use crate::log_changes;
use crate::models::{ForecastResult, Task};

const MS_PER_MINUTE: f64 = 60_000.0;

/// Golden-ratio increment used to spread per-trial seeds.
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// How one task's duration is drawn in a trial.
#[derive(Clone, Copy, Debug, PartialEq)]
enum DurationModel {
    Fixed(f64),
    Triangular { low: f64, mode: f64, high: f64 },
}

impl DurationModel {
    /// Triangular(optimistic, midpoint, pessimistic) when both estimates span
    /// a range; the fixed planning duration otherwise.
    fn for_task(task: &Task) -> Self {
        match task.estimate_range() {
            Some((low, high)) if high > low => DurationModel::Triangular {
                low,
                mode: (low + high) / 2.0,
                high,
            },
            _ => DurationModel::Fixed(task.effective_duration()),
        }
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        match *self {
            DurationModel::Fixed(value) => value,
            DurationModel::Triangular { low, mode, high } => {
                sample_triangular(rng.gen::<f64>(), low, mode, high)
            }
        }
    }
}

/// Inverse CDF of the triangular distribution for `u` in [0, 1).
fn sample_triangular(u: f64, low: f64, mode: f64, high: f64) -> f64 {
    let range = high - low;
    let split = (mode - low) / range;
    if u < split {
        low + (u * range * (mode - low)).sqrt()
    } else {
        high - ((1.0 - u) * range * (high - mode)).sqrt()
    }
}

/// Run one trial. Any non-finite or negative value aborts the forecast.
fn run_trial(graph: &TaskGraph, models: &[DurationModel], seed: u64) -> Result<f64, CcpmError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut durations = Vec::with_capacity(models.len());
    for (node, model) in models.iter().enumerate() {
        let value = model.sample(&mut rng);
        if !value.is_finite() || value < 0.0 {
            return Err(CcpmError::SimulationFailed(format!(
                "task {} sampled invalid duration {}",
                graph.id(node as u32),
                value
            )));
        }
        durations.push(value);
    }
    let completion = makespan(graph, &durations);
    if !completion.is_finite() || completion < 0.0 {
        return Err(CcpmError::SimulationFailed(format!(
            "invalid completion time {}",
            completion
        )));
    }
    Ok(completion)
}

/// Nearest-rank percentile of an ascending slice.
fn nearest_rank(sorted: &[f64], percentile: u32) -> f64 {
    let rank = ((percentile as f64 / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Forecast completion of a prepared task graph.
///
/// `start_epoch_ms` anchors minute offsets to absolute time;
/// `generated_at_ms` is stamped on the result. The configuration is validated
/// before any trial runs.
pub fn run_forecast(
    graph: &TaskGraph,
    config: &ForecastConfig,
    start_epoch_ms: i64,
    generated_at_ms: i64,
    verbosity: u8,
) -> Result<ForecastResult, CcpmError> {
    config.validate()?;

    let models: Vec<DurationModel> = graph.tasks().iter().map(DurationModel::for_task).collect();
    let base_seed = config.seed.unwrap_or_else(rand::random::<u64>);

    let mut completions: Vec<f64> = (0..config.simulations as u64)
        .into_par_iter()
        .map(|trial| run_trial(graph, &models, base_seed ^ trial.wrapping_mul(SEED_STRIDE)))
        .collect::<Result<Vec<f64>, CcpmError>>()?;
    completions.sort_by(f64::total_cmp);

    let deterministic = forward_pass(graph, graph.durations()).completion(graph);
    let mean = completions.iter().sum::<f64>() / completions.len() as f64;

    let percentiles: BTreeMap<u32, i64> = config
        .percentiles
        .iter()
        .map(|&p| {
            let minutes = nearest_rank(&completions, p);
            (p, start_epoch_ms + (minutes * MS_PER_MINUTE).round() as i64)
        })
        .collect();

    log_changes!(
        verbosity,
        "forecast: {} trials, mean {:.1} min, deterministic {:.1} min",
        config.simulations,
        mean,
        deterministic
    );

    Ok(ForecastResult {
        simulations: config.simulations,
        percentiles,
        generated_at_ms,
        mean_minutes: mean,
        deterministic_minutes: deterministic,
    })
}
