//! Critical Chain Project Management analysis engine.
//!
//! Computes a project's critical chain and feeding chains from its task DAG,
//! sizes and tracks schedule buffers, and forecasts completion dates with a
//! Monte Carlo simulation.

// Allow clippy warning triggered by PyO3 macro expansion
#![allow(clippy::useless_conversion)]

use pyo3::prelude::*;

pub mod buffer;
pub mod config;
pub mod critical_chain;
pub mod engine;
pub mod error;
pub mod forecast;
pub mod graph;
pub mod logging;
pub mod models;
pub mod store;

pub use buffer::{BufferHealth, BufferZone, ProjectBufferHealth};
pub use config::{AnalysisConfig, BufferConfig, ForecastConfig, SizingMethod};
pub use critical_chain::{CriticalChainResult, FeedingChain};
pub use engine::CcpmEngine;
pub use error::CcpmError;
pub use models::{
    Buffer, BufferStatus, BufferType, Dependency, DependencyType, ForecastResult, StageCategory,
    Task,
};
pub use store::{
    BufferFilter, BufferStore, BufferUpdate, Clock, FixedClock, InMemoryStore, ProjectSource,
    SystemClock,
};

fn to_py_err(err: CcpmError) -> PyErr {
    pyo3::exceptions::PyValueError::new_err(format!("[{}] {}", err.code(), err))
}

/// Compute the critical chain and feeding chains of a task graph.
///
/// # Raises
/// * ValueError if the dependencies contain a cycle
#[pyfunction(name = "critical_chain")]
#[pyo3(signature = (tasks, dependencies, resource_leveling=false))]
fn py_critical_chain(
    tasks: Vec<Task>,
    dependencies: Vec<Dependency>,
    resource_leveling: bool,
) -> PyResult<CriticalChainResult> {
    let config = AnalysisConfig {
        resource_leveling,
        ..AnalysisConfig::default()
    };
    critical_chain::analyze(&tasks, &dependencies, &config).map_err(to_py_err)
}

/// Forecast completion dates with a Monte Carlo simulation.
///
/// # Arguments
/// * `start_epoch_ms` - Time that minute zero of the schedule maps to
/// * `simulations` - Trial count in [100, 10000]
/// * `percentiles` - Percentiles to report, defaults to [50, 80, 95]
/// * `seed` - Makes the result reproducible when set
///
/// # Raises
/// * ValueError on invalid parameters, cycles, or invalid sampled durations
#[pyfunction(name = "forecast")]
#[pyo3(signature = (tasks, dependencies, start_epoch_ms, simulations=config::DEFAULT_SIMULATIONS, percentiles=None, seed=None))]
fn py_forecast(
    tasks: Vec<Task>,
    dependencies: Vec<Dependency>,
    start_epoch_ms: i64,
    simulations: u32,
    percentiles: Option<Vec<u32>>,
    seed: Option<u64>,
) -> PyResult<ForecastResult> {
    let config = ForecastConfig {
        simulations,
        percentiles: percentiles.unwrap_or_else(|| config::DEFAULT_PERCENTILES.to_vec()),
        seed,
    };
    config.validate().map_err(to_py_err)?;
    let graph = graph::TaskGraph::build(&tasks, &dependencies).map_err(to_py_err)?;
    forecast::run_forecast(&graph, &config, start_epoch_ms, SystemClock.now_ms(), 0)
        .map_err(to_py_err)
}

/// Fever chart zone for a consumption fraction against chain completion.
#[pyfunction(name = "classify_zone")]
#[pyo3(signature = (consumed_percent, chain_complete_percent, yellow_band_fraction=config::DEFAULT_YELLOW_BAND_FRACTION))]
fn py_classify_zone(
    consumed_percent: f64,
    chain_complete_percent: f64,
    yellow_band_fraction: f64,
) -> BufferZone {
    buffer::classify_zone(consumed_percent, chain_complete_percent, yellow_band_fraction)
}

/// The ccpm.rust Python module.
#[pymodule]
fn rust(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Core data types
    m.add_class::<Task>()?;
    m.add_class::<Dependency>()?;
    m.add_class::<DependencyType>()?;
    m.add_class::<StageCategory>()?;
    m.add_class::<CriticalChainResult>()?;
    m.add_class::<FeedingChain>()?;
    m.add_class::<ForecastResult>()?;
    m.add_class::<BufferZone>()?;

    // Config types
    m.add_class::<AnalysisConfig>()?;
    m.add_class::<BufferConfig>()?;
    m.add_class::<SizingMethod>()?;

    // Algorithms
    m.add_function(wrap_pyfunction!(py_critical_chain, m)?)?;
    m.add_function(wrap_pyfunction!(py_forecast, m)?)?;
    m.add_function(wrap_pyfunction!(py_classify_zone, m)?)?;

    Ok(())
}
