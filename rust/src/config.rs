//! Configuration types for the analysis engine.

use pyo3::prelude::*;

use crate::error::CcpmError;

/// Smallest accepted Monte Carlo trial count.
pub const MIN_SIMULATIONS: u32 = 100;
/// Largest accepted Monte Carlo trial count.
pub const MAX_SIMULATIONS: u32 = 10_000;
pub const DEFAULT_SIMULATIONS: u32 = 1_000;
pub const DEFAULT_PERCENTILES: [u32; 3] = [50, 80, 95];
/// Share of chain duration used when a chain has no usable estimates.
pub const DEFAULT_FALLBACK_FRACTION: f64 = 0.5;
/// Share of the remaining chain that separates YELLOW from RED.
pub const DEFAULT_YELLOW_BAND_FRACTION: f64 = 0.5;

/// Configuration for critical chain analysis.
#[pyclass]
#[derive(Clone, Debug, Default)]
pub struct AnalysisConfig {
    /// Serialize overlapping tasks of the same assignee before analysis.
    #[pyo3(get, set)]
    pub resource_leveling: bool,
    /// Verbosity level: 0=silent, 1=changes, 2=checks, 3=debug.
    #[pyo3(get, set)]
    pub verbosity: u8,
}

#[pymethods]
impl AnalysisConfig {
    #[new]
    #[pyo3(signature = (resource_leveling=false, verbosity=0))]
    fn new(resource_leveling: bool, verbosity: u8) -> Self {
        Self {
            resource_leveling,
            verbosity,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "AnalysisConfig(resource_leveling={}, verbosity={})",
            self.resource_leveling, self.verbosity
        )
    }
}

/// How buffer sizes are derived from chain estimates.
#[pyclass(eq, eq_int)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizingMethod {
    /// sqrt(sum(((pessimistic - optimistic) / 2)^2)), with cut-and-paste fallback.
    RootSquareError,
    /// Always a fixed fraction of the chain duration.
    CutAndPaste,
}

/// Configuration for buffer sizing and fever chart classification.
#[pyclass]
#[derive(Clone, Debug)]
pub struct BufferConfig {
    #[pyo3(get, set)]
    pub method: SizingMethod,
    /// Fraction of chain duration for cut-and-paste sizing.
    #[pyo3(get, set)]
    pub fallback_fraction: f64,
    /// YELLOW ends at `c + yellow_band_fraction * (1 - c)` of consumption.
    #[pyo3(get, set)]
    pub yellow_band_fraction: f64,
    /// Round planned sizes to whole minutes.
    #[pyo3(get, set)]
    pub round_to_minutes: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            method: SizingMethod::RootSquareError,
            fallback_fraction: DEFAULT_FALLBACK_FRACTION,
            yellow_band_fraction: DEFAULT_YELLOW_BAND_FRACTION,
            round_to_minutes: false,
        }
    }
}

#[pymethods]
impl BufferConfig {
    #[new]
    #[pyo3(signature = (
        method=None,
        fallback_fraction=None,
        yellow_band_fraction=None,
        round_to_minutes=None
    ))]
    fn new(
        method: Option<SizingMethod>,
        fallback_fraction: Option<f64>,
        yellow_band_fraction: Option<f64>,
        round_to_minutes: Option<bool>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            method: method.unwrap_or(defaults.method),
            fallback_fraction: fallback_fraction.unwrap_or(defaults.fallback_fraction),
            yellow_band_fraction: yellow_band_fraction.unwrap_or(defaults.yellow_band_fraction),
            round_to_minutes: round_to_minutes.unwrap_or(defaults.round_to_minutes),
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "BufferConfig(method={:?}, fallback_fraction={}, yellow_band_fraction={})",
            self.method, self.fallback_fraction, self.yellow_band_fraction
        )
    }
}

/// Configuration for the Monte Carlo forecast.
#[derive(Clone, Debug)]
pub struct ForecastConfig {
    pub simulations: u32,
    /// Percentiles to report, each in (0, 100].
    pub percentiles: Vec<u32>,
    /// Base seed; trials derive their own streams from it. None = fresh entropy.
    pub seed: Option<u64>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            simulations: DEFAULT_SIMULATIONS,
            percentiles: DEFAULT_PERCENTILES.to_vec(),
            seed: None,
        }
    }
}

impl ForecastConfig {
    /// Reject out-of-range requests before any simulation work starts.
    pub fn validate(&self) -> Result<(), CcpmError> {
        if !(MIN_SIMULATIONS..=MAX_SIMULATIONS).contains(&self.simulations) {
            return Err(CcpmError::InvalidSimulationCount(self.simulations));
        }
        if let Some(&bad) = self.percentiles.iter().find(|&&p| p == 0 || p > 100) {
            return Err(CcpmError::InvalidPercentile(bad));
        }
        Ok(())
    }
}
