//! Error type shared by every analysis operation.

use thiserror::Error;

use crate::config::{MAX_SIMULATIONS, MIN_SIMULATIONS};

/// Errors surfaced to callers of the analysis engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CcpmError {
    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),
    #[error("Buffer not found: {0}")]
    BufferNotFound(String),
    #[error("Project not found: {0}")]
    ProjectNotFound(String),
    #[error("Simulation count {} outside [{}, {}]", .0, MIN_SIMULATIONS, MAX_SIMULATIONS)]
    InvalidSimulationCount(u32),
    #[error("Percentile {0} outside (0, 100]")]
    InvalidPercentile(u32),
    #[error("Invalid consumption update: {0}")]
    InvalidConsumption(String),
    #[error("Buffer {0} is archived")]
    BufferArchived(String),
    #[error("Forecast aborted: {0}")]
    SimulationFailed(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CcpmError {
    /// Stable machine-readable code for the API layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CycleDetected(_) => "CYCLE_DETECTED",
            Self::BufferNotFound(_) => "BUFFER_NOT_FOUND",
            Self::ProjectNotFound(_) => "PROJECT_NOT_FOUND",
            Self::InvalidSimulationCount(_) => "INVALID_SIMULATION_COUNT",
            Self::InvalidPercentile(_) => "INVALID_PERCENTILE",
            Self::InvalidConsumption(_) => "INVALID_CONSUMPTION",
            Self::BufferArchived(_) => "BUFFER_ARCHIVED",
            Self::SimulationFailed(_) => "SIMULATION_FAILED",
            Self::Storage(_) => "STORAGE",
        }
    }

    /// Errors the caller has to correct; retrying the same request cannot succeed.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::SimulationFailed(_) | Self::Storage(_))
    }
}

impl<T> From<std::sync::PoisonError<T>> for CcpmError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        CcpmError::Storage(format!("lock poisoned: {}", err))
    }
}
