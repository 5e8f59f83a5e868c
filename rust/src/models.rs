//! Core data types for the CCPM analysis engine.

use chrono::{DateTime, TimeZone, Utc};
use pyo3::prelude::*;
use std::collections::BTreeMap;

use crate::error::CcpmError;

/// Precedence semantics of a dependency edge.
#[pyclass(eq, eq_int)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DependencyType {
    /// Successor starts after predecessor finishes.
    FinishToStart,
    /// Successor starts after predecessor starts.
    StartToStart,
    /// Successor finishes after predecessor finishes.
    FinishToFinish,
    /// Successor finishes after predecessor starts.
    StartToFinish,
}

impl DependencyType {
    /// Parse the short code used by the API layer ("FS", "SS", "FF", "SF").
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "FS" => Some(Self::FinishToStart),
            "SS" => Some(Self::StartToStart),
            "FF" => Some(Self::FinishToFinish),
            "SF" => Some(Self::StartToFinish),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::FinishToStart => "FS",
            Self::StartToStart => "SS",
            Self::FinishToFinish => "FF",
            Self::StartToFinish => "SF",
        }
    }
}

/// Workflow stage bucket of a task.
#[pyclass(eq, eq_int)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageCategory {
    Active,
    Completed,
    Deferred,
    Cancelled,
}

/// A task as loaded from the project store. Read-only inside the engine.
#[pyclass]
#[derive(Clone, Debug)]
pub struct Task {
    #[pyo3(get, set)]
    pub id: String,
    #[pyo3(get, set)]
    pub project_id: String,
    #[pyo3(get, set)]
    pub parent_task_id: Option<String>,
    #[pyo3(get, set)]
    pub optimistic_minutes: Option<f64>,
    #[pyo3(get, set)]
    pub pessimistic_minutes: Option<f64>,
    #[pyo3(get, set)]
    pub effort_minutes: Option<f64>,
    #[pyo3(get, set)]
    pub stage_category: StageCategory,
    #[pyo3(get, set)]
    pub position: i64,
    /// Only consulted by the optional resource leveling step.
    #[pyo3(get, set)]
    pub assignee_id: Option<String>,
    #[pyo3(get, set)]
    pub deleted: bool,
}

#[pymethods]
impl Task {
    #[new]
    #[pyo3(signature = (
        id,
        project_id,
        optimistic_minutes=None,
        pessimistic_minutes=None,
        effort_minutes=None,
        stage_category=StageCategory::Active,
        position=0,
        parent_task_id=None,
        assignee_id=None,
        deleted=false
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: String,
        project_id: String,
        optimistic_minutes: Option<f64>,
        pessimistic_minutes: Option<f64>,
        effort_minutes: Option<f64>,
        stage_category: StageCategory,
        position: i64,
        parent_task_id: Option<String>,
        assignee_id: Option<String>,
        deleted: bool,
    ) -> Self {
        Self {
            id,
            project_id,
            parent_task_id,
            optimistic_minutes,
            pessimistic_minutes,
            effort_minutes,
            stage_category,
            position,
            assignee_id,
            deleted,
        }
    }

    /// Planning duration: pessimistic, else effort, else optimistic, else zero.
    pub fn effective_duration(&self) -> f64 {
        self.pessimistic_minutes
            .or(self.effort_minutes)
            .or(self.optimistic_minutes)
            .unwrap_or(0.0)
    }

    fn __repr__(&self) -> String {
        format!(
            "Task(id={:?}, optimistic={:?}, pessimistic={:?}, effort={:?})",
            self.id, self.optimistic_minutes, self.pessimistic_minutes, self.effort_minutes
        )
    }
}

impl Task {
    /// (optimistic, pessimistic) when both estimates are present.
    pub fn estimate_range(&self) -> Option<(f64, f64)> {
        match (self.optimistic_minutes, self.pessimistic_minutes) {
            (Some(opt), Some(pess)) => Some((opt, pess)),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.stage_category == StageCategory::Completed
    }
}

/// A precedence edge between two tasks of the same project.
#[pyclass]
#[derive(Clone, Debug)]
pub struct Dependency {
    #[pyo3(get, set)]
    pub id: String,
    #[pyo3(get, set)]
    pub predecessor_task_id: String,
    #[pyo3(get, set)]
    pub successor_task_id: String,
    #[pyo3(get, set)]
    pub dep_type: DependencyType,
    #[pyo3(get, set)]
    pub lag_minutes: f64,
}

#[pymethods]
impl Dependency {
    #[new]
    #[pyo3(signature = (
        predecessor_task_id,
        successor_task_id,
        dep_type=DependencyType::FinishToStart,
        lag_minutes=0.0,
        id=None
    ))]
    fn new(
        predecessor_task_id: String,
        successor_task_id: String,
        dep_type: DependencyType,
        lag_minutes: f64,
        id: Option<String>,
    ) -> Self {
        let id = id.unwrap_or_else(|| format!("{}->{}", predecessor_task_id, successor_task_id));
        Self {
            id,
            predecessor_task_id,
            successor_task_id,
            dep_type,
            lag_minutes,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "Dependency({:?} -{}[{}]-> {:?})",
            self.predecessor_task_id,
            self.dep_type.code(),
            self.lag_minutes,
            self.successor_task_id
        )
    }
}

impl Dependency {
    /// Finish-to-start edge with the default generated id.
    pub fn finish_to_start(predecessor: &str, successor: &str, lag_minutes: f64) -> Self {
        Self::new(
            predecessor.to_string(),
            successor.to_string(),
            DependencyType::FinishToStart,
            lag_minutes,
            None,
        )
    }
}

/// Where a buffer protects the schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferType {
    /// Appended after the critical chain.
    Project,
    /// Inserted where a feeding chain merges into the critical chain.
    Feeding,
}

/// Lifecycle state of a persisted buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferStatus {
    Active,
    Archived,
}

/// A persisted schedule buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Buffer {
    pub id: String,
    pub project_id: String,
    pub buffer_type: BufferType,
    pub name: String,
    pub planned_minutes: f64,
    /// May exceed `planned_minutes`; an overrun is a state, not an error.
    pub consumed_minutes: f64,
    /// Merge point into the critical chain, set iff `buffer_type` is Feeding.
    pub feeding_path_task_id: Option<String>,
    pub chain_task_ids: Vec<String>,
    pub status: BufferStatus,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Buffer {
    /// Check the structural invariants a store must enforce before persisting.
    pub fn validate(&self) -> Result<(), CcpmError> {
        match (self.buffer_type, &self.feeding_path_task_id) {
            (BufferType::Feeding, None) => Err(CcpmError::Storage(format!(
                "feeding buffer {} has no merge task",
                self.id
            ))),
            (BufferType::Project, Some(_)) => Err(CcpmError::Storage(format!(
                "project buffer {} must not carry a merge task",
                self.id
            ))),
            _ if !self.planned_minutes.is_finite() || self.planned_minutes < 0.0 => {
                Err(CcpmError::Storage(format!(
                    "buffer {} has invalid planned minutes {}",
                    self.id, self.planned_minutes
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BufferStatus::Active
    }
}

/// Monte Carlo completion forecast. Computed per request, never persisted.
#[pyclass]
#[derive(Clone, Debug, Default)]
pub struct ForecastResult {
    #[pyo3(get)]
    pub simulations: u32,
    /// Requested percentile -> completion time as epoch milliseconds.
    #[pyo3(get)]
    pub percentiles: BTreeMap<u32, i64>,
    #[pyo3(get)]
    pub generated_at_ms: i64,
    /// Mean sampled completion, in minutes after the analysis start.
    #[pyo3(get)]
    pub mean_minutes: f64,
    /// Completion of the unsampled schedule, in minutes after the analysis start.
    #[pyo3(get)]
    pub deterministic_minutes: f64,
}

#[pymethods]
impl ForecastResult {
    fn __repr__(&self) -> String {
        format!(
            "ForecastResult(simulations={}, percentiles={:?})",
            self.simulations, self.percentiles
        )
    }
}

impl ForecastResult {
    /// Completion date for a requested percentile.
    pub fn completion_at(&self, percentile: u32) -> Option<DateTime<Utc>> {
        let ms = *self.percentiles.get(&percentile)?;
        Utc.timestamp_millis_opt(ms).single()
    }

    pub fn generated_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.generated_at_ms).single()
    }
}
