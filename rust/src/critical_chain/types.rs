//! Types for critical chain analysis.

use pyo3::prelude::*;
use rustc_hash::FxHashMap;

/// Floating point tolerance for comparing schedule times.
pub const EPSILON: f64 = 1e-9;

/// Per-task timing from the forward pass, in minutes from the analysis start.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TaskTiming {
    pub earliest_start: f64,
    pub earliest_finish: f64,
}

/// A non-critical path merging into the critical chain.
#[pyclass]
#[derive(Clone, Debug, PartialEq)]
pub struct FeedingChain {
    /// Tasks in precedence order, ending at the task adjacent to the merge.
    #[pyo3(get)]
    pub chain_task_ids: Vec<String>,
    /// Critical chain task this chain feeds into.
    #[pyo3(get)]
    pub merge_task_id: String,
    /// Span from the first task's start to the last task's finish.
    #[pyo3(get)]
    pub duration_minutes: f64,
}

#[pymethods]
impl FeedingChain {
    fn __repr__(&self) -> String {
        format!(
            "FeedingChain(tasks={:?}, merge={:?})",
            self.chain_task_ids, self.merge_task_id
        )
    }
}

/// Partition of a project's task graph into critical and feeding chains.
#[pyclass]
#[derive(Clone, Debug, Default)]
pub struct CriticalChainResult {
    #[pyo3(get)]
    pub critical_chain: Vec<String>,
    #[pyo3(get)]
    pub feeding_chains: Vec<FeedingChain>,
    /// Span from the chain's first start to its last finish.
    #[pyo3(get)]
    pub chain_duration_minutes: f64,
    /// Tasks from which the critical chain cannot be reached.
    #[pyo3(get)]
    pub disconnected_task_ids: Vec<String>,
    /// (predecessor, successor) edges injected by resource leveling.
    #[pyo3(get)]
    pub leveling_edges: Vec<(String, String)>,
    pub timings: FxHashMap<String, TaskTiming>,
}

#[pymethods]
impl CriticalChainResult {
    fn __repr__(&self) -> String {
        format!(
            "CriticalChainResult(critical_chain={:?}, feeding_chains={}, duration={})",
            self.critical_chain,
            self.feeding_chains.len(),
            self.chain_duration_minutes
        )
    }
}

impl CriticalChainResult {
    /// Feeding chains merging at the given critical chain task.
    pub fn feeding_chains_into<'a>(
        &'a self,
        merge_task_id: &'a str,
    ) -> impl Iterator<Item = &'a FeedingChain> + 'a {
        self.feeding_chains
            .iter()
            .filter(move |c| c.merge_task_id == merge_task_id)
    }
}
