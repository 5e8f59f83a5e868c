//! Critical chain analysis.
//!
//! Runs a forward pass over the task DAG honoring FS/SS/FF/SF dependency
//! semantics, then splits the graph into the critical chain (the longest path
//! ending at a sink) and the feeding chains that merge into it. Resource
//! leveling is an explicit opt-in step applied before the forward pass.

mod chains;
mod leveling;
mod schedule;
mod types;

pub use chains::partition_chains;
pub use leveling::{level_resources, LeveledGraph};
pub use schedule::{forward_pass, makespan, ForwardPass};
pub use types::{CriticalChainResult, FeedingChain, TaskTiming, EPSILON};

use crate::config::AnalysisConfig;
use crate::error::CcpmError;
use crate::graph::TaskGraph;
use crate::models::{Dependency, Task};
use crate::{log_changes, log_debug};

/// Graph actually analyzed after the optional leveling step.
pub struct PreparedGraph {
    pub graph: TaskGraph,
    pub leveling_edges: Vec<Dependency>,
}

/// Apply resource leveling when configured; otherwise pass the graph through.
pub fn prepare_graph(graph: TaskGraph, config: &AnalysisConfig) -> Result<PreparedGraph, CcpmError> {
    if !config.resource_leveling {
        return Ok(PreparedGraph {
            graph,
            leveling_edges: Vec::new(),
        });
    }
    let leveled = level_resources(&graph, config.verbosity)?;
    Ok(PreparedGraph {
        graph: leveled.graph,
        leveling_edges: leveled.injected,
    })
}

/// Compute the critical chain and feeding chains of an already prepared graph.
pub fn analyze_graph(prepared: &PreparedGraph, config: &AnalysisConfig) -> CriticalChainResult {
    let graph = &prepared.graph;
    let pass = forward_pass(graph, graph.durations());

    for &node in graph.topological_order() {
        let timing = pass.timing(node);
        log_debug!(
            config.verbosity,
            "{}: start={} finish={}",
            graph.id(node),
            timing.earliest_start,
            timing.earliest_finish
        );
    }

    let mut result = partition_chains(graph, &pass);
    result.leveling_edges = prepared
        .leveling_edges
        .iter()
        .map(|d| (d.predecessor_task_id.clone(), d.successor_task_id.clone()))
        .collect();

    log_changes!(
        config.verbosity,
        "critical chain: {} task(s), {} min, {} feeding chain(s)",
        result.critical_chain.len(),
        result.chain_duration_minutes,
        result.feeding_chains.len()
    );

    result
}

/// Build, optionally level, and analyze a project's task graph.
pub fn analyze(
    tasks: &[Task],
    dependencies: &[Dependency],
    config: &AnalysisConfig,
) -> Result<CriticalChainResult, CcpmError> {
    let graph = TaskGraph::build(tasks, dependencies)?;
    let prepared = prepare_graph(graph, config)?;
    Ok(analyze_graph(&prepared, config))
}
