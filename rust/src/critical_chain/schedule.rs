//! Forward pass over the task DAG under FS/SS/FF/SF semantics.

use crate::graph::{Edge, NodeId, TaskGraph};
use crate::models::DependencyType;

use super::types::{TaskTiming, EPSILON};

/// Earliest timings plus, for each task, the predecessor that bound its start.
#[derive(Clone, Debug)]
pub struct ForwardPass {
    pub timings: Vec<TaskTiming>,
    /// None when the task starts at time zero unconstrained.
    pub drivers: Vec<Option<NodeId>>,
}

impl ForwardPass {
    #[inline]
    pub fn timing(&self, node: NodeId) -> TaskTiming {
        self.timings[node as usize]
    }

    /// Latest finish over all tasks.
    pub fn completion(&self, graph: &TaskGraph) -> f64 {
        completion_from(graph, &self.timings)
    }
}

/// Earliest start a single edge permits for its successor.
///
/// - FS: start >= pred.finish + lag
/// - SS: start >= pred.start + lag
/// - FF: finish >= pred.finish + lag
/// - SF: finish >= pred.start + lag
#[inline]
fn implied_start(edge: &Edge, pred: &TaskTiming, duration: f64) -> f64 {
    match edge.dep_type {
        DependencyType::FinishToStart => pred.earliest_finish + edge.lag,
        DependencyType::StartToStart => pred.earliest_start + edge.lag,
        DependencyType::FinishToFinish => pred.earliest_finish + edge.lag - duration,
        DependencyType::StartToFinish => pred.earliest_start + edge.lag - duration,
    }
}

/// Compute earliest start/finish for every task with the given durations.
///
/// `durations` is indexed by node id; the simulator passes sampled values,
/// analysis passes the graph's effective durations. Starts never go below zero.
/// Among equally binding predecessors the driver is chosen by lower position,
/// then smaller id.
pub fn forward_pass(graph: &TaskGraph, durations: &[f64]) -> ForwardPass {
    let n = graph.len();
    let mut timings = vec![TaskTiming::default(); n];
    let mut drivers: Vec<Option<NodeId>> = vec![None; n];

    for &node in graph.topological_order() {
        let duration = durations[node as usize];
        let mut start = 0.0_f64;
        let mut driver: Option<NodeId> = None;

        for edge in graph.predecessors(node) {
            let candidate = implied_start(edge, &timings[edge.node as usize], duration);
            match driver {
                None if candidate >= start - EPSILON => {
                    start = start.max(candidate);
                    driver = Some(edge.node);
                }
                Some(_) if candidate > start + EPSILON => {
                    start = candidate;
                    driver = Some(edge.node);
                }
                Some(current)
                    if (candidate - start).abs() <= EPSILON
                        && graph.tie_key(edge.node) < graph.tie_key(current) =>
                {
                    driver = Some(edge.node);
                }
                _ => {}
            }
        }

        timings[node as usize] = TaskTiming {
            earliest_start: start,
            earliest_finish: start + duration,
        };
        drivers[node as usize] = driver;
    }

    ForwardPass { timings, drivers }
}

/// Project completion for the given durations without tracking drivers.
///
/// Hot path of the forecast simulator: one allocation, no tie-breaking.
pub fn makespan(graph: &TaskGraph, durations: &[f64]) -> f64 {
    let mut timings = vec![TaskTiming::default(); graph.len()];

    for &node in graph.topological_order() {
        let duration = durations[node as usize];
        let start = graph
            .predecessors(node)
            .iter()
            .map(|edge| implied_start(edge, &timings[edge.node as usize], duration))
            .fold(0.0_f64, f64::max);
        timings[node as usize] = TaskTiming {
            earliest_start: start,
            earliest_finish: start + duration,
        };
    }

    completion_from(graph, &timings)
}

/// Latest finish over every task. Under SS/SF edges a task can outlast all of
/// its successors, so sinks alone are not enough.
fn completion_from(graph: &TaskGraph, timings: &[TaskTiming]) -> f64 {
    timings[..graph.len()]
        .iter()
        .map(|t| t.earliest_finish)
        .fold(0.0_f64, f64::max)
}
