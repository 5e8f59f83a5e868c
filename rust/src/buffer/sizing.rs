//! Buffer sizing from chain estimate variance.

use uuid::Uuid;

use crate::config::{BufferConfig, SizingMethod};
use crate::critical_chain::CriticalChainResult;
use crate::graph::TaskGraph;
use crate::log_checks;
use crate::models::{Buffer, BufferStatus, BufferType, Task};

/// Root-square-error over tasks that carry both estimates.
///
/// Returns None when no task has both optimistic and pessimistic values.
pub fn root_square_error<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Option<f64> {
    let mut sum = 0.0;
    let mut any = false;
    for (opt, pess) in tasks.into_iter().filter_map(Task::estimate_range) {
        let half_spread = (pess - opt) / 2.0;
        sum += half_spread * half_spread;
        any = true;
    }
    any.then(|| sum.sqrt())
}

/// Planned buffer size for one chain.
///
/// `chain_duration` feeds the cut-and-paste rule, used either by
/// configuration or when no task of the chain has usable estimates.
pub fn size_chain<'a>(
    tasks: impl IntoIterator<Item = &'a Task>,
    chain_duration: f64,
    config: &BufferConfig,
) -> f64 {
    let cut_and_paste = || (chain_duration * config.fallback_fraction).max(0.0);
    let planned = match config.method {
        SizingMethod::CutAndPaste => cut_and_paste(),
        SizingMethod::RootSquareError => root_square_error(tasks).unwrap_or_else(cut_and_paste),
    };
    if config.round_to_minutes {
        planned.round()
    } else {
        planned
    }
}

/// Compute the project buffer and one feeding buffer per feeding chain.
///
/// Sizes are a pure function of the graph and chain structure; ids are
/// fresh for every call.
pub fn plan_buffers(
    project_id: &str,
    graph: &TaskGraph,
    chains: &CriticalChainResult,
    config: &BufferConfig,
    now_ms: i64,
    verbosity: u8,
) -> Vec<Buffer> {
    let lookup = |ids: &[String]| -> Vec<&Task> {
        ids.iter()
            .filter_map(|id| graph.index_of(id).map(|n| graph.task(n)))
            .collect()
    };

    let mut buffers = Vec::with_capacity(chains.feeding_chains.len() + 1);
    if chains.critical_chain.is_empty() {
        return buffers;
    }

    let critical_tasks = lookup(&chains.critical_chain);
    if root_square_error(critical_tasks.iter().copied()).is_none() {
        log_checks!(verbosity, "project buffer: no estimates, using cut-and-paste");
    }
    buffers.push(new_buffer(
        project_id,
        BufferType::Project,
        "Project buffer".to_string(),
        size_chain(critical_tasks, chains.chain_duration_minutes, config),
        None,
        chains.critical_chain.clone(),
        now_ms,
    ));

    for chain in &chains.feeding_chains {
        let planned = size_chain(
            lookup(&chain.chain_task_ids),
            chain.duration_minutes,
            config,
        );
        buffers.push(new_buffer(
            project_id,
            BufferType::Feeding,
            format!("Feeding buffer before {}", chain.merge_task_id),
            planned,
            Some(chain.merge_task_id.clone()),
            chain.chain_task_ids.clone(),
            now_ms,
        ));
    }

    buffers
}

fn new_buffer(
    project_id: &str,
    buffer_type: BufferType,
    name: String,
    planned_minutes: f64,
    feeding_path_task_id: Option<String>,
    chain_task_ids: Vec<String>,
    now_ms: i64,
) -> Buffer {
    Buffer {
        id: Uuid::new_v4().to_string(),
        project_id: project_id.to_string(),
        buffer_type,
        name,
        planned_minutes,
        consumed_minutes: 0.0,
        feeding_path_task_id,
        chain_task_ids,
        status: BufferStatus::Active,
        created_at_ms: now_ms,
        updated_at_ms: now_ms,
    }
}
