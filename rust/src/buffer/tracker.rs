//! Fever chart classification of buffer consumption.

use pyo3::prelude::*;
use rustc_hash::FxHashMap;

use crate::config::BufferConfig;
use crate::models::{Buffer, BufferType, Task};

/// Fever chart zone.
#[pyclass(eq, eq_int)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferZone {
    Green,
    Yellow,
    Red,
}

/// Classify consumption `b` against chain completion `c` (both fractions).
///
/// - GREEN: b <= c
/// - YELLOW: c < b <= c + band * (1 - c)
/// - RED: otherwise
///
/// Values above 1.0 are valid overruns and classify like any other.
pub fn classify_zone(consumed_percent: f64, chain_complete_percent: f64, yellow_band: f64) -> BufferZone {
    let c = chain_complete_percent;
    let b = consumed_percent;
    if b <= c {
        BufferZone::Green
    } else if b <= c + yellow_band * (1.0 - c) {
        BufferZone::Yellow
    } else {
        BufferZone::Red
    }
}

/// consumed / planned, unclamped. A zero-size buffer is either untouched or overrun.
pub fn consumed_percent(buffer: &Buffer) -> f64 {
    if buffer.planned_minutes > 0.0 {
        buffer.consumed_minutes / buffer.planned_minutes
    } else if buffer.consumed_minutes > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

/// Fraction of chain tasks whose stage is COMPLETED. Unknown ids count as not done.
pub fn chain_complete_percent(chain_task_ids: &[String], tasks: &FxHashMap<&str, &Task>) -> f64 {
    if chain_task_ids.is_empty() {
        return 0.0;
    }
    let done = chain_task_ids
        .iter()
        .filter(|id| tasks.get(id.as_str()).is_some_and(|t| t.is_completed()))
        .count();
    done as f64 / chain_task_ids.len() as f64
}

/// Health of one buffer at a point in time.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferHealth {
    pub buffer_id: String,
    pub buffer_type: BufferType,
    pub feeding_path_task_id: Option<String>,
    pub consumed_percent: f64,
    pub chain_complete_percent: f64,
    pub zone: BufferZone,
}

/// Health of a project's active buffers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProjectBufferHealth {
    pub project_buffer: Option<BufferHealth>,
    pub feeding_buffers: Vec<BufferHealth>,
}

/// Evaluate one buffer against the current task states.
pub fn evaluate(buffer: &Buffer, tasks: &FxHashMap<&str, &Task>, config: &BufferConfig) -> BufferHealth {
    let consumed = consumed_percent(buffer);
    let complete = chain_complete_percent(&buffer.chain_task_ids, tasks);
    BufferHealth {
        buffer_id: buffer.id.clone(),
        buffer_type: buffer.buffer_type,
        feeding_path_task_id: buffer.feeding_path_task_id.clone(),
        consumed_percent: consumed,
        chain_complete_percent: complete,
        zone: classify_zone(consumed, complete, config.yellow_band_fraction),
    }
}

/// Evaluate every active buffer of a project.
pub fn evaluate_project(buffers: &[Buffer], tasks: &[Task], config: &BufferConfig) -> ProjectBufferHealth {
    let by_id: FxHashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut health = ProjectBufferHealth::default();
    for buffer in buffers.iter().filter(|b| b.is_active()) {
        let status = evaluate(buffer, &by_id, config);
        match buffer.buffer_type {
            BufferType::Project => health.project_buffer = Some(status),
            BufferType::Feeding => health.feeding_buffers.push(status),
        }
    }
    health
}
