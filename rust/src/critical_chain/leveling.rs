//! Optional resource leveling: serialize overlapping work of one assignee.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::CcpmError;
use crate::graph::{NodeId, TaskGraph};
use crate::models::Dependency;
use crate::{log_changes, log_checks};

use super::schedule::forward_pass;
use super::types::EPSILON;

/// Result of leveling: the graph with contention edges injected.
pub struct LeveledGraph {
    pub graph: TaskGraph,
    pub injected: Vec<Dependency>,
}

/// Inject FS/lag-0 edges until no assignee has overlapping tasks.
///
/// Each round schedules the current graph, finds for every assignee the first
/// pair of consecutive tasks (ordered by start, then position, then id) that
/// overlap, and orders the earlier one before the later one. If that edge
/// would close a cycle the reverse is tried; if both would, the pair is left
/// overlapping. Zero-duration tasks never contend.
pub fn level_resources(graph: &TaskGraph, verbosity: u8) -> Result<LeveledGraph, CcpmError> {
    let mut current = graph.clone();
    let mut injected: Vec<Dependency> = Vec::new();
    let mut unresolvable: FxHashSet<(NodeId, NodeId)> = FxHashSet::default();

    loop {
        let pass = forward_pass(&current, current.durations());

        let mut by_assignee: FxHashMap<&str, Vec<NodeId>> = FxHashMap::default();
        for node in 0..current.len() as NodeId {
            let task = current.task(node);
            if current.durations()[node as usize] <= EPSILON {
                continue;
            }
            if let Some(assignee) = task.assignee_id.as_deref() {
                by_assignee.entry(assignee).or_default().push(node);
            }
        }

        let mut assignees: Vec<&str> = by_assignee.keys().copied().collect();
        assignees.sort_unstable();

        let mut round: Vec<Dependency> = Vec::new();
        for assignee in assignees {
            let mut ordered = by_assignee.remove(assignee).unwrap_or_default();
            ordered.sort_by(|&a, &b| {
                pass.timing(a)
                    .earliest_start
                    .partial_cmp(&pass.timing(b).earliest_start)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| current.tie_key(a).cmp(&current.tie_key(b)))
            });

            let overlap = ordered.windows(2).find_map(|pair| {
                let (first, second) = (pair[0], pair[1]);
                let overlaps = pass.timing(first).earliest_finish
                    > pass.timing(second).earliest_start + EPSILON;
                let skip = unresolvable.contains(&(first, second))
                    || current.has_edge_between(first, second);
                (overlaps && !skip).then_some((first, second))
            });

            if let Some((first, second)) = overlap {
                log_checks!(
                    verbosity,
                    "leveling {}: {} overlaps {}",
                    assignee,
                    current.id(first),
                    current.id(second)
                );
                round.push(contention_edge(&current, first, second));
            }
        }

        if round.is_empty() {
            break;
        }

        let mut progressed = false;
        for edge in round {
            let (first, second) = match (
                current.index_of(&edge.predecessor_task_id),
                current.index_of(&edge.successor_task_id),
            ) {
                (Some(a), Some(b)) => (a, b),
                _ => continue,
            };
            match current.with_extra_edges(std::slice::from_ref(&edge)) {
                Ok(next) => {
                    current = next;
                    injected.push(edge);
                    progressed = true;
                }
                Err(CcpmError::CycleDetected(_)) => {
                    let reverse = contention_edge(&current, second, first);
                    match current.with_extra_edges(std::slice::from_ref(&reverse)) {
                        Ok(next) => {
                            current = next;
                            injected.push(reverse);
                            progressed = true;
                        }
                        Err(CcpmError::CycleDetected(_)) => {
                            log_checks!(
                                verbosity,
                                "leveling: cannot order {} and {}",
                                current.id(first),
                                current.id(second)
                            );
                            unresolvable.insert((first, second));
                            progressed = true;
                        }
                        Err(other) => return Err(other),
                    }
                }
                Err(other) => return Err(other),
            }
        }

        if !progressed {
            break;
        }
    }

    if !injected.is_empty() {
        log_changes!(verbosity, "leveling injected {} edge(s)", injected.len());
    }

    Ok(LeveledGraph {
        graph: current,
        injected,
    })
}

fn contention_edge(graph: &TaskGraph, before: NodeId, after: NodeId) -> Dependency {
    let mut edge = Dependency::finish_to_start(graph.id(before), graph.id(after), 0.0);
    edge.id = format!("leveling:{}", edge.id);
    edge
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::critical_chain::schedule::forward_pass;
    use crate::models::{StageCategory, Task};

    fn make_task(id: &str, duration: f64, assignee: Option<&str>) -> Task {
        Task {
            id: id.to_string(),
            project_id: "p".to_string(),
            parent_task_id: None,
            optimistic_minutes: None,
            pessimistic_minutes: Some(duration),
            effort_minutes: None,
            stage_category: StageCategory::Active,
            position: 0,
            assignee_id: assignee.map(|a| a.to_string()),
            deleted: false,
        }
    }

    #[test]
    fn test_parallel_tasks_same_assignee_serialized() {
        let tasks = vec![
            make_task("a", 5.0, Some("ann")),
            make_task("b", 3.0, Some("ann")),
        ];
        let graph = TaskGraph::build(&tasks, &[]).unwrap();
        let leveled = level_resources(&graph, 0).unwrap();

        assert_eq!(leveled.injected.len(), 1);
        assert_eq!(leveled.injected[0].predecessor_task_id, "a");
        assert_eq!(leveled.injected[0].successor_task_id, "b");

        let pass = forward_pass(&leveled.graph, leveled.graph.durations());
        assert_eq!(pass.completion(&leveled.graph), 8.0);
    }

    #[test]
    fn test_different_assignees_untouched() {
        let tasks = vec![
            make_task("a", 5.0, Some("ann")),
            make_task("b", 3.0, Some("bob")),
            make_task("c", 3.0, None),
        ];
        let graph = TaskGraph::build(&tasks, &[]).unwrap();
        let leveled = level_resources(&graph, 0).unwrap();
        assert!(leveled.injected.is_empty());
    }

    #[test]
    fn test_three_way_contention_fully_serialized() {
        let tasks = vec![
            make_task("a", 2.0, Some("ann")),
            make_task("b", 2.0, Some("ann")),
            make_task("c", 2.0, Some("ann")),
        ];
        let graph = TaskGraph::build(&tasks, &[]).unwrap();
        let leveled = level_resources(&graph, 0).unwrap();

        let pass = forward_pass(&leveled.graph, leveled.graph.durations());
        assert_eq!(pass.completion(&leveled.graph), 6.0);
        // a -> b, a -> c, then b -> c once c is pushed onto b's slot
        assert_eq!(leveled.injected.len(), 3);
    }

    #[test]
    fn test_existing_order_respected() {
        // b already follows a, so nothing overlaps
        let tasks = vec![
            make_task("a", 4.0, Some("ann")),
            make_task("b", 4.0, Some("ann")),
        ];
        let deps = vec![Dependency::finish_to_start("a", "b", 0.0)];
        let graph = TaskGraph::build(&tasks, &deps).unwrap();
        let leveled = level_resources(&graph, 0).unwrap();
        assert!(leveled.injected.is_empty());
    }
}
