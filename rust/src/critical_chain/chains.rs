//! Partitioning of the scheduled graph into the critical chain and feeding chains.

use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::graph::{NodeId, TaskGraph};

use super::schedule::ForwardPass;
use super::types::{CriticalChainResult, FeedingChain, TaskTiming, EPSILON};

/// Where a feeding task hands off to next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Hop {
    /// Directly precedes this critical chain task.
    Merge(NodeId),
    /// Continues through another non-critical task.
    Feed(NodeId),
}

/// Compare by time (larger first) then tie key (lower position, smaller id first).
fn later_then_tie(graph: &TaskGraph, a: NodeId, a_time: f64, b: NodeId, b_time: f64) -> Ordering {
    if (a_time - b_time).abs() > EPSILON {
        return b_time.partial_cmp(&a_time).unwrap_or(Ordering::Equal);
    }
    graph.tie_key(a).cmp(&graph.tie_key(b))
}

/// Pick the task that ends the critical chain: the latest finish overall.
///
/// Usually a sink, but an SS/SF predecessor can outlast its successors. Among
/// equal finishes a sink wins, so trailing zero-duration milestones stay on
/// the chain.
fn chain_end(graph: &TaskGraph, pass: &ForwardPass) -> Option<NodeId> {
    (0..graph.len() as NodeId).min_by(|&a, &b| {
        let (a_finish, b_finish) = (pass.timing(a).earliest_finish, pass.timing(b).earliest_finish);
        if (a_finish - b_finish).abs() > EPSILON {
            return later_then_tie(graph, a, a_finish, b, b_finish);
        }
        let a_sink = graph.successors(a).is_empty();
        let b_sink = graph.successors(b).is_empty();
        b_sink
            .cmp(&a_sink)
            .then_with(|| graph.tie_key(a).cmp(&graph.tie_key(b)))
    })
}

/// Walk driving predecessors back from the chain end.
fn walk_critical_chain(pass: &ForwardPass, end: NodeId) -> Vec<NodeId> {
    let mut chain = vec![end];
    let mut current = end;
    while let Some(driver) = pass.drivers[current as usize] {
        chain.push(driver);
        current = driver;
    }
    chain.reverse();
    chain
}

fn span(pass: &ForwardPass, nodes: &[NodeId]) -> f64 {
    let start = nodes
        .iter()
        .map(|&n| pass.timing(n).earliest_start)
        .fold(f64::INFINITY, f64::min);
    let finish = nodes
        .iter()
        .map(|&n| pass.timing(n).earliest_finish)
        .fold(f64::NEG_INFINITY, f64::max);
    if nodes.is_empty() {
        0.0
    } else {
        finish - start
    }
}

/// Split the graph into the critical chain, feeding chains and disconnected tasks.
///
/// The critical chain ends at the task with the latest finish (ties: sinks
/// first, then lower position, then smaller id) and follows driving predecessors back to its
/// first task. Every other task that can reach the critical chain belongs to
/// exactly one feeding chain; a feeding chain merges at the first critical
/// task reachable from its last task.
pub fn partition_chains(graph: &TaskGraph, pass: &ForwardPass) -> CriticalChainResult {
    let Some(end) = chain_end(graph, pass) else {
        return CriticalChainResult::default();
    };
    let n = graph.len();
    let critical = walk_critical_chain(pass, end);

    let mut chain_pos: Vec<Option<usize>> = vec![None; n];
    for (pos, &node) in critical.iter().enumerate() {
        chain_pos[node as usize] = Some(pos);
    }

    // reaches[n]: the critical chain is reachable from n (or n is on it)
    let mut reaches = vec![false; n];
    for &node in graph.topological_order().iter().rev() {
        reaches[node as usize] = chain_pos[node as usize].is_some()
            || graph
                .successors(node)
                .iter()
                .any(|e| reaches[e.node as usize]);
    }

    let mut hops: Vec<Option<Hop>> = vec![None; n];
    for node in 0..n as NodeId {
        if chain_pos[node as usize].is_some() || !reaches[node as usize] {
            continue;
        }
        hops[node as usize] = next_hop(graph, pass, node, &chain_pos, &reaches);
    }

    let feeding = collect_feeding_chains(graph, pass, &hops, &chain_pos);

    let mut disconnected: Vec<NodeId> = (0..n as NodeId)
        .filter(|&node| !reaches[node as usize])
        .collect();
    disconnected.sort_by(|&a, &b| graph.tie_key(a).cmp(&graph.tie_key(b)));

    let timings: FxHashMap<String, TaskTiming> = (0..n as NodeId)
        .map(|node| (graph.id(node).to_string(), pass.timing(node)))
        .collect();

    CriticalChainResult {
        critical_chain: critical.iter().map(|&c| graph.id(c).to_string()).collect(),
        feeding_chains: feeding,
        chain_duration_minutes: span(pass, &critical),
        disconnected_task_ids: disconnected
            .into_iter()
            .map(|d| graph.id(d).to_string())
            .collect(),
        leveling_edges: Vec::new(),
        timings,
    }
}

/// Choose the successor a feeding task hands off to.
///
/// A direct critical successor wins (earliest chain position); otherwise the
/// non-critical successor with the greatest start, ties by position then id.
fn next_hop(
    graph: &TaskGraph,
    pass: &ForwardPass,
    node: NodeId,
    chain_pos: &[Option<usize>],
    reaches: &[bool],
) -> Option<Hop> {
    let merge = graph
        .successors(node)
        .iter()
        .filter_map(|e| chain_pos[e.node as usize].map(|pos| (pos, e.node)))
        .min();
    if let Some((_, merge_node)) = merge {
        return Some(Hop::Merge(merge_node));
    }

    graph
        .successors(node)
        .iter()
        .map(|e| e.node)
        .filter(|&s| reaches[s as usize])
        .min_by(|&a, &b| {
            later_then_tie(
                graph,
                a,
                pass.timing(a).earliest_start,
                b,
                pass.timing(b).earliest_start,
            )
        })
        .map(Hop::Feed)
}

/// Assemble feeding chains from the hop forest.
///
/// Each tree is rooted at a task that merges directly into the critical
/// chain. Walking back from the root, the chain follows the feeder that
/// drives it (or, failing that, the latest-finishing one); every other feeder
/// starts a chain of its own with the same merge task.
fn collect_feeding_chains(
    graph: &TaskGraph,
    pass: &ForwardPass,
    hops: &[Option<Hop>],
    chain_pos: &[Option<usize>],
) -> Vec<FeedingChain> {
    let n = graph.len();
    let mut feeders: Vec<Vec<NodeId>> = vec![Vec::new(); n];
    let mut roots: Vec<(NodeId, NodeId)> = Vec::new();
    for node in 0..n as NodeId {
        match hops[node as usize] {
            Some(Hop::Feed(next)) => feeders[next as usize].push(node),
            Some(Hop::Merge(merge)) => roots.push((node, merge)),
            None => {}
        }
    }

    let mut queue: VecDeque<(NodeId, NodeId)> = roots.into_iter().collect();
    let mut built: Vec<(Vec<NodeId>, NodeId)> = Vec::new();

    while let Some((last, merge)) = queue.pop_front() {
        let mut path = vec![last];
        let mut current = last;
        loop {
            let driver = pass.drivers[current as usize];
            let Some(primary) = feeders[current as usize].iter().copied().min_by(|&a, &b| {
                (driver != Some(a))
                    .cmp(&(driver != Some(b)))
                    .then_with(|| {
                        later_then_tie(
                            graph,
                            a,
                            pass.timing(a).earliest_finish,
                            b,
                            pass.timing(b).earliest_finish,
                        )
                    })
            }) else {
                break;
            };
            for &other in &feeders[current as usize] {
                if other != primary {
                    queue.push_back((other, merge));
                }
            }
            path.push(primary);
            current = primary;
        }
        path.reverse();
        built.push((path, merge));
    }

    built.sort_by(|(a_path, a_merge), (b_path, b_merge)| {
        chain_pos[*a_merge as usize]
            .cmp(&chain_pos[*b_merge as usize])
            .then_with(|| graph.id(a_path[0]).cmp(graph.id(b_path[0])))
    });

    built
        .into_iter()
        .map(|(path, merge)| FeedingChain {
            duration_minutes: span(pass, &path),
            chain_task_ids: path.iter().map(|&p| graph.id(p).to_string()).collect(),
            merge_task_id: graph.id(merge).to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::critical_chain::schedule::forward_pass;
    use crate::models::{Dependency, DependencyType, StageCategory, Task};

    fn make_task(id: &str, duration: f64, position: i64) -> Task {
        Task {
            id: id.to_string(),
            project_id: "p".to_string(),
            parent_task_id: None,
            optimistic_minutes: None,
            pessimistic_minutes: Some(duration),
            effort_minutes: None,
            stage_category: StageCategory::Active,
            position,
            assignee_id: None,
            deleted: false,
        }
    }

    fn analyze(tasks: &[Task], edges: &[(&str, &str)]) -> CriticalChainResult {
        let deps: Vec<Dependency> = edges
            .iter()
            .map(|(p, s)| Dependency::finish_to_start(p, s, 0.0))
            .collect();
        let graph = TaskGraph::build(tasks, &deps).unwrap();
        let pass = forward_pass(&graph, graph.durations());
        partition_chains(&graph, &pass)
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_linear_chain() {
        let tasks = vec![
            make_task("A", 180.0, 0),
            make_task("B", 30.0, 1),
            make_task("C", 270.0, 2),
        ];
        let result = analyze(&tasks, &[("A", "B"), ("B", "C")]);
        assert_eq!(result.critical_chain, ids(&["A", "B", "C"]));
        assert!(result.feeding_chains.is_empty());
        assert_eq!(result.chain_duration_minutes, 480.0);
    }

    #[test]
    fn test_diamond_feeding_chain() {
        // a -> b -> d, a -> c -> d; c is longer
        let tasks = vec![
            make_task("a", 2.0, 0),
            make_task("b", 3.0, 1),
            make_task("c", 5.0, 2),
            make_task("d", 1.0, 3),
        ];
        let result = analyze(&tasks, &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]);

        assert_eq!(result.critical_chain, ids(&["a", "c", "d"]));
        assert_eq!(result.chain_duration_minutes, 8.0);
        assert_eq!(result.feeding_chains.len(), 1);
        assert_eq!(result.feeding_chains[0].chain_task_ids, ids(&["b"]));
        assert_eq!(result.feeding_chains[0].merge_task_id, "d");
        assert_eq!(result.feeding_chains[0].duration_minutes, 3.0);
    }

    #[test]
    fn test_multi_task_feeding_chain_merges_mid_chain() {
        // critical: a -> b -> c ; feeding: x -> y -> b
        let tasks = vec![
            make_task("a", 10.0, 0),
            make_task("b", 10.0, 1),
            make_task("c", 10.0, 2),
            make_task("x", 2.0, 3),
            make_task("y", 3.0, 4),
        ];
        let result = analyze(&tasks, &[("a", "b"), ("b", "c"), ("x", "y"), ("y", "b")]);

        assert_eq!(result.critical_chain, ids(&["a", "b", "c"]));
        assert_eq!(result.feeding_chains.len(), 1);
        let chain = &result.feeding_chains[0];
        assert_eq!(chain.chain_task_ids, ids(&["x", "y"]));
        assert_eq!(chain.merge_task_id, "b");
        assert_eq!(chain.duration_minutes, 5.0);
    }

    #[test]
    fn test_branching_feeders_split_into_chains() {
        // critical: a -> c ; x1 -> y, x2 -> y, y -> c ; x2 is longer and drives y
        let tasks = vec![
            make_task("a", 20.0, 0),
            make_task("c", 5.0, 1),
            make_task("x1", 1.0, 2),
            make_task("x2", 4.0, 3),
            make_task("y", 2.0, 4),
        ];
        let result = analyze(
            &tasks,
            &[("a", "c"), ("x1", "y"), ("x2", "y"), ("y", "c")],
        );

        assert_eq!(result.critical_chain, ids(&["a", "c"]));
        assert_eq!(result.feeding_chains.len(), 2);
        let main = result
            .feeding_chains
            .iter()
            .find(|c| c.chain_task_ids.contains(&"y".to_string()))
            .unwrap();
        assert_eq!(main.chain_task_ids, ids(&["x2", "y"]));
        let side = result
            .feeding_chains
            .iter()
            .find(|c| c.chain_task_ids == ids(&["x1"]))
            .unwrap();
        assert_eq!(side.merge_task_id, "c");
    }

    #[test]
    fn test_sink_tie_broken_by_position_then_id() {
        let tasks = vec![make_task("b", 5.0, 0), make_task("a", 5.0, 1)];
        let result = analyze(&tasks, &[]);
        // Equal finish; b has the lower position
        assert_eq!(result.critical_chain, ids(&["b"]));

        let tasks = vec![make_task("b", 5.0, 0), make_task("a", 5.0, 0)];
        let result = analyze(&tasks, &[]);
        assert_eq!(result.critical_chain, ids(&["a"]));
        assert_eq!(result.disconnected_task_ids, ids(&["b"]));
    }

    #[test]
    fn test_disconnected_tasks_reported() {
        let tasks = vec![
            make_task("a", 10.0, 0),
            make_task("b", 10.0, 1),
            make_task("lonely", 1.0, 2),
        ];
        let result = analyze(&tasks, &[("a", "b")]);
        assert_eq!(result.critical_chain, ids(&["a", "b"]));
        assert!(result.feeding_chains.is_empty());
        assert_eq!(result.disconnected_task_ids, ids(&["lonely"]));
    }

    #[test]
    fn test_every_reaching_task_assigned_once() {
        let tasks = vec![
            make_task("s", 1.0, 0),
            make_task("p1", 4.0, 1),
            make_task("p2", 2.0, 2),
            make_task("q1", 1.0, 3),
            make_task("q2", 3.0, 4),
            make_task("m", 2.0, 5),
            make_task("e", 1.0, 6),
        ];
        let result = analyze(
            &tasks,
            &[
                ("s", "p1"),
                ("p1", "m"),
                ("s", "p2"),
                ("p2", "q1"),
                ("q1", "m"),
                ("q2", "e"),
                ("m", "e"),
            ],
        );

        let mut seen: Vec<String> = result.critical_chain.clone();
        for chain in &result.feeding_chains {
            assert!(result.critical_chain.contains(&chain.merge_task_id));
            seen.extend(chain.chain_task_ids.iter().cloned());
        }
        seen.sort();
        let mut expected = ids(&["s", "p1", "p2", "q1", "q2", "m", "e"]);
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_chain_length_equals_longest_path_and_shrinks() {
        let mut tasks = vec![
            make_task("a", 3.0, 0),
            make_task("b", 9.0, 1),
            make_task("c", 4.0, 2),
            make_task("d", 2.0, 3),
        ];
        let edges = [("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")];
        let before = analyze(&tasks, &edges);
        // longest path a -> b -> d = 3 + 9 + 2
        assert_eq!(before.chain_duration_minutes, 14.0);
        assert_eq!(before.critical_chain, ids(&["a", "b", "d"]));

        tasks[1].pessimistic_minutes = Some(6.0);
        let after = analyze(&tasks, &edges);
        assert!(after.chain_duration_minutes < before.chain_duration_minutes);
        assert_eq!(after.chain_duration_minutes, 11.0);
    }

    #[test]
    fn test_start_to_start_predecessor_can_end_chain() {
        // a (100) -SS-> b (5): a finishes last though b is the only sink
        let tasks = vec![make_task("a", 100.0, 0), make_task("b", 5.0, 1)];
        let deps = vec![Dependency {
            id: "ab".to_string(),
            predecessor_task_id: "a".to_string(),
            successor_task_id: "b".to_string(),
            dep_type: DependencyType::StartToStart,
            lag_minutes: 0.0,
        }];
        let graph = TaskGraph::build(&tasks, &deps).unwrap();
        let pass = forward_pass(&graph, graph.durations());
        let result = partition_chains(&graph, &pass);

        assert_eq!(result.critical_chain, ids(&["a"]));
        assert_eq!(result.chain_duration_minutes, 100.0);
        assert_eq!(result.chain_duration_minutes, pass.completion(&graph));
    }

    #[test]
    fn test_trailing_milestone_stays_on_chain() {
        let tasks = vec![make_task("a", 10.0, 1), make_task("m", 0.0, 2)];
        let result = analyze(&tasks, &[("a", "m")]);
        assert_eq!(result.critical_chain, ids(&["a", "m"]));
    }

    #[test]
    fn test_shorter_critical_lag_shrinks_chain() {
        let tasks = vec![
            make_task("a", 5.0, 0),
            make_task("b", 5.0, 1),
            make_task("c", 8.0, 2),
        ];
        let with_lag = |lag: f64| {
            let deps = vec![
                Dependency::finish_to_start("a", "b", lag),
                Dependency::finish_to_start("a", "c", 0.0),
            ];
            let graph = TaskGraph::build(&tasks, &deps).unwrap();
            let pass = forward_pass(&graph, graph.durations());
            partition_chains(&graph, &pass)
        };

        let before = with_lag(6.0);
        assert_eq!(before.critical_chain, ids(&["a", "b"]));
        assert_eq!(before.chain_duration_minutes, 16.0);

        let after = with_lag(2.0);
        assert!(after.chain_duration_minutes < before.chain_duration_minutes);
        // b now ends at 12, below c at 13
        assert_eq!(after.critical_chain, ids(&["a", "c"]));
        assert_eq!(after.chain_duration_minutes, 13.0);
    }

    #[test]
    fn test_empty_graph() {
        let result = analyze(&[], &[]);
        assert!(result.critical_chain.is_empty());
        assert_eq!(result.chain_duration_minutes, 0.0);
    }
}
