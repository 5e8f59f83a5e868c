//! Task graph construction and cycle detection.
//!
//! Tasks live in an arena addressed by dense integer ids; adjacency is kept
//! as per-node edge lists in both directions so the forward pass and the
//! chain partitioning can walk the graph without string lookups.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::CcpmError;
use crate::models::{Dependency, DependencyType, Task};

/// Dense node id (u32 for compact storage and fast hashing).
pub type NodeId = u32;

/// One adjacency entry: the node on the other end plus the edge semantics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Edge {
    pub node: NodeId,
    pub dep_type: DependencyType,
    pub lag: f64,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Immutable snapshot of one project's task DAG.
#[derive(Clone, Debug)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    index: FxHashMap<String, NodeId>,
    durations: Vec<f64>,
    successors: Vec<Vec<Edge>>,
    predecessors: Vec<Vec<Edge>>,
    /// Edges that survived filtering, kept so the graph can be rebuilt with extras.
    dependencies: Vec<Dependency>,
    topo_order: Vec<NodeId>,
}

impl TaskGraph {
    /// Build the graph from a project's tasks and dependency edges.
    ///
    /// Deleted tasks are dropped, as are edges with an endpoint outside the
    /// task set. Repeated (predecessor, successor) pairs keep their first edge.
    /// Fails with `CycleDetected` naming the tasks on the first cycle found.
    pub fn build(tasks: &[Task], dependencies: &[Dependency]) -> Result<Self, CcpmError> {
        let mut live: Vec<&Task> = tasks.iter().filter(|t| !t.deleted).collect();
        // Deterministic node numbering regardless of load order
        live.sort_by(|a, b| a.id.cmp(&b.id));
        live.dedup_by(|a, b| a.id == b.id);

        let n = live.len();
        let mut index: FxHashMap<String, NodeId> =
            FxHashMap::with_capacity_and_hasher(n, Default::default());
        for (i, task) in live.iter().enumerate() {
            index.insert(task.id.clone(), i as NodeId);
        }
        let tasks: Vec<Task> = live.into_iter().cloned().collect();
        let durations: Vec<f64> = tasks.iter().map(|t| t.effective_duration()).collect();

        let mut successors: Vec<Vec<Edge>> = vec![Vec::new(); n];
        let mut predecessors: Vec<Vec<Edge>> = vec![Vec::new(); n];
        let mut seen_pairs: FxHashSet<(NodeId, NodeId)> = FxHashSet::default();
        let mut kept = Vec::with_capacity(dependencies.len());

        for dep in dependencies {
            let (Some(&pred), Some(&succ)) = (
                index.get(&dep.predecessor_task_id),
                index.get(&dep.successor_task_id),
            ) else {
                continue;
            };
            if pred == succ {
                return Err(CcpmError::CycleDetected(vec![dep.predecessor_task_id.clone()]));
            }
            if !seen_pairs.insert((pred, succ)) {
                continue;
            }
            successors[pred as usize].push(Edge {
                node: succ,
                dep_type: dep.dep_type,
                lag: dep.lag_minutes,
            });
            predecessors[succ as usize].push(Edge {
                node: pred,
                dep_type: dep.dep_type,
                lag: dep.lag_minutes,
            });
            kept.push(dep.clone());
        }

        for edges in successors.iter_mut().chain(predecessors.iter_mut()) {
            edges.sort_by_key(|e| e.node);
        }

        let topo_order = topological_order(&tasks, &successors)?;

        Ok(Self {
            tasks,
            index,
            durations,
            successors,
            predecessors,
            dependencies: kept,
            topo_order,
        })
    }

    /// Rebuild the same task set with additional edges, re-checking acyclicity.
    pub fn with_extra_edges(&self, extra: &[Dependency]) -> Result<Self, CcpmError> {
        let mut deps = self.dependencies.clone();
        deps.extend_from_slice(extra);
        Self::build(&self.tasks, &deps)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[inline]
    pub fn index_of(&self, id: &str) -> Option<NodeId> {
        self.index.get(id).copied()
    }

    #[inline]
    pub fn task(&self, node: NodeId) -> &Task {
        &self.tasks[node as usize]
    }

    #[inline]
    pub fn id(&self, node: NodeId) -> &str {
        &self.tasks[node as usize].id
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Effective planning durations indexed by node id.
    pub fn durations(&self) -> &[f64] {
        &self.durations
    }

    #[inline]
    pub fn successors(&self, node: NodeId) -> &[Edge] {
        &self.successors[node as usize]
    }

    #[inline]
    pub fn predecessors(&self, node: NodeId) -> &[Edge] {
        &self.predecessors[node as usize]
    }

    pub fn has_edge_between(&self, a: NodeId, b: NodeId) -> bool {
        self.successors(a).iter().any(|e| e.node == b)
            || self.successors(b).iter().any(|e| e.node == a)
    }

    /// Nodes ordered so every predecessor precedes its successors.
    pub fn topological_order(&self) -> &[NodeId] {
        &self.topo_order
    }

    /// Tasks without predecessors.
    pub fn sources(&self) -> Vec<NodeId> {
        (0..self.len() as NodeId)
            .filter(|&n| self.predecessors(n).is_empty())
            .collect()
    }

    /// Tasks without successors.
    pub fn sinks(&self) -> Vec<NodeId> {
        (0..self.len() as NodeId)
            .filter(|&n| self.successors(n).is_empty())
            .collect()
    }

    /// Deterministic tie-break key: lower position first, then smaller id.
    #[inline]
    pub fn tie_key(&self, node: NodeId) -> (i64, &str) {
        let task = self.task(node);
        (task.position, task.id.as_str())
    }
}

/// Depth-first three-coloring: a gray successor means a back edge.
///
/// Iterative so deep chains cannot overflow the stack. Returns the reverse
/// postorder, which is a topological order of the DAG.
fn topological_order(tasks: &[Task], successors: &[Vec<Edge>]) -> Result<Vec<NodeId>, CcpmError> {
    let n = successors.len();
    let mut color = vec![Color::White; n];
    let mut postorder: Vec<NodeId> = Vec::with_capacity(n);
    // (node, index of the next successor to visit)
    let mut stack: Vec<(NodeId, usize)> = Vec::new();

    for root in 0..n {
        if color[root] != Color::White {
            continue;
        }
        color[root] = Color::Gray;
        stack.push((root as NodeId, 0));

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let Some(edge) = successors[node as usize].get(frame.1) else {
                color[node as usize] = Color::Black;
                postorder.push(node);
                stack.pop();
                continue;
            };
            frame.1 += 1;
            let next = edge.node;

            match color[next as usize] {
                Color::White => {
                    color[next as usize] = Color::Gray;
                    stack.push((next, 0));
                }
                Color::Gray => {
                    let start = stack.iter().position(|&(id, _)| id == next).unwrap_or(0);
                    let cycle = stack[start..]
                        .iter()
                        .map(|&(id, _)| tasks[id as usize].id.clone())
                        .collect();
                    return Err(CcpmError::CycleDetected(cycle));
                }
                Color::Black => {}
            }
        }
    }

    postorder.reverse();
    Ok(postorder)
}
