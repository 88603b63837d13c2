//! Message-update scheduling for loopy belief propagation: priority,
//! FIFO and random-spanning-tree strategies with shared damping and
//! convergence detection.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use fnv::FnvHashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::bp::builder::InferenceGraph;
use crate::error::InferenceError;
use crate::params::SchedulingType;

/// Live message state on the directed edges of an inference graph.
pub struct PropagationState<'a> {
    pub graph: &'a InferenceGraph,
    messages: Vec<[f64; 2]>,
    p_norm: f64,
}

impl<'a> PropagationState<'a> {
    pub fn new(graph: &'a InferenceGraph, p_norm: f64) -> Self {
        Self {
            graph,
            messages: vec![[0.5, 0.5]; graph.num_edges()],
            p_norm,
        }
    }

    pub fn message(&self, edge: usize) -> [f64; 2] {
        self.messages[edge]
    }

    /// Compute the candidate message on a directed edge from the current
    /// messages, normalized. Does not store it.
    pub fn compute(&self, e: usize) -> Result<[f64; 2], InferenceError> {
        let edge = self.graph.edge(e);
        let raw = if self.graph.is_factor_node(edge.from) {
            let factor = self.graph.factor(edge.from);
            let factor_edges = self.graph.factor_edges(edge.from);
            let target = factor_edges
                .iter()
                .position(|&fe| fe == e)
                .ok_or_else(|| {
                    InferenceError::GraphShape(format!(
                        "edge {} is not incident to its factor node {}",
                        e, edge.from
                    ))
                })?;
            let incoming: Vec<[f64; 2]> = factor_edges
                .iter()
                .map(|&fe| self.messages[self.graph.reverse(fe)])
                .collect();
            factor.message_to(target, &incoming, self.p_norm)
        } else {
            let mut prod = [1.0f64, 1.0];
            for &oe in self.graph.out_edges(edge.from) {
                if self.graph.edge(oe).to == edge.to {
                    continue;
                }
                let m = self.messages[self.graph.reverse(oe)];
                prod[0] *= m[0];
                prod[1] *= m[1];
            }
            prod
        };
        normalized(raw)
    }

    /// Store `candidate` on the edge, damped against the previous message:
    /// sent = (1 - lambda) * candidate + lambda * old. Returns the L-inf
    /// change of the sent message.
    pub fn send(&mut self, e: usize, candidate: [f64; 2], lambda: f64) -> f64 {
        let old = self.messages[e];
        let mut sent = [
            (1.0 - lambda) * candidate[0] + lambda * old[0],
            (1.0 - lambda) * candidate[1] + lambda * old[1],
        ];
        let norm = (sent[0] + sent[1]).max(f64::MIN_POSITIVE);
        sent[0] /= norm;
        sent[1] /= norm;
        self.messages[e] = sent;
        linf(sent, old)
    }

    /// Product of the incoming factor messages at the variable's node,
    /// before normalization.
    pub fn belief_product(&self, var_node: usize) -> [f64; 2] {
        let mut prod = [1.0f64, 1.0];
        for &oe in self.graph.out_edges(var_node) {
            let m = self.messages[self.graph.reverse(oe)];
            prod[0] *= m[0];
            prod[1] *= m[1];
        }
        prod
    }
}

fn normalized(m: [f64; 2]) -> Result<[f64; 2], InferenceError> {
    let sum = m[0] + m[1];
    if !sum.is_finite() || sum <= 0.0 {
        return Err(InferenceError::Numeric(format!(
            "message underflowed to ({}, {})",
            m[0], m[1]
        )));
    }
    Ok([m[0] / sum, m[1] / sum])
}

fn linf(a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - b[0]).abs().max((a[1] - b[1]).abs())
}

/// Outcome of a scheduling run. Hitting the iteration cap is reported, not
/// raised: posteriors from the last iteration remain usable.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleStats {
    pub iterations: u64,
    pub converged: bool,
    pub final_max_delta: f64,
}

/// Picks the order in which messages are relaxed. One update counts as one
/// iteration for `priority` and `fifo`; one full tree sweep counts as one
/// iteration for `random_spanning_tree`.
pub struct Scheduler {
    pub scheduling_type: SchedulingType,
    pub lambda: f64,
    pub convergence_threshold: f64,
    pub max_iterations: u64,
    /// Seed for the random-spanning-tree strategy. Fixed per connected
    /// component so repeated runs are reproducible.
    pub seed: u64,
}

impl Scheduler {
    /// Seed every directed edge with a uniform message.
    pub fn add_ab_initio_edges(&self, state: &mut PropagationState) {
        for m in &mut state.messages {
            *m = [0.5, 0.5];
        }
    }

    pub fn run(&self, state: &mut PropagationState) -> Result<ScheduleStats, InferenceError> {
        match self.scheduling_type {
            SchedulingType::Priority => self.run_priority(state),
            SchedulingType::Fifo => self.run_fifo(state),
            SchedulingType::RandomSpanningTree => self.run_spanning_tree(state),
        }
    }

    fn run_priority(&self, state: &mut PropagationState) -> Result<ScheduleStats, InferenceError> {
        let ne = state.graph.num_edges();
        let mut candidates = Vec::with_capacity(ne);
        let mut priorities = Vec::with_capacity(ne);
        let mut heap = BinaryHeap::with_capacity(ne);
        for e in 0..ne {
            let cand = state.compute(e)?;
            let pri = linf(cand, state.message(e));
            candidates.push(cand);
            priorities.push(pri);
            heap.push(HeapEntry { priority: pri, edge: e });
        }

        let mut iterations = 0u64;
        let mut last_priority = 0.0;
        let converged = loop {
            let entry = match heap.pop() {
                Some(entry) => entry,
                None => break true,
            };
            // stale entries are skipped; the live priority was re-pushed
            if entry.priority != priorities[entry.edge] {
                continue;
            }
            last_priority = entry.priority;
            if entry.priority < self.convergence_threshold {
                break true;
            }
            if iterations >= self.max_iterations {
                break false;
            }
            iterations += 1;

            let e = entry.edge;
            state.send(e, candidates[e], self.lambda);
            priorities[e] = linf(candidates[e], state.message(e));
            heap.push(HeapEntry { priority: priorities[e], edge: e });

            // the recipient's outgoing candidates all depend on the new message
            let recipient = state.graph.edge(e).to;
            for &oe in state.graph.out_edges(recipient) {
                candidates[oe] = state.compute(oe)?;
                priorities[oe] = linf(candidates[oe], state.message(oe));
                heap.push(HeapEntry { priority: priorities[oe], edge: oe });
            }
        };

        Ok(ScheduleStats {
            iterations,
            converged,
            final_max_delta: last_priority,
        })
    }

    fn run_fifo(&self, state: &mut PropagationState) -> Result<ScheduleStats, InferenceError> {
        let ne = state.graph.num_edges();
        let mut queue: VecDeque<usize> = (0..ne).collect();
        let mut in_queue = vec![true; ne];
        let mut iterations = 0u64;
        let mut last_delta = 0.0;

        while let Some(e) = queue.pop_front() {
            in_queue[e] = false;
            if iterations >= self.max_iterations {
                return Ok(ScheduleStats {
                    iterations,
                    converged: false,
                    final_max_delta: last_delta,
                });
            }
            iterations += 1;

            let cand = state.compute(e)?;
            last_delta = state.send(e, cand, self.lambda);
            if last_delta > self.convergence_threshold {
                let recipient = state.graph.edge(e).to;
                for &oe in state.graph.out_edges(recipient) {
                    if !in_queue[oe] {
                        in_queue[oe] = true;
                        queue.push_back(oe);
                    }
                }
            }
        }

        Ok(ScheduleStats {
            iterations,
            converged: true,
            final_max_delta: last_delta,
        })
    }

    fn run_spanning_tree(
        &self,
        state: &mut PropagationState,
    ) -> Result<ScheduleStats, InferenceError> {
        let graph = state.graph;
        if graph.num_nodes() == 0 {
            return Ok(ScheduleStats {
                iterations: 0,
                converged: true,
                final_max_delta: 0.0,
            });
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let edge_of: FnvHashMap<(usize, usize), usize> = (0..graph.num_edges())
            .map(|e| {
                let edge = graph.edge(e);
                ((edge.from, edge.to), e)
            })
            .collect();

        let mut iterations = 0u64;
        let mut max_delta = f64::INFINITY;
        while iterations < self.max_iterations {
            iterations += 1;
            let parent = sample_spanning_tree(graph, &mut rng);
            let order = bfs_order(&parent, graph.num_nodes());

            max_delta = 0.0f64;
            // convergecast: children before parents
            for &node in order.iter().rev() {
                if let Some(p) = parent[node] {
                    let e = edge_of[&(node, p)];
                    let cand = state.compute(e)?;
                    max_delta = max_delta.max(state.send(e, cand, self.lambda));
                }
            }
            // distribute: parents before children
            for &node in &order {
                if let Some(p) = parent[node] {
                    let e = edge_of[&(p, node)];
                    let cand = state.compute(e)?;
                    max_delta = max_delta.max(state.send(e, cand, self.lambda));
                }
            }
            if max_delta < self.convergence_threshold {
                return Ok(ScheduleStats {
                    iterations,
                    converged: true,
                    final_max_delta: max_delta,
                });
            }
        }

        Ok(ScheduleStats {
            iterations,
            converged: false,
            final_max_delta: max_delta,
        })
    }
}

/// Wilson's algorithm: a uniformly random spanning tree via loop-erased
/// random walks. The graph is connected (one inference graph per connected
/// component).
fn sample_spanning_tree(graph: &InferenceGraph, rng: &mut StdRng) -> Vec<Option<usize>> {
    let n = graph.num_nodes();
    let neighbors: Vec<Vec<usize>> = (0..n)
        .map(|node| {
            graph
                .out_edges(node)
                .iter()
                .map(|&e| graph.edge(e).to)
                .collect()
        })
        .collect();

    let mut in_tree = vec![false; n];
    let mut next = vec![usize::MAX; n];
    in_tree[0] = true;

    for start in 1..n {
        if in_tree[start] {
            continue;
        }
        let mut u = start;
        while !in_tree[u] {
            next[u] = neighbors[u][rng.gen_range(0..neighbors[u].len())];
            u = next[u];
        }
        let mut u = start;
        while !in_tree[u] {
            in_tree[u] = true;
            u = next[u];
        }
    }

    (0..n)
        .map(|node| if node == 0 { None } else { Some(next[node]) })
        .collect()
}

fn bfs_order(parent: &[Option<usize>], n: usize) -> Vec<usize> {
    let mut children = vec![Vec::new(); n];
    for (node, p) in parent.iter().enumerate() {
        if let Some(p) = p {
            children[*p].push(node);
        }
    }
    let mut order = Vec::with_capacity(n);
    let mut queue = VecDeque::from([0usize]);
    while let Some(node) = queue.pop_front() {
        order.push(node);
        queue.extend(&children[node]);
    }
    order
}

/// Max-heap entry: higher priority first, lower edge id on ties so runs are
/// deterministic.
struct HeapEntry {
    priority: f64,
    edge: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.edge.cmp(&self.edge))
    }
}
