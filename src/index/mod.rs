//! Hierarchical k-medoid index over binary descriptors.
//!
//! Built once per keyframe polarity at compile time and read-only afterwards.
//! Nodes live in an arena addressed by [`NodeId`]; the root is node 0. Each
//! child of an internal node records the medoid point that represents it.
//!
//! Lookup is a best-first descent: at every internal node the children whose
//! medoid is closest to the query are expanded immediately and the rest are
//! queued by distance; up to `max_pops` queued branches are expanded after the
//! initial descent.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::detector::Descriptor;

/// Clustering parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    /// Nodes with at most this many points (or at most `num_centers`) become leaves.
    pub min_points_per_node: usize,
    pub num_centers: usize,
    pub num_hypotheses: usize,
    pub seed: u64,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            min_points_per_node: 16,
            num_centers: 8,
            num_hypotheses: 64,
            seed: 0x6d65_646f_6964,
        }
    }
}

/// Index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Leaf { points: Vec<u32> },
    Internal { children: Vec<NodeId> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Medoid representing this node in its parent. `None` for the root.
    pub center: Option<u32>,
    pub kind: NodeKind,
}

/// Read-only clustering tree over one descriptor set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchicalIndex {
    pub nodes: Vec<Node>,
}

impl HierarchicalIndex {
    pub const ROOT: NodeId = NodeId(0);

    /// Build the tree over `descriptors`. Point indices refer to positions in that slice.
    pub fn build<D: AsRef<Descriptor>>(descriptors: &[D], params: &IndexParams) -> Self {
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut nodes = vec![Node {
            center: None,
            kind: NodeKind::Leaf { points: Vec::new() },
        }];
        let all: Vec<u32> = (0..descriptors.len() as u32).collect();
        build_node(&mut nodes, 0, all, descriptors, params, &mut rng);
        Self { nodes }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every leaf's point list, in arena order.
    pub fn leaves(&self) -> impl Iterator<Item = &[u32]> {
        self.nodes.iter().filter_map(|n| match &n.kind {
            NodeKind::Leaf { points } => Some(points.as_slice()),
            NodeKind::Internal { .. } => None,
        })
    }

    /// Check the arena against `num_points` descriptors: every node is
    /// reached from the root exactly once, every child carries a medoid and
    /// every point index is in range.
    pub fn validate(&self, num_points: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("empty index".into());
        }
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![Self::ROOT];
        visited[0] = true;
        while let Some(id) = stack.pop() {
            match &self.node(id).kind {
                NodeKind::Leaf { points } => {
                    if let Some(p) = points.iter().find(|&&p| p as usize >= num_points) {
                        return Err(format!("{id} holds point {p} of {num_points}"));
                    }
                }
                NodeKind::Internal { children } => {
                    if children.is_empty() {
                        return Err(format!("{id} has no children"));
                    }
                    for &child in children {
                        let Some(seen) = visited.get_mut(child.0 as usize) else {
                            return Err(format!("{id} refers to missing {child}"));
                        };
                        if *seen {
                            return Err(format!("{child} is reached twice"));
                        }
                        *seen = true;
                        match self.node(child).center {
                            Some(c) if (c as usize) < num_points => {}
                            Some(c) => return Err(format!("{child} has medoid {c} of {num_points}")),
                            None => return Err(format!("{child} has no medoid")),
                        }
                        stack.push(child);
                    }
                }
            }
        }
        match visited.iter().position(|&v| !v) {
            Some(i) => Err(format!("{} is unreachable", NodeId(i as u32))),
            None => Ok(()),
        }
    }

    /// Candidate point indices for `query`.
    pub fn query<D: AsRef<Descriptor>>(&self, descriptors: &[D], query: &Descriptor, max_pops: usize) -> Vec<u32> {
        let mut candidates = Vec::new();
        if self.nodes.is_empty() {
            return candidates;
        }
        let mut queue: BinaryHeap<Reverse<(u32, u32)>> = BinaryHeap::new();

        self.descend(Self::ROOT, descriptors, query, &mut queue, &mut candidates);
        let mut pops = 0;
        while pops < max_pops {
            let Some(Reverse((_, id))) = queue.pop() else {
                break;
            };
            pops += 1;
            self.descend(NodeId(id), descriptors, query, &mut queue, &mut candidates);
        }
        candidates
    }

    fn descend<D: AsRef<Descriptor>>(
        &self,
        id: NodeId,
        descriptors: &[D],
        query: &Descriptor,
        queue: &mut BinaryHeap<Reverse<(u32, u32)>>,
        candidates: &mut Vec<u32>,
    ) {
        match &self.node(id).kind {
            NodeKind::Leaf { points } => candidates.extend_from_slice(points),
            NodeKind::Internal { children } => {
                let distances: Vec<u32> = children
                    .iter()
                    .map(|c| {
                        let center = self.node(*c).center.unwrap_or(0) as usize;
                        descriptors[center].as_ref().distance(query)
                    })
                    .collect();
                let min = distances.iter().copied().min().unwrap_or(u32::MAX);
                for (child, &d) in children.iter().zip(&distances) {
                    if d != min {
                        queue.push(Reverse((d, child.0)));
                    }
                }
                for (child, &d) in children.iter().zip(&distances) {
                    if d == min {
                        self.descend(*child, descriptors, query, queue, candidates);
                    }
                }
            }
        }
    }
}

fn build_node<D: AsRef<Descriptor>>(
    nodes: &mut Vec<Node>,
    slot: usize,
    points: Vec<u32>,
    descriptors: &[D],
    params: &IndexParams,
    rng: &mut StdRng,
) {
    if points.len() <= params.num_centers || points.len() <= params.min_points_per_node {
        nodes[slot].kind = NodeKind::Leaf { points };
        return;
    }

    let (centers, assignment) = cluster(&points, descriptors, params, rng);

    // Group members by assigned medoid, keeping medoid order.
    let mut clusters: Vec<(u32, Vec<u32>)> = centers.iter().map(|&c| (c, Vec::new())).collect();
    for (&p, &a) in points.iter().zip(&assignment) {
        clusters[a].1.push(p);
    }
    clusters.retain(|(_, members)| !members.is_empty());

    if clusters.len() <= 1 {
        nodes[slot].kind = NodeKind::Leaf { points };
        return;
    }

    let mut children = Vec::with_capacity(clusters.len());
    for (center, members) in clusters {
        let id = nodes.len();
        nodes.push(Node {
            center: Some(center),
            kind: NodeKind::Leaf { points: Vec::new() },
        });
        children.push(NodeId(id as u32));
        build_node(nodes, id, members, descriptors, params, rng);
    }
    nodes[slot].kind = NodeKind::Internal { children };
}

/// Pick the best of `num_hypotheses` random medoid sets. Returns the medoids
/// and, for every point, the index of its medoid.
fn cluster<D: AsRef<Descriptor>>(
    points: &[u32],
    descriptors: &[D],
    params: &IndexParams,
    rng: &mut StdRng,
) -> (Vec<u32>, Vec<usize>) {
    let k = params.num_centers.min(points.len());
    let mut best_cost = u64::MAX;
    let mut best_centers = Vec::new();
    let mut best_assignment = Vec::new();

    for _ in 0..params.num_hypotheses {
        let centers: Vec<u32> = sample(rng, points.len(), k).into_iter().map(|i| points[i]).collect();

        let mut cost = 0u64;
        let mut assignment = Vec::with_capacity(points.len());
        for &p in points {
            let (best, d) = centers
                .iter()
                .enumerate()
                .map(|(ci, &c)| (ci, descriptors[p as usize].as_ref().distance(descriptors[c as usize].as_ref())))
                .min_by_key(|&(ci, d)| (d, ci))
                .unwrap_or((0, 0));
            cost += d as u64;
            assignment.push(best);
        }

        if cost < best_cost {
            best_cost = cost;
            best_centers = centers;
            best_assignment = assignment;
        }
    }

    (best_centers, best_assignment)
}
