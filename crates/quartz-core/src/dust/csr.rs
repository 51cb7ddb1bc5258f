//! Compressed sparse row graph of a dust network.
//!
//! A position survives compression as a node if it is a junction or dead
//! end (degree != 2), carries a port, or is a corner (its two neighbours are
//! not opposite each other). Straight runs between nodes collapse into one
//! directed edge per direction whose weight is the run length.
//!
//! Everything is built from sorted collections so two builds of the same
//! input produce identical node ids and edge order.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::DustError;
use crate::id::{IslandId, NodeId};
use crate::pos::Position;

/// Binding point of an external component on the wire. Ordered by
/// component, then port index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DustPort {
    pub component_id: u32,
    pub port_index: u32,
}

impl DustPort {
    pub const fn new(component_id: u32, port_index: u32) -> Self {
        Self {
            component_id,
            port_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub target: NodeId,
    pub weight: u32,
}

// ---------------------------------------------------------------------------
// DustCsrGraph
// ---------------------------------------------------------------------------

/// Immutable compressed graph. A topology change means building a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DustCsrGraph {
    node_positions: Vec<Position>,
    island_ids: Vec<IslandId>,
    island_count: usize,
    edge_index: Vec<usize>,
    edge_targets: Vec<NodeId>,
    edge_weights: Vec<u32>,
    /// `(attachment position, port, node)` sorted by position then port.
    ports: Vec<(Position, DustPort, NodeId)>,
    port_to_node: BTreeMap<DustPort, NodeId>,
    position_to_node: BTreeMap<Position, NodeId>,
}

impl DustCsrGraph {
    pub fn empty() -> Self {
        Self {
            edge_index: vec![0],
            ..Self::default()
        }
    }

    pub fn node_count(&self) -> usize {
        self.node_positions.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_targets.len()
    }

    pub fn island_count(&self) -> usize {
        self.island_count
    }

    pub fn node_position(&self, node: NodeId) -> Option<Position> {
        self.node_positions.get(node.index()).copied()
    }

    pub fn island_id(&self, node: NodeId) -> Option<IslandId> {
        self.island_ids.get(node.index()).copied()
    }

    pub fn node_for_port(&self, port: DustPort) -> Option<NodeId> {
        self.port_to_node.get(&port).copied()
    }

    pub fn node_for_position(&self, pos: Position) -> Option<NodeId> {
        self.position_to_node.get(&pos).copied()
    }

    /// Outgoing edges of `node`, sorted by `(target, weight)`. Empty for an
    /// unknown node.
    pub fn edges_from(&self, node: NodeId) -> impl Iterator<Item = Edge> + '_ {
        let range = self.edge_range(node).unwrap_or(0..0);
        self.edge_targets[range.clone()]
            .iter()
            .zip(&self.edge_weights[range])
            .map(|(&target, &weight)| Edge { target, weight })
    }

    /// Port bindings in attachment order.
    pub fn ports(&self) -> impl Iterator<Item = (DustPort, NodeId)> + '_ {
        self.ports.iter().map(|&(_, port, node)| (port, node))
    }

    pub fn node_positions(&self) -> &[Position] {
        &self.node_positions
    }

    pub(crate) fn island_ids(&self) -> &[IslandId] {
        &self.island_ids
    }

    pub(crate) fn edge_range(&self, node: NodeId) -> Option<std::ops::Range<usize>> {
        let i = node.index();
        if i >= self.node_count() {
            return None;
        }
        Some(self.edge_index[i]..self.edge_index[i + 1])
    }

    pub(crate) fn edge_target(&self, edge: usize) -> NodeId {
        self.edge_targets[edge]
    }

    pub(crate) fn edge_weight(&self, edge: usize) -> u32 {
        self.edge_weights[edge]
    }
}

// ---------------------------------------------------------------------------
// DustCsrBuilder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct DustCsrBuilder {
    conductors: BTreeSet<Position>,
    attachments: BTreeMap<Position, BTreeSet<DustPort>>,
    bindings: BTreeMap<DustPort, Position>,
}

impl DustCsrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_conductor(&mut self, pos: Position) -> &mut Self {
        self.conductors.insert(pos);
        self
    }

    pub fn add_conductors(&mut self, positions: impl IntoIterator<Item = Position>) -> &mut Self {
        self.conductors.extend(positions);
        self
    }

    /// Bind `port` to the conductor at `pos`. Re-binding a port to the same
    /// position is a no-op; binding it elsewhere is an error.
    pub fn attach_port(&mut self, port: DustPort, pos: Position) -> Result<&mut Self, DustError> {
        if let Some(&existing) = self.bindings.get(&port) {
            if existing != pos {
                return Err(DustError::PortAlreadyAttached {
                    port,
                    existing,
                    requested: pos,
                });
            }
            return Ok(self);
        }
        self.bindings.insert(port, pos);
        self.attachments.entry(pos).or_default().insert(port);
        Ok(self)
    }

    pub fn build(&self) -> Result<DustCsrGraph, DustError> {
        for (&port, &pos) in &self.bindings {
            if !self.conductors.contains(&pos) {
                return Err(DustError::PortOnNonConductor { port, pos });
            }
        }
        if self.conductors.is_empty() {
            return Ok(DustCsrGraph::empty());
        }

        let adjacency = self.adjacency();
        let islands = discover_islands(&self.conductors, &adjacency);

        let mut node_positions = Vec::new();
        let mut island_ids = Vec::new();
        let mut position_to_node = BTreeMap::new();
        for (island, positions) in islands.iter().enumerate() {
            for pos in self.classify(positions, &adjacency) {
                position_to_node.insert(pos, NodeId(node_positions.len() as u32));
                node_positions.push(pos);
                island_ids.push(IslandId(island as u32));
            }
        }

        let bound = self.conductors.len();
        let mut edge_index = Vec::with_capacity(node_positions.len() + 1);
        let mut edge_targets = Vec::new();
        let mut edge_weights = Vec::new();
        for (i, &start) in node_positions.iter().enumerate() {
            edge_index.push(edge_targets.len());
            let mut candidates = Vec::new();
            for &next in &adjacency[&start] {
                let Some((end, weight)) = walk(start, next, &adjacency, &position_to_node, bound)?
                else {
                    continue;
                };
                let target = position_to_node[&end];
                if target.index() == i {
                    continue;
                }
                candidates.push((target, weight));
            }
            candidates.sort();
            for (target, weight) in candidates {
                edge_targets.push(target);
                edge_weights.push(weight);
            }
        }
        edge_index.push(edge_targets.len());

        let mut ports = Vec::new();
        let mut port_to_node = BTreeMap::new();
        for (&pos, attached) in &self.attachments {
            let node = position_to_node[&pos];
            for &port in attached {
                ports.push((pos, port, node));
                port_to_node.insert(port, node);
            }
        }

        debug!(
            conductors = bound,
            nodes = node_positions.len(),
            edges = edge_targets.len(),
            islands = islands.len(),
            "built dust graph"
        );

        Ok(DustCsrGraph {
            node_positions,
            island_ids,
            island_count: islands.len(),
            edge_index,
            edge_targets,
            edge_weights,
            ports,
            port_to_node,
            position_to_node,
        })
    }

    /// Six-connected adjacency, neighbours in canonical order.
    fn adjacency(&self) -> BTreeMap<Position, Vec<Position>> {
        self.conductors
            .iter()
            .map(|&pos| {
                let mut neighbors: Vec<Position> = pos
                    .neighbors()
                    .filter(|n| self.conductors.contains(n))
                    .collect();
                neighbors.sort();
                (pos, neighbors)
            })
            .collect()
    }

    /// Positions of one island that survive compression, sorted.
    fn classify(
        &self,
        island: &[Position],
        adjacency: &BTreeMap<Position, Vec<Position>>,
    ) -> BTreeSet<Position> {
        let mut nodes: BTreeSet<Position> = island
            .iter()
            .copied()
            .filter(|pos| {
                let neighbors = &adjacency[pos];
                neighbors.len() != 2
                    || self.attachments.contains_key(pos)
                    || is_corner(*pos, neighbors[0], neighbors[1])
            })
            .collect();

        // An island needs at least one representative.
        if nodes.is_empty() {
            if let Some(&first) = island.first() {
                nodes.insert(first);
                if let Some(&neighbor) = adjacency[&first].first() {
                    nodes.insert(neighbor);
                }
            }
        }
        nodes
    }
}

fn is_corner(pos: Position, a: Position, b: Position) -> bool {
    let (ax, ay, az) = pos.delta_to(a);
    let (bx, by, bz) = pos.delta_to(b);
    !(ax == -bx && ay == -by && az == -bz)
}

/// BFS from each unvisited conductor in canonical order. Islands come back
/// in discovery order, each sorted.
fn discover_islands(
    conductors: &BTreeSet<Position>,
    adjacency: &BTreeMap<Position, Vec<Position>>,
) -> Vec<Vec<Position>> {
    let mut visited = BTreeSet::new();
    let mut islands = Vec::new();
    for &start in conductors {
        if !visited.insert(start) {
            continue;
        }
        let mut island = Vec::new();
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            island.push(current);
            for &neighbor in &adjacency[&current] {
                if visited.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        island.sort();
        islands.push(island);
    }
    islands
}

/// Follow the run from `start` through `next` until a node is reached.
/// Returns the node and the run length, `None` for a dead end.
fn walk(
    start: Position,
    next: Position,
    adjacency: &BTreeMap<Position, Vec<Position>>,
    nodes: &BTreeMap<Position, NodeId>,
    bound: usize,
) -> Result<Option<(Position, u32)>, DustError> {
    let mut previous = start;
    let mut current = next;
    let mut weight = 1u32;
    let mut steps = 0usize;
    while !nodes.contains_key(&current) {
        let Some(&candidate) = adjacency[&current].iter().find(|&&n| n != previous) else {
            return Ok(None);
        };
        previous = current;
        current = candidate;
        weight += 1;
        steps += 1;
        if steps > bound {
            return Err(DustError::TraversalExceeded { start, bound });
        }
    }
    Ok(Some((current, weight)))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{line_of, pos, wire_with_end_ports};

    fn edges(graph: &DustCsrGraph, node: NodeId) -> Vec<(u32, u32)> {
        graph
            .edges_from(node)
            .map(|e| (e.target.0, e.weight))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Compression
    // -----------------------------------------------------------------------

    #[test]
    fn straight_run_compresses_to_two_nodes() {
        let graph = wire_with_end_ports(64);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(edges(&graph, NodeId(0)), vec![(1, 63)]);
        assert_eq!(edges(&graph, NodeId(1)), vec![(0, 63)]);
        assert_eq!(graph.node_position(NodeId(0)), Some(pos(0, 0, 0)));
        assert_eq!(graph.node_position(NodeId(1)), Some(pos(63, 0, 0)));
    }

    #[test]
    fn interior_port_splits_the_run() {
        let mut builder = DustCsrBuilder::new();
        builder.add_conductors(line_of(10));
        builder.attach_port(DustPort::new(5, 0), pos(4, 0, 0)).unwrap();
        let graph = builder.build().unwrap();

        assert_eq!(graph.node_count(), 3);
        let middle = graph.node_for_position(pos(4, 0, 0)).unwrap();
        assert_eq!(edges(&graph, middle), vec![(0, 4), (2, 5)]);
        assert_eq!(graph.node_for_port(DustPort::new(5, 0)), Some(middle));
    }

    #[test]
    fn star_junction_keeps_every_arm() {
        let center = pos(0, 0, 0);
        let mut builder = DustCsrBuilder::new();
        builder.add_conductor(center);
        for n in [pos(1, 0, 0), pos(-1, 0, 0), pos(0, 0, 1), pos(0, 0, -1)] {
            builder.add_conductor(n);
        }
        let graph = builder.build().unwrap();

        assert_eq!(graph.node_count(), 5);
        let hub = graph.node_for_position(center).unwrap();
        let hub_edges: Vec<_> = graph.edges_from(hub).collect();
        assert_eq!(hub_edges.len(), 4);
        assert!(hub_edges.iter().all(|e| e.weight == 1));
        assert!(hub_edges.windows(2).all(|w| w[0].target < w[1].target));
    }

    #[test]
    fn corner_becomes_a_node() {
        let mut builder = DustCsrBuilder::new();
        builder.add_conductors([
            pos(0, 0, 0),
            pos(1, 0, 0),
            pos(2, 0, 0),
            pos(2, 0, 1),
            pos(2, 0, 2),
        ]);
        let graph = builder.build().unwrap();

        assert_eq!(graph.node_count(), 3);
        let corner = graph.node_for_position(pos(2, 0, 0)).unwrap();
        let ends: Vec<u32> = graph.edges_from(corner).map(|e| e.weight).collect();
        assert_eq!(ends, vec![2, 2]);
        assert_eq!(graph.node_for_position(pos(1, 0, 0)), None);
    }

    #[test]
    fn square_ring_collapses_sides() {
        let mut builder = DustCsrBuilder::new();
        for x in 0..3 {
            for z in 0..3 {
                if x == 1 && z == 1 {
                    continue;
                }
                builder.add_conductor(pos(x, 0, z));
            }
        }
        let graph = builder.build().unwrap();

        assert_eq!(graph.node_count(), 4);
        for i in 0..4 {
            let weights: Vec<u32> = graph.edges_from(NodeId(i)).map(|e| e.weight).collect();
            assert_eq!(weights, vec![2, 2]);
        }
    }

    #[test]
    fn separate_runs_get_separate_islands() {
        let mut builder = DustCsrBuilder::new();
        builder.add_conductors(line_of(3));
        builder.add_conductors([pos(0, 5, 0), pos(1, 5, 0)]);
        let graph = builder.build().unwrap();

        assert_eq!(graph.island_count(), 2);
        let low = graph.node_for_position(pos(0, 0, 0)).unwrap();
        let high = graph.node_for_position(pos(0, 5, 0)).unwrap();
        assert_eq!(graph.island_id(low), Some(IslandId(0)));
        assert_eq!(graph.island_id(high), Some(IslandId(1)));
    }

    #[test]
    fn single_conductor_is_an_isolated_node() {
        let mut builder = DustCsrBuilder::new();
        builder.add_conductor(pos(7, 7, 7));
        let graph = builder.build().unwrap();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn empty_input_gives_empty_graph() {
        let graph = DustCsrBuilder::new().build().unwrap();
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edges_from(NodeId(0)).count(), 0);
    }

    #[test]
    fn builds_are_reproducible() {
        let mut forward = DustCsrBuilder::new();
        forward.add_conductors(line_of(12));
        forward.add_conductors([pos(5, 0, 1), pos(5, 0, 2)]);
        let mut backward = DustCsrBuilder::new();
        backward.add_conductors([pos(5, 0, 2), pos(5, 0, 1)]);
        backward.add_conductors(line_of(12).into_iter().rev());
        assert_eq!(forward.build().unwrap(), backward.build().unwrap());
    }

    #[test]
    fn wire_at_the_grid_edge_builds() {
        let mut builder = DustCsrBuilder::new();
        for dx in 0..4 {
            builder.add_conductor(pos(i32::MAX - dx, i32::MIN, 0));
        }
        let graph = builder.build().unwrap();
        assert_eq!(graph.node_count(), 2);
        let end = graph.node_for_position(pos(i32::MAX, i32::MIN, 0)).unwrap();
        assert_eq!(edges(&graph, end), vec![(0, 3)]);
    }

    // -----------------------------------------------------------------------
    // Ports
    // -----------------------------------------------------------------------

    #[test]
    fn port_on_missing_conductor_is_rejected() {
        let mut builder = DustCsrBuilder::new();
        builder.add_conductors(line_of(3));
        builder.attach_port(DustPort::new(1, 0), pos(9, 9, 9)).unwrap();
        assert_eq!(
            builder.build().unwrap_err(),
            DustError::PortOnNonConductor {
                port: DustPort::new(1, 0),
                pos: pos(9, 9, 9)
            }
        );
    }

    #[test]
    fn port_cannot_move_between_positions() {
        let mut builder = DustCsrBuilder::new();
        builder.attach_port(DustPort::new(1, 0), pos(0, 0, 0)).unwrap();
        builder.attach_port(DustPort::new(1, 0), pos(0, 0, 0)).unwrap();
        let err = builder.attach_port(DustPort::new(1, 0), pos(1, 0, 0)).unwrap_err();
        assert!(matches!(err, DustError::PortAlreadyAttached { .. }));
    }

    #[test]
    fn ports_ordered_by_position_then_identity() {
        let mut builder = DustCsrBuilder::new();
        builder.add_conductors(line_of(5));
        builder.attach_port(DustPort::new(9, 1), pos(4, 0, 0)).unwrap();
        builder.attach_port(DustPort::new(3, 2), pos(0, 0, 0)).unwrap();
        builder.attach_port(DustPort::new(3, 1), pos(0, 0, 0)).unwrap();
        let graph = builder.build().unwrap();

        let ports: Vec<DustPort> = graph.ports().map(|(p, _)| p).collect();
        assert_eq!(
            ports,
            vec![DustPort::new(3, 1), DustPort::new(3, 2), DustPort::new(9, 1)]
        );
    }
}
