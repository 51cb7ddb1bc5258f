//! Bucketed fixed-point power settle over a [`DustCsrGraph`].
//!
//! Only islands whose injected source level actually changed are
//! recomputed. Within an island, one FIFO bucket per power level is
//! processed from 15 down to 0; a node settles at the first (highest) level
//! that reaches it and pushes `level - weight` to its same-island
//! neighbours when that beats what they already hold.

use std::collections::VecDeque;

use tracing::debug;

use super::DustError;
use super::csr::DustCsrGraph;
use crate::id::{IslandId, NodeId};
use crate::power::{MAX_POWER, PowerLevel, require_power};

/// A change of injected power at one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Source {
    pub node: NodeId,
    pub level: PowerLevel,
}

impl Source {
    pub fn new(node: NodeId, level: PowerLevel) -> Self {
        Self { node, level }
    }
}

#[derive(Debug, Clone)]
pub struct CpuDustPropagator {
    graph: DustCsrGraph,
    nodes_by_island: Vec<Vec<NodeId>>,
    source_levels: Vec<PowerLevel>,
    settled: Vec<PowerLevel>,
    island_dirty: Vec<bool>,
    dirty_islands: Vec<IslandId>,
    buckets: Vec<VecDeque<NodeId>>,
}

impl CpuDustPropagator {
    pub fn new(graph: &DustCsrGraph) -> Self {
        let mut propagator = Self {
            graph: DustCsrGraph::empty(),
            nodes_by_island: Vec::new(),
            source_levels: Vec::new(),
            settled: Vec::new(),
            island_dirty: Vec::new(),
            dirty_islands: Vec::new(),
            buckets: (0..=MAX_POWER).map(|_| VecDeque::new()).collect(),
        };
        propagator.reset(graph);
        propagator
    }

    /// Bind to `graph` and zero all power state.
    pub fn reset(&mut self, graph: &DustCsrGraph) {
        let count = graph.node_count();
        let mut nodes_by_island = vec![Vec::new(); graph.island_count()];
        for (i, island) in graph.island_ids().iter().enumerate() {
            nodes_by_island[island.index()].push(NodeId(i as u32));
        }

        self.graph = graph.clone();
        self.island_dirty = vec![false; nodes_by_island.len()];
        self.nodes_by_island = nodes_by_island;
        self.source_levels = vec![0; count];
        self.settled = vec![0; count];
        self.dirty_islands.clear();
    }

    pub fn graph(&self) -> &DustCsrGraph {
        &self.graph
    }

    /// Apply a batch of source changes and settle the affected islands.
    ///
    /// The whole batch is validated before anything changes. A node listed
    /// twice keeps its last level. Returns the ids whose settled level
    /// changed, ascending.
    pub fn propagate(&mut self, sources: &[Source]) -> Result<Vec<NodeId>, DustError> {
        for source in sources {
            self.check_node(source.node)?;
            require_power(source.level as i64)?;
        }

        for source in sources {
            let i = source.node.index();
            if self.source_levels[i] == source.level {
                continue;
            }
            self.source_levels[i] = source.level;
            let island = self.graph.island_ids()[i];
            if !self.island_dirty[island.index()] {
                self.island_dirty[island.index()] = true;
                self.dirty_islands.push(island);
            }
        }

        // A later entry may restore an earlier one; settling is still exact.
        let mut changed = Vec::new();
        let dirty = std::mem::take(&mut self.dirty_islands);
        for &island in &dirty {
            self.settle(island, &mut changed);
            self.island_dirty[island.index()] = false;
        }
        changed.sort();

        if !dirty.is_empty() {
            debug!(islands = dirty.len(), changed = changed.len(), "dust settle");
        }
        Ok(changed)
    }

    /// Settled level of `node` after the last propagate.
    pub fn power_level(&self, node: NodeId) -> Result<PowerLevel, DustError> {
        self.check_node(node)?;
        Ok(self.settled[node.index()])
    }

    /// Injected source level of `node`.
    pub fn source_level(&self, node: NodeId) -> Result<PowerLevel, DustError> {
        self.check_node(node)?;
        Ok(self.source_levels[node.index()])
    }

    pub fn settled_levels(&self) -> &[PowerLevel] {
        &self.settled
    }

    fn check_node(&self, node: NodeId) -> Result<(), DustError> {
        let node_count = self.graph.node_count();
        if node.index() >= node_count {
            return Err(DustError::UnknownNode { node, node_count });
        }
        Ok(())
    }

    fn settle(&mut self, island: IslandId, changed: &mut Vec<NodeId>) {
        let nodes = &self.nodes_by_island[island.index()];
        for bucket in &mut self.buckets {
            bucket.clear();
        }

        let previous: Vec<PowerLevel> = nodes.iter().map(|n| self.settled[n.index()]).collect();
        for node in nodes {
            self.settled[node.index()] = 0;
            let level = self.source_levels[node.index()];
            if level > 0 {
                self.buckets[level as usize].push_back(*node);
            }
        }

        for level in (0..=MAX_POWER).rev() {
            while let Some(node) = self.buckets[level as usize].pop_front() {
                if level <= self.settled[node.index()] {
                    continue;
                }
                self.settled[node.index()] = level;
                let Some(edges) = self.graph.edge_range(node) else {
                    continue;
                };
                for edge in edges {
                    let target = self.graph.edge_target(edge);
                    if self.graph.island_ids()[target.index()] != island {
                        continue;
                    }
                    let weight = self.graph.edge_weight(edge);
                    if weight >= level as u32 {
                        continue;
                    }
                    let candidate = level - weight as PowerLevel;
                    if candidate > self.settled[target.index()] {
                        self.buckets[candidate as usize].push_back(target);
                    }
                }
            }
        }

        for (node, before) in nodes.iter().zip(previous) {
            if self.settled[node.index()] != before {
                changed.push(*node);
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
