use serde::{Deserialize, Serialize};

/// Identifies a node of a compressed dust graph. Indexes the graph's
/// parallel arrays; only meaningful for the graph that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Identifies a connected component ("island") of a dust graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IslandId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl IslandId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
