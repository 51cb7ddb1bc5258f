//! Passive conductor ("dust") networks.
//!
//! [`csr::DustCsrBuilder`] compresses raw conductor positions into a
//! [`csr::DustCsrGraph`] whose nodes are junctions, corners, dead ends and
//! port attachments, and whose edges carry the length of the collapsed run.
//! [`propagator::CpuDustPropagator`] settles power levels over that graph.

pub mod csr;
pub mod propagator;

use crate::id::NodeId;
use crate::pos::Position;
use crate::power::PowerOutOfRange;

use csr::DustPort;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DustError {
    #[error("port {port:?} attached to non-conductor position {pos}")]
    PortOnNonConductor { port: DustPort, pos: Position },
    #[error("port {port:?} already attached at {existing}, cannot attach at {requested}")]
    PortAlreadyAttached {
        port: DustPort,
        existing: Position,
        requested: Position,
    },
    #[error("walk from {start} exceeded {bound} steps")]
    TraversalExceeded { start: Position, bound: usize },
    #[error("node {node:?} out of bounds (node count {node_count})")]
    UnknownNode { node: NodeId, node_count: usize },
    #[error(transparent)]
    Power(#[from] PowerOutOfRange),
}
