//! Directed component graph simulated by [`crate::engine::SimulationEngine`].

use std::collections::{BTreeMap, BTreeSet};

use crate::component::Component;
use crate::key::KeyError;
use crate::pos::Position;
use crate::power::{PowerLevel, PowerOutOfRange, require_power};
use crate::scheduler::SchedulerError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("component already registered at {0}")]
    DuplicateComponent(Position),
    #[error("no component registered at {0}")]
    UnknownPosition(Position),
    #[error("component at {0} is not a constant source")]
    NotASource(Position),
    #[error(transparent)]
    Power(#[from] PowerOutOfRange),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) component: Component,
    pub(crate) inputs: BTreeSet<Position>,
    pub(crate) outputs: BTreeSet<Position>,
    pub(crate) power: PowerLevel,
}

impl Node {
    fn new(component: Component) -> Self {
        Self {
            component,
            inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
            power: 0,
        }
    }
}

/// Components keyed by position, iterated in canonical position order.
#[derive(Debug, Clone, Default)]
pub struct RedstoneNetwork {
    nodes: BTreeMap<Position, Node>,
}

impl RedstoneNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_component(&mut self, pos: Position, component: Component) -> Result<(), NetworkError> {
        if let Component::ConstantSource { output } = component {
            require_power(output as i64)?;
        }
        if self.nodes.contains_key(&pos) {
            return Err(NetworkError::DuplicateComponent(pos));
        }
        self.nodes.insert(pos, Node::new(component));
        Ok(())
    }

    /// Wire `source`'s output into `target`. Both must already exist.
    pub fn connect(&mut self, source: Position, target: Position) -> Result<(), NetworkError> {
        self.node(target)?;
        self.node_mut(source)?.outputs.insert(target);
        self.node_mut(target)?.inputs.insert(source);
        Ok(())
    }

    pub fn power_at(&self, pos: Position) -> Result<PowerLevel, NetworkError> {
        Ok(self.node(pos)?.power)
    }

    pub fn component(&self, pos: Position) -> Result<&Component, NetworkError> {
        Ok(&self.node(pos)?.component)
    }

    /// Change what a constant source emits. The caller marks it dirty.
    pub fn set_source_output(&mut self, pos: Position, level: PowerLevel) -> Result<(), NetworkError> {
        let level = require_power(level as i64)?;
        match &mut self.node_mut(pos)?.component {
            Component::ConstantSource { output } => {
                *output = level;
                Ok(())
            }
            _ => Err(NetworkError::NotASource(pos)),
        }
    }

    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        self.nodes.keys().copied()
    }

    pub fn contains(&self, pos: Position) -> bool {
        self.nodes.contains_key(&pos)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn inputs_of(&self, pos: Position) -> Result<Vec<Position>, NetworkError> {
        Ok(self.node(pos)?.inputs.iter().copied().collect())
    }

    pub fn outputs_of(&self, pos: Position) -> Result<Vec<Position>, NetworkError> {
        Ok(self.node(pos)?.outputs.iter().copied().collect())
    }

    pub(crate) fn get(&self, pos: Position) -> Option<&Node> {
        self.nodes.get(&pos)
    }

    pub(crate) fn get_mut(&mut self, pos: Position) -> Option<&mut Node> {
        self.nodes.get_mut(&pos)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Position, &Node)> {
        self.nodes.iter()
    }

    fn node(&self, pos: Position) -> Result<&Node, NetworkError> {
        self.nodes.get(&pos).ok_or(NetworkError::UnknownPosition(pos))
    }

    fn node_mut(&mut self, pos: Position) -> Result<&mut Node, NetworkError> {
        self.nodes
            .get_mut(&pos)
            .ok_or(NetworkError::UnknownPosition(pos))
    }
}
