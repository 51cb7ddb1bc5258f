//! Components of the coarse network simulation and the read-only view they
//! evaluate against.

use serde::{Deserialize, Serialize};

use crate::pos::Position;
use crate::power::{MIN_POWER, PowerLevel, Ticks};

/// Read-only view of the network during evaluation.
pub trait EvaluationContext {
    /// Output of the component at `pos`, or 0 if nothing is there.
    fn power_at(&self, pos: Position) -> PowerLevel;

    /// Positions feeding `pos`, in canonical order. Empty if unknown.
    fn inputs_of(&self, pos: Position) -> Vec<Position>;
}

/// Behaviour of a node in a [`crate::network::RedstoneNetwork`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Component {
    /// Always emits `output`. A lever or a block of redstone.
    ConstantSource { output: PowerLevel },
    /// Mirrors its strongest input, `delay` ticks after an input changes.
    MaxInput { delay: Ticks },
}

impl Component {
    pub fn constant(output: PowerLevel) -> Self {
        Self::ConstantSource { output }
    }

    pub fn max_input(delay: Ticks) -> Self {
        Self::MaxInput { delay }
    }

    /// Raw output for `pos`. The engine clamps it into the power range.
    pub fn evaluate(&self, pos: Position, ctx: &dyn EvaluationContext) -> i32 {
        match self {
            Self::ConstantSource { output } => *output as i32,
            Self::MaxInput { .. } => ctx
                .inputs_of(pos)
                .into_iter()
                .map(|input| ctx.power_at(input))
                .max()
                .unwrap_or(MIN_POWER) as i32,
        }
    }

    /// Ticks between an input change and this component re-evaluating.
    pub fn propagation_delay(&self) -> Ticks {
        match self {
            Self::ConstantSource { .. } => 0,
            Self::MaxInput { delay } => *delay,
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self, Self::ConstantSource { .. })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    struct FixedView(BTreeMap<Position, PowerLevel>);

    impl EvaluationContext for FixedView {
        fn power_at(&self, pos: Position) -> PowerLevel {
            self.0.get(&pos).copied().unwrap_or(0)
        }

        fn inputs_of(&self, _pos: Position) -> Vec<Position> {
            self.0.keys().copied().collect()
        }
    }

    #[test]
    fn max_input_takes_strongest() {
        let view = FixedView(BTreeMap::from([
            (Position::new(1, 0, 0), 4),
            (Position::new(2, 0, 0), 11),
        ]));
        let repeater = Component::max_input(2);
        assert_eq!(repeater.evaluate(Position::ORIGIN, &view), 11);
        assert_eq!(repeater.propagation_delay(), 2);
    }

    #[test]
    fn max_input_without_inputs_is_off() {
        let view = FixedView(BTreeMap::new());
        assert_eq!(Component::max_input(0).evaluate(Position::ORIGIN, &view), 0);
    }

    #[test]
    fn constant_source_ignores_inputs() {
        let view = FixedView(BTreeMap::from([(Position::new(1, 0, 0), 15)]));
        let lever = Component::constant(7);
        assert_eq!(lever.evaluate(Position::ORIGIN, &view), 7);
        assert_eq!(lever.propagation_delay(), 0);
        assert!(lever.is_source());
    }
}
