//! On-disk format for coarse redstone networks.
//!
//! A network file lists components by position and the directed wires
//! between them. It is deserialized from RON, JSON or TOML and then built
//! into a [`RedstoneNetwork`].

use serde::{Deserialize, Serialize};

use quartz_core::component::Component;
use quartz_core::network::{NetworkError, RedstoneNetwork};
use quartz_core::pos::Position;

/// A whole network file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkData {
    #[serde(default)]
    pub components: Vec<ComponentData>,
    #[serde(default)]
    pub connections: Vec<ConnectionData>,
}

/// One component entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentData {
    pub pos: [i32; 3],
    #[serde(flatten)]
    pub kind: ComponentKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComponentKind {
    ConstantSource {
        #[serde(default)]
        output: u8,
    },
    MaxInput {
        #[serde(default)]
        delay: u64,
    },
}

/// A directed wire from `from`'s output into `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionData {
    pub from: [i32; 3],
    pub to: [i32; 3],
}

fn position([x, y, z]: [i32; 3]) -> Position {
    Position::new(x, y, z)
}

impl From<ComponentKind> for Component {
    fn from(kind: ComponentKind) -> Self {
        match kind {
            ComponentKind::ConstantSource { output } => Component::constant(output),
            ComponentKind::MaxInput { delay } => Component::max_input(delay),
        }
    }
}

impl NetworkData {
    /// Build the network. Components are added before any connection, so
    /// entry order in the file does not matter.
    pub fn build(&self) -> Result<RedstoneNetwork, NetworkError> {
        let mut network = RedstoneNetwork::new();
        for entry in &self.components {
            network.add_component(position(entry.pos), entry.kind.into())?;
        }
        for wire in &self.connections {
            network.connect(position(wire.from), position(wire.to))?;
        }
        Ok(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAMP_JSON: &str = r#"{
        "components": [
            {"pos": [0, 0, 0], "type": "constant_source", "output": 15},
            {"pos": [1, 0, 0], "type": "max_input", "delay": 2},
            {"pos": [2, 0, 0], "type": "max_input"}
        ],
        "connections": [
            {"from": [0, 0, 0], "to": [1, 0, 0]},
            {"from": [1, 0, 0], "to": [2, 0, 0]}
        ]
    }"#;

    #[test]
    fn json_network_builds() {
        let data: NetworkData = serde_json::from_str(LAMP_JSON).unwrap();
        let network = data.build().unwrap();
        assert_eq!(network.len(), 3);
        assert_eq!(
            network.component(Position::new(1, 0, 0)).unwrap(),
            &Component::max_input(2)
        );
        assert_eq!(
            network.outputs_of(Position::new(1, 0, 0)).unwrap(),
            vec![Position::new(2, 0, 0)]
        );
    }

    #[test]
    fn toml_network_builds() {
        let text = r#"
            [[components]]
            pos = [0, 0, 0]
            type = "constant_source"
            output = 7

            [[components]]
            pos = [0, 1, 0]
            type = "max_input"

            [[connections]]
            from = [0, 0, 0]
            to = [0, 1, 0]
        "#;
        let data: NetworkData = toml::from_str(text).unwrap();
        let network = data.build().unwrap();
        assert_eq!(
            network.component(Position::new(0, 0, 0)).unwrap(),
            &Component::constant(7)
        );
        assert_eq!(network.inputs_of(Position::new(0, 1, 0)).unwrap().len(), 1);
    }

    #[test]
    fn dangling_wire_is_rejected() {
        let data = NetworkData {
            components: vec![ComponentData {
                pos: [0, 0, 0],
                kind: ComponentKind::MaxInput { delay: 0 },
            }],
            connections: vec![ConnectionData {
                from: [0, 0, 0],
                to: [5, 0, 0],
            }],
        };
        assert_eq!(
            data.build().unwrap_err(),
            NetworkError::UnknownPosition(Position::new(5, 0, 0))
        );
    }

    #[test]
    fn out_of_range_source_is_rejected() {
        let data = NetworkData {
            components: vec![ComponentData {
                pos: [0, 0, 0],
                kind: ComponentKind::ConstantSource { output: 20 },
            }],
            connections: Vec::new(),
        };
        assert!(matches!(data.build(), Err(NetworkError::Power(_))));
    }
}
