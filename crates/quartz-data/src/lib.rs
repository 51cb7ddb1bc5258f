//! Loading for Quartz: kernel configuration and network description files
//! in RON, TOML or JSON.

pub mod loader;
pub mod schema;

pub use loader::{ConfigLoadError, Format, load_kernel_config, load_network, parse_kernel_config};
pub use schema::NetworkData;
