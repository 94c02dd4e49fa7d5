//! Configuration management
//!
//! Node settings layered from defaults, an optional TOML file and the
//! environment.

pub mod settings;

pub use settings::{Config, DEFAULT_TARGET_BITS, GLOBAL_CONFIG};
