//! # Configuration Management
//!
//! Layered settings: built-in defaults, an optional YAML/TOML file, then
//! `FLOWGATE__SECTION__KEY` environment overrides.

pub mod settings;

pub use settings::{AppConfig, ControllerConfig, ObservabilityConfig, ENV_PREFIX};
