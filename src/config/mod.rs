//! Configuration module for macrobot.
//!
//! This module wires together the data models and loading/validation helpers used
//! throughout the crate. Import from here for a convenient, stable API.
//!
//! Example:
//! use macrobot::config::{Config, load_from_path};
//!
//! let cfg = load_from_path("config/macrobot.json")?;

pub mod loader;
pub mod models;

// Re-export core data models
pub use models::{Config, EngineSettings, MacroDef, SourceConfig};

// Re-export loader utilities
pub use loader::{
    generate_schema, load_from_path, load_from_path_async, load_from_reader, load_from_str,
    validate_config, write_schema_to_writer,
};
