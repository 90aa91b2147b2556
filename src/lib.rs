#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Macrobot: a macro execution and scheduling engine.
//!
//! Macros are written either in a line-oriented slash-command language or in
//! Lua. Lua scripts run as coroutines that yield slash-command lines, which the
//! engine executes on their behalf. A scheduler owns every macro's lifecycle
//! and publishes state changes as events.
//!
//! Modules:
//! - `parser`: slash-command grammar, modifiers and the command registry.
//! - `commands`: executable commands and the per-run context they act through.
//! - `engine`: the command engine, the Lua engine and the bridge between them.
//! - `scheduler`: registration, start/pause/resume/stop, triggers and events.
//! - `executor`: the environment interface and the privileged thread serializing access to it.
//! - `macros`: macro definitions, metadata blocks and triggers.
//! - `control`: JSON control requests mapped onto scheduler operations.
//! - `config`: configuration models, loader, and schema helpers.
//! - `sources`: control feeds (file, directory, TCP, stdin).
//! - `utils`: template interpolation.
//!
//! Use `macrobot::prelude::*` to bring commonly used items into scope quickly.

pub mod commands;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod executor;
pub mod macros;
pub mod parser;
pub mod scheduler;
pub mod sources;
pub mod utils;

/// Crate-level constants for consumers that want to inspect package metadata at runtime.
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version (e.g., "0.1.0").
#[inline]
pub const fn version() -> &'static str {
    PKG_VERSION
}

/// Parse a level name (trace|debug|info|warn|error).
pub fn parse_level(raw: &str) -> Option<tracing::Level> {
    use tracing::Level;
    match raw.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize tracing (logging).
/// - An explicit `level` wins.
/// - Otherwise honors the `RUST_LOG` environment variable as a plain level.
/// - Falls back to `info`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init_tracing(level: Option<&str>) {
    let level = level
        .and_then(parse_level)
        .or_else(|| std::env::var("RUST_LOG").ok().as_deref().and_then(parse_level))
        .unwrap_or(tracing::Level::INFO);

    // Ignore the error if the global subscriber was already set.
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}

/// A convenient set of exports for most consumers.
///
/// Bring this into scope with:
/// `use macrobot::prelude::*;`
pub mod prelude {
    pub use anyhow::{Context, Result, anyhow, bail};

    pub use serde::{Deserialize, Serialize};

    pub use tracing::{debug, error, info, trace, warn};

    pub use std::time::Duration;

    pub use crate as macrobot;
    pub use crate::control::{ControlOutcome, Controller};
    pub use crate::engine::RunOptions;
    pub use crate::error::MacroError;
    pub use crate::executor::{Environment, PrivilegedExecutor};
    pub use crate::macros::{MacroId, MacroLanguage, MacroState, TriggerKind};
    pub use crate::scheduler::{MacroEvent, Scheduler};
    pub use crate::{config, sources};
}
