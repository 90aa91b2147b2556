use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_valid::Validate;

use crate::macros::MacroLanguage;

/// Root configuration for macrobot.
///
/// This structure is intended to be deserialized from a JSON configuration file.
/// It captures all the building blocks the binary needs:
/// - engine `settings` handed to every macro run
/// - the `macros` to register at startup
/// - control/trigger feed `sources`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, Validate)]
pub struct Config {
    /// Engine behavior shared by every run.
    #[serde(default)]
    #[validate]
    pub settings: EngineSettings,

    /// Macros registered at startup.
    #[serde(default)]
    pub macros: Vec<MacroDef>,

    /// Control and trigger feeds (file, directory, tcp, stdin).
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// Engine settings passed into each run's context.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Abort a macro on any environment failure, not only those named by `<errorif>`.
    pub stop_on_error: bool,

    /// Bound for condition waits without a `<maxwait>` modifier, in milliseconds.
    #[validate(minimum = 1)]
    pub max_wait_ms: u64,

    /// Interval between condition polls, in milliseconds.
    #[validate(minimum = 10)]
    #[validate(maximum = 60_000)]
    pub poll_interval_ms: u64,

    /// Whether `/action` and `/item` wait for the client to settle unless `<unsafe>`.
    pub action_settle: bool,

    /// Capacity of the macro event broadcast buffer.
    #[validate(minimum = 16)]
    pub event_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            stop_on_error: false,
            max_wait_ms: 5_000,
            poll_interval_ms: 100,
            action_settle: true,
            event_capacity: 256,
        }
    }
}

impl EngineSettings {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// A macro to register at startup. Exactly one of `text` and `path` must be set.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MacroDef {
    /// Unique display name; control requests address macros by it.
    pub name: String,

    /// `dsl` (slash commands) or `lua`.
    #[serde(default = "default_language")]
    pub language: MacroLanguage,

    /// Inline macro text.
    #[serde(default)]
    pub text: Option<String>,

    /// Path to a file holding the macro text, relative to the working directory.
    #[serde(default)]
    pub path: Option<String>,
}

fn default_language() -> MacroLanguage {
    MacroLanguage::Dsl
}

/// Event source configuration.
/// Use `type` to select a variant:
/// - "file": poll a single file for a JSON request
/// - "directory": watch a directory for new JSON request files
/// - "tcp": listen on a TCP socket for newline-delimited JSON requests
/// - "stdin": read newline-delimited JSON from standard input
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Poll a single file for JSON requests.
    File {
        /// Absolute or relative path to the file.
        path: String,
        /// Poll interval in milliseconds (default: 100).
        #[serde(default)]
        poll_ms: Option<u64>,
        /// Delete the file after a successful read/parse (default: false).
        #[serde(default)]
        delete_on_success: Option<bool>,
    },

    /// Watch a directory for new files that contain JSON requests.
    Directory {
        /// Directory to watch.
        path: String,
        /// Optional file name pattern (e.g., "event_*" or "*.json").
        #[serde(default)]
        pattern: Option<String>,
        /// Whether to watch subdirectories (default: false).
        #[serde(default)]
        recursive: Option<bool>,
    },

    /// Listen on a TCP address (e.g., "127.0.0.1:5000") for JSON requests.
    Tcp {
        /// Bind address and port.
        bind: String,
        /// Whether to reply with "OK"/"ERROR: <reason>" after each request (default: true).
        #[serde(default)]
        ack: Option<bool>,
    },

    /// Read JSON requests from standard input (newline-delimited).
    Stdin,
}
