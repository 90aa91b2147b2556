//! Error taxonomy for macro loading, execution and control.
//!
//! Every failure the engine can produce is one `MacroError` variant. Two of them
//! are control-flow signals rather than failures: `Cancelled` (a stop request
//! reached a suspension point) and `GateComplete` (a gate ran out of passes).
//! Use [`MacroError::is_cancellation`] and [`MacroError::is_clean_exit`] to tell
//! them apart from real errors.

use std::time::Duration;

use crate::executor::EnvironmentError;
use crate::macros::{MacroId, MacroState};

/// Result alias used throughout the engine.
pub type Result<T, E = MacroError> = std::result::Result<T, E>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum MacroError {
    /// Parse-time failure; a macro with a syntax error never starts.
    #[error("syntax error in `{text}`{}", guidance_suffix(.guidance))]
    Syntax {
        text: String,
        guidance: Option<String>,
    },

    /// A bounded wait exceeded its deadline.
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    /// A gate exhausted its passes; unwinds the run as completed.
    #[error("gate complete")]
    GateComplete,

    /// A delegated instruction (script step or `/run` target) ended in error.
    #[error("delegated instruction `{instruction}` failed: {message}")]
    DelegationFailure {
        instruction: String,
        message: String,
    },

    /// The external environment rejected a command.
    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    /// The run was stopped. Not an application error.
    #[error("macro run cancelled")]
    Cancelled,

    #[error("cannot {action} macro {id} while it is {from}")]
    InvalidTransition {
        id: MacroId,
        from: MacroState,
        action: &'static str,
    },

    #[error("unknown macro `{0}`")]
    UnknownMacro(String),

    #[error("a macro named `{0}` is already registered")]
    DuplicateMacro(String),

    #[error("macro {0} has no active run")]
    NotRunning(MacroId),

    /// Lua interpreter failure (compile error, runtime error, bad yield).
    #[error("script error: {0}")]
    Script(String),

    #[error("privileged executor is unavailable")]
    ExecutorUnavailable,
}

impl MacroError {
    pub fn syntax(text: impl Into<String>, guidance: impl Into<String>) -> Self {
        Self::Syntax {
            text: text.into(),
            guidance: Some(guidance.into()),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Signals that end a run without marking it as failed.
    pub fn is_clean_exit(&self) -> bool {
        matches!(self, Self::GateComplete)
    }
}

impl From<mlua::Error> for MacroError {
    fn from(err: mlua::Error) -> Self {
        Self::Script(err.to_string())
    }
}

fn guidance_suffix(guidance: &Option<String>) -> String {
    guidance
        .as_deref()
        .map(|g| format!(": {g}"))
        .unwrap_or_default()
}
