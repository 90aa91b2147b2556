//! Capability interface to the live client a macro drives.
//!
//! Commands never touch the client directly. They describe what they want as an
//! [`EnvCall`] or a [`Condition`] and the engine hands it to the single
//! [`Environment`] instance living on the privileged thread.

use std::fmt;

use crate::parser::{ErrorCondition, KeyCombo, Quality};

/// One request against the environment.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvCall {
    Action {
        name: String,
    },
    Item {
        name: String,
        quality: Option<Quality>,
    },
    Target {
        name: String,
        selector: TargetSelector,
    },
    Callback {
        addon: String,
        update: bool,
        values: Vec<CallbackValue>,
    },
    Click {
        target: String,
    },
    Key {
        keys: KeyCombo,
        mode: KeyMode,
    },
    /// A line the engine does not understand, forwarded verbatim.
    Native {
        text: String,
    },
}

/// Disambiguation for `/target`, taken from modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TargetSelector {
    pub index: Option<u32>,
    pub list_index: Option<u32>,
    pub party_index: Option<u8>,
    pub max_distance: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    Press,
    Hold,
    Release,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackValue {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl fmt::Display for CallbackValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

/// A predicate the environment can evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Condition {
    /// Free-form named condition (`<condition.name>`, `/require name`).
    Named(String),
    /// The named addon window is open and interactive.
    AddonReady(String),
    /// The last action has resolved and the client accepts the next one.
    ActionSettled,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(n) => write!(f, "condition `{n}`"),
            Self::AddonReady(a) => write!(f, "addon `{a}`"),
            Self::ActionSettled => f.write_str("action to settle"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvironmentError {
    #[error("target `{0}` not found")]
    TargetNotFound(String),
    #[error("item `{0}` not found")]
    ItemNotFound(String),
    #[error("cannot use item `{0}`")]
    CantUseItem(String),
    #[error("addon `{0}` not found")]
    AddonNotFound(String),
    #[error("{0}")]
    Failed(String),
}

impl EnvironmentError {
    /// The `<errorif.…>` class this failure belongs to, if any.
    pub fn error_condition(&self) -> Option<ErrorCondition> {
        match self {
            Self::TargetNotFound(_) => Some(ErrorCondition::TargetNotFound),
            Self::ItemNotFound(_) => Some(ErrorCondition::ItemNotFound),
            Self::CantUseItem(_) => Some(ErrorCondition::CantUse),
            Self::AddonNotFound(_) => Some(ErrorCondition::AddonNotFound),
            Self::Failed(_) => None,
        }
    }
}

/// The external client, as seen from the privileged thread.
///
/// Implementations are created on, and only ever called from, that thread, so
/// they need not be `Send` or `Sync`.
pub trait Environment {
    fn perform(&mut self, call: &EnvCall) -> Result<(), EnvironmentError>;

    fn check(&mut self, condition: &Condition) -> bool;

    /// Print a message to the user (chat log or equivalent).
    fn echo(&mut self, message: &str);
}
