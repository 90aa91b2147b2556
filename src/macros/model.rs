use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MacroError, Result};
use crate::macros::metadata::{self, MacroMetadata};

/// Opaque macro identifier. Run ids are macro ids: a persistent macro has at most
/// one active run, and every transient macro gets a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MacroId(u64);

impl MacroId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MacroId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl FromStr for MacroId {
    type Err = std::num::ParseIntError;

    /// Accepts `12` or `#12`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse().map(Self)
    }
}

/// Language a macro body is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MacroLanguage {
    /// Line-oriented slash-command language.
    #[serde(alias = "native")]
    Dsl,
    /// Embedded Lua, run as a coroutine yielding DSL instructions.
    Lua,
}

/// Run state of a macro.
///
/// ```text
/// Ready -> Running <-> Paused
/// Running | Paused -> Completed | Error
/// Running | Paused -> Ready          (explicit stop)
/// Completed | Error -> Running       (restart)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroState {
    Ready,
    Running,
    Paused,
    Completed,
    Error,
}

impl MacroState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Running or paused: an instance exists and owns the macro.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    pub fn can_start(self) -> bool {
        self == Self::Ready || self.is_terminal()
    }
}

impl fmt::Display for MacroState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "in error",
        };
        f.write_str(s)
    }
}

/// Persistent macros are user-owned; transient ones wrap a single delegated
/// instruction and are discarded once that instruction finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Persistent,
    Transient { parent: MacroId },
}

/// An immutable macro definition. Mutable run state lives in the scheduler.
#[derive(Debug, Clone)]
pub struct Macro {
    id: MacroId,
    name: String,
    language: MacroLanguage,
    body: String,
    metadata: MacroMetadata,
    lifecycle: Lifecycle,
}

impl Macro {
    /// Build a persistent macro, splitting off its metadata block.
    pub fn new(
        id: MacroId,
        name: impl Into<String>,
        language: MacroLanguage,
        source: impl Into<String>,
    ) -> Result<Self> {
        let source = source.into();
        let (metadata, body) = metadata::split(&source)?;
        Ok(Self {
            id,
            name: name.into(),
            language,
            body,
            metadata,
            lifecycle: Lifecycle::Persistent,
        })
    }

    /// Wrap one instruction delegated by `parent` as a DSL macro.
    pub fn transient(id: MacroId, parent: MacroId, instruction: &str) -> Self {
        Self {
            id,
            name: format!("{parent}/{instruction}"),
            language: MacroLanguage::Dsl,
            body: instruction.to_string(),
            metadata: MacroMetadata::default(),
            lifecycle: Lifecycle::Transient { parent },
        }
    }

    pub fn id(&self) -> MacroId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn language(&self) -> MacroLanguage {
        self.language
    }

    /// Executable text with the metadata block removed.
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn metadata(&self) -> &MacroMetadata {
        &self.metadata
    }

    /// The delegating macro, for transient macros.
    pub fn parent(&self) -> Option<MacroId> {
        match self.lifecycle {
            Lifecycle::Transient { parent } => Some(parent),
            Lifecycle::Persistent => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Transient { .. })
    }
}

impl From<MacroId> for MacroError {
    fn from(id: MacroId) -> Self {
        MacroError::UnknownMacro(id.to_string())
    }
}
