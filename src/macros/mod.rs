//! Macro data model: identity, language, run state, triggers and metadata.

pub mod metadata;
pub mod model;
pub mod trigger;

pub use metadata::{ConfigField, Dependency, MacroMetadata};
pub use model::{Lifecycle, Macro, MacroId, MacroLanguage, MacroState};
pub use trigger::{TriggerEvent, TriggerKind, UnknownTrigger};
