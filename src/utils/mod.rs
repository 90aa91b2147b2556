//! Utilities for Macrobot.
//!
//! Submodules:
//! - `interpolation`: Templating helpers for config values like `{{var}}` and globals `{{@trigger.key}}`.

pub mod interpolation;
