//! Execution engines.
//!
//! A macro body is turned into a [`Program`] when a run is requested: DSL
//! text is parsed into commands, scripts are compiled. Either way a body that
//! does not load never reaches `Running`.
//!
//! - `dsl`: walks a command list in order, honoring pause, stop and loop jumps.
//! - `script`: resumes a Lua coroutine; every yielded string is one DSL
//!   instruction, delegated through `bridge`.
//! - `bridge`: starts a delegated run through the scheduler and awaits its
//!   terminal state.

pub mod bridge;
pub mod dsl;
pub mod instance;
pub mod script;

use tracing::{debug, error};

use crate::commands::MacroContext;
use crate::error::Result;
use crate::macros::{Macro, MacroLanguage};
use crate::scheduler::MacroEvent;

pub use dsl::DslEngine;
pub use instance::{MacroInstance, PauseGate, RunOptions};
pub use script::ScriptEngine;

/// A loaded macro body, ready to drive one run.
#[derive(Debug)]
pub enum Program {
    Dsl(DslEngine),
    Script(ScriptEngine),
}

impl Program {
    pub fn prepare(definition: &Macro, options: &RunOptions) -> Result<Self> {
        match definition.language() {
            MacroLanguage::Dsl => DslEngine::load(definition, options).map(Self::Dsl),
            MacroLanguage::Lua => ScriptEngine::load(definition, options).map(Self::Script),
        }
    }

    /// Drive the run to its end.
    ///
    /// A completed gate counts as success. Cancellation is returned as-is and
    /// never reported. Any other failure is published as
    /// [`MacroEvent::Error`] before being returned to the scheduler.
    pub async fn run(self, mut ctx: MacroContext) -> Result<()> {
        let id = ctx.macro_id();
        let result = match self {
            Self::Dsl(engine) => engine.run(&mut ctx).await,
            Self::Script(engine) => engine.run(&mut ctx).await,
        };
        match result {
            Err(err) if err.is_clean_exit() => {
                debug!(target: "macrobot::engine", macro_id = %id, "Gate complete; ending run");
                Ok(())
            }
            Err(err) if err.is_cancellation() => {
                debug!(target: "macrobot::engine", macro_id = %id, "Run cancelled");
                Err(err)
            }
            Err(err) => {
                error!(target: "macrobot::engine", macro_id = %id, error = %err, "Macro error");
                ctx.scheduler().publish(MacroEvent::Error {
                    id,
                    message: err.to_string(),
                });
                Err(err)
            }
            Ok(()) => Ok(()),
        }
    }
}
