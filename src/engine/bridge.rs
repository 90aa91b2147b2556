//! Cross-engine delegation.
//!
//! A delegating run never calls into another engine. It asks the scheduler to
//! start the target like any other macro, using the id the scheduler hands
//! back, and waits on the event stream for that id to finish. The delegated
//! run is therefore paused, stopped and serialized exactly like a user-started
//! one.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::commands::MacroContext;
use crate::engine::{MacroInstance, RunOptions};
use crate::error::{MacroError, Result};
use crate::macros::{MacroId, MacroState};
use crate::scheduler::{MacroEvent, Scheduler};

/// How a delegated run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(String),
    /// Stopped before reaching a terminal state.
    Stopped,
}

/// Run one yielded instruction as a transient DSL macro.
pub async fn delegate(ctx: &MacroContext, instruction: &str) -> Result<()> {
    let scheduler = ctx.scheduler();
    let parent = ctx.instance();
    await_delegated(scheduler, parent, instruction, || {
        scheduler.start_transient(parent.id(), instruction)
    })
    .await
}

/// Run a registered macro (`/run name`) to completion.
pub async fn run_named(
    scheduler: &Scheduler,
    parent: &Arc<MacroInstance>,
    name: &str,
) -> Result<()> {
    let target = scheduler
        .resolve(name)
        .map_err(|e| failure(name, e.to_string()))?;
    await_delegated(scheduler, parent, name, || {
        scheduler.start_macro(target, RunOptions::default())
    })
    .await
}

async fn await_delegated(
    scheduler: &Scheduler,
    parent: &Arc<MacroInstance>,
    label: &str,
    start: impl FnOnce() -> Result<MacroId>,
) -> Result<()> {
    // Subscribe first so the delegated run's events can not be missed.
    let mut events = scheduler.subscribe();
    let id = start().map_err(|e| failure(label, e.to_string()))?;
    let guard = RunGuard {
        scheduler: scheduler.clone(),
        id,
    };
    debug!(target: "macrobot::engine", parent = %parent.id(), delegated = %id, instruction = %label, "Delegated");

    let outcome = tokio::select! {
        _ = parent.cancel_token().cancelled() => return Err(MacroError::Cancelled),
        outcome = await_run(scheduler, &mut events, id) => outcome,
    };
    drop(guard);

    match outcome {
        Outcome::Completed => Ok(()),
        Outcome::Failed(message) => Err(failure(label, message)),
        Outcome::Stopped if parent.is_cancelled() => Err(MacroError::Cancelled),
        Outcome::Stopped => Err(failure(label, "stopped before completing")),
    }
}

/// Wait for `id` to leave the active states.
pub async fn await_run(
    scheduler: &Scheduler,
    events: &mut broadcast::Receiver<MacroEvent>,
    id: MacroId,
) -> Outcome {
    let mut last_error = None;
    loop {
        match events.recv().await {
            Ok(MacroEvent::Error { id: from, message }) if from == id => {
                last_error = Some(message);
            }
            Ok(MacroEvent::StateChanged { id: from, new, .. }) if from == id => match new {
                MacroState::Completed => return Outcome::Completed,
                MacroState::Error => {
                    return Outcome::Failed(last_error.unwrap_or_else(|| "macro failed".into()));
                }
                MacroState::Ready => return Outcome::Stopped,
                MacroState::Running | MacroState::Paused => {}
            },
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(target: "macrobot::engine", delegated = %id, skipped, "Event stream lagged while awaiting delegated run");
                // Transient entries vanish once finished; persistent ones keep their state.
                match scheduler.state(id) {
                    Some(MacroState::Completed) => return Outcome::Completed,
                    Some(MacroState::Error) => {
                        return Outcome::Failed(last_error.unwrap_or_else(|| "macro failed".into()));
                    }
                    Some(MacroState::Running | MacroState::Paused) => {}
                    Some(MacroState::Ready) | None => {
                        return Outcome::Failed("lost track of the delegated run".into());
                    }
                }
            }
            Err(RecvError::Closed) => return Outcome::Failed("event stream closed".into()),
        }
    }
}

fn failure(instruction: &str, message: impl Into<String>) -> MacroError {
    MacroError::DelegationFailure {
        instruction: instruction.to_string(),
        message: message.into(),
    }
}

/// Stops the delegated run if the delegating side goes away first.
struct RunGuard {
    scheduler: Scheduler,
    id: MacroId,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.scheduler.state(self.id).is_some_and(MacroState::is_active) {
            debug!(target: "macrobot::engine", delegated = %self.id, "Stopping orphaned delegated run");
            let _ = self.scheduler.stop_macro(self.id);
        }
    }
}
