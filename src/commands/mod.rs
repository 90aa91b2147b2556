//! Runtime command objects.
//!
//! A [`Command`] is one parsed DSL line: its original text, a [`CommandKind`]
//! carrying the typed arguments, and the [`ModifierSet`] resolved at parse time.
//! Commands are built fresh for every run, so loop and gate counters are
//! per-run state.

pub mod context;

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{MacroError, Result};
use crate::executor::{
    CallbackValue, Condition, EnvCall, Environment, EnvironmentError, KeyMode, TargetSelector,
};
use crate::parser::{ErrorCondition, KeyCombo, ModifierSet, WaitSpec};

pub use context::MacroContext;

/// Work shipped to the privileged thread for one command.
pub type EnvironmentJob = Box<dyn FnOnce(&mut dyn Environment) -> JobOutcome + Send>;

/// What happened on the privileged thread.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Performed,
    /// A `<condition>` already held, so the call was not made.
    Skipped(Condition),
    Failed(EnvironmentError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    Action { name: String },
    Item { name: String },
    Target { name: String },
    Callback {
        addon: String,
        update: bool,
        values: Vec<CallbackValue>,
    },
    Click { target: String },
    Send { keys: KeyCombo },
    Hold { keys: KeyCombo },
    Release { keys: KeyCombo },
    Echo { message: String },
    Wait { wait: WaitSpec },
    WaitAddon { addon: String },
    Require { condition: String },
    Loop(LoopCounter),
    Gate(GateCounter),
    Run { name: String },
    /// Anything the registry does not know, forwarded to the client verbatim.
    Native { text: String },
}

/// Remaining-count state of a `/loop`. `None` loops forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopCounter {
    initial: Option<u32>,
    remaining: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPass {
    /// Jump back; carries the count seen on this pass.
    Again(Option<u32>),
    /// Count exhausted; the counter has been reset.
    Done,
}

impl LoopCounter {
    pub fn new(count: Option<u32>) -> Self {
        Self {
            initial: count,
            remaining: count,
        }
    }

    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    /// Give an unbounded loop a count (run-level loop count).
    pub fn bound(&mut self, count: u32) {
        if self.initial.is_none() {
            *self = Self::new(Some(count));
        }
    }

    pub fn visit(&mut self) -> LoopPass {
        match self.remaining {
            None => LoopPass::Again(None),
            Some(0) => {
                self.remaining = self.initial;
                LoopPass::Done
            }
            Some(n) => {
                self.remaining = Some(n - 1);
                LoopPass::Again(Some(n))
            }
        }
    }
}

/// Bounded-repeat guard: allows `initial` passes, then ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateCounter {
    initial: u32,
    remaining: u32,
}

impl GateCounter {
    pub fn new(count: u32) -> Self {
        Self {
            initial: count,
            remaining: count,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Count one pass. Returns the passes left after this one, or
    /// [`MacroError::GateComplete`] once exhausted (resetting the counter).
    pub fn visit(&mut self) -> Result<u32> {
        if self.remaining == 0 {
            self.remaining = self.initial;
            return Err(MacroError::GateComplete);
        }
        self.remaining -= 1;
        Ok(self.remaining)
    }
}

/// One parsed, executable line.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    text: String,
    kind: CommandKind,
    modifiers: ModifierSet,
}

impl Command {
    pub fn new(text: impl Into<String>, kind: CommandKind, modifiers: ModifierSet) -> Self {
        Self {
            text: text.into(),
            kind,
            modifiers,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut CommandKind {
        &mut self.kind
    }

    pub fn modifiers(&self) -> &ModifierSet {
        &self.modifiers
    }

    /// Commands that read or write client state run on the privileged thread.
    pub fn requires_privileged_thread(&self) -> bool {
        match self.kind {
            CommandKind::Action { .. }
            | CommandKind::Item { .. }
            | CommandKind::Target { .. }
            | CommandKind::Callback { .. }
            | CommandKind::Click { .. }
            | CommandKind::Send { .. }
            | CommandKind::Hold { .. }
            | CommandKind::Release { .. }
            | CommandKind::Echo { .. }
            | CommandKind::Native { .. } => true,
            CommandKind::Wait { .. }
            | CommandKind::WaitAddon { .. }
            | CommandKind::Require { .. }
            | CommandKind::Loop(_)
            | CommandKind::Gate(_)
            | CommandKind::Run { .. } => false,
        }
    }

    /// Delay applied after the command body, from `<wait>` or zero.
    pub fn wait(&self) -> WaitSpec {
        self.modifiers.wait()
    }

    /// Execute the command, then apply its post-command wait.
    ///
    /// Privileged commands are shipped to the privileged thread as a single job
    /// and awaited before anything else happens.
    pub async fn execute(&mut self, ctx: &mut MacroContext) -> Result<()> {
        if self.requires_privileged_thread() {
            if let Some(job) = self.environment_job() {
                let outcome = ctx.run_on_privileged(job).await?;
                self.finish(ctx, outcome).await?;
            }
        } else {
            self.execute_local(ctx).await?;
        }
        let wait = self.wait();
        if !wait.is_zero() {
            ctx.sleep(wait.resolve()).await?;
        }
        Ok(())
    }

    fn environment_call(&self) -> Option<EnvCall> {
        let call = match &self.kind {
            CommandKind::Action { name } => EnvCall::Action { name: name.clone() },
            CommandKind::Item { name } => EnvCall::Item {
                name: name.clone(),
                quality: self.modifiers.quality(),
            },
            CommandKind::Target { name } => EnvCall::Target {
                name: name.clone(),
                selector: TargetSelector {
                    index: self.modifiers.index(),
                    list_index: self.modifiers.list_index(),
                    party_index: self.modifiers.party_index(),
                    max_distance: self.modifiers.distance(),
                },
            },
            CommandKind::Callback {
                addon,
                update,
                values,
            } => EnvCall::Callback {
                addon: addon.clone(),
                update: *update,
                values: values.clone(),
            },
            CommandKind::Click { target } => EnvCall::Click {
                target: target.clone(),
            },
            CommandKind::Send { keys } => EnvCall::Key {
                keys: keys.clone(),
                mode: KeyMode::Press,
            },
            CommandKind::Hold { keys } => EnvCall::Key {
                keys: keys.clone(),
                mode: KeyMode::Hold,
            },
            CommandKind::Release { keys } => EnvCall::Key {
                keys: keys.clone(),
                mode: KeyMode::Release,
            },
            CommandKind::Native { text } => EnvCall::Native { text: text.clone() },
            _ => return None,
        };
        Some(call)
    }

    /// The privileged part of the command as one job: condition check and call
    /// happen together, so no other macro can touch the client in between.
    pub fn environment_job(&self) -> Option<EnvironmentJob> {
        if let CommandKind::Echo { message } = &self.kind {
            let message = message.clone();
            return Some(Box::new(move |env: &mut dyn Environment| {
                env.echo(&message);
                JobOutcome::Performed
            }));
        }
        let call = self.environment_call()?;
        let skip_when: Vec<Condition> = self
            .modifiers
            .conditions()
            .iter()
            .map(|c| Condition::Named(c.clone()))
            .collect();
        Some(Box::new(move |env: &mut dyn Environment| {
            if let Some(held) = skip_when.iter().find(|c| env.check(c)) {
                return JobOutcome::Skipped(held.clone());
            }
            match env.perform(&call) {
                Ok(()) => JobOutcome::Performed,
                Err(e) => JobOutcome::Failed(e),
            }
        }))
    }

    /// Post-processing of a privileged job: failure policy and settle wait.
    async fn finish(&self, ctx: &MacroContext, outcome: JobOutcome) -> Result<()> {
        match outcome {
            JobOutcome::Skipped(condition) => {
                debug!(
                    target: "macrobot::engine",
                    macro_id = %ctx.macro_id(), command = %self.text, %condition,
                    "Condition already met; skipping command"
                );
                return Ok(());
            }
            JobOutcome::Failed(err) => {
                let class = err.error_condition();
                return self.escalate(ctx, MacroError::Environment(err), class);
            }
            JobOutcome::Performed => {}
        }

        let settles = matches!(self.kind, CommandKind::Action { .. } | CommandKind::Item { .. });
        if settles && ctx.settings().action_settle && !self.modifiers.is_unsafe() {
            match ctx
                .wait_for_condition(Condition::ActionSettled, self.max_wait(ctx))
                .await
            {
                Err(err @ MacroError::Timeout { .. }) => {
                    self.escalate(ctx, err, Some(ErrorCondition::ActionTimeout))?
                }
                other => other?,
            }
        }
        Ok(())
    }

    async fn execute_local(&mut self, ctx: &mut MacroContext) -> Result<()> {
        match &mut self.kind {
            CommandKind::Wait { wait } => ctx.sleep(wait.resolve()).await,
            CommandKind::WaitAddon { addon } => {
                let condition = Condition::AddonReady(addon.clone());
                let max_wait = self.modifiers.max_wait().unwrap_or(ctx.settings().max_wait());
                match ctx.wait_for_condition(condition, max_wait).await {
                    Err(err @ MacroError::Timeout { .. }) => {
                        self.escalate(ctx, err, Some(ErrorCondition::AddonTimeout))
                    }
                    other => other,
                }
            }
            CommandKind::Require { condition } => {
                let condition = Condition::Named(condition.clone());
                let max_wait = self.modifiers.max_wait().unwrap_or(ctx.settings().max_wait());
                ctx.wait_for_condition(condition, max_wait).await
            }
            CommandKind::Loop(counter) => {
                if ctx.check_loop_stop() {
                    return Err(MacroError::Cancelled);
                }
                ctx.check_loop_pause();
                let pass = counter.visit();
                if self.modifiers.echo() {
                    if let Some(message) = loop_message(pass) {
                        ctx.echo(message).await?;
                    }
                }
                if let LoopPass::Again(_) = pass {
                    ctx.loop_back();
                }
                Ok(())
            }
            CommandKind::Gate(counter) => {
                if ctx.check_loop_stop() {
                    return Err(MacroError::Cancelled);
                }
                ctx.check_loop_pause();
                let pass = counter.visit();
                if self.modifiers.echo() {
                    ctx.echo(gate_message(&pass)).await?;
                }
                pass.map(|_| ())
            }
            CommandKind::Run { name } => ctx.run_macro(name).await,
            CommandKind::Action { .. }
            | CommandKind::Item { .. }
            | CommandKind::Target { .. }
            | CommandKind::Callback { .. }
            | CommandKind::Click { .. }
            | CommandKind::Send { .. }
            | CommandKind::Hold { .. }
            | CommandKind::Release { .. }
            | CommandKind::Echo { .. }
            | CommandKind::Native { .. } => Ok(()),
        }
    }

    fn max_wait(&self, ctx: &MacroContext) -> Duration {
        self.modifiers
            .max_wait()
            .unwrap_or_else(|| ctx.settings().max_wait())
    }

    /// Abort when `<errorif>` names the failure class or stop-on-error is set;
    /// otherwise log and carry on.
    fn escalate(
        &self,
        ctx: &MacroContext,
        err: MacroError,
        class: Option<ErrorCondition>,
    ) -> Result<()> {
        let named = class.is_some_and(|c| self.modifiers.error_if(c));
        if named || ctx.settings().stop_on_error {
            return Err(err);
        }
        warn!(
            target: "macrobot::engine",
            macro_id = %ctx.macro_id(), command = %self.text, error = %err,
            "Command failed; continuing"
        );
        Ok(())
    }
}

fn loop_message(pass: LoopPass) -> Option<String> {
    match pass {
        LoopPass::Again(None) => None,
        LoopPass::Again(Some(1)) => Some("1 loop remaining".into()),
        LoopPass::Again(Some(n)) => Some(format!("{n} loops remaining")),
        LoopPass::Done => Some("No loops remaining".into()),
    }
}

fn gate_message(pass: &Result<u32>) -> String {
    match pass {
        Ok(0) => "No passes remaining".into(),
        Ok(1) => "1 pass remaining".into(),
        Ok(n) => format!("{n} passes remaining"),
        Err(_) => "Gate complete".into(),
    }
}
