use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::config::EngineSettings;
use crate::engine::{MacroInstance, bridge};
use crate::error::{MacroError, Result};
use crate::executor::{Condition, Environment};
use crate::macros::MacroId;
use crate::scheduler::Scheduler;

/// Everything a command may touch while it runs: its own run, the scheduler,
/// the engine settings and the privileged executor (through the scheduler).
pub struct MacroContext {
    instance: Arc<MacroInstance>,
    scheduler: Scheduler,
    settings: Arc<EngineSettings>,
    jump: Option<usize>,
}

impl MacroContext {
    pub fn new(instance: Arc<MacroInstance>, scheduler: Scheduler) -> Self {
        let settings = scheduler.settings();
        Self {
            instance,
            scheduler,
            settings,
            jump: None,
        }
    }

    pub fn macro_id(&self) -> MacroId {
        self.instance.id()
    }

    pub fn instance(&self) -> &Arc<MacroInstance> {
        &self.instance
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Continue from the first command after the current one finishes.
    pub fn loop_back(&mut self) {
        self.jump = Some(0);
    }

    pub(crate) fn take_jump(&mut self) -> Option<usize> {
        self.jump.take()
    }

    /// Run `f` on the privileged thread and await it.
    pub async fn run_on_privileged<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut dyn Environment) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.scheduler.executor().run(f).await
    }

    pub async fn check(&self, condition: Condition) -> Result<bool> {
        self.run_on_privileged(move |env| env.check(&condition)).await
    }

    pub async fn echo(&self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.run_on_privileged(move |env| env.echo(&message)).await
    }

    /// Sleep unless the run is stopped first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.instance.cancel_token().cancelled() => Err(MacroError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Poll `condition` every poll interval until it holds, the run is
    /// stopped, or `timeout` passes.
    pub async fn wait_for_condition(&self, condition: Condition, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.instance.is_cancelled() {
                return Err(MacroError::Cancelled);
            }
            if self.check(condition.clone()).await? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(MacroError::Timeout {
                    what: condition.to_string(),
                    after: timeout,
                });
            }
            trace!(target: "macrobot::engine", macro_id = %self.macro_id(), %condition, "Condition not met yet");
            self.sleep(self.settings.poll_interval().min(deadline - now))
                .await?;
        }
    }

    /// Apply a pending pause-at-loop request. The run blocks at its next checkpoint.
    pub fn check_loop_pause(&self) -> bool {
        self.scheduler.check_loop_pause(self.macro_id())
    }

    /// Apply a pending stop-at-loop request.
    pub fn check_loop_stop(&self) -> bool {
        self.scheduler.check_loop_stop(self.macro_id())
    }

    /// Run another registered macro to completion as part of this one.
    pub async fn run_macro(&self, name: &str) -> Result<()> {
        bridge::run_named(&self.scheduler, &self.instance, name).await
    }
}
