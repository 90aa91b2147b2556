use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{MacroError, Result};
use crate::macros::{Macro, MacroId, TriggerEvent};

/// Per-run knobs supplied by whoever starts the macro.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Bounds an unbounded `/loop`, or appends `/loop N` when there is none.
    pub loop_count: Option<u32>,
    /// Set when the run was started by a trigger.
    pub trigger: Option<TriggerEvent>,
}

impl RunOptions {
    pub fn with_loops(count: u32) -> Self {
        Self {
            loop_count: Some(count),
            ..Self::default()
        }
    }

    pub fn triggered(event: TriggerEvent) -> Self {
        Self {
            trigger: Some(event),
            ..Self::default()
        }
    }
}

/// Resumable pause flag. Waiters block until the flag is cleared.
#[derive(Debug)]
pub struct PauseGate {
    tx: watch::Sender<bool>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(false),
        }
    }

    pub fn pause(&self) {
        self.tx.send_replace(true);
    }

    pub fn resume(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait_until_resumed(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as self, so this only returns once resumed.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Live state of one run of a macro. Dropped when the run ends.
///
/// The scheduler is the only writer of the pause gate, the cancellation token
/// and the loop flags; the engine driving the run only reads them.
#[derive(Debug)]
pub struct MacroInstance {
    definition: Arc<Macro>,
    options: RunOptions,
    cancel: CancellationToken,
    pause: PauseGate,
    step: AtomicUsize,
    pause_at_loop: AtomicBool,
    stop_at_loop: AtomicBool,
}

impl MacroInstance {
    pub fn new(definition: Arc<Macro>, options: RunOptions) -> Self {
        Self {
            definition,
            options,
            cancel: CancellationToken::new(),
            pause: PauseGate::new(),
            step: AtomicUsize::new(0),
            pause_at_loop: AtomicBool::new(false),
            stop_at_loop: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> MacroId {
        self.definition.id()
    }

    pub fn definition(&self) -> &Arc<Macro> {
        &self.definition
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn step(&self) -> usize {
        self.step.load(Ordering::Acquire)
    }

    pub(crate) fn set_step(&self, step: usize) {
        self.step.store(step, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    pub(crate) fn pause(&self) {
        self.pause.pause();
    }

    pub(crate) fn resume(&self) {
        self.pause.resume();
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn request_pause_at_loop(&self) {
        self.pause_at_loop.store(true, Ordering::Release);
    }

    pub(crate) fn request_stop_at_loop(&self) {
        self.stop_at_loop.store(true, Ordering::Release);
    }

    /// Consume a pending pause-at-loop request.
    pub(crate) fn take_pause_at_loop(&self) -> bool {
        self.pause_at_loop.swap(false, Ordering::AcqRel)
    }

    /// Consume a pending stop-at-loop request.
    pub(crate) fn take_stop_at_loop(&self) -> bool {
        self.stop_at_loop.swap(false, Ordering::AcqRel)
    }

    /// Suspension point between steps: fails with [`MacroError::Cancelled`] once
    /// stopped, and blocks while paused.
    pub async fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(MacroError::Cancelled);
        }
        if self.is_paused() {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(MacroError::Cancelled),
                _ = self.pause.wait_until_resumed() => {}
            }
        }
        Ok(())
    }
}
