//! The scheduler: sole owner of what is registered and what is running.
//!
//! Every state transition goes through here, under one lock, and is published
//! as a [`MacroEvent::StateChanged`] before the lock is released, so
//! subscribers see transitions of one macro in the order they happened.
//!
//! Runs are spawned onto the ambient tokio runtime; call the start methods
//! from inside one.

pub mod events;

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::commands::MacroContext;
use crate::config::EngineSettings;
use crate::engine::{MacroInstance, Program, RunOptions};
use crate::error::{MacroError, Result};
use crate::executor::PrivilegedExecutor;
use crate::macros::{Macro, MacroId, MacroLanguage, MacroState, TriggerEvent, TriggerKind};

pub use events::{EventBus, MacroEvent};

#[derive(Debug)]
struct Entry {
    definition: Arc<Macro>,
    state: MacroState,
    run: Option<Arc<MacroInstance>>,
}

#[derive(Debug)]
struct Inner {
    settings: Arc<EngineSettings>,
    executor: PrivilegedExecutor,
    events: EventBus,
    next_id: AtomicU64,
    library: Mutex<HashMap<MacroId, Entry>>,
    triggers: Mutex<HashMap<TriggerKind, BTreeSet<MacroId>>>,
}

/// Cheap-to-clone handle to the shared scheduler.
#[derive(Debug, Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// Summary row for listings.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroSummary {
    pub id: MacroId,
    pub name: String,
    pub language: MacroLanguage,
    pub state: MacroState,
}

impl Scheduler {
    pub fn new(settings: EngineSettings, executor: PrivilegedExecutor) -> Self {
        let events = EventBus::new(settings.event_capacity);
        Self {
            inner: Arc::new(Inner {
                settings: Arc::new(settings),
                executor,
                events,
                next_id: AtomicU64::new(1),
                library: Mutex::new(HashMap::new()),
                triggers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn settings(&self) -> Arc<EngineSettings> {
        Arc::clone(&self.inner.settings)
    }

    pub fn executor(&self) -> &PrivilegedExecutor {
        &self.inner.executor
    }

    /// Subscribe to every state change, step and error.
    pub fn subscribe(&self) -> broadcast::Receiver<MacroEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn publish(&self, event: MacroEvent) {
        self.inner.events.publish(event);
    }

    fn library(&self) -> MutexGuard<'_, HashMap<MacroId, Entry>> {
        self.inner
            .library
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn triggers(&self) -> MutexGuard<'_, HashMap<TriggerKind, BTreeSet<MacroId>>> {
        self.inner
            .triggers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate_id(&self) -> MacroId {
        MacroId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a persistent macro and subscribe it to the triggers its
    /// metadata declares.
    pub fn register(
        &self,
        name: impl Into<String>,
        language: MacroLanguage,
        source: impl Into<String>,
    ) -> Result<MacroId> {
        let name = name.into();
        let id = self.allocate_id();
        let definition = Macro::new(id, name.clone(), language, source)?;
        let triggers = definition.metadata().triggers.clone();
        {
            let mut library = self.library();
            if library
                .values()
                .any(|e| !e.definition.is_transient() && e.definition.name() == name)
            {
                return Err(MacroError::DuplicateMacro(name));
            }
            library.insert(
                id,
                Entry {
                    definition: Arc::new(definition),
                    state: MacroState::Ready,
                    run: None,
                },
            );
        }
        for kind in triggers {
            self.subscribe_to_trigger(id, kind)?;
        }
        info!(target: "macrobot::scheduler", macro_id = %id, %name, ?language, "Registered macro");
        Ok(id)
    }

    /// Delete a persistent macro. Active macros must be stopped first.
    pub fn remove(&self, id: MacroId) -> Result<()> {
        {
            let mut library = self.library();
            let entry = library.get(&id).ok_or(id)?;
            if entry.state.is_active() {
                return Err(MacroError::InvalidTransition {
                    id,
                    from: entry.state,
                    action: "remove",
                });
            }
            library.remove(&id);
        }
        for subscribers in self.triggers().values_mut() {
            subscribers.remove(&id);
        }
        info!(target: "macrobot::scheduler", macro_id = %id, "Removed macro");
        Ok(())
    }

    /// Resolve a persistent macro by id (`#3` or `3`) or by name.
    pub fn find(&self, name_or_id: &str) -> Option<MacroId> {
        let library = self.library();
        if let Ok(id) = name_or_id.trim().parse::<MacroId>() {
            if library.contains_key(&id) {
                return Some(id);
            }
        }
        library
            .values()
            .find(|e| !e.definition.is_transient() && e.definition.name() == name_or_id.trim())
            .map(|e| e.definition.id())
    }

    pub fn resolve(&self, name_or_id: &str) -> Result<MacroId> {
        self.find(name_or_id)
            .ok_or_else(|| MacroError::UnknownMacro(name_or_id.to_string()))
    }

    pub fn state(&self, id: MacroId) -> Option<MacroState> {
        self.library().get(&id).map(|e| e.state)
    }

    pub fn definition(&self, id: MacroId) -> Option<Arc<Macro>> {
        self.library().get(&id).map(|e| Arc::clone(&e.definition))
    }

    /// Persistent macros, ordered by id.
    pub fn list(&self) -> Vec<MacroSummary> {
        let mut rows: Vec<MacroSummary> = self
            .library()
            .values()
            .filter(|e| !e.definition.is_transient())
            .map(|e| MacroSummary {
                id: e.definition.id(),
                name: e.definition.name().to_string(),
                language: e.definition.language(),
                state: e.state,
            })
            .collect();
        rows.sort_by_key(|r| r.id);
        rows
    }

    /// Start a run and return once it has been initiated.
    ///
    /// The body is parsed before any state changes, so a macro with a syntax
    /// error never leaves its current state.
    pub fn start_macro(&self, id: MacroId, options: RunOptions) -> Result<MacroId> {
        let definition = self.definition(id).ok_or(id)?;
        let program = Program::prepare(&definition, &options)?;

        let instance = Arc::new(MacroInstance::new(definition, options));
        {
            let mut library = self.library();
            let entry = library.get_mut(&id).ok_or(id)?;
            if !entry.state.can_start() {
                return Err(MacroError::InvalidTransition {
                    id,
                    from: entry.state,
                    action: "start",
                });
            }
            entry.run = Some(Arc::clone(&instance));
            self.transition(entry, MacroState::Running);
        }

        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.drive(instance, program).await });
        Ok(id)
    }

    /// Wrap one instruction delegated by `parent` as a transient DSL macro and
    /// start it. The returned id is the run to await.
    pub fn start_transient(&self, parent: MacroId, instruction: &str) -> Result<MacroId> {
        let id = self.allocate_id();
        self.library().insert(
            id,
            Entry {
                definition: Arc::new(Macro::transient(id, parent, instruction)),
                state: MacroState::Ready,
                run: None,
            },
        );
        debug!(target: "macrobot::scheduler", macro_id = %id, parent = %parent, %instruction, "Created transient macro");
        self.start_macro(id, RunOptions::default()).inspect_err(|_| {
            self.library().remove(&id);
        })
    }

    async fn drive(self, instance: Arc<MacroInstance>, program: Program) {
        let ctx = MacroContext::new(Arc::clone(&instance), self.clone());
        let result = program.run(ctx).await;
        self.finish_run(&instance, result);
    }

    /// Record how a run ended. A run that was stopped has already been moved
    /// to `Ready` and detached by the stopper, so only the owning run may set
    /// a terminal state.
    fn finish_run(&self, instance: &Arc<MacroInstance>, result: Result<()>) {
        let id = instance.id();
        let mut library = self.library();
        let Some(entry) = library.get_mut(&id) else {
            return;
        };
        let owns_entry = entry
            .run
            .as_ref()
            .is_some_and(|run| Arc::ptr_eq(run, instance));
        if !owns_entry {
            return;
        }
        entry.run = None;
        match result {
            Ok(()) => self.transition(entry, MacroState::Completed),
            Err(err) if err.is_cancellation() => self.transition(entry, MacroState::Ready),
            Err(err) => {
                warn!(target: "macrobot::scheduler", macro_id = %id, error = %err, "Macro failed");
                self.transition(entry, MacroState::Error);
            }
        }
        if let Some(parent) = entry.definition.parent() {
            debug!(target: "macrobot::scheduler", macro_id = %id, %parent, state = %entry.state, "Transient macro finished");
            library.remove(&id);
        }
    }

    fn transition(&self, entry: &mut Entry, new: MacroState) {
        let old = entry.state;
        if old == new {
            return;
        }
        entry.state = new;
        let id = entry.definition.id();
        info!(target: "macrobot::scheduler", macro_id = %id, %old, %new, "State changed");
        self.publish(MacroEvent::StateChanged { id, new, old });
    }

    fn with_entry<R>(
        &self,
        id: MacroId,
        action: &'static str,
        allowed: &[MacroState],
        f: impl FnOnce(&Self, &mut Entry, &Arc<MacroInstance>) -> R,
    ) -> Result<R> {
        let mut library = self.library();
        let entry = library.get_mut(&id).ok_or(id)?;
        if !allowed.contains(&entry.state) {
            return Err(MacroError::InvalidTransition {
                id,
                from: entry.state,
                action,
            });
        }
        let run = entry.run.clone().ok_or(MacroError::NotRunning(id))?;
        Ok(f(self, entry, &run))
    }

    pub fn pause_macro(&self, id: MacroId) -> Result<()> {
        self.with_entry(id, "pause", &[MacroState::Running], |s, entry, run| {
            run.pause();
            s.transition(entry, MacroState::Paused);
        })
    }

    pub fn resume_macro(&self, id: MacroId) -> Result<()> {
        self.with_entry(id, "resume", &[MacroState::Paused], |s, entry, run| {
            run.resume();
            s.transition(entry, MacroState::Running);
        })
    }

    /// Cancel the run and return the macro to `Ready` so it can be restarted.
    pub fn stop_macro(&self, id: MacroId) -> Result<()> {
        let mut library = self.library();
        let entry = library.get_mut(&id).ok_or(id)?;
        if !entry.state.is_active() {
            return Err(MacroError::InvalidTransition {
                id,
                from: entry.state,
                action: "stop",
            });
        }
        self.detach(entry);
        if entry.definition.is_transient() {
            library.remove(&id);
        }
        Ok(())
    }

    fn detach(&self, entry: &mut Entry) {
        if let Some(run) = entry.run.take() {
            run.cancel();
        }
        self.transition(entry, MacroState::Ready);
    }

    /// Pause once the macro next reaches a loop boundary.
    pub fn pause_at_next_loop(&self, id: MacroId) -> Result<()> {
        self.with_entry(id, "pause at loop", &[MacroState::Running], |_, _, run| {
            run.request_pause_at_loop();
        })
    }

    /// Stop once the macro next reaches a loop boundary.
    pub fn stop_at_next_loop(&self, id: MacroId) -> Result<()> {
        self.with_entry(
            id,
            "stop at loop",
            &[MacroState::Running, MacroState::Paused],
            |_, _, run| run.request_stop_at_loop(),
        )
    }

    /// Called at a loop boundary: applies and clears a pending pause request.
    pub fn check_loop_pause(&self, id: MacroId) -> bool {
        let mut library = self.library();
        let Some(entry) = library.get_mut(&id) else {
            return false;
        };
        let Some(run) = entry.run.clone() else {
            return false;
        };
        if !run.take_pause_at_loop() || entry.state != MacroState::Running {
            return false;
        }
        run.pause();
        self.transition(entry, MacroState::Paused);
        true
    }

    /// Called at a loop boundary: applies and clears a pending stop request.
    pub fn check_loop_stop(&self, id: MacroId) -> bool {
        let mut library = self.library();
        let Some(entry) = library.get_mut(&id) else {
            return false;
        };
        let requested = entry.run.as_ref().is_some_and(|run| run.take_stop_at_loop());
        if !requested {
            return false;
        }
        self.detach(entry);
        if entry.definition.is_transient() {
            library.remove(&id);
        }
        true
    }

    /// Stop every active macro. Returns how many were stopped.
    pub fn stop_all_macros(&self) -> usize {
        let active: Vec<MacroId> = self
            .library()
            .values()
            .filter(|e| e.state.is_active())
            .map(|e| e.definition.id())
            .collect();
        // Runs may end on their own between the snapshot and the stop.
        active
            .into_iter()
            .filter(|id| self.stop_macro(*id).is_ok())
            .count()
    }

    pub fn subscribe_to_trigger(&self, id: MacroId, kind: TriggerKind) -> Result<()> {
        if self.state(id).is_none() {
            return Err(id.into());
        }
        self.triggers().entry(kind).or_default().insert(id);
        debug!(target: "macrobot::scheduler", macro_id = %id, trigger = %kind, "Subscribed to trigger");
        Ok(())
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe_from_trigger(&self, id: MacroId, kind: TriggerKind) -> bool {
        self.triggers()
            .get_mut(&kind)
            .is_some_and(|subscribers| subscribers.remove(&id))
    }

    pub fn trigger_subscribers(&self, kind: TriggerKind) -> Vec<MacroId> {
        self.triggers()
            .get(&kind)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Start every macro subscribed to `kind`, passing `args` into each run.
    /// Macros that can not start (already running, syntax error) are skipped.
    pub fn fire_trigger(&self, kind: TriggerKind, args: Value) -> Vec<MacroId> {
        let subscribers = self.trigger_subscribers(kind);
        info!(target: "macrobot::scheduler", trigger = %kind, subscribers = subscribers.len(), "Trigger fired");
        subscribers
            .into_iter()
            .filter_map(|id| {
                let options = RunOptions::triggered(TriggerEvent::new(kind, args.clone()));
                match self.start_macro(id, options) {
                    Ok(id) => Some(id),
                    Err(err) => {
                        warn!(target: "macrobot::scheduler", macro_id = %id, trigger = %kind, error = %err, "Trigger could not start macro");
                        None
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests;
