//! Test double for the environment.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::{Condition, EnvCall, Environment, EnvironmentError};

/// Records every call as a short string and answers conditions from a shared set.
///
/// Clones share state, so a test can keep a handle after moving one clone onto
/// the privileged thread.
#[derive(Clone, Default)]
pub(crate) struct RecordingEnvironment {
    log: Arc<Mutex<Vec<String>>>,
    conditions: Arc<Mutex<HashSet<String>>>,
    failures: Arc<Mutex<HashMap<String, EnvironmentError>>>,
}

impl RecordingEnvironment {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.log)
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Named conditions, plus `addon:<name>` for addon readiness and
    /// `unsettled` to keep actions from settling.
    pub(crate) fn set_condition(&self, name: &str, on: bool) {
        let mut set = self.conditions.lock().unwrap();
        if on {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }

    /// Make calls addressed to `name` fail with `err`.
    pub(crate) fn fail(&self, name: &str, err: EnvironmentError) {
        self.failures.lock().unwrap().insert(name.to_string(), err);
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl Environment for RecordingEnvironment {
    fn perform(&mut self, call: &EnvCall) -> Result<(), EnvironmentError> {
        let (entry, key) = match call {
            EnvCall::Action { name } => (format!("action:{name}"), name.clone()),
            EnvCall::Item { name, quality } => (format!("item:{name}:{quality:?}"), name.clone()),
            EnvCall::Target { name, selector } => {
                (format!("target:{name}:{:?}", selector.index), name.clone())
            }
            EnvCall::Callback {
                addon,
                update,
                values,
            } => {
                let vals: Vec<String> = values.iter().map(ToString::to_string).collect();
                (
                    format!("callback:{addon}:{update}:{}", vals.join(" ")),
                    addon.clone(),
                )
            }
            EnvCall::Click { target } => (format!("click:{target}"), target.clone()),
            EnvCall::Key { keys, mode } => (format!("key:{mode:?}:{keys}"), keys.to_string()),
            EnvCall::Native { text } => (format!("native:{text}"), text.clone()),
        };
        if let Some(err) = self.failures.lock().unwrap().get(&key) {
            self.record(format!("failed {entry}"));
            return Err(err.clone());
        }
        self.record(entry);
        Ok(())
    }

    fn check(&mut self, condition: &Condition) -> bool {
        let set = self.conditions.lock().unwrap();
        match condition {
            Condition::Named(n) => set.contains(n),
            Condition::AddonReady(a) => set.contains(&format!("addon:{a}")),
            Condition::ActionSettled => !set.contains("unsettled"),
        }
    }

    fn echo(&mut self, message: &str) {
        self.record(format!("echo:{message}"));
    }
}
