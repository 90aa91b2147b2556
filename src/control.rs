use anyhow::{Result, bail};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info, warn};

use crate::engine::RunOptions;
use crate::macros::{MacroId, TriggerKind};
use crate::scheduler::Scheduler;

/// Operations accepted on the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    Run,
    Pause,
    PauseAtLoop,
    Resume,
    Stop,
    StopAtLoop,
    StopAll,
    List,
}

/// A parsed control request.
///
/// Wire forms (one JSON object per request):
/// - `{"command": "run", "macro": "name or #id", "loops": 3}`
/// - `{"command": "stop_all"}`
/// - `{"trigger": "on_login", "args": {...}}`
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    Command {
        command: ControlCommand,
        target: Option<String>,
        loops: Option<u32>,
    },
    Trigger {
        kind: TriggerKind,
        args: Value,
    },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandWire {
    command: ControlCommand,
    #[serde(default, rename = "macro")]
    target: Option<String>,
    #[serde(default)]
    loops: Option<u32>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TriggerWire {
    trigger: TriggerKind,
    #[serde(default)]
    args: Value,
}

impl ControlRequest {
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let Some(object) = value.as_object() else {
            return Err("control request must be a JSON object".into());
        };
        if object.contains_key("trigger") {
            let wire = TriggerWire::deserialize(value).map_err(|e| format!("invalid trigger request: {e}"))?;
            return Ok(Self::Trigger {
                kind: wire.trigger,
                args: wire.args,
            });
        }
        if object.contains_key("command") {
            let wire = CommandWire::deserialize(value).map_err(|e| format!("invalid command request: {e}"))?;
            return Ok(Self::Command {
                command: wire.command,
                target: wire.target,
                loops: wire.loops,
            });
        }
        Err("request needs a `command` or `trigger` field".into())
    }
}

/// What the control surface reports back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    Applied(String),
    Rejected(String),
}

impl ControlOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// One-line acknowledgement for line-oriented transports.
    pub fn ack_line(&self) -> String {
        match self {
            Self::Applied(_) => "OK".to_string(),
            Self::Rejected(reason) => format!("ERROR: {reason}"),
        }
    }
}

impl fmt::Display for ControlOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied(msg) => f.write_str(msg),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

/// Maps control requests onto scheduler operations.
///
/// Every failure, including an unknown macro name, comes back as
/// [`ControlOutcome::Rejected`]; nothing here panics or propagates errors.
#[derive(Debug, Clone)]
pub struct Controller {
    scheduler: Scheduler,
}

impl Controller {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Parse and apply a raw JSON request.
    pub fn handle(&self, payload: &Value) -> ControlOutcome {
        match ControlRequest::from_value(payload) {
            Ok(request) => self.apply(&request),
            Err(reason) => {
                warn!(target: "macrobot::control", %payload, %reason, "Malformed control request");
                ControlOutcome::Rejected(reason)
            }
        }
    }

    pub fn apply(&self, request: &ControlRequest) -> ControlOutcome {
        debug!(target: "macrobot::control", ?request, "Applying control request");
        let outcome = match request {
            ControlRequest::Trigger { kind, args } => {
                let started = self.scheduler.fire_trigger(*kind, args.clone());
                Ok(format!("trigger {kind} started {} macro(s)", started.len()))
            }
            ControlRequest::Command {
                command,
                target,
                loops,
            } => self.command(*command, target.as_deref(), *loops),
        };
        let outcome = match outcome {
            Ok(message) => ControlOutcome::Applied(message),
            Err(err) => ControlOutcome::Rejected(err.to_string()),
        };
        info!(target: "macrobot::control", %outcome, "Control request handled");
        outcome
    }

    fn command(
        &self,
        command: ControlCommand,
        target: Option<&str>,
        loops: Option<u32>,
    ) -> Result<String> {
        let s = &self.scheduler;
        match command {
            ControlCommand::StopAll => {
                let stopped = s.stop_all_macros();
                return Ok(format!("stopped {stopped} macro(s)"));
            }
            ControlCommand::List => {
                let rows: Vec<String> = s
                    .list()
                    .into_iter()
                    .map(|r| format!("{} {} [{}]", r.id, r.name, r.state))
                    .collect();
                return Ok(if rows.is_empty() {
                    "no macros registered".to_string()
                } else {
                    rows.join("; ")
                });
            }
            _ => {}
        }

        let Some(name) = target else {
            bail!("`{command:?}` needs a `macro` field");
        };
        let id: MacroId = s.resolve(name)?;
        match command {
            ControlCommand::Run => {
                let options = RunOptions {
                    loop_count: loops,
                    ..RunOptions::default()
                };
                s.start_macro(id, options)?;
                Ok(format!("started {name} ({id})"))
            }
            ControlCommand::Pause => {
                s.pause_macro(id)?;
                Ok(format!("paused {name}"))
            }
            ControlCommand::PauseAtLoop => {
                s.pause_at_next_loop(id)?;
                Ok(format!("{name} will pause at its next loop"))
            }
            ControlCommand::Resume => {
                s.resume_macro(id)?;
                Ok(format!("resumed {name}"))
            }
            ControlCommand::Stop => {
                s.stop_macro(id)?;
                Ok(format!("stopped {name}"))
            }
            ControlCommand::StopAtLoop => {
                s.stop_at_next_loop(id)?;
                Ok(format!("{name} will stop at its next loop"))
            }
            ControlCommand::StopAll | ControlCommand::List => Ok(String::new()),
        }
    }
}
