#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

/*!
Executor module for macrobot.

This module wires together:
- `environment`: the capability interface commands use to reach the live client
- `privileged`: the single-threaded executor every environment access goes through
- `input`: an `Environment` that drives the client with simulated keyboard input

Typical usage:
- Spawn a `PrivilegedExecutor` with a factory for the environment.
- Hand it to the `Scheduler`; engines marshal privileged commands through it.

Example:
```no_run
use macrobot::executor::{InputEnvironment, PrivilegedExecutor};

let exec = PrivilegedExecutor::spawn(|| Box::new(InputEnvironment::new(true)))?;
# Ok::<(), std::io::Error>(())
```
*/

pub mod environment;
pub mod input;
pub mod privileged;
#[cfg(test)]
pub(crate) mod testing;

pub use environment::{
    CallbackValue, Condition, EnvCall, Environment, EnvironmentError, KeyMode, TargetSelector,
};
pub use input::InputEnvironment;
pub use privileged::PrivilegedExecutor;
