use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};

use crate::error::{MacroError, Result};
use crate::executor::Environment;

type Job = Box<dyn FnOnce(&mut dyn Environment) + Send>;

/// Single serialization point for environment access.
///
/// Owns a dedicated OS thread holding the one [`Environment`] instance. Jobs run
/// there one at a time, in submission order, so two macros never touch the
/// client concurrently. Cloning the handle is cheap; the thread exits once the
/// last handle is dropped.
#[derive(Clone)]
pub struct PrivilegedExecutor {
    jobs: mpsc::UnboundedSender<Job>,
}

impl PrivilegedExecutor {
    /// Spawn the privileged thread. `factory` runs on that thread, so the
    /// environment itself may hold thread-bound handles.
    pub fn spawn<F>(factory: F) -> std::io::Result<Self>
    where
        F: FnOnce() -> Box<dyn Environment> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        thread::Builder::new()
            .name("macrobot-privileged".into())
            .spawn(move || {
                let mut env = factory();
                info!(target: "macrobot::env", "Privileged executor started");
                while let Some(job) = rx.blocking_recv() {
                    trace!(target: "macrobot::env", "Running privileged job");
                    job(&mut *env);
                }
                debug!(target: "macrobot::env", "Privileged executor stopped");
            })?;
        Ok(Self { jobs: tx })
    }

    /// Run `f` against the environment on the privileged thread and await its result.
    pub async fn run<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut dyn Environment) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.jobs
            .send(Box::new(move |env: &mut dyn Environment| {
                let _ = tx.send(f(env));
            }))
            .map_err(|_| MacroError::ExecutorUnavailable)?;
        rx.await.map_err(|_| MacroError::ExecutorUnavailable)
    }
}

impl std::fmt::Debug for PrivilegedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivilegedExecutor")
            .field("closed", &self.jobs.is_closed())
            .finish()
    }
}
