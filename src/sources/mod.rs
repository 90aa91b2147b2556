/*!
Control and trigger feeds.

A source turns some outside channel into JSON control requests (see
`crate::control`) and pushes them into the main loop. Concrete sources:

- `file.rs`      -> `FileSource`      (poll a single JSON file)
- `directory.rs` -> `DirectorySource` (watch a directory for request files)
- `tcp.rs`       -> `TcpSource`       (newline-delimited JSON over TCP, with acks)
- `stdin_source.rs` -> `StdinSource`  (newline-delimited JSON from standard input)

Each source is responsible for:
- Parsing raw input into `serde_json::Value`
- Pushing requests via `Sender<SourceEvent>`, respecting backpressure (`send().await`)
- Logging errors and continuing (never panicking inside tasks)
- Ending cleanly once the channel is closed

Adding a new source:
1. Create `src/sources/your_source.rs`
2. Implement a `YourSource` struct + `impl EventSource`
3. Extend `build_sources_from_config` match on `SourceConfig`
*/

use serde_json::Value;
use tokio::{
    sync::{mpsc::Sender, oneshot},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::config::{Config, SourceConfig};
use crate::control::ControlOutcome;

pub mod directory;
pub mod file;
pub mod stdin_source;
pub mod tcp;

pub use directory::DirectorySource;
pub use file::FileSource;
pub use stdin_source::StdinSource;
pub use tcp::TcpSource;

/// One request read by a source.
#[derive(Debug)]
pub struct SourceEvent {
    pub payload: Value,
    /// Set by sources that acknowledge requests; receives the outcome.
    pub reply: Option<oneshot::Sender<ControlOutcome>>,
}

impl SourceEvent {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            reply: None,
        }
    }

    pub fn with_reply(payload: Value) -> (Self, oneshot::Receiver<ControlOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                payload,
                reply: Some(tx),
            },
            rx,
        )
    }

    /// Hand the outcome back to the source, if it asked for one.
    pub fn respond(self, outcome: ControlOutcome) {
        if let Some(reply) = self.reply {
            // The source may have gone away (client disconnected).
            let _ = reply.send(outcome);
        }
    }
}

/// Trait implemented by all sources.
///
/// A source spawns an asynchronous task that produces requests and sends them
/// into the provided channel. Tasks never panic; they log and continue, or end
/// on unrecoverable errors.
pub trait EventSource: Send + Sync {
    /// Static human-readable identifier (used in logs).
    fn name(&self) -> &'static str;

    /// Start the source in the background.
    fn start(&self, sender: Sender<SourceEvent>) -> JoinHandle<()>;
}

/// Parse one line or file body. Blank input yields `None`; malformed JSON is
/// logged and yields `None`.
pub(crate) fn parse_request(raw: &str, origin: &str) -> Option<Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(target: "macrobot::sources", %origin, error = %e, "Ignoring malformed JSON request");
            None
        }
    }
}

/// Construct all configured sources, in config order.
pub fn build_sources_from_config(cfg: &Config) -> Vec<Box<dyn EventSource>> {
    let mut out: Vec<Box<dyn EventSource>> = Vec::new();

    for sc in &cfg.sources {
        match sc {
            SourceConfig::File {
                path,
                poll_ms,
                delete_on_success,
            } => out.push(Box::new(FileSource::new(
                path.clone(),
                *poll_ms,
                *delete_on_success,
            ))),

            SourceConfig::Directory {
                path,
                pattern,
                recursive,
            } => out.push(Box::new(DirectorySource::new(
                path.clone(),
                pattern.clone(),
                recursive.unwrap_or(false),
            ))),

            SourceConfig::Tcp { bind, ack } => {
                out.push(Box::new(TcpSource::new(bind.clone(), ack.unwrap_or(true))));
            }

            SourceConfig::Stdin => {
                out.push(Box::new(StdinSource::new()));
            }
        }
    }

    out
}

/// Spawn every source, returning their `JoinHandle`s.
pub fn spawn_all_sources(
    sources: &[Box<dyn EventSource>],
    sender: Sender<SourceEvent>,
) -> Vec<JoinHandle<()>> {
    sources
        .iter()
        .map(|src| {
            info!(
                target: "macrobot::sources",
                source = %src.name(),
                "Starting source task"
            );
            src.start(sender.clone())
        })
        .collect()
}
