//! File request source.
//!
//! Polls a single file path for a JSON control request at a fixed interval.
//!
//! Behavior:
//! - With `delete_on_success = true`, every successfully parsed request is
//!   dispatched and the file is deleted, so the next request requires
//!   recreating the file.
//! - With `delete_on_success = false`, the file is dispatched only when its
//!   (length, mtime) signature changes.
//! - Empty files are ignored; invalid JSON is logged and retried on the next poll.
//! - A missing file is silent until it appears.
//!
//! The task ends once the receiving side of the channel is closed.

use std::fs;
use std::time::{Duration, SystemTime};

use tokio::{
    fs as afs,
    sync::mpsc::Sender,
    task::JoinHandle,
    time::{Instant, sleep},
};
use tracing::{error, info, trace, warn};

use super::{EventSource, SourceEvent, parse_request};

/// Source that polls a single file for JSON requests.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: String,
    poll_ms: u64,
    delete_on_success: bool,
}

/// Coarse change marker: (length, mtime seconds).
type Signature = (u64, u64);

impl FileSource {
    /// - `poll_ms`: polling interval (defaults to 100ms; minimum 10ms).
    /// - `delete_on_success`: delete the file after a successful dispatch.
    pub fn new(path: String, poll_ms: Option<u64>, delete_on_success: Option<bool>) -> Self {
        Self {
            path,
            poll_ms: poll_ms.unwrap_or(100).max(10),
            delete_on_success: delete_on_success.unwrap_or(false),
        }
    }

    fn signature(meta: &fs::Metadata) -> Signature {
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        (meta.len(), mtime)
    }

    /// One poll. Returns the request to dispatch, if any, and the signature
    /// of what was read.
    async fn poll_once(&self, last: Option<Signature>) -> Option<(serde_json::Value, Signature)> {
        let meta = match fs::metadata(&self.path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => {
                warn!(target: "macrobot::sources", path = %self.path, "Path exists but is not a regular file");
                return None;
            }
            Err(_) => return None,
        };
        let sig = Self::signature(&meta);
        if !self.delete_on_success && last == Some(sig) {
            trace!(target: "macrobot::sources", path = %self.path, "File unchanged; skipping");
            return None;
        }
        match afs::read_to_string(&self.path).await {
            Ok(content) => parse_request(&content, &self.path).map(|value| (value, sig)),
            Err(e) => {
                warn!(target: "macrobot::sources", path = %self.path, error = %e, "Failed to read file");
                None
            }
        }
    }
}

impl EventSource for FileSource {
    fn name(&self) -> &'static str {
        "file"
    }

    fn start(&self, sender: Sender<SourceEvent>) -> JoinHandle<()> {
        let source = self.clone();

        tokio::spawn(async move {
            info!(
                target: "macrobot::sources",
                path = %source.path, poll_ms = source.poll_ms, delete_on_success = source.delete_on_success,
                "FileSource task started"
            );

            let mut last_sig: Option<Signature> = None;
            let interval = Duration::from_millis(source.poll_ms);
            let mut next_tick = Instant::now();

            loop {
                // Manual schedule instead of an interval, to avoid burst catch-up.
                let now = Instant::now();
                if now < next_tick {
                    sleep(next_tick - now).await;
                }
                next_tick += interval;

                let Some((value, sig)) = source.poll_once(last_sig).await else {
                    continue;
                };
                if let Err(e) = sender.send(SourceEvent::new(value)).await {
                    error!(target: "macrobot::sources", path = %source.path, error = %e, "Channel closed; FileSource terminating");
                    break;
                }
                info!(target: "macrobot::sources", path = %source.path, "Dispatched request from file");

                if source.delete_on_success {
                    if let Err(e) = afs::remove_file(&source.path).await {
                        warn!(target: "macrobot::sources", path = %source.path, error = %e, "Failed to delete file after dispatch");
                    }
                } else {
                    last_sig = Some(sig);
                }
            }

            info!(target: "macrobot::sources", path = %source.path, "FileSource task ended");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn scratch_file(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("macrobot-file-{}-{name}", std::process::id()));
        let _ = fs::create_dir_all(&dir);
        dir.join("request.json")
    }

    #[test]
    fn poll_interval_has_a_floor() {
        assert_eq!(FileSource::new("x".into(), Some(50), Some(false)).poll_ms, 50);
        assert_eq!(FileSource::new("y".into(), Some(1), None).poll_ms, 10);
    }

    #[tokio::test]
    async fn dispatches_and_deletes_request_file() {
        let path = scratch_file("delete");
        fs::write(&path, r#"{"command":"run","macro":"craft"}"#).unwrap();

        let source = FileSource::new(path.display().to_string(), Some(10), Some(true));
        let (tx, mut rx) = mpsc::channel(4);
        let handle = source.start(tx);

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.payload["macro"], "craft");
        handle.abort();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn unchanged_file_is_dispatched_once() {
        let path = scratch_file("keep");
        fs::write(&path, r#"{"command":"stop_all"}"#).unwrap();
        let source = FileSource::new(path.display().to_string(), Some(10), Some(false));

        let (value, sig) = source.poll_once(None).await.unwrap();
        assert_eq!(value["command"], "stop_all");
        assert!(source.poll_once(Some(sig)).await.is_none());
        let _ = fs::remove_file(&path);
    }
}
