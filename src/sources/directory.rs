//! Directory request source.
//!
//! Watches a directory for request files. Every file whose name matches the
//! pattern is read once, dispatched and deleted. Files already present at
//! startup are picked up by an initial scan.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::{fs as afs, sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{EventSource, SourceEvent, parse_request};

#[derive(Debug, Clone)]
pub struct DirectorySource {
    path: PathBuf,
    pattern: String,
    recursive: bool,
}

impl DirectorySource {
    /// `pattern` is a file-name glob supporting `*` (defaults to `*.json`).
    pub fn new(path: String, pattern: Option<String>, recursive: bool) -> Self {
        Self {
            path: PathBuf::from(path),
            pattern: pattern.unwrap_or_else(|| "*.json".to_string()),
            recursive,
        }
    }

    fn accepts(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| matches_pattern(&self.pattern, name))
    }

    fn scan(&self, dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if self.recursive {
                    self.scan(&path, out);
                }
            } else if self.accepts(&path) {
                out.push(path);
            }
        }
    }

    /// Read, dispatch and delete one file. Returns false once the channel is closed.
    async fn dispatch(&self, path: &Path, sender: &mpsc::Sender<SourceEvent>) -> bool {
        let origin = path.display().to_string();
        let content = match afs::read_to_string(path).await {
            Ok(content) => content,
            // Already consumed, or still being written.
            Err(e) => {
                debug!(target: "macrobot::sources", path = %origin, error = %e, "Skipping unreadable request file");
                return true;
            }
        };
        let Some(payload) = parse_request(&content, &origin) else {
            return true;
        };
        if sender.send(SourceEvent::new(payload)).await.is_err() {
            return false;
        }
        info!(target: "macrobot::sources", path = %origin, "Dispatched request file");
        if let Err(e) = afs::remove_file(path).await {
            warn!(target: "macrobot::sources", path = %origin, error = %e, "Failed to delete request file");
        }
        true
    }
}

/// File-name match with `*` wildcards; everything else is literal.
pub(crate) fn matches_pattern(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !name.starts_with(first) || name.len() < first.len() + last.len() {
        return false;
    }
    let mut rest = &name[first.len()..];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(at) => rest = &rest[at + middle.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

impl EventSource for DirectorySource {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn start(&self, sender: mpsc::Sender<SourceEvent>) -> JoinHandle<()> {
        let source = self.clone();
        tokio::spawn(async move {
            let (fs_tx, mut fs_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
            let mut watcher = match notify::recommended_watcher(move |res: notify::Result<Event>| {
                let _ = fs_tx.send(res);
            }) {
                Ok(w) => w,
                Err(e) => {
                    error!(target: "macrobot::sources", path = %source.path.display(), error = %e, "Failed to create watcher");
                    return;
                }
            };
            let mode = if source.recursive {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            if let Err(e) = watcher.watch(&source.path, mode) {
                error!(target: "macrobot::sources", path = %source.path.display(), error = %e, "Failed to watch directory");
                return;
            }
            info!(
                target: "macrobot::sources",
                path = %source.path.display(), pattern = %source.pattern, recursive = source.recursive,
                "DirectorySource watching"
            );

            let mut pending = Vec::new();
            source.scan(&source.path, &mut pending);
            pending.sort();
            for path in pending {
                if !source.dispatch(&path, &sender).await {
                    return;
                }
            }

            while let Some(res) = fs_rx.recv().await {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(target: "macrobot::sources", error = %e, "Watcher error");
                        continue;
                    }
                };
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    continue;
                }
                for path in event.paths.iter().filter(|p| p.is_file() && source.accepts(p)) {
                    if !source.dispatch(path, &sender).await {
                        info!(target: "macrobot::sources", "Channel closed; DirectorySource terminating");
                        return;
                    }
                }
            }
        })
    }
}
