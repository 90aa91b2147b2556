//! Stdin request source.
//!
//! Reads newline-delimited JSON requests from standard input, e.g.
//!     echo '{"command":"run","macro":"craft"}' | macrobot --config macrobot.json
//!
//! Malformed lines are logged and skipped. EOF or a closed channel ends the task.

use tokio::{
    io::{self, AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::mpsc::Sender,
    task::JoinHandle,
};
use tracing::{error, info, trace, warn};

use super::{EventSource, SourceEvent, parse_request};

/// Source that reads newline-delimited JSON requests from stdin.
#[derive(Debug, Clone, Default)]
pub struct StdinSource;

impl StdinSource {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Forward every parsed line of `reader` until EOF or until `sender` closes.
pub(crate) async fn forward_lines<R>(reader: R, sender: &Sender<SourceEvent>, origin: &str)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(value) = parse_request(&line, origin) else {
                    continue;
                };
                trace!(target: "macrobot::sources", %origin, "Parsed request line");
                if let Err(e) = sender.send(SourceEvent::new(value)).await {
                    error!(target: "macrobot::sources", %origin, error = %e, "Channel closed; terminating");
                    break;
                }
            }
            Ok(None) => {
                info!(target: "macrobot::sources", %origin, "EOF; source exiting");
                break;
            }
            Err(e) => {
                warn!(target: "macrobot::sources", %origin, error = %e, "Read error; source exiting");
                break;
            }
        }
    }
}

impl EventSource for StdinSource {
    fn name(&self) -> &'static str {
        "stdin"
    }

    fn start(&self, sender: Sender<SourceEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(target: "macrobot::sources", "StdinSource task started (reading lines)");
            forward_lines(BufReader::new(io::stdin()), &sender, "stdin").await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn forwards_valid_lines_and_skips_the_rest() {
        let input: &[u8] = b"{\"command\":\"list\"}\n\nnot json\n{\"trigger\":\"on_login\"}\n";
        let (tx, mut rx) = mpsc::channel(8);
        forward_lines(input, &tx, "test").await;
        drop(tx);

        let mut payloads = Vec::new();
        while let Some(event) = rx.recv().await {
            assert!(event.reply.is_none());
            payloads.push(event.payload);
        }
        assert_eq!(
            payloads,
            vec![
                serde_json::json!({"command": "list"}),
                serde_json::json!({"trigger": "on_login"})
            ]
        );
    }

    #[test]
    fn name_is_stable() {
        assert_eq!(StdinSource::new().name(), "stdin");
    }
}
