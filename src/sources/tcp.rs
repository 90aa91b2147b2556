//! TCP request source.
//!
//! Accepts connections on `bind` and reads newline-delimited JSON requests.
//! With acknowledgements on, each request is answered with one line: `OK` or
//! `ERROR: <reason>`. Malformed lines are answered with an error but do not
//! close the connection.

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::mpsc::Sender,
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use super::{EventSource, SourceEvent, parse_request};
use crate::control::ControlOutcome;

#[derive(Debug, Clone)]
pub struct TcpSource {
    bind: String,
    ack: bool,
}

impl TcpSource {
    pub fn new(bind: String, ack: bool) -> Self {
        Self { bind, ack }
    }

    async fn serve(&self, listener: TcpListener, sender: Sender<SourceEvent>) {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(target: "macrobot::sources", bind = %self.bind, error = %e, "Accept failed");
                    continue;
                }
            };
            if sender.is_closed() {
                break;
            }
            debug!(target: "macrobot::sources", %peer, "Control client connected");
            let sender = sender.clone();
            let ack = self.ack;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, &sender, ack).await {
                    debug!(target: "macrobot::sources", %peer, error = %e, "Control connection ended with error");
                }
                debug!(target: "macrobot::sources", %peer, "Control client disconnected");
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    sender: &Sender<SourceEvent>,
    ack: bool,
) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let Some(payload) = parse_request(&line, "tcp") else {
            if ack {
                let outcome = ControlOutcome::Rejected("malformed JSON".into());
                write.write_all(format!("{}\n", outcome.ack_line()).as_bytes()).await?;
            }
            continue;
        };

        if !ack {
            if sender.send(SourceEvent::new(payload)).await.is_err() {
                break;
            }
            continue;
        }

        let (event, reply) = SourceEvent::with_reply(payload);
        if sender.send(event).await.is_err() {
            break;
        }
        let outcome = reply
            .await
            .unwrap_or_else(|_| ControlOutcome::Rejected("request dropped".into()));
        write.write_all(format!("{}\n", outcome.ack_line()).as_bytes()).await?;
    }
    Ok(())
}

impl EventSource for TcpSource {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn start(&self, sender: Sender<SourceEvent>) -> JoinHandle<()> {
        let source = self.clone();
        tokio::spawn(async move {
            let listener = match TcpListener::bind(&source.bind).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!(target: "macrobot::sources", bind = %source.bind, error = %e, "Failed to bind TCP source");
                    return;
                }
            };
            info!(target: "macrobot::sources", bind = %source.bind, ack = source.ack, "TcpSource listening");
            source.serve(listener, sender).await;
            info!(target: "macrobot::sources", bind = %source.bind, "TcpSource task ended");
        })
    }
}
