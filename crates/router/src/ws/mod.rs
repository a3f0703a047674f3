//! Per-socket WebSocket plumbing shared by both endpoints.
//!
//! Each accepted socket is split: a writer task drains that connection's
//! sink channel, and the handler task reads frames and dispatches them
//! through its phase machine. The sink channel is the only write path, so
//! relay traffic and handler replies cannot interleave mid-frame.

pub mod cardhost;
pub mod controller;

use crate::transport::SinkCommand;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Drain a sink channel into the socket. Ends when the channel closes,
/// a write fails, or a close command is processed.
pub(crate) fn spawn_writer(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<SinkCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                SinkCommand::Frame(frame) => {
                    if sender.send(Message::Text(frame)).await.is_err() {
                        debug!("Socket write failed, stopping writer");
                        break;
                    }
                }
                SinkCommand::Close(code, reason) => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    })
}

/// Hand a serialized frame to a sink channel, ignoring a closed channel
/// (the writer already stopped, so the connection is as good as gone).
pub(crate) async fn send_frame(tx: &mpsc::Sender<SinkCommand>, frame: String) {
    let _ = tx.send(SinkCommand::Frame(frame)).await;
}

/// Queue a close command on a sink channel.
pub(crate) async fn send_close(tx: &mpsc::Sender<SinkCommand>, code: u16, reason: &'static str) {
    let _ = tx.send(SinkCommand::Close(code, reason)).await;
}
