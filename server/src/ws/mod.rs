pub mod actor;
pub mod handler;
pub mod protocol;

use axum::extract::ws::{CloseFrame, Message};
use tokio::sync::mpsc;

use crate::proto::Envelope;

/// Sender half of a connection's outbound channel. Any part of the system
/// can push frames to a client by cloning this.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Serialize and queue a control envelope; a closed connection is ignored.
pub fn send_envelope(tx: &ConnectionSender, envelope: &Envelope) {
    if let Ok(text) = serde_json::to_string(envelope) {
        let _ = tx.send(Message::Text(text.into()));
    }
}

/// Queue an opaque binary frame (game-state snapshots only).
pub fn send_binary(tx: &ConnectionSender, blob: Vec<u8>) {
    let _ = tx.send(Message::Binary(blob.into()));
}

/// Queue a close frame with an explicit code and reason.
pub fn send_close(tx: &ConnectionSender, code: u16, reason: &str) {
    let _ = tx.send(Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_owned().into(),
    })));
}
