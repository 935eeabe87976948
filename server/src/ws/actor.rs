//! Actor-per-connection: reader/writer split over one WebSocket.
//!
//! The writer task owns the sink and drains an unbounded channel; the
//! reader loop dispatches inbound frames and turns protocol errors into a
//! close frame with the carried code and reason. A ping task keeps the
//! transport's liveness machinery fed; unresponsive clients are reaped by
//! the transport layer, no pong bookkeeping here.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::broker;
use crate::state::AppState;
use crate::ws::{self, protocol};

pub async fn run_connection(socket: WebSocket, state: AppState) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let Some(peer_id) = broker::register_peer(&state, tx.clone()).await else {
        // capacity close frame is already queued; let the writer flush it
        drop(tx);
        let _ = writer_handle.await;
        return;
    };
    tracing::info!(peer_id, "peer connected");

    // Periodic ping so half-dead connections get torn down by the transport
    let ping_tx = tx.clone();
    let ping_period = Duration::from_secs(state.config.ping_interval_secs);
    let ping_handle = tokio::spawn(async move {
        let mut timer = interval(ping_period);
        // skip the first immediate tick
        timer.tick().await;
        loop {
            timer.tick().await;
            if ping_tx.send(Message::Ping(Vec::new().into())).is_err() {
                break;
            }
        }
    });

    loop {
        match ws_receiver.next().await {
            Some(Ok(message)) => match message {
                Message::Close(frame) => {
                    tracing::debug!(peer_id, reason = ?frame, "client initiated close");
                    break;
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Pong(_) => {}
                other => {
                    if let Err(err) = protocol::handle_frame(&state, peer_id, other).await {
                        tracing::warn!(
                            peer_id,
                            code = err.code,
                            reason = %err.reason,
                            "closing peer on protocol error"
                        );
                        ws::send_close(&tx, err.code, &err.reason);
                        break;
                    }
                }
            },
            Some(Err(err)) => {
                tracing::warn!(peer_id, error = %err, "WebSocket receive error");
                break;
            }
            None => {
                tracing::debug!(peer_id, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();
    broker::unregister_peer(&state, peer_id).await;

    // Dropping the sender ends the writer after it flushed queued frames
    // (including any close frame from the loop above).
    drop(tx);
    let _ = writer_handle.await;
}

/// Writer task: receives messages from the mpsc channel and forwards them
/// to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            break;
        }
    }
}
