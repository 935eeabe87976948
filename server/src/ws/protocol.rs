//! Frame dispatch for one connection.
//!
//! Binary frames are game-state snapshot uploads from a lobby's host.
//! Text frames carry the control envelope and are dispatched by command:
//! JOIN drives the join routine, SEAL the seal latch, and the three
//! signaling commands are relayed to their rewritten destination. Anything
//! else is a protocol error that closes the connection.

use axum::extract::ws::Message;

use crate::broker;
use crate::proto::{self, Command, Envelope, ProtoError};
use crate::state::AppState;

pub async fn handle_frame(
    state: &AppState,
    peer_id: u32,
    message: Message,
) -> Result<(), ProtoError> {
    match message {
        Message::Binary(data) => handle_game_state(state, peer_id, data.to_vec()).await,
        Message::Text(text) => handle_envelope(state, peer_id, text.as_str()).await,
        // ping/pong/close are handled by the connection actor
        _ => Ok(()),
    }
}

/// A binary frame is a snapshot upload: valid only from the host of the
/// lobby the peer is in. The bytes are stored verbatim, never inspected.
async fn handle_game_state(
    state: &AppState,
    peer_id: u32,
    blob: Vec<u8>,
) -> Result<(), ProtoError> {
    let mut broker = state.broker.lock().await;
    let peer = broker
        .peers
        .get(&peer_id)
        .ok_or_else(|| ProtoError::protocol(proto::msg::NEED_LOBBY))?;
    if peer.lobby.is_empty() {
        return Err(ProtoError::protocol(proto::msg::NEED_LOBBY));
    }
    let lobby_name = peer.lobby.clone();
    let lobby = broker
        .lobbies
        .get_mut(&lobby_name)
        .ok_or_else(|| ProtoError::protocol(proto::msg::SERVER_ERROR))?;
    if lobby.host != peer_id {
        return Err(ProtoError::protocol(proto::msg::ONLY_HOST_CAN_SAVE));
    }
    tracing::debug!(peer_id, lobby = %lobby_name, bytes = blob.len(), "game state updated");
    lobby.update_game_state(blob);
    Ok(())
}

async fn handle_envelope(state: &AppState, peer_id: u32, text: &str) -> Result<(), ProtoError> {
    let envelope = Envelope::parse(text)?;
    let command = Command::from_wire(envelope.kind);

    if command == Some(Command::Join) {
        // id 0 requests a mesh lobby, anything else a star
        return broker::join_lobby(state, peer_id, &envelope.data, envelope.id == 0).await;
    }

    // every other command requires membership in a live lobby
    let lobby_name = {
        let broker = state.broker.lock().await;
        let peer = broker
            .peers
            .get(&peer_id)
            .ok_or_else(|| ProtoError::protocol(proto::msg::NEED_LOBBY))?;
        if peer.lobby.is_empty() {
            return Err(ProtoError::protocol(proto::msg::NEED_LOBBY));
        }
        if !broker.lobbies.contains_key(&peer.lobby) {
            return Err(ProtoError::protocol(proto::msg::SERVER_ERROR));
        }
        peer.lobby.clone()
    };

    match command {
        Some(Command::Seal) => broker::seal_lobby(state, peer_id, &lobby_name).await,
        Some(relay @ (Command::Offer | Command::Answer | Command::Candidate)) => {
            let broker = state.broker.lock().await;
            let lobby = broker
                .lobbies
                .get(&lobby_name)
                .ok_or_else(|| ProtoError::protocol(proto::msg::SERVER_ERROR))?;
            lobby.route(peer_id, relay, envelope.id, envelope.data)
        }
        _ => Err(ProtoError::protocol(proto::msg::INVALID_COMMAND)),
    }
}
