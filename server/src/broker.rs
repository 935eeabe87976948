//! Process-wide peer and lobby registry plus the connection lifecycle:
//! identity assignment, the join routine (create, attach, or restore from a
//! snapshot), departure handling, and the seal/teardown timer.
//!
//! All registry state sits behind one async mutex. Handlers hold the lock
//! across their suspension points, so at most one of them mutates lobby
//! state at a time and every broadcast a lobby emits is atomic with the
//! membership change that caused it.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use tokio::task::AbortHandle;

use crate::lobby::{Lobby, Member};
use crate::proto::{self, ProtoError, CLOSE_PROTO_ERROR};
use crate::state::AppState;
use crate::ws::{self, ConnectionSender};

/// A connected client: its transport handle, the lobby it has joined
/// (empty until the first successful JOIN), and the join-deadline timer.
pub struct PeerHandle {
    pub tx: ConnectionSender,
    pub lobby: String,
    pub join_deadline: Option<AbortHandle>,
}

#[derive(Default)]
pub struct Broker {
    pub lobbies: HashMap<String, Lobby>,
    pub peers: HashMap<u32, PeerHandle>,
}

/// Admit a connection: enforce the peer cap, draw a fresh identity, and arm
/// the join deadline. Returns `None` (with a close frame queued) when the
/// server is full.
pub async fn register_peer(state: &AppState, tx: ConnectionSender) -> Option<u32> {
    let mut broker = state.broker.lock().await;
    if broker.peers.len() >= state.config.max_peers {
        tracing::warn!(peers = broker.peers.len(), "rejecting connection, peer cap reached");
        ws::send_close(&tx, CLOSE_PROTO_ERROR, proto::msg::TOO_MANY_PEERS);
        return None;
    }
    let peer_id = assign_identity(&broker);
    let deadline = tokio::spawn(join_deadline(state.clone(), peer_id)).abort_handle();
    broker.peers.insert(
        peer_id,
        PeerHandle {
            tx,
            lobby: String::new(),
            join_deadline: Some(deadline),
        },
    );
    Some(peer_id)
}

/// Random 31-bit identity, redrawn while it collides with a connected peer.
/// 0 and 1 are excluded so a raw identity can never shadow the reserved
/// in-lobby host id.
fn assign_identity(broker: &Broker) -> u32 {
    let mut rng = rand::rng();
    loop {
        let id = rng.random_range(2..(1u32 << 31));
        if !broker.peers.contains_key(&id) {
            return id;
        }
    }
}

/// Closes a peer that is still lobby-less when the deadline fires. The
/// handle is aborted on join and on disconnect.
async fn join_deadline(state: AppState, peer_id: u32) {
    tokio::time::sleep(Duration::from_millis(state.config.no_lobby_timeout_ms)).await;
    let broker = state.broker.lock().await;
    if let Some(peer) = broker.peers.get(&peer_id) {
        if peer.lobby.is_empty() {
            tracing::info!(peer_id, "peer never joined a lobby, closing");
            ws::send_close(&peer.tx, CLOSE_PROTO_ERROR, proto::msg::NO_LOBBY_TIMEOUT);
        }
    }
}

/// The join routine. An empty `requested` code creates a lobby with this
/// peer as host; a known code attaches (unless sealed); an unknown code is
/// resurrected from the snapshot layer when a saved game exists for it.
/// Every path finishes with a `JOIN` reply, and a restore additionally
/// sends the saved blob as one binary frame.
pub async fn join_lobby(
    state: &AppState,
    peer_id: u32,
    requested: &str,
    mesh: bool,
) -> Result<(), ProtoError> {
    let mut broker = state.broker.lock().await;

    let peer = broker
        .peers
        .get(&peer_id)
        .ok_or_else(|| ProtoError::protocol(proto::msg::SERVER_ERROR))?;
    if !peer.lobby.is_empty() {
        return Err(ProtoError::protocol(proto::msg::ALREADY_IN_LOBBY));
    }
    let tx = peer.tx.clone();

    let mut restored = None;
    let lobby_name = if requested.is_empty() {
        if broker.lobbies.len() >= state.config.max_lobbies {
            return Err(ProtoError::protocol(proto::msg::TOO_MANY_LOBBIES));
        }
        let name = state.codes.next().await;
        broker
            .lobbies
            .insert(name.clone(), Lobby::new(name.clone(), peer_id, mesh));
        tracing::info!(peer_id, lobby = %name, mesh, "lobby created");
        name
    } else {
        let exists = match broker.lobbies.get(requested) {
            Some(lobby) if lobby.sealed => {
                return Err(ProtoError::protocol(proto::msg::LOBBY_IS_SEALED))
            }
            Some(_) => true,
            None => false,
        };
        if !exists {
            let Some(blob) = state.cache.load(requested).await else {
                return Err(ProtoError::protocol(proto::msg::LOBBY_DOES_NOT_EXISTS));
            };
            if broker.lobbies.len() >= state.config.max_lobbies {
                return Err(ProtoError::protocol(proto::msg::TOO_MANY_LOBBIES));
            }
            let mut lobby = Lobby::new(requested.to_string(), peer_id, mesh);
            lobby.update_game_state(blob.clone());
            broker.lobbies.insert(requested.to_string(), lobby);
            restored = Some(blob);
            tracing::info!(peer_id, lobby = %requested, "lobby restored from snapshot");
        }
        requested.to_string()
    };

    let Broker { lobbies, peers } = &mut *broker;
    let lobby = lobbies
        .get_mut(&lobby_name)
        .ok_or_else(|| ProtoError::protocol(proto::msg::SERVER_ERROR))?;
    lobby.join(Member {
        id: peer_id,
        tx: tx.clone(),
    })?;
    if let Some(peer) = peers.get_mut(&peer_id) {
        peer.lobby = lobby_name.clone();
        if let Some(deadline) = peer.join_deadline.take() {
            deadline.abort();
        }
    }
    tracing::info!(
        peer_id,
        lobby = %lobby_name,
        peers = lobby.member_count(),
        "peer joined lobby"
    );

    ws::send_envelope(
        &tx,
        &proto::Envelope::new(proto::Command::Join, 0, lobby_name),
    );
    if let Some(blob) = restored {
        ws::send_binary(&tx, blob);
    }
    Ok(())
}

/// Seal a lobby (host-only, delegated to [`Lobby::seal`]) and arm the
/// teardown timer that closes every member.
pub async fn seal_lobby(state: &AppState, peer_id: u32, lobby_name: &str) -> Result<(), ProtoError> {
    {
        let mut broker = state.broker.lock().await;
        let lobby = broker
            .lobbies
            .get_mut(lobby_name)
            .ok_or_else(|| ProtoError::protocol(proto::msg::SERVER_ERROR))?;
        lobby.seal(peer_id)?;
    }

    let state = state.clone();
    let name = lobby_name.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(state.config.seal_close_timeout_secs)).await;
        let broker = state.broker.lock().await;
        if let Some(lobby) = broker.lobbies.get(&name) {
            if lobby.sealed {
                lobby.close_all(proto::CLOSE_NORMAL, proto::msg::SEAL_COMPLETE);
            }
        }
    });
    Ok(())
}

/// Tear down a departed connection: drop the peer, run [`Lobby::leave`],
/// and when the lobby empties out persist its snapshot and remove it.
pub async fn unregister_peer(state: &AppState, peer_id: u32) {
    let mut broker = state.broker.lock().await;
    let Some(peer) = broker.peers.remove(&peer_id) else {
        return;
    };
    if let Some(deadline) = peer.join_deadline {
        deadline.abort();
    }
    if peer.lobby.is_empty() {
        tracing::info!(peer_id, "peer disconnected");
        return;
    }

    let should_close = match broker.lobbies.get_mut(&peer.lobby) {
        Some(lobby) => lobby.leave(peer_id, state.config.notify_peers_on_host_change),
        None => false,
    };
    if should_close {
        if let Some(lobby) = broker.lobbies.remove(&peer.lobby) {
            if let Some(blob) = lobby.game_state {
                tracing::info!(
                    lobby = %peer.lobby,
                    bytes = blob.len(),
                    "saving snapshot of closed lobby"
                );
                state.cache.save(&peer.lobby, blob);
            }
            tracing::info!(lobby = %peer.lobby, "lobby closed");
        }
    }
    tracing::info!(peer_id, lobby = %peer.lobby, "peer disconnected");
}
