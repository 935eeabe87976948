//! Lobby membership, host migration, sealing, and signaling relay.
//!
//! Within a lobby the host is addressed by the reserved in-lobby id 1;
//! every other member is addressed by its raw peer identity. Peer
//! identities are drawn from the 31-bit positive range with 0 and 1
//! excluded, so the reserved id never collides with a raw one.

use crate::proto::{self, Command, Envelope, ProtoError};
use crate::ws::{self, ConnectionSender};

/// Reserved in-lobby id of the host.
pub const HOST_ID: u32 = 1;

/// One joined peer: identity plus the handle for pushing frames to it.
pub struct Member {
    pub id: u32,
    pub tx: ConnectionSender,
}

/// A live session. State machine: open, then sealed (one-way), then torn
/// down when the seal timer fires or the last member leaves.
pub struct Lobby {
    pub name: String,
    pub host: u32,
    pub mesh: bool,
    pub sealed: bool,
    members: Vec<Member>,
    pub game_state: Option<Vec<u8>>,
}

impl Lobby {
    pub fn new(name: String, host: u32, mesh: bool) -> Self {
        Self {
            name,
            host,
            mesh,
            sealed: false,
            members: Vec::new(),
            game_state: None,
        }
    }

    pub fn in_lobby_id(&self, peer_id: u32) -> u32 {
        if peer_id == self.host {
            HOST_ID
        } else {
            peer_id
        }
    }

    pub fn is_member(&self, peer_id: u32) -> bool {
        self.members.iter().any(|member| member.id == peer_id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Append a member and emit the join notifications: the joiner gets an
    /// `ID` frame (`data` is `"true"` for mesh lobbies), every existing
    /// member gets `PEER_CONNECT(joiner)` in join order, and the joiner gets
    /// one `PEER_CONNECT` per existing member.
    pub fn join(&mut self, member: Member) -> Result<(), ProtoError> {
        if self.is_member(member.id) {
            return Err(ProtoError::protocol(proto::msg::ALREADY_IN_LOBBY));
        }
        let assigned = self.in_lobby_id(member.id);
        let mesh_data = if self.mesh { "true" } else { "" };
        ws::send_envelope(&member.tx, &Envelope::new(Command::Id, assigned, mesh_data));
        for existing in &self.members {
            ws::send_envelope(&existing.tx, &Envelope::new(Command::PeerConnect, assigned, ""));
            ws::send_envelope(
                &member.tx,
                &Envelope::new(Command::PeerConnect, self.in_lobby_id(existing.id), ""),
            );
        }
        self.members.push(member);
        Ok(())
    }

    /// Remove a member by identity. Returns whether the lobby should be
    /// torn down (the host left and nobody remains).
    ///
    /// A departing host with members remaining promotes the first member in
    /// join order, which is told `HOST_CHANGED(1, "You are now the host")`;
    /// with `notify_peers` set the other members get a bare `HOST_CHANGED`
    /// as well. A departing non-host is announced with `PEER_DISCONNECT`.
    pub fn leave(&mut self, peer_id: u32, notify_peers: bool) -> bool {
        let Some(position) = self.members.iter().position(|m| m.id == peer_id) else {
            return false;
        };
        let was_host = peer_id == self.host;
        let departed = self.in_lobby_id(peer_id);
        self.members.remove(position);

        if was_host {
            if self.members.is_empty() {
                return true;
            }
            let new_host = &self.members[0];
            self.host = new_host.id;
            tracing::info!(
                lobby = %self.name,
                new_host = new_host.id,
                "host migrated"
            );
            ws::send_envelope(
                &new_host.tx,
                &Envelope::new(Command::HostChanged, HOST_ID, "You are now the host"),
            );
            if notify_peers {
                for other in self.members.iter().skip(1) {
                    ws::send_envelope(&other.tx, &Envelope::new(Command::HostChanged, HOST_ID, ""));
                }
            }
        } else {
            for member in &self.members {
                ws::send_envelope(
                    &member.tx,
                    &Envelope::new(Command::PeerDisconnect, departed, ""),
                );
            }
        }
        false
    }

    /// Latch the sealed flag and notify every member. Host-only.
    pub fn seal(&mut self, peer_id: u32) -> Result<(), ProtoError> {
        if peer_id != self.host {
            return Err(ProtoError::protocol(proto::msg::ONLY_HOST_CAN_SEAL));
        }
        self.sealed = true;
        for member in &self.members {
            ws::send_envelope(&member.tx, &Envelope::new(Command::Seal, 0, ""));
        }
        tracing::info!(lobby = %self.name, peers = self.members.len(), "lobby sealed");
        Ok(())
    }

    /// Close every member's transport with the given code and reason.
    pub fn close_all(&self, code: u16, reason: &str) {
        for member in &self.members {
            ws::send_close(&member.tx, code, reason);
        }
    }

    pub fn update_game_state(&mut self, blob: Vec<u8>) {
        self.game_state = Some(blob);
    }

    /// Relay a signaling frame: destination id 1 is rewritten to the host's
    /// raw identity, the forwarded frame carries the sender's in-lobby id
    /// and the payload unchanged.
    pub fn route(
        &self,
        from: u32,
        command: Command,
        destination: i64,
        payload: String,
    ) -> Result<(), ProtoError> {
        let resolved = if destination == i64::from(HOST_ID) {
            self.host
        } else {
            u32::try_from(destination)
                .map_err(|_| ProtoError::protocol(proto::msg::INVALID_DESTINATION))?
        };
        let member = self
            .members
            .iter()
            .find(|m| m.id == resolved)
            .ok_or_else(|| ProtoError::protocol(proto::msg::INVALID_DESTINATION))?;
        ws::send_envelope(
            &member.tx,
            &Envelope::new(command, self.in_lobby_id(from), payload),
        );
        Ok(())
    }
}
