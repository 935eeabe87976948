//! Wire protocol: the JSON control envelope, the command vocabulary, and the
//! close codes/reasons surfaced to clients.
//!
//! Every control frame is a JSON object with exactly three fields:
//! `{ "type": <integer>, "id": <integer>, "data": <string> }`.
//! Binary frames carry no envelope and are reserved for game-state snapshots.

use serde::{Deserialize, Serialize};

/// Normal closure, sent when a sealed lobby finishes tearing down.
pub const CLOSE_NORMAL: u16 = 1000;
/// Protocol error; the close reason carries the cause.
pub const CLOSE_PROTO_ERROR: u16 = 4000;

/// Close reasons sent to clients. These are wire text, not log messages.
pub mod msg {
    pub const INVALID_FORMAT: &str = "Invalid message format";
    pub const NEED_LOBBY: &str = "Invalid message when not in a lobby";
    pub const SERVER_ERROR: &str = "Server error, lobby not found";
    pub const INVALID_DESTINATION: &str = "Invalid destination";
    pub const INVALID_COMMAND: &str = "Invalid command";
    pub const TOO_MANY_PEERS: &str = "Too many peers connected";
    pub const TOO_MANY_LOBBIES: &str = "Too many lobbies open, disconnecting";
    pub const ALREADY_IN_LOBBY: &str = "Already in a lobby";
    pub const LOBBY_DOES_NOT_EXISTS: &str = "Lobby does not exists";
    pub const LOBBY_IS_SEALED: &str = "Lobby is sealed";
    pub const ONLY_HOST_CAN_SEAL: &str = "Only host can seal the lobby";
    pub const ONLY_HOST_CAN_SAVE: &str = "Only host can save game state";
    pub const NO_LOBBY_TIMEOUT: &str = "Have not joined lobby yet";
    pub const SEAL_COMPLETE: &str = "Seal complete";
}

/// Command vocabulary of the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Join,
    Id,
    PeerConnect,
    PeerDisconnect,
    Offer,
    Answer,
    Candidate,
    Seal,
    HostChanged,
    GameState,
    SaveGame,
}

impl Command {
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Join),
            1 => Some(Self::Id),
            2 => Some(Self::PeerConnect),
            3 => Some(Self::PeerDisconnect),
            4 => Some(Self::Offer),
            5 => Some(Self::Answer),
            6 => Some(Self::Candidate),
            7 => Some(Self::Seal),
            8 => Some(Self::HostChanged),
            9 => Some(Self::GameState),
            10 => Some(Self::SaveGame),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i64 {
        match self {
            Self::Join => 0,
            Self::Id => 1,
            Self::PeerConnect => 2,
            Self::PeerDisconnect => 3,
            Self::Offer => 4,
            Self::Answer => 5,
            Self::Candidate => 6,
            Self::Seal => 7,
            Self::HostChanged => 8,
            Self::GameState => 9,
            Self::SaveGame => 10,
        }
    }
}

/// The three-field control envelope.
///
/// `type` and `id` must be non-negative JSON integers; a float, string, or
/// missing field fails decoding. `data` defaults to the empty string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: i64,
    pub id: i64,
    #[serde(default)]
    pub data: String,
}

impl Envelope {
    pub fn new(command: Command, id: u32, data: impl Into<String>) -> Self {
        Self {
            kind: command.to_wire(),
            id: i64::from(id),
            data: data.into(),
        }
    }

    /// Decode and validate an inbound control frame.
    pub fn parse(text: &str) -> Result<Self, ProtoError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|_| ProtoError::protocol(msg::INVALID_FORMAT))?;
        if envelope.kind < 0 || envelope.id < 0 {
            return Err(ProtoError::protocol(msg::INVALID_FORMAT));
        }
        Ok(envelope)
    }
}

/// A protocol violation, surfaced to the client by closing the transport
/// with the carried code and reason.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct ProtoError {
    pub code: u16,
    pub reason: String,
}

impl ProtoError {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// A close-code-4000 error.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_PROTO_ERROR, reason)
    }
}
