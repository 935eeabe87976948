use std::sync::Arc;

use tokio::sync::Mutex;

use crate::broker::Broker;
use crate::codes::LobbyCodes;
use crate::config::Config;
use crate::snapshot::SnapshotCache;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Server config
    pub config: Arc<Config>,
    /// Lobby and peer registry, serialized behind one lock so lobby
    /// operations and their broadcasts are atomic
    pub broker: Arc<Mutex<Broker>>,
    /// Hot snapshot cache (backed by the session store when configured)
    pub cache: Arc<SnapshotCache>,
    /// Lobby-code allocator
    pub codes: Arc<LobbyCodes>,
}
