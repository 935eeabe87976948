use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Huddle signaling server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "huddle-server", version, about = "WebRTC lobby signaling server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "HUDDLE_PORT", default_value = "5050")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "HUDDLE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./huddle.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "HUDDLE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (lobby-code counter)
    #[arg(long, env = "HUDDLE_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// MySQL host for session persistence; snapshots stay in memory when unset
    #[arg(long, env = "HUDDLE_DB_HOST")]
    pub db_host: Option<String>,

    /// MySQL port
    #[arg(long, env = "HUDDLE_DB_PORT", default_value = "3306")]
    pub db_port: u16,

    /// MySQL user
    #[arg(long, env = "HUDDLE_DB_USER", default_value = "huddle")]
    pub db_user: String,

    /// MySQL password
    #[arg(long, env = "HUDDLE_DB_PASSWORD", default_value = "")]
    pub db_password: String,

    /// MySQL database name
    #[arg(long, env = "HUDDLE_DB_NAME", default_value = "huddle")]
    pub db_name: String,

    /// Connection pool size
    #[arg(long, env = "HUDDLE_DB_POOL_SIZE", default_value = "5")]
    pub db_pool_size: u32,

    /// Maximum concurrently connected peers
    #[arg(long, env = "HUDDLE_MAX_PEERS", default_value = "4096")]
    pub max_peers: usize,

    /// Maximum live lobbies
    #[arg(long, env = "HUDDLE_MAX_LOBBIES", default_value = "1048576")]
    pub max_lobbies: usize,

    /// Maximum game-state snapshots held in memory
    #[arg(long, env = "HUDDLE_MAX_SAVE_GAMES", default_value = "10000")]
    pub max_save_games: usize,

    /// How long a connected peer may linger without joining a lobby
    #[arg(long, env = "HUDDLE_NO_LOBBY_TIMEOUT_MS", default_value = "1000")]
    pub no_lobby_timeout_ms: u64,

    /// Delay between sealing a lobby and closing its members
    #[arg(long, env = "HUDDLE_SEAL_CLOSE_TIMEOUT_SECS", default_value = "10")]
    pub seal_close_timeout_secs: u64,

    /// WebSocket ping interval
    #[arg(long, env = "HUDDLE_PING_INTERVAL_SECS", default_value = "10")]
    pub ping_interval_secs: u64,

    /// Period of the bulk snapshot flush to the store
    #[arg(long, env = "HUDDLE_FLUSH_INTERVAL_SECS", default_value = "600")]
    pub flush_interval_secs: u64,

    /// Lobby-code generator seed; codes issued under one seed do not
    /// decode under another
    #[arg(long, env = "HUDDLE_CODE_SEED", default_value = "1597463007")]
    pub code_seed: u64,

    /// Also notify non-promoted members when the host migrates
    #[arg(long, env = "HUDDLE_NOTIFY_PEERS_ON_HOST_CHANGE")]
    pub notify_peers_on_host_change: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5050,
            bind_address: "0.0.0.0".to_string(),
            config: "./huddle.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            db_host: None,
            db_port: 3306,
            db_user: "huddle".to_string(),
            db_password: String::new(),
            db_name: "huddle".to_string(),
            db_pool_size: 5,
            max_peers: 4096,
            max_lobbies: 1_048_576,
            max_save_games: 10_000,
            no_lobby_timeout_ms: 1000,
            seal_close_timeout_secs: 10,
            ping_interval_secs: 10,
            flush_interval_secs: 600,
            code_seed: 1_597_463_007,
            notify_peers_on_host_change: false,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (HUDDLE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("HUDDLE_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Huddle Signaling Server Configuration
# Place this file at ./huddle.toml or specify with --config <path>
# All settings can be overridden via environment variables (HUDDLE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 5050)
# port = 5050

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the lobby-code counter
# data_dir = "./data"

# MySQL session store. Leave db_host unset to run without persistence;
# game-state snapshots then survive only as long as the process.
# db_host = "127.0.0.1"
# db_port = 3306
# db_user = "huddle"
# db_password = ""
# db_name = "huddle"
# db_pool_size = 5

# Capacity limits
# max_peers = 4096
# max_lobbies = 1048576
# max_save_games = 10000

# Timers
# no_lobby_timeout_ms = 1000
# seal_close_timeout_secs = 10
# ping_interval_secs = 10
# flush_interval_secs = 600

# Lobby-code generator seed. Codes issued under one seed do not decode
# under another.
# code_seed = 1597463007

# Also notify non-promoted members when the host migrates
# notify_peers_on_host_change = false
"#
    .to_string()
}
