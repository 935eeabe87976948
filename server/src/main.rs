use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Mutex;

use huddle_server::broker::Broker;
use huddle_server::codes::LobbyCodes;
use huddle_server::config::{generate_config_template, Config};
use huddle_server::routes;
use huddle_server::snapshot::SnapshotCache;
use huddle_server::state::AppState;
use huddle_server::store::SessionStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "huddle_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "huddle_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("huddle server v{} starting", env!("CARGO_PKG_VERSION"));

    // Session store is optional: without it, snapshots live only in memory.
    let store = match &config.db_host {
        Some(host) => {
            let store = Arc::new(SessionStore::connect_lazy(&config));
            if let Err(err) = store.migrate().await {
                tracing::warn!(error = %err, "store migration failed, continuing degraded");
            }
            tracing::info!(host = %host, database = %config.db_name, "session store enabled");
            Some(store)
        }
        None => {
            tracing::warn!("no database configured, snapshots will not survive restarts");
            None
        }
    };

    let codes = Arc::new(LobbyCodes::open(&config.data_dir, config.code_seed).await?);
    let cache = Arc::new(SnapshotCache::new(config.max_save_games, store));

    let state = AppState {
        config: Arc::new(config.clone()),
        broker: Arc::new(Mutex::new(Broker::default())),
        cache: cache.clone(),
        codes,
    };

    // Periodic bulk flush of the snapshot cache to the store
    let flush_period = Duration::from_secs(config.flush_interval_secs);
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(flush_period);
        timer.tick().await;
        loop {
            timer.tick().await;
            cache.flush_all().await;
        }
    });

    // Build router, bind, and serve
    let app = routes::build_router(state);
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
