use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use xadmin_perm::cache::{MemoryCache, RedisCache, SharedCache};
use xadmin_perm::config::{CacheBackendKind, Config};
use xadmin_perm::store::{DbStore, MemoryStore, SharedStore};
use xadmin_perm::{catalog, db, routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|arg| arg == "-help" || arg == "--help") {
        println!("Usage: xadmin-perm [OPTIONS]");
        println!("Options:");
        println!("  -config <path>  Path to configuration file (default: ./etc/xadmin.toml)");
        println!("  -help, --help   Print this help message");
        return Ok(());
    }

    let config_path = args
        .iter()
        .skip_while(|arg| arg.as_str() != "-config")
        .nth(1)
        .map(|s| s.to_string())
        .unwrap_or_else(|| "./etc/xadmin.toml".to_string());

    // Load configuration first (before logging init)
    let config = Config::load(&config_path).unwrap_or_else(|e| {
        eprintln!("Could not load config file: {}, using defaults", e);
        Config::default()
    });

    // Initialize logging
    // Priority: RUST_LOG env var > config file > default "info"
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting xadmin permission service...");
    info!("Loading configuration from: {}", config_path);

    let store: SharedStore = if config.database.is_memory() {
        info!("Using in-memory store, data is lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        let conn = db::init_database(&config.database).await.map_err(|e| {
            tracing::error!("Database initialization failed: {}", e);
            anyhow::anyhow!("Database initialization failed: {}", e)
        })?;
        Arc::new(DbStore::new(conn))
    };

    let cache: SharedCache = match config.cache.backend {
        CacheBackendKind::Memory => {
            let cache = Arc::new(MemoryCache::new());
            cache.spawn_sweeper(Duration::from_secs(config.cache.sweep_interval_secs.max(1)));
            cache
        }
        CacheBackendKind::Redis => {
            info!("Using redis cache at {}", config.cache.redis_url);
            Arc::new(RedisCache::open(&config.cache.redis_url)?)
        }
    };

    if config.permission.sync_model_fields {
        catalog::sync_model_fields(&store).await;
    }

    let state = AppState::new(config.clone(), store, cache);
    let app = routes::create_router(state);

    let addr: SocketAddr = config.addr.parse().unwrap_or_else(|_| {
        tracing::warn!("Invalid address '{}', using default 0.0.0.0:8080", config.addr);
        SocketAddr::from(([0, 0, 0, 0], 8080))
    });

    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
