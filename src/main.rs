//! Interview rooms real-time server.
//!
//! Loads configuration, initialises tracing, builds the selected backends,
//! wires a [`RealtimeNode`] and serves the WebSocket endpoint until Ctrl-C.

use std::sync::Arc;

use axum::Router;
use http::HeaderValue;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use interview_rooms_realtime::adapters::archive::{InMemoryEventArchive, PostgresEventArchive};
use interview_rooms_realtime::adapters::auth::JwtSessionValidator;
use interview_rooms_realtime::adapters::bus::{
    InMemoryEventBus, NoopEventBus, RedisBusConfig, RedisEventBus,
};
use interview_rooms_realtime::adapters::hot_store::{
    InMemoryHotEventStore, NoopHotEventStore, RedisHotEventStore,
};
use interview_rooms_realtime::adapters::rooms::{
    InMemoryParticipantRepository, InMemoryRoomDirectory,
};
use interview_rooms_realtime::adapters::websocket::websocket_router;
use interview_rooms_realtime::application::Archiver;
use interview_rooms_realtime::config::{
    AppConfig, BusBackend, ConfigError, HotStoreBackend, ServerConfig,
};
use interview_rooms_realtime::ports::{EventArchive, EventBus, HotEventStore};
use interview_rooms_realtime::{NodeBackends, RealtimeNode};

/// Why the server could not start.
#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid log filter: {0}")]
    LogFilter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Redis: {0}")]
    Redis(String),

    #[error("Database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Server: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = AppConfig::load()?;
    init_tracing(&config.server)?;
    config
        .validate()
        .map_err(|e| StartupError::Config(e.into()))?;

    let addr = config
        .server
        .socket_addr()
        .map_err(|e| StartupError::Config(e.into()))?;
    let server_id = config.server.server_id();

    tracing::info!(
        server_id = %server_id,
        environment = ?config.server.environment,
        hot_store = ?config.realtime.hot_store,
        bus = ?config.realtime.bus,
        "Starting interview rooms realtime server"
    );

    let backends = build_backends(&config).await?;
    let node = RealtimeNode::new(server_id, backends.clone(), config.realtime.session());

    let archiver_task = if config.archiver.enabled {
        let archiver = Archiver::new(
            Arc::clone(&backends.hot_store),
            Arc::clone(&backends.archive),
            config.archiver.settings(),
        );
        let shutdown = node.shutdown_signal();
        Some(tokio::spawn(async move { archiver.run(shutdown).await }))
    } else {
        tracing::info!("Archiver disabled");
        None
    };

    let app = http_router(&node, &config.server);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening; WebSocket endpoint /rooms/:room_id/ws");

    let node = Arc::new(node);
    let signal_node = Arc::clone(&node);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received, closing connections");
            signal_node.shutdown();
        })
        .await?;

    wait_for_archiver(archiver_task).await;
    tracing::info!("Server stopped cleanly");
    Ok(())
}

fn init_tracing(server: &ServerConfig) -> Result<(), StartupError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&server.log_level))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if server.json_logs() {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn build_backends(config: &AppConfig) -> Result<NodeBackends, StartupError> {
    let redis_client = if config.realtime.needs_redis() {
        let client = redis::Client::open(config.redis.url.as_str())
            .map_err(|e| StartupError::Redis(e.to_string()))?;
        Some(client)
    } else {
        None
    };

    let hot_store: Arc<dyn HotEventStore> = match (config.realtime.hot_store, &redis_client) {
        (HotStoreBackend::Redis, Some(client)) => {
            let conn = tokio::time::timeout(
                config.redis.timeout(),
                redis::aio::ConnectionManager::new(client.clone()),
            )
            .await
            .map_err(|_| StartupError::Redis("connection timed out".to_string()))?
            .map_err(|e| StartupError::Redis(e.to_string()))?;
            Arc::new(RedisHotEventStore::new(conn, config.redis.key_prefix.clone()))
        }
        (HotStoreBackend::None, _) => Arc::new(NoopHotEventStore::new()),
        _ => Arc::new(InMemoryHotEventStore::new()),
    };

    let bus: Arc<dyn EventBus> = match (config.realtime.bus, redis_client) {
        (BusBackend::Redis, Some(client)) => {
            let bus_config = RedisBusConfig {
                reconnect_min: config.redis.reconnect_min(),
                reconnect_max: config.redis.reconnect_max(),
            };
            let bus = tokio::time::timeout(
                config.redis.timeout(),
                RedisEventBus::connect(client, bus_config),
            )
            .await
            .map_err(|_| StartupError::Redis("connection timed out".to_string()))?
            .map_err(|e| StartupError::Redis(e.to_string()))?;
            Arc::new(bus)
        }
        (BusBackend::Memory, _) => Arc::new(InMemoryEventBus::new()),
        _ => Arc::new(NoopEventBus::new()),
    };

    let db = &config.database;
    let archive: Arc<dyn EventArchive> = if let Some(url) = db.url() {
        let pool = PgPoolOptions::new()
            .min_connections(db.min_connections)
            .max_connections(db.max_connections)
            .acquire_timeout(db.acquire_timeout())
            .connect(url)
            .await?;
        if db.run_migrations {
            sqlx::migrate!("./migrations").run(&pool).await?;
            tracing::info!("Archive migrations applied");
        }
        Arc::new(PostgresEventArchive::new(pool))
    } else {
        tracing::warn!("No database configured, archived events live in memory");
        Arc::new(InMemoryEventArchive::new())
    };

    let rooms = if config.realtime.open_unknown_rooms {
        InMemoryRoomDirectory::open_unknown_rooms()
    } else {
        InMemoryRoomDirectory::new()
    };

    Ok(NodeBackends {
        hot_store,
        bus,
        archive,
        validator: Arc::new(JwtSessionValidator::new(
            &config.auth.jwt_secret,
            config.auth.issuer.as_deref(),
            config.auth.audience.as_deref(),
        )),
        rooms: Arc::new(rooms),
        participants: Arc::new(InMemoryParticipantRepository::new()),
    })
}

fn http_router(node: &RealtimeNode, server: &ServerConfig) -> Router {
    websocket_router().with_state(node.websocket_state()).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&server.cors_origins_list())),
    )
}

/// Permissive when no origins are configured.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring unparsable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new().allow_origin(AllowOrigin::list(parsed))
}

async fn wait_for_archiver(task: Option<tokio::task::JoinHandle<()>>) {
    let Some(task) = task else {
        return;
    };
    if tokio::time::timeout(std::time::Duration::from_secs(5), task)
        .await
        .is_err()
    {
        tracing::warn!("Archiver did not stop in time");
    }
}
