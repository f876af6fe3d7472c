/**
 * Server Configuration
 *
 * Process-level settings read from the environment, plus the optional
 * PostgreSQL pool.
 *
 * # Environment
 *
 * - `SERVER_PORT` - listen port (default 3000)
 * - `DATABASE_URL` - PostgreSQL URL; absent means in-memory storage
 * - `JWT_SECRET` - HS256 secret, required
 * - `COLLAB_CONFIG` - path to an engine TOML file
 *
 * Engine tuning (`COLLAB_FLUSH_INTERVAL_SECS` and friends) is handled by
 * `EngineConfig::load`.
 *
 * # Error Handling
 *
 * A missing or malformed variable is a `ConfigError`. Leaving
 * `DATABASE_URL` unset selects the in-memory store; a URL that is set but
 * cannot be connected to or migrated is a `StartupError`, never a silent
 * switch to memory.
 */
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use sqlx::migrate::MigrateError;
use sqlx::PgPool;
use thiserror::Error;

use crate::shared::{ConfigError, EngineConfig};

pub const DEFAULT_PORT: u16 = 3000;

/// Failures that keep the server from starting
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to connect to database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to run database migrations: {0}")]
    Migration(#[from] MigrateError),
}

/// Process configuration for `collab-server`
#[derive(Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub engine_config_path: Option<PathBuf>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("engine_config_path", &self.engine_config_path)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("SERVER_PORT") {
            Ok(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::invalid("SERVER_PORT", format!("not a port: {:?}", raw)))?,
            Err(_) => DEFAULT_PORT,
        };

        let jwt_secret = std::env::var("JWT_SECRET")
            .ok()
            .filter(|secret| !secret.trim().is_empty())
            .ok_or_else(|| ConfigError::invalid("JWT_SECRET", "must be set"))?;

        Ok(Self {
            port,
            database_url: std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            jwt_secret,
            engine_config_path: std::env::var_os("COLLAB_CONFIG").map(PathBuf::from),
        })
    }

    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    /// Engine settings: TOML file if configured, then `COLLAB_*` overrides
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        EngineConfig::load(self.engine_config_path.as_deref())
    }
}

/// Connect to PostgreSQL and run the embedded migrations
///
/// # Returns
///
/// - `Ok(Some(PgPool))` once connected and migrated
/// - `Ok(None)` if `url` is `None`
///
/// # Errors
///
/// A configured database that refuses the connection or fails a migration.
pub async fn load_database(url: Option<&str>) -> Result<Option<PgPool>, StartupError> {
    let Some(database_url) = url else {
        tracing::warn!("[Store] DATABASE_URL not set. Documents will be kept in memory only.");
        return Ok(None);
    };

    tracing::info!("[Store] Connecting to database...");

    let pool = PgPool::connect(database_url).await.map_err(|e| {
        tracing::error!("[Store] Failed to create database connection pool: {:?}", e);
        e
    })?;

    tracing::info!("[Store] Running database migrations...");
    sqlx::migrate!().run(&pool).await.map_err(|e| {
        tracing::error!("[Store] Failed to run database migrations: {}", e);
        e
    })?;
    tracing::info!("[Store] Database migrations completed successfully");

    Ok(Some(pool))
}
