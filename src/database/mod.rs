//! Postgres storage: connection pool, schema migrations and the repositories behind the
//! service traits. `memory` holds the in-process equivalents.

pub mod error;
pub mod memory;
pub mod order_repository;
pub mod payment_event_repository;
pub mod product_repository;

use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::{Duration, Instant};
use tracing::{error, info};

use self::error::{DatabaseError, DatabaseErrorKind};
use crate::config::DatabaseConfig;

/// Connections are recycled after this long even when healthy
const CONNECTION_MAX_LIFETIME: Duration = Duration::from_secs(30 * 60);
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .acquire_timeout(Duration::from_secs(config.connection_timeout))
        .idle_timeout(Duration::from_secs(
            config.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
        ))
        .max_lifetime(CONNECTION_MAX_LIFETIME)
}

/// Open the pool described by `config` and check out one connection before returning it.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    let Some(url) = config.url.as_deref() else {
        return Err(DatabaseError::new(DatabaseErrorKind::ConnectionError {
            message: "DATABASE_URL is not set".to_string(),
        }));
    };

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        acquire_timeout_secs = config.connection_timeout,
        "connecting to postgres"
    );
    let pool = pool_options(config).connect(url).await.map_err(|e| {
        error!(error = %e, "postgres pool could not be opened");
        DatabaseError::from_sqlx(e)
    })?;

    let latency = ping(&pool).await?;
    info!(latency_ms = latency.as_millis() as u64, "postgres reachable");
    Ok(pool)
}

/// Bring the schema up to date with `migrations/`
pub async fn migrate(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        error!(error = %e, "schema migration failed");
        DatabaseError::new(DatabaseErrorKind::Unknown {
            message: format!("migration failed: {}", e),
        })
    })?;
    info!("schema is up to date");
    Ok(())
}

/// One round trip to the server
pub async fn ping(pool: &PgPool) -> Result<Duration, DatabaseError> {
    let started = Instant::now();
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
    Ok(started.elapsed())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolUsage {
    pub open: u32,
    pub idle: u32,
}

impl PoolUsage {
    pub fn of(pool: &PgPool) -> Self {
        Self {
            open: pool.size(),
            idle: u32::try_from(pool.num_idle()).unwrap_or(u32::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: Option<&str>) -> DatabaseConfig {
        DatabaseConfig {
            url: url.map(str::to_string),
            max_connections: 8,
            min_connections: 12,
            connection_timeout: 3,
            idle_timeout: None,
            run_migrations: false,
        }
    }

    #[test]
    fn pool_is_sized_from_config() {
        let options = pool_options(&config(None));
        assert_eq!(options.get_max_connections(), 8);
        // never keep more idle connections than the pool may hold
        assert_eq!(options.get_min_connections(), 8);
        assert_eq!(options.get_acquire_timeout(), Duration::from_secs(3));
        assert_eq!(
            options.get_idle_timeout(),
            Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS))
        );
        assert_eq!(options.get_max_lifetime(), Some(CONNECTION_MAX_LIFETIME));
    }

    #[tokio::test]
    async fn connecting_without_a_url_is_a_connection_error() {
        let err = connect(&config(None)).await.expect_err("no url");
        assert!(matches!(err.kind, DatabaseErrorKind::ConnectionError { .. }));
        assert!(err.is_retryable());
    }
}
