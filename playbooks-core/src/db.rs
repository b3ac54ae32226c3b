//! Postgres pool for the playbook store, sized from the `[database]` section.

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("database url is not set")]
    MissingUrl,

    #[error("pool_min_connections ({min}) exceeds pool_max_connections ({max})")]
    PoolBounds { min: u32, max: u32 },

    #[error("could not reach the playbook database: {0}")]
    Unreachable(#[from] sqlx::Error),

    #[error("playbook schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

fn pool_options(config: &DatabaseConfig) -> Result<PgPoolOptions, DatabaseError> {
    if config.url.trim().is_empty() {
        return Err(DatabaseError::MissingUrl);
    }
    if config.pool_min_connections > config.pool_max_connections {
        return Err(DatabaseError::PoolBounds {
            min: config.pool_min_connections,
            max: config.pool_max_connections,
        });
    }

    Ok(PgPoolOptions::new()
        .min_connections(config.pool_min_connections)
        .max_connections(config.pool_max_connections)
        .acquire_timeout(Duration::from_secs(config.pool_acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs)))
}

/// Opens the pool. With `migrate` set the playbook schema is brought up to date
/// before the pool is handed out.
pub async fn open_pool(config: &DatabaseConfig, migrate: bool) -> Result<PgPool, DatabaseError> {
    let pool = pool_options(config)?.connect(&config.url).await?;
    debug!(max_connections = config.pool_max_connections, "Playbook pool open");

    if migrate {
        MIGRATOR.run(&pool).await?;
        info!("Playbook schema is up to date");
    }
    Ok(pool)
}

/// Count of successfully applied schema migrations.
pub async fn applied_migrations(pool: &PgPool) -> Result<i64, DatabaseError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM _sqlx_migrations WHERE success",
    )
    .fetch_one(pool)
    .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_options_need_a_url() {
        let config = DatabaseConfig {
            url: "  ".to_string(),
            ..DatabaseConfig::default()
        };
        assert!(matches!(pool_options(&config), Err(DatabaseError::MissingUrl)));
    }

    #[test]
    fn test_pool_options_reject_inverted_bounds() {
        let config = DatabaseConfig {
            pool_min_connections: 8,
            pool_max_connections: 2,
            ..DatabaseConfig::default()
        };
        assert!(matches!(
            pool_options(&config),
            Err(DatabaseError::PoolBounds { min: 8, max: 2 })
        ));
        assert!(pool_options(&DatabaseConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_open_pool_fails_fast_without_url() {
        let config = DatabaseConfig {
            url: String::new(),
            ..DatabaseConfig::default()
        };
        assert!(matches!(
            open_pool(&config, true).await,
            Err(DatabaseError::MissingUrl)
        ));
    }
}
