//! PostgreSQL pool and schema migrations for the catalog.

use crate::config::DatabaseConfig;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

/// Connection pool shared by the catalog store and the series-code registry.
#[derive(Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Connects using the configured pool limits.
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    /// * `settings` - Pool size and acquire timeout
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn connect(database_url: &str, settings: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
            .connect(database_url)
            .await?;

        info!(
            max_connections = settings.max_connections,
            "Catalog database pool established"
        );

        Ok(Self { pool })
    }

    /// Underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the catalog schema: base and derivative instruments, series
    /// counters and the series-code registry.
    ///
    /// # Errors
    /// Returns an error if a migration fails.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Catalog schema is up to date");
        Ok(())
    }
}
