//! Access to the relational store.
//!
//! The queue only sees a [`PersistenceGateway`]: a single-row insert, a health
//! probe and a close. [`PgGateway`] implements it on top of a `sqlx` pool.

use crate::server::config::StoreConfig;
use core::{future::Future, time::Duration};
use pgsink_core::{Error, Result, WorkItem};
use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};

const CREATE_TABLE_QUERY: &str = r#"CREATE TABLE IF NOT EXISTS post_data ("timestamp" TIMESTAMPTZ NOT NULL, "data" BYTEA NOT NULL)"#;
const INSERT_QUERY: &str = r#"INSERT INTO post_data ("timestamp", "data") VALUES ($1, $2)"#;
const PROBE_QUERY: &str = "SELECT now()";

pub trait PersistenceGateway: Send + Sync + 'static {
    /// Inserts one row.
    fn save(&self, item: &WorkItem) -> impl Future<Output = Result<()>> + Send;

    /// Runs a trivial round trip. A failed probe is logged, never raised.
    fn probe(&self) -> impl Future<Output = bool> + Send;

    /// Releases every connection.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// A Postgres connection pool.
#[derive(Debug, Clone)]
pub struct PgGateway {
    pool: PgPool,
}

impl PgGateway {
    /// Opens the pool and checks that one connection can be established.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the store is unreachable.
    pub async fn init(config: &StoreConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(persistence)?;

        tracing::info!(
            "PG pool connected to {}:{}/{}",
            config.host,
            config.port,
            config.database
        );
        Ok(Self { pool })
    }

    /// Creates the `post_data` table if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE_QUERY)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(())
    }
}

impl PersistenceGateway for PgGateway {
    async fn save(&self, item: &WorkItem) -> Result<()> {
        sqlx::query(INSERT_QUERY)
            .bind(item.timestamp)
            .bind(item.payload.as_ref())
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(())
    }

    async fn probe(&self) -> bool {
        match sqlx::query(PROBE_QUERY).execute(&self.pool).await {
            Ok(_) => {
                tracing::debug!("PG pool is healthy");
                true
            }
            Err(e) => {
                tracing::error!("PG pool health probe failed: {e}");
                false
            }
        }
    }

    async fn close(&self) {
        tracing::info!("Closing PG pool...");
        self.pool.close().await;
        tracing::info!("PG pool closed.");
    }
}

fn persistence(e: sqlx::Error) -> Error {
    Error::Persistence {
        reason: e.to_string(),
    }
}
