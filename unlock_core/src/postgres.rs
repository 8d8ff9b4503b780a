use crate::config::PostgresConfig;
use crate::{Error, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

const MIGRATION_0001: &str = include_str!("../migrations/0001_init.sql");

/// Open a pool shared by every Postgres-backed store.
#[tracing::instrument(level = "debug", skip(cfg))]
pub async fn connect(cfg: &PostgresConfig) -> Result<PgPool> {
    cfg.validate()?;
    PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(cfg.acquire_timeout)
        .connect(&cfg.url)
        .await
        .map_err(|e| Error::backend("connect postgres", e))
}

/// Apply the schema. Every statement is idempotent.
#[tracing::instrument(level = "info", skip(pool))]
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(MIGRATION_0001)
        .execute(pool)
        .await
        .map_err(|e| Error::backend("apply migrations", e))?;
    Ok(())
}
