use std::time::Duration;

use anyhow::Context;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use log::{info, warn};
use moka::future::Cache;
use tokio_postgres::NoTls;

use crate::config::PostgresSettings;

const SCHEMA_SQL: &str = include_str!("../../../schema/postgres.sql");

const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Split SQL into statements, respecting dollar-quoted strings.
/// This handles PostgreSQL function definitions that use $$ ... $$ blocks.
pub(crate) fn split_sql_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut start = 0;
    let mut in_dollar_quote = false;
    let bytes = sql.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if i + 1 < bytes.len() && bytes[i] == b'$' && bytes[i + 1] == b'$' {
            in_dollar_quote = !in_dollar_quote;
            i += 2;
            continue;
        }

        // Only treat semicolon as statement separator when not inside dollar-quote
        if bytes[i] == b';' && !in_dollar_quote {
            let stmt = &sql[start..i];
            if !stmt.trim().is_empty() {
                statements.push(stmt);
            }
            start = i + 1;
        }
        i += 1;
    }

    if start < sql.len() {
        let stmt = &sql[start..];
        if !stmt.trim().is_empty() {
            statements.push(stmt);
        }
    }

    statements
}

/// PostgreSQL snapshot store with connection pooling.
///
/// Owns a `deadpool-postgres` pool; every operation checks a connection out
/// for its own duration only. Asset ids are cached after their first lookup
/// or registration.
#[derive(Clone)]
pub struct PostgresStore {
    pub pool: Pool,
    pub(super) assets: Cache<String, i32>,
}

impl PostgresStore {
    pub async fn new(settings: &PostgresSettings) -> anyhow::Result<Self> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&settings.host)
            .port(settings.port)
            .user(&settings.user)
            .password(&settings.password)
            .dbname(&settings.database);

        Self::connect(pg_config, settings.pool_size).await
    }

    /// Connect from a `postgres://` connection string.
    pub async fn from_url(url: &str, pool_size: usize) -> anyhow::Result<Self> {
        let pg_config: tokio_postgres::Config =
            url.parse().context("Invalid PostgreSQL connection string")?;
        Self::connect(pg_config, pool_size).await
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool) -> Self {
        Self {
            pool,
            assets: Cache::builder().max_capacity(10_000).build(),
        }
    }

    async fn connect(pg_config: tokio_postgres::Config, pool_size: usize) -> anyhow::Result<Self> {
        info!("Connecting to PostgreSQL");

        let mut last_error = String::from("Unknown error");

        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            let mgr_config = ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            };

            let mgr = Manager::from_config(pg_config.clone(), NoTls, mgr_config);
            let pool = Pool::builder(mgr)
                .max_size(pool_size)
                .build()
                .context("Failed to create PostgreSQL connection pool")?;

            // Test the connection
            match pool.get().await {
                Ok(_conn) => {
                    info!("Successfully connected to PostgreSQL");
                    return Ok(Self::from_pool(pool));
                },
                Err(e) => {
                    last_error = e.to_string();

                    if attempt == MAX_CONNECT_ATTEMPTS {
                        break;
                    }

                    let delay = Duration::from_millis(100 * 2_u64.pow(attempt));
                    warn!(
                        "Failed to connect to PostgreSQL (attempt {}/{}), retrying in {:?}...",
                        attempt, MAX_CONNECT_ATTEMPTS, delay
                    );
                    tokio::time::sleep(delay).await;
                },
            }
        }

        Err(anyhow::anyhow!(
            "Failed to connect to PostgreSQL after {} attempts: {}",
            MAX_CONNECT_ATTEMPTS,
            last_error
        ))
    }

    /// Apply the bundled schema. Every statement is idempotent.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        info!("Running PostgreSQL migrations");
        let client = self.pool.get().await?;

        for stmt in split_sql_statements(SCHEMA_SQL) {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            client
                .execute(stmt, &[])
                .await
                .with_context(|| format!("Failed to execute migration statement: {}", stmt))?;
        }

        info!("PostgreSQL schema applied successfully");
        Ok(())
    }

    /// Close the pool. Checked-out connections are dropped when returned.
    pub fn close(&self) {
        self.pool.close();
        info!("PostgreSQL pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_respects_dollar_quotes() {
        let sql = "CREATE TABLE a (x INT);\nCREATE FUNCTION f() RETURNS void AS $$ BEGIN PERFORM 1; END; $$ LANGUAGE plpgsql;\nSELECT 1";
        let statements = split_sql_statements(sql);
        assert_eq!(statements.len(), 3);
        assert!(statements[1].contains("PERFORM 1; END;"));
        assert_eq!(statements[2].trim(), "SELECT 1");
    }

    #[test]
    fn test_bundled_schema_splits() {
        let statements = split_sql_statements(SCHEMA_SQL);
        assert!(statements.iter().any(|s| s.contains("lendwatch.market_snapshots (")));
        assert!(statements.iter().any(|s| s.contains("lendwatch.assets (")));
        assert!(statements.iter().any(|s| s.contains("lendwatch.token_metrics (")));
    }
}
