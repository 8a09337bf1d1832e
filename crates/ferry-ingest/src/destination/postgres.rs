//! PostgreSQL destination
//!
//! Each collection is its own table:
//!
//! ```sql
//! CREATE TABLE "<name>" (
//!     key        TEXT PRIMARY KEY,
//!     data       JSONB NOT NULL,
//!     from_key   TEXT,
//!     to_key     TEXT,
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! ```
//!
//! and the kind of every collection is recorded in `ferry_collections`.
//! Collection names are interpolated into SQL, so they must be plain
//! identifiers; anything else is rejected before a statement is built. Names
//! are capped at 50 characters so the derived index names stay within the
//! 63-byte identifier limit.

use super::{
    missing_collection, CollectionKind, DestinationRecord, DestinationStore, EdgeEnds,
    UpsertOutcome,
};
use crate::config::DestinationConfig;
use async_trait::async_trait;
use ferry_common::{FerryError, Result};
use regex::Regex;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::sync::OnceLock;
use std::time::Duration;

const REGISTRY_TABLE: &str = "ferry_collections";

/// Destination storing collections as Postgres tables
#[derive(Debug, Clone)]
pub struct PostgresDestination {
    pool: PgPool,
}

impl PostgresDestination {
    /// Open a pool and make sure the registry table exists
    pub async fn connect(config: &DestinationConfig) -> Result<Self> {
        config.validate()?;

        let mut options: PgConnectOptions = config
            .url
            .parse()
            .map_err(|e| FerryError::config(format!("Invalid FERRY_DB_URL: {e}")))?;
        options = options.database(&config.database).username(&config.username);
        if !config.password.is_empty() {
            options = options.password(&config.password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(FerryError::database)?;

        tracing::info!(
            database = %config.database,
            max_connections = config.max_connections,
            "Destination connection pool created"
        );

        let destination = Self::from_pool(pool);
        destination.init_registry().await?;
        Ok(destination)
    }

    /// Wrap an existing pool; call [`init_registry`](Self::init_registry) before use
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_registry(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {REGISTRY_TABLE} (
                name       TEXT PRIMARY KEY,
                kind       TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(FerryError::database)?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn require_kind(&self, name: &str) -> Result<CollectionKind> {
        self.collection_kind(name)
            .await?
            .ok_or_else(|| missing_collection(name))
    }
}

// Literal pattern, cannot fail to compile
#[allow(clippy::unwrap_used)]
fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,49}$").unwrap())
}

/// Quote a collection name for use as a table identifier
fn table_ident(name: &str) -> Result<String> {
    if name == REGISTRY_TABLE || !identifier_pattern().is_match(name) {
        return Err(FerryError::validation(format!(
            "Collection name '{name}' is not a valid table identifier"
        )));
    }
    Ok(format!("\"{name}\""))
}

/// Index on one edge endpoint column of an already validated collection
fn index_ident(name: &str, column: &str) -> String {
    format!("\"{name}_{column}_idx\"")
}

#[async_trait]
impl DestinationStore for PostgresDestination {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn collection_kind(&self, name: &str) -> Result<Option<CollectionKind>> {
        let sql = format!("SELECT kind FROM {REGISTRY_TABLE} WHERE name = $1");
        let kind: Option<String> = sqlx::query_scalar(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(FerryError::database)?;

        kind.map(|k| k.parse()).transpose()
    }

    async fn list_collections(&self) -> Result<Vec<(String, CollectionKind)>> {
        let sql = format!("SELECT name, kind FROM {REGISTRY_TABLE} ORDER BY name");
        let rows: Vec<(String, String)> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(FerryError::database)?;

        rows.into_iter()
            .map(|(name, kind)| kind.parse().map(|kind| (name, kind)))
            .collect()
    }

    async fn create_collection(&self, name: &str, kind: CollectionKind) -> Result<()> {
        let table = table_ident(name)?;

        if let Some(existing) = self.collection_kind(name).await? {
            if existing != kind {
                return Err(FerryError::SchemaConflict {
                    name: name.to_string(),
                    existing: existing.to_string(),
                    requested: kind.to_string(),
                });
            }
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(FerryError::database)?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                key        TEXT PRIMARY KEY,
                data       JSONB NOT NULL,
                from_key   TEXT,
                to_key     TEXT,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        ))
        .execute(&mut *tx)
        .await
        .map_err(FerryError::database)?;

        if kind == CollectionKind::Edge {
            for column in ["from_key", "to_key"] {
                sqlx::query(&format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {table} ({column})",
                    index_ident(name, column)
                ))
                .execute(&mut *tx)
                .await
                .map_err(FerryError::database)?;
            }
        }

        sqlx::query(&format!(
            "INSERT INTO {REGISTRY_TABLE} (name, kind) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING"
        ))
        .bind(name)
        .bind(kind.as_str())
        .execute(&mut *tx)
        .await
        .map_err(FerryError::database)?;

        tx.commit().await.map_err(FerryError::database)?;
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        let table = table_ident(name)?;
        self.require_kind(name).await?;

        let mut tx = self.pool.begin().await.map_err(FerryError::database)?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&mut *tx)
            .await
            .map_err(FerryError::database)?;
        sqlx::query(&format!("DELETE FROM {REGISTRY_TABLE} WHERE name = $1"))
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(FerryError::database)?;
        tx.commit().await.map_err(FerryError::database)?;
        Ok(())
    }

    async fn truncate_collection(&self, name: &str) -> Result<()> {
        let table = table_ident(name)?;
        self.require_kind(name).await?;

        sqlx::query(&format!("TRUNCATE TABLE {table}"))
            .execute(&self.pool)
            .await
            .map_err(FerryError::database)?;
        Ok(())
    }

    async fn count(&self, name: &str) -> Result<u64> {
        let table = table_ident(name)?;
        self.require_kind(name).await?;

        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .map_err(FerryError::database)?;
        Ok(count.max(0) as u64)
    }

    async fn upsert(&self, record: &DestinationRecord) -> Result<UpsertOutcome> {
        let table = table_ident(&record.collection)?;
        let kind = self.require_kind(&record.collection).await?;
        record.check_kind(kind)?;

        let (from_key, to_key) = match &record.edge {
            Some(ends) => (Some(ends.from.as_str()), Some(ends.to.as_str())),
            None => (None, None),
        };

        // xmax is zero only for a freshly inserted row version
        let inserted: bool = sqlx::query_scalar(&format!(
            "INSERT INTO {table} (key, data, from_key, to_key, updated_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (key) DO UPDATE
                SET data = EXCLUDED.data,
                    from_key = EXCLUDED.from_key,
                    to_key = EXCLUDED.to_key,
                    updated_at = now()
             RETURNING (xmax = 0)"
        ))
        .bind(&record.key)
        .bind(Json(&record.data))
        .bind(from_key)
        .bind(to_key)
        .fetch_one(&self.pool)
        .await
        .map_err(FerryError::database)?;

        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<DestinationRecord>> {
        let table = table_ident(collection)?;
        self.require_kind(collection).await?;

        let row: Option<(String, Json<Value>, Option<String>, Option<String>)> =
            sqlx::query_as(&format!(
                "SELECT key, data, from_key, to_key FROM {table} WHERE key = $1"
            ))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(FerryError::database)?;

        Ok(row.map(|(key, Json(data), from_key, to_key)| DestinationRecord {
            collection: collection.to_string(),
            key,
            data,
            edge: match (from_key, to_key) {
                (Some(from), Some(to)) => Some(EdgeEnds { from, to }),
                _ => None,
            },
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_table_ident_accepts_plain_names() {
        assert_eq!(table_ident("posts").unwrap(), "\"posts\"");
        assert_eq!(table_ident("_replies_2024").unwrap(), "\"_replies_2024\"");
    }

    #[test]
    fn test_table_ident_rejects_injection() {
        for bad in ["", "1posts", "posts; DROP TABLE x", "po\"sts", "a-b", REGISTRY_TABLE] {
            assert!(
                matches!(table_ident(bad), Err(FerryError::Validation(_))),
                "accepted {bad:?}"
            );
        }
        assert!(table_ident(&"a".repeat(51)).is_err());
        assert!(table_ident(&"a".repeat(50)).is_ok());
    }

    #[test]
    fn test_index_names_fit_and_differ() {
        let longest = "a".repeat(50);
        table_ident(&longest).unwrap();

        let from = index_ident(&longest, "from_key");
        let to = index_ident(&longest, "to_key");
        // quoted, so two bytes over the raw identifier
        assert!(from.len() - 2 <= 63, "{from} too long");
        assert!(to.len() - 2 <= 63, "{to} too long");
        assert_ne!(from, to);
    }
}
