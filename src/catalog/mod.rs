//! Catalog Store (§4.1): the embedded relational store holding tracks,
//! folders, paths, albums, artists, genres, playlists, and generic
//! key/value metadata.
//!
//! Grounded on the donor's `db/mod.rs` (`init_db`, `SqlitePoolOptions`,
//! upsert-then-`RETURNING` idiom). See DESIGN.md for why schema management
//! is idempotent `CREATE TABLE IF NOT EXISTS` rather than a migration
//! runner.

pub mod albums;
pub mod artists;
pub mod cleanup;
pub mod folders;
pub mod genres;
pub mod meta;
pub mod optimize;
pub mod paths;
pub mod playlists;
pub mod schema;
pub mod tracks;
pub mod transaction;

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::Result;

pub const CATALOG_FILE_NAME: &str = "musik.db";

/// A handle to the catalog's connection pool. Cheaply `Clone`able (it's a
/// pool handle), so every component that needs catalog access holds its own
/// clone rather than sharing a reference.
#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Open (creating if missing) the catalog at `db_path`, run idempotent
    /// schema setup, and return a ready handle. `cache_size` is a SQLite
    /// page-cache tuning knob, not a row-count limit.
    pub async fn open(db_path: &Path, cache_size: i64) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .pragma("cache_size", cache_size.to_string())
            .foreign_keys(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        schema::ensure_schema(&pool).await?;

        tracing::info!(path = %db_path.display(), "catalog opened");
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        schema::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// `ANALYZE` + `VACUUM`, run at the end of the Cleanup state (§4.4
    /// step 6).
    pub async fn analyze_and_vacuum(&self) -> Result<()> {
        sqlx::query("ANALYZE").execute(&self.pool).await?;
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_db_file_and_schema() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("musik.db");
        let catalog = Catalog::open(&db_path, -2000).await.unwrap();
        assert!(db_path.exists());

        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM paths")
            .fetch_one(catalog.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn open_is_idempotent_across_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("musik.db");
        {
            let catalog = Catalog::open(&db_path, -2000).await.unwrap();
            paths::add_path(catalog.pool(), "/music").await.unwrap();
        }
        let catalog = Catalog::open(&db_path, -2000).await.unwrap();
        let all = paths::list_paths(catalog.pool()).await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
