//! `paths` table: configured scan roots (§3 "Path").

use sqlx::SqlitePool;

use crate::error::Result;
use crate::model::SyncPath;

/// Idempotent: re-adding an existing path is a no-op (§3: "Adding is
/// idempotent").
pub async fn add_path(pool: &SqlitePool, path: &str) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO paths (path) VALUES (?1)
         ON CONFLICT(path) DO UPDATE SET path = excluded.path
         RETURNING id",
    )
    .bind(path)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Removal cascades to folders and tracks under it (§3: "removal cascades").
pub async fn remove_path(pool: &SqlitePool, path: &str) -> Result<()> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM paths WHERE path = ?1")
        .bind(path)
        .fetch_optional(pool)
        .await?;
    let Some((path_id,)) = row else { return Ok(()) };

    sqlx::query(
        "DELETE FROM tracks WHERE folder_id IN (SELECT id FROM folders WHERE path_id = ?1)",
    )
    .bind(path_id)
    .execute(pool)
    .await?;
    sqlx::query("DELETE FROM folders WHERE path_id = ?1")
        .bind(path_id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM paths WHERE id = ?1")
        .bind(path_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_paths(pool: &SqlitePool) -> Result<Vec<SyncPath>> {
    let rows = sqlx::query_as::<_, SyncPath>("SELECT id, path FROM paths ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Delete any `folders` rows whose `path_id` no longer exists in `paths`
/// (§4.4 step 2, run right after draining the add/remove queue).
pub async fn prune_orphaned_folders(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM folders WHERE path_id NOT IN (SELECT id FROM paths)")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[tokio::test]
    async fn add_path_is_idempotent() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let id1 = add_path(catalog.pool(), "/music").await.unwrap();
        let id2 = add_path(catalog.pool(), "/music").await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(list_paths(catalog.pool()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_path_cascades_to_folders_and_tracks() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let path_id = add_path(catalog.pool(), "/music").await.unwrap();
        sqlx::query("INSERT INTO folders (name, parent_id, path_id, relative_path) VALUES ('a', NULL, ?1, 'a')")
            .bind(path_id)
            .execute(catalog.pool())
            .await
            .unwrap();

        remove_path(catalog.pool(), "/music").await.unwrap();

        assert!(list_paths(catalog.pool()).await.unwrap().is_empty());
        let folders: i64 = sqlx::query_scalar("SELECT count(*) FROM folders")
            .fetch_one(catalog.pool())
            .await
            .unwrap();
        assert_eq!(folders, 0);
    }
}
