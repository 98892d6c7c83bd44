//! `folders` table: directories discovered under a sync path (§3 "Folder").

use sqlx::SqlitePool;

use crate::error::Result;
use crate::model::Folder;

/// Upsert a folder keyed by (name, parent, path) — the Indexer calls this on
/// every directory entry during the walk (§4.4 step 4).
pub async fn upsert_folder(
    pool: &SqlitePool,
    name: &str,
    parent_id: Option<i64>,
    path_id: i64,
    relative_path: &str,
) -> Result<i64> {
    if let Some(existing) = find_folder(pool, name, parent_id, path_id).await? {
        return Ok(existing.id);
    }
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO folders (name, parent_id, path_id, relative_path)
         VALUES (?1, ?2, ?3, ?4) RETURNING id",
    )
    .bind(name)
    .bind(parent_id)
    .bind(path_id)
    .bind(relative_path)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn find_folder(
    pool: &SqlitePool,
    name: &str,
    parent_id: Option<i64>,
    path_id: i64,
) -> Result<Option<Folder>> {
    let row = sqlx::query_as::<_, Folder>(
        "SELECT id, name, parent_id, path_id, relative_path FROM folders
         WHERE name = ?1 AND parent_id IS ?2 AND path_id = ?3",
    )
    .bind(name)
    .bind(parent_id)
    .bind(path_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn folders_under_path(pool: &SqlitePool, path_id: i64) -> Result<Vec<Folder>> {
    let rows = sqlx::query_as::<_, Folder>(
        "SELECT id, name, parent_id, path_id, relative_path FROM folders WHERE path_id = ?1",
    )
    .bind(path_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn delete_folder(pool: &SqlitePool, folder_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM folders WHERE id = ?1")
        .bind(folder_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{paths, Catalog};

    #[tokio::test]
    async fn upsert_folder_is_idempotent() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let path_id = paths::add_path(catalog.pool(), "/music").await.unwrap();

        let id1 = upsert_folder(catalog.pool(), "a", None, path_id, "a")
            .await
            .unwrap();
        let id2 = upsert_folder(catalog.pool(), "a", None, path_id, "a")
            .await
            .unwrap();
        assert_eq!(id1, id2);
    }
}
