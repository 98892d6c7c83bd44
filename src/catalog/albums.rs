//! `albums` dimension table (§3 "Album / Artist / Genre").

use sqlx::SqlitePool;

use crate::error::Result;
use crate::model::Album;

pub async fn get_or_create(pool: &SqlitePool, name: &str) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO albums (name) VALUES (?1)
         ON CONFLICT(name) DO UPDATE SET name = excluded.name
         RETURNING id",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<Album>> {
    let row = sqlx::query_as::<_, Album>("SELECT id, name, sort_order FROM albums WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Album>> {
    let rows = sqlx::query_as::<_, Album>("SELECT id, name, sort_order FROM albums ORDER BY sort_order, name")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn delete_orphans(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM albums WHERE id NOT IN (SELECT album_id FROM tracks WHERE album_id IS NOT NULL)",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let id1 = get_or_create(catalog.pool(), "Abbey Road").await.unwrap();
        let id2 = get_or_create(catalog.pool(), "Abbey Road").await.unwrap();
        assert_eq!(id1, id2);
    }
}
