//! `playlists` / `playlist_tracks`: named ordered lists of track references
//! by external_id (§3 "Playlist"). Rows are created by the Metadata Proxy,
//! not the Indexer.

use sqlx::SqlitePool;

use crate::error::Result;
use crate::model::Playlist;

pub async fn create(pool: &SqlitePool, name: &str) -> Result<i64> {
    let id: i64 = sqlx::query_scalar("INSERT INTO playlists (name) VALUES (?1) RETURNING id")
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

/// Renames are atomic (§3): a single UPDATE, nothing else to coordinate.
pub async fn rename(pool: &SqlitePool, playlist_id: i64, new_name: &str) -> Result<()> {
    sqlx::query("UPDATE playlists SET name = ?1 WHERE id = ?2")
        .bind(new_name)
        .bind(playlist_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<Playlist>> {
    let rows = sqlx::query_as::<_, Playlist>("SELECT id, name FROM playlists ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn track_external_ids(pool: &SqlitePool, playlist_id: i64) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT track_external_id FROM playlist_tracks
         WHERE playlist_id = ?1 ORDER BY sort_order",
    )
    .bind(playlist_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Append `external_id` at `offset`, shifting every row at or after that
/// offset up by one to keep `sort_order` contiguous (§3 invariant).
pub async fn insert_at(
    pool: &SqlitePool,
    playlist_id: i64,
    offset: i64,
    external_id: &str,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "UPDATE playlist_tracks SET sort_order = sort_order + 1
         WHERE playlist_id = ?1 AND sort_order >= ?2",
    )
    .bind(playlist_id)
    .bind(offset)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "INSERT INTO playlist_tracks (playlist_id, track_external_id, sort_order)
         VALUES (?1, ?2, ?3)",
    )
    .bind(playlist_id)
    .bind(external_id)
    .bind(offset)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

/// Bulk-remove; any delete triggers compaction so `sort_order` stays a
/// contiguous `0..n-1` sequence (§3 invariant).
pub async fn remove(pool: &SqlitePool, playlist_id: i64, external_ids: &[String]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for external_id in external_ids {
        sqlx::query("DELETE FROM playlist_tracks WHERE playlist_id = ?1 AND track_external_id = ?2")
            .bind(playlist_id)
            .bind(external_id)
            .execute(&mut *tx)
            .await?;
    }
    compact(&mut tx, playlist_id).await?;
    tx.commit().await?;
    Ok(())
}

async fn compact(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, playlist_id: i64) -> Result<()> {
    let ids: Vec<(String,)> = sqlx::query_as(
        "SELECT track_external_id FROM playlist_tracks
         WHERE playlist_id = ?1 ORDER BY sort_order",
    )
    .bind(playlist_id)
    .fetch_all(&mut **tx)
    .await?;

    for (new_order, (external_id,)) in ids.into_iter().enumerate() {
        sqlx::query(
            "UPDATE playlist_tracks SET sort_order = ?1
             WHERE playlist_id = ?2 AND track_external_id = ?3",
        )
        .bind(new_order as i64)
        .bind(playlist_id)
        .bind(external_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[tokio::test]
    async fn remove_compacts_sort_order() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let playlist_id = create(catalog.pool(), "Favorites").await.unwrap();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            insert_at(catalog.pool(), playlist_id, i as i64, id)
                .await
                .unwrap();
        }

        remove(catalog.pool(), playlist_id, &["b".to_string()])
            .await
            .unwrap();

        let order: Vec<(i64,)> = sqlx::query_as(
            "SELECT sort_order FROM playlist_tracks WHERE playlist_id = ?1 ORDER BY sort_order",
        )
        .bind(playlist_id)
        .fetch_all(catalog.pool())
        .await
        .unwrap();
        assert_eq!(order, vec![(0,), (1,)]);

        let remaining = track_external_ids(catalog.pool(), playlist_id).await.unwrap();
        assert_eq!(remaining, vec!["a".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn insert_at_shifts_subsequent_rows() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let playlist_id = create(catalog.pool(), "Mix").await.unwrap();
        insert_at(catalog.pool(), playlist_id, 0, "a").await.unwrap();
        insert_at(catalog.pool(), playlist_id, 1, "c").await.unwrap();
        insert_at(catalog.pool(), playlist_id, 1, "b").await.unwrap();

        let ids = track_external_ids(catalog.pool(), playlist_id).await.unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }
}
