//! Optimize pass (§4.4 step 7): recompute dense sort_order columns so UI
//! sorts are O(1) at query time (see GLOSSARY "Sort order").
//!
//! Grounded on musikcube's `Indexer.cpp::optimize()` (generic
//! singular/plural sort-order recompute helper) and `SyncOptimize` (applies
//! it to genres/artists/albums/meta_values, then recomputes track
//! `sort_order1` with batched commits every 1000 rows).

use sqlx::SqlitePool;

use crate::catalog::transaction::BatchCommitter;
use crate::catalog::Catalog;
use crate::error::Result;

/// Recompute `sort_order` for every row of `table` ordered by
/// `lower(trim(name_column))` ascending. Generic over the three dimension
/// tables plus meta_values, which all share the same (id, name, sort_order)
/// shape.
async fn optimize_dimension(pool: &SqlitePool, table: &str, name_column: &str) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let ids: Vec<(i64,)> = sqlx::query_as(&format!(
        "SELECT id FROM {table} ORDER BY lower(trim({name_column}))"
    ))
    .fetch_all(&mut *tx)
    .await?;

    for (order, (id,)) in ids.iter().enumerate() {
        sqlx::query(&format!("UPDATE {table} SET sort_order = ?1 WHERE id = ?2"))
            .bind(order as i64)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(ids.len() as u64)
}

pub async fn run(catalog: &Catalog) -> Result<()> {
    let pool = catalog.pool();

    let genres = optimize_dimension(pool, "genres", "name").await?;
    let artists = optimize_dimension(pool, "artists", "name").await?;
    let albums = optimize_dimension(pool, "albums", "name").await?;
    let meta_values = optimize_dimension(pool, "meta_values", "value").await?;

    let tracks = optimize_track_order(pool).await?;

    tracing::info!(genres, artists, albums, meta_values, tracks, "optimize pass complete");
    Ok(())
}

/// Recompute `tracks.sort_order1` by
/// (visual_artist.sort_order, album.sort_order, track_num, folder.relative_path, filename).
/// Batch-committed every 1000 rows per §4.4 step 7.
async fn optimize_track_order(pool: &SqlitePool) -> Result<u64> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT t.id
         FROM tracks t
         LEFT JOIN artists ar ON ar.id = t.visual_artist_id
         LEFT JOIN albums al ON al.id = t.album_id
         LEFT JOIN folders f ON f.id = t.folder_id
         ORDER BY
            coalesce(ar.sort_order, 0),
            coalesce(al.sort_order, 0),
            coalesce(t.track_num, 0),
            coalesce(f.relative_path, ''),
            t.filename",
    )
    .fetch_all(pool)
    .await?;

    let mut committer = BatchCommitter::new(pool, 1000).await?;
    for (order, (id,)) in rows.iter().enumerate() {
        sqlx::query("UPDATE tracks SET sort_order1 = ?1 WHERE id = ?2")
            .bind(order as i64)
            .bind(id)
            .execute(committer.transaction())
            .await?;
        committer.tick().await?;
    }
    committer.finish().await?;
    Ok(rows.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{albums, artists, tracks};

    #[tokio::test]
    async fn optimize_orders_dimension_tables_case_insensitively() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        artists::get_or_create(catalog.pool(), "zebra").await.unwrap();
        artists::get_or_create(catalog.pool(), "Abba").await.unwrap();
        artists::get_or_create(catalog.pool(), "mid").await.unwrap();

        run(&catalog).await.unwrap();

        let ordered: Vec<(String,)> = sqlx::query_as("SELECT name FROM artists ORDER BY sort_order")
            .fetch_all(catalog.pool())
            .await
            .unwrap();
        assert_eq!(
            ordered,
            vec![("Abba".to_string(),), ("mid".to_string(),), ("zebra".to_string(),)]
        );
    }

    #[tokio::test]
    async fn optimize_orders_tracks_by_artist_then_album_then_track_num() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let artist = artists::get_or_create(catalog.pool(), "Artist").await.unwrap();
        let album = albums::get_or_create(catalog.pool(), "Album").await.unwrap();

        let t2 = tracks::upsert(
            catalog.pool(), "/m/2.mp3", 0, "2.mp3", 0, 0, 0.0, Some(2), None, None, None, None,
            Some(album), Some(artist), None, None, None,
        )
        .await
        .unwrap();
        let t1 = tracks::upsert(
            catalog.pool(), "/m/1.mp3", 0, "1.mp3", 0, 0, 0.0, Some(1), None, None, None, None,
            Some(album), Some(artist), None, None, None,
        )
        .await
        .unwrap();

        run(&catalog).await.unwrap();

        let t1_row = tracks::get_by_id(catalog.pool(), t1).await.unwrap().unwrap();
        let t2_row = tracks::get_by_id(catalog.pool(), t2).await.unwrap().unwrap();
        assert!(t1_row.sort_order1 < t2_row.sort_order1);
    }
}
