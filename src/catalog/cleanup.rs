//! Cleanup pass (§4.4 step 6): cascade-delete orphans across
//! track_artists/artists/track_genres/genres/albums/track_meta/meta_values/
//! meta_keys, then ANALYZE + VACUUM.
//!
//! Grounded on musikcube's `Indexer.cpp::SyncCleanup`, which runs the same
//! cascade as a sequence of `DELETE ... WHERE id NOT IN (...)` statements
//! followed by `ANALYZE`/`VACUUM`.

use sqlx::SqlitePool;

use crate::catalog::{albums, artists, genres, meta, Catalog};
use crate::error::Result;

pub struct CleanupReport {
    pub track_artists_removed: u64,
    pub artists_removed: u64,
    pub track_genres_removed: u64,
    pub genres_removed: u64,
    pub albums_removed: u64,
    pub meta_removed: u64,
}

/// Junction rows referencing a track that no longer exists.
async fn delete_orphan_junctions(pool: &SqlitePool) -> Result<(u64, u64)> {
    let track_artists = sqlx::query(
        "DELETE FROM track_artists WHERE track_id NOT IN (SELECT id FROM tracks)",
    )
    .execute(pool)
    .await?
    .rows_affected();
    let track_genres = sqlx::query(
        "DELETE FROM track_genres WHERE track_id NOT IN (SELECT id FROM tracks)",
    )
    .execute(pool)
    .await?
    .rows_affected();
    Ok((track_artists, track_genres))
}

pub async fn run(catalog: &Catalog) -> Result<CleanupReport> {
    let pool = catalog.pool();

    let (track_artists_removed, track_genres_removed) = delete_orphan_junctions(pool).await?;
    let artists_removed = artists::delete_orphans(pool).await?;
    let genres_removed = genres::delete_orphans(pool).await?;
    let albums_removed = albums::delete_orphans(pool).await?;
    let meta_removed = meta::delete_orphans(pool).await?;

    catalog.analyze_and_vacuum().await?;

    tracing::info!(
        artists_removed,
        genres_removed,
        albums_removed,
        meta_removed,
        "cleanup pass complete"
    );

    Ok(CleanupReport {
        track_artists_removed,
        artists_removed,
        track_genres_removed,
        genres_removed,
        albums_removed,
        meta_removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{artists, tracks};

    #[tokio::test]
    async fn cleanup_removes_artist_unreferenced_after_track_deleted() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let artist_id = artists::get_or_create(catalog.pool(), "Solo Artist")
            .await
            .unwrap();
        let track_id = tracks::upsert(
            catalog.pool(),
            "/m/a.mp3",
            0,
            "a.mp3",
            0,
            0,
            0.0,
            None,
            None,
            None,
            None,
            None,
            None,
            Some(artist_id),
            None,
            None,
            None,
        )
        .await
        .unwrap();

        tracks::delete_by_id(catalog.pool(), track_id).await.unwrap();
        let report = run(&catalog).await.unwrap();

        assert_eq!(report.artists_removed, 1);
        assert!(artists::get(catalog.pool(), artist_id).await.unwrap().is_none());
    }
}
