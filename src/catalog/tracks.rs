//! `tracks` table: the central entity (§3 "Track").
//!
//! Upsert shape grounded on the donor's `db/mod.rs::insert_track`
//! (`ON CONFLICT ... DO UPDATE ... RETURNING id`), generalized from the
//! donor's small (title/artist/album) schema to the full Track schema §3
//! names (external_id, source_id, filetime, filesize, disc, bpm, folder_id,
//! …).

use sqlx::SqlitePool;

use crate::error::Result;
use crate::model::Track;

const TRACK_COLUMNS: &str = "id, external_id, source_id, filename, filetime, filesize, duration,
    track_num, disc_num, year, bpm, title, album_id, visual_artist_id, album_artist_id,
    visual_genre_id, folder_id, thumbnail_id, sort_order1";

/// Insert a new track row or update an existing one keyed on
/// `(source_id, external_id)`. Returns the row id. This is the only write
/// path into `tracks`; the Indexer calls it from `TrackRecord::save`.
#[allow(clippy::too_many_arguments)]
pub async fn upsert(
    pool: &SqlitePool,
    external_id: &str,
    source_id: i64,
    filename: &str,
    filetime: i64,
    filesize: i64,
    duration: f64,
    track_num: Option<i64>,
    disc_num: Option<i64>,
    year: Option<i64>,
    bpm: Option<f64>,
    title: Option<&str>,
    album_id: Option<i64>,
    visual_artist_id: Option<i64>,
    album_artist_id: Option<i64>,
    visual_genre_id: Option<i64>,
    folder_id: Option<i64>,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO tracks (
            external_id, source_id, filename, filetime, filesize, duration,
            track_num, disc_num, year, bpm, title,
            album_id, visual_artist_id, album_artist_id, visual_genre_id, folder_id
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
         ON CONFLICT(source_id, external_id) DO UPDATE SET
            filename = excluded.filename,
            filetime = excluded.filetime,
            filesize = excluded.filesize,
            duration = excluded.duration,
            track_num = excluded.track_num,
            disc_num = excluded.disc_num,
            year = excluded.year,
            bpm = excluded.bpm,
            title = excluded.title,
            album_id = excluded.album_id,
            visual_artist_id = excluded.visual_artist_id,
            album_artist_id = excluded.album_artist_id,
            visual_genre_id = excluded.visual_genre_id,
            folder_id = excluded.folder_id
         RETURNING id",
    )
    .bind(external_id)
    .bind(source_id)
    .bind(filename)
    .bind(filetime)
    .bind(filesize)
    .bind(duration)
    .bind(track_num)
    .bind(disc_num)
    .bind(year)
    .bind(bpm)
    .bind(title)
    .bind(album_id)
    .bind(visual_artist_id)
    .bind(album_artist_id)
    .bind(visual_genre_id)
    .bind(folder_id)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn set_thumbnail(pool: &SqlitePool, track_id: i64, thumbnail_id: i64) -> Result<()> {
    sqlx::query("UPDATE tracks SET thumbnail_id = ?1 WHERE id = ?2")
        .bind(thumbnail_id)
        .bind(track_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Track>> {
    let row = sqlx::query_as::<_, Track>(&format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE id = ?1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Look up the catalog row matching a Track Record's identity, for the
/// needs-indexing comparison (§4.3).
pub async fn find_by_folder_and_filename(
    pool: &SqlitePool,
    folder_id: i64,
    filename: &str,
) -> Result<Option<Track>> {
    let row = sqlx::query_as::<_, Track>(&format!(
        "SELECT {TRACK_COLUMNS} FROM tracks WHERE folder_id = ?1 AND filename = ?2"
    ))
    .bind(folder_id)
    .bind(filename)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Track>> {
    let rows = sqlx::query_as::<_, Track>(&format!("SELECT {TRACK_COLUMNS} FROM tracks ORDER BY id"))
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Tracks ordered for playback (`sort_order1`), the order Track Lists are
/// populated in by default.
pub async fn list_ordered(pool: &SqlitePool) -> Result<Vec<Track>> {
    let rows = sqlx::query_as::<_, Track>(&format!(
        "SELECT {TRACK_COLUMNS} FROM tracks ORDER BY sort_order1, id"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Cursor-style page over all tracks ordered by id, used by the Analyze
/// pass (§4.4 step 8) so it can resume after a yield without re-scanning
/// everything already visited.
pub async fn next_after(pool: &SqlitePool, after_id: i64) -> Result<Option<Track>> {
    let row = sqlx::query_as::<_, Track>(&format!(
        "SELECT {TRACK_COLUMNS} FROM tracks WHERE id > ?1 ORDER BY id LIMIT 1"
    ))
    .bind(after_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn delete_by_id(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM tracks WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Tracks owned by one folder, for the delete sweep's existence check
/// (§4.4 step 5).
pub async fn list_by_folder(pool: &SqlitePool, folder_id: i64) -> Result<Vec<Track>> {
    let rows = sqlx::query_as::<_, Track>(&format!(
        "SELECT {TRACK_COLUMNS} FROM tracks WHERE folder_id = ?1"
    ))
    .bind(folder_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn delete_by_folder(pool: &SqlitePool, folder_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM tracks WHERE folder_id = ?1")
        .bind(folder_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Free-text search over title/filename (§6, Metadata Proxy "search
/// tracks"), grounded on the donor's `db/mod.rs::get_all_tracks_with_metadata`
/// `LIKE`-based filter.
pub async fn search(pool: &SqlitePool, query: &str) -> Result<Vec<Track>> {
    let pattern = format!("%{query}%");
    let rows = sqlx::query_as::<_, Track>(&format!(
        "SELECT {TRACK_COLUMNS} FROM tracks
         WHERE title LIKE ?1 OR filename LIKE ?1
         ORDER BY sort_order1, id"
    ))
    .bind(pattern)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Every track belonging to one album, in track/disc order (§6 "list
/// categories").
pub async fn list_by_album(pool: &SqlitePool, album_id: i64) -> Result<Vec<Track>> {
    let rows = sqlx::query_as::<_, Track>(&format!(
        "SELECT {TRACK_COLUMNS} FROM tracks WHERE album_id = ?1 ORDER BY disc_num, track_num, id"
    ))
    .bind(album_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM tracks")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    async fn insert_minimal(pool: &SqlitePool, external_id: &str) -> i64 {
        upsert(
            pool, external_id, 0, "track.mp3", 1_700_000_000, 4096, 180.0, Some(1), None, None,
            None, Some("Track One"), None, None, None, None, None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn upsert_then_upsert_again_updates_not_duplicates() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let id1 = insert_minimal(catalog.pool(), "/m/track.mp3").await;
        let id2 = upsert(
            catalog.pool(),
            "/m/track.mp3",
            0,
            "track.mp3",
            1_700_000_500,
            4096,
            181.0,
            Some(1),
            None,
            None,
            None,
            Some("Track One (Remaster)"),
            None,
            None,
            None,
            None,
        )
        .await
        .unwrap();

        assert_eq!(id1, id2);
        assert_eq!(count(catalog.pool()).await.unwrap(), 1);
        let track = get_by_id(catalog.pool(), id1).await.unwrap().unwrap();
        assert_eq!(track.title.as_deref(), Some("Track One (Remaster)"));
    }

    #[tokio::test]
    async fn next_after_walks_in_id_order() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let a = insert_minimal(catalog.pool(), "/m/a.mp3").await;
        let b = insert_minimal(catalog.pool(), "/m/b.mp3").await;

        let first = next_after(catalog.pool(), 0).await.unwrap().unwrap();
        assert_eq!(first.id, a);
        let second = next_after(catalog.pool(), first.id).await.unwrap().unwrap();
        assert_eq!(second.id, b);
        assert!(next_after(catalog.pool(), second.id).await.unwrap().is_none());
    }
}
