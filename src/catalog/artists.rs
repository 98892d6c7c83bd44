//! `artists` dimension table (§3 "Album / Artist / Genre").

use sqlx::SqlitePool;

use crate::error::Result;
use crate::model::Artist;

pub async fn get_or_create(pool: &SqlitePool, name: &str) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO artists (name) VALUES (?1)
         ON CONFLICT(name) DO UPDATE SET name = excluded.name
         RETURNING id",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<Artist>> {
    let row = sqlx::query_as::<_, Artist>("SELECT id, name, sort_order FROM artists WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Artist>> {
    let rows = sqlx::query_as::<_, Artist>("SELECT id, name, sort_order FROM artists ORDER BY sort_order, name")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Resolve or insert each comma-or-semicolon-separated composite artist
/// credit into the `track_artists` many-to-many table (§4.3 `Save`).
pub async fn link_composite_credits(pool: &SqlitePool, track_id: i64, credit: &str) -> Result<()> {
    for name in split_composite(credit) {
        let artist_id = get_or_create(pool, name).await?;
        sqlx::query(
            "INSERT INTO track_artists (track_id, artist_id) VALUES (?1, ?2)
             ON CONFLICT DO NOTHING",
        )
        .bind(track_id)
        .bind(artist_id)
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub fn split_composite(value: &str) -> impl Iterator<Item = &str> {
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Delete artists with no referring track, directly or via `track_artists`
/// (§4.4 step 6, §8 invariant).
pub async fn delete_orphans(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM artists WHERE id NOT IN (
            SELECT visual_artist_id FROM tracks WHERE visual_artist_id IS NOT NULL
            UNION
            SELECT album_artist_id FROM tracks WHERE album_artist_id IS NOT NULL
            UNION
            SELECT artist_id FROM track_artists
         )",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_composite_handles_commas_and_semicolons() {
        let parts: Vec<&str> = split_composite("Artist A, Artist B; Artist C").collect();
        assert_eq!(parts, vec!["Artist A", "Artist B", "Artist C"]);
    }

    #[test]
    fn split_composite_trims_and_skips_empty() {
        let parts: Vec<&str> = split_composite(" , Solo Artist ,, ").collect();
        assert_eq!(parts, vec!["Solo Artist"]);
    }
}
