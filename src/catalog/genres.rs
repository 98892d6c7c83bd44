//! `genres` dimension table (§3 "Album / Artist / Genre").

use sqlx::SqlitePool;

use crate::catalog::artists::split_composite;
use crate::error::Result;
use crate::model::Genre;

pub async fn get_or_create(pool: &SqlitePool, name: &str) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO genres (name) VALUES (?1)
         ON CONFLICT(name) DO UPDATE SET name = excluded.name
         RETURNING id",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<Genre>> {
    let row = sqlx::query_as::<_, Genre>("SELECT id, name, sort_order FROM genres WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Genre>> {
    let rows = sqlx::query_as::<_, Genre>("SELECT id, name, sort_order FROM genres ORDER BY sort_order, name")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn link_composite_credits(pool: &SqlitePool, track_id: i64, credit: &str) -> Result<()> {
    for name in split_composite(credit) {
        let genre_id = get_or_create(pool, name).await?;
        sqlx::query(
            "INSERT INTO track_genres (track_id, genre_id) VALUES (?1, ?2)
             ON CONFLICT DO NOTHING",
        )
        .bind(track_id)
        .bind(genre_id)
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn delete_orphans(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM genres WHERE id NOT IN (
            SELECT visual_genre_id FROM tracks WHERE visual_genre_id IS NOT NULL
            UNION
            SELECT genre_id FROM track_genres
         )",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
