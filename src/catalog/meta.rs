//! Generic key/value side table (§3: "Arbitrary string metadata lives in a
//! normalized key/value side table keyed by (track_id, meta_key_id,
//! meta_value_id)").

use sqlx::SqlitePool;

use crate::error::Result;

async fn get_or_create_key(pool: &SqlitePool, name: &str) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO meta_keys (name) VALUES (?1)
         ON CONFLICT(name) DO UPDATE SET name = excluded.name
         RETURNING id",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

async fn get_or_create_value(pool: &SqlitePool, key_id: i64, value: &str) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO meta_values (meta_key_id, value) VALUES (?1, ?2)
         ON CONFLICT(meta_key_id, value) DO UPDATE SET value = excluded.value
         RETURNING id",
    )
    .bind(key_id)
    .bind(value)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Flush the track_meta side table for one track: clear existing rows for
/// this track, then insert the supplied key/value pairs. Called as part of
/// Track Record `Save` (§4.3).
pub async fn set_track_meta(
    pool: &SqlitePool,
    track_id: i64,
    pairs: &[(String, String)],
) -> Result<()> {
    sqlx::query("DELETE FROM track_meta WHERE track_id = ?1")
        .bind(track_id)
        .execute(pool)
        .await?;

    for (key, value) in pairs {
        let key_id = get_or_create_key(pool, key).await?;
        let value_id = get_or_create_value(pool, key_id, value).await?;
        sqlx::query(
            "INSERT INTO track_meta (track_id, meta_key_id, meta_value_id) VALUES (?1, ?2, ?3)
             ON CONFLICT DO NOTHING",
        )
        .bind(track_id)
        .bind(key_id)
        .bind(value_id)
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn get_track_meta(pool: &SqlitePool, track_id: i64) -> Result<Vec<(String, String)>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT mk.name, mv.value
         FROM track_meta tm
         JOIN meta_keys mk ON mk.id = tm.meta_key_id
         JOIN meta_values mv ON mv.id = tm.meta_value_id
         WHERE tm.track_id = ?1",
    )
    .bind(track_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Cascade-delete orphaned meta_values/meta_keys (§4.4 step 6).
pub async fn delete_orphans(pool: &SqlitePool) -> Result<u64> {
    let values = sqlx::query(
        "DELETE FROM meta_values WHERE id NOT IN (SELECT meta_value_id FROM track_meta)",
    )
    .execute(pool)
    .await?
    .rows_affected();
    let keys = sqlx::query(
        "DELETE FROM meta_keys WHERE id NOT IN (SELECT meta_key_id FROM meta_values)",
    )
    .execute(pool)
    .await?
    .rows_affected();
    Ok(values + keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[tokio::test]
    async fn set_track_meta_replaces_existing_pairs() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        sqlx::query("INSERT INTO tracks (id, external_id, filename) VALUES (1, 'x', 'x.mp3')")
            .execute(catalog.pool())
            .await
            .unwrap();

        set_track_meta(
            catalog.pool(),
            1,
            &[("replaygain_track_gain".into(), "-3.1 dB".into())],
        )
        .await
        .unwrap();
        set_track_meta(
            catalog.pool(),
            1,
            &[("comment".into(), "ripped".into())],
        )
        .await
        .unwrap();

        let pairs = get_track_meta(catalog.pool(), 1).await.unwrap();
        assert_eq!(pairs, vec![("comment".to_string(), "ripped".to_string())]);
    }
}
