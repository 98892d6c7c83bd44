//! Idempotent schema creation (§4.1).
//!
//! Run unconditionally on every open; every statement is `IF NOT EXISTS`, so
//! opening an already-initialized catalog is a no-op. There is no numbered
//! migration runner — see DESIGN.md for why that's the right call here.

use sqlx::SqlitePool;

use crate::error::Result;

pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS paths (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            path    TEXT NOT NULL UNIQUE
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS folders (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT NOT NULL,
            parent_id       INTEGER,
            path_id         INTEGER NOT NULL REFERENCES paths(id),
            relative_path   TEXT NOT NULL DEFAULT ''
        );
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_folders_identity ON folders(name, parent_id, path_id)",
    )
    .execute(pool)
    .await?;

    for (table, col) in [("artists", "name"), ("albums", "name"), ("genres", "name")] {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                {col}       TEXT NOT NULL UNIQUE,
                sort_order  INTEGER NOT NULL DEFAULT 0
            );"
        ))
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id         TEXT NOT NULL,
            source_id           INTEGER NOT NULL DEFAULT 0,
            filename            TEXT NOT NULL,
            filetime            INTEGER NOT NULL DEFAULT 0,
            filesize            INTEGER NOT NULL DEFAULT 0,
            duration            REAL NOT NULL DEFAULT 0,
            track_num           INTEGER,
            disc_num            INTEGER,
            year                INTEGER,
            bpm                 REAL,
            title               TEXT,
            album_id            INTEGER REFERENCES albums(id),
            visual_artist_id    INTEGER REFERENCES artists(id),
            album_artist_id     INTEGER REFERENCES artists(id),
            visual_genre_id     INTEGER REFERENCES genres(id),
            folder_id           INTEGER REFERENCES folders(id),
            thumbnail_id        INTEGER,
            sort_order1         INTEGER NOT NULL DEFAULT 0
        );
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_tracks_external_source ON tracks(source_id, external_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tracks_album_sort ON tracks(album_id, sort_order1)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tracks_folder ON tracks(folder_id)")
        .execute(pool)
        .await?;

    for (table, other) in [("track_artists", "artists"), ("track_genres", "genres")] {
        let other_col = if other == "artists" { "artist_id" } else { "genre_id" };
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                track_id    INTEGER NOT NULL REFERENCES tracks(id),
                {other_col} INTEGER NOT NULL REFERENCES {other}(id),
                PRIMARY KEY (track_id, {other_col})
            );"
        ))
        .execute(pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_reverse ON {table}({other_col}, track_id)"
        ))
        .execute(pool)
        .await?;
    }

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS meta_keys (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            name    TEXT NOT NULL UNIQUE
        );",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS meta_values (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            meta_key_id INTEGER NOT NULL REFERENCES meta_keys(id),
            value       TEXT NOT NULL,
            sort_order  INTEGER NOT NULL DEFAULT 0
        );",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_meta_values_identity ON meta_values(meta_key_id, value)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS track_meta (
            track_id        INTEGER NOT NULL REFERENCES tracks(id),
            meta_key_id     INTEGER NOT NULL REFERENCES meta_keys(id),
            meta_value_id   INTEGER NOT NULL REFERENCES meta_values(id),
            PRIMARY KEY (track_id, meta_key_id, meta_value_id)
        );",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_track_meta_reverse ON track_meta(meta_value_id, track_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS playlists (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            name    TEXT NOT NULL
        );",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS playlist_tracks (
            playlist_id         INTEGER NOT NULL REFERENCES playlists(id),
            track_external_id   TEXT NOT NULL,
            sort_order          INTEGER NOT NULL,
            PRIMARY KEY (playlist_id, track_external_id)
        );",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_playlist_tracks_order ON playlist_tracks(playlist_id, sort_order)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        ensure_schema(&pool).await.unwrap();
        ensure_schema(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM sqlite_master WHERE type = 'table'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(count >= 10);
    }
}
