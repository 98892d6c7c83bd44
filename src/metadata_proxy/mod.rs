//! Metadata Proxy (§4.1/§6): a typed, read-mostly query facade over the
//! Catalog Store for callers that are not the Indexer — search, category
//! listings, and playlist CRUD.
//!
//! Grounded on the donor's `db/mod.rs::get_all_tracks_with_metadata`
//! (`LEFT JOIN` + `LIKE` filter query shape), generalized across the full
//! set of catalog entities; playlist CRUD mirrors musikcube's playlist
//! append/remove/rename semantics (§3, sort_order kept contiguous).

use sqlx::SqlitePool;

use crate::catalog::{albums, artists, genres, playlists, tracks};
use crate::error::Result;
use crate::model::{Album, Artist, Genre, Playlist, Track};

/// The three dimension tables exposed as browsable categories (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Artist,
    Album,
    Genre,
}

#[derive(Clone)]
pub struct MetadataProxy {
    pool: SqlitePool,
}

impl MetadataProxy {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Free-text search over track title and filename.
    pub async fn search_tracks(&self, query: &str) -> Result<Vec<Track>> {
        if query.trim().is_empty() {
            return tracks::list_ordered(&self.pool).await;
        }
        tracks::search(&self.pool, query).await
    }

    pub async fn all_tracks(&self) -> Result<Vec<Track>> {
        tracks::list_ordered(&self.pool).await
    }

    pub async fn tracks_in_album(&self, album_id: i64) -> Result<Vec<Track>> {
        tracks::list_by_album(&self.pool, album_id).await
    }

    pub async fn list_artists(&self) -> Result<Vec<Artist>> {
        artists::list_all(&self.pool).await
    }

    pub async fn list_albums(&self) -> Result<Vec<Album>> {
        albums::list_all(&self.pool).await
    }

    pub async fn list_genres(&self) -> Result<Vec<Genre>> {
        genres::list_all(&self.pool).await
    }

    // --- Playlists ---

    pub async fn create_playlist(&self, name: &str) -> Result<i64> {
        playlists::create(&self.pool, name).await
    }

    pub async fn rename_playlist(&self, playlist_id: i64, new_name: &str) -> Result<()> {
        playlists::rename(&self.pool, playlist_id, new_name).await
    }

    pub async fn list_playlists(&self) -> Result<Vec<Playlist>> {
        playlists::list(&self.pool).await
    }

    /// Ordered external ids of every track in the playlist, suitable for
    /// handing straight to `PlaybackServiceHandle::load_playlist` after
    /// resolving each id to a row via the catalog.
    pub async fn playlist_track_ids(&self, playlist_id: i64) -> Result<Vec<String>> {
        playlists::track_external_ids(&self.pool, playlist_id).await
    }

    pub async fn append_to_playlist(&self, playlist_id: i64, track_external_id: &str) -> Result<()> {
        let offset = playlists::track_external_ids(&self.pool, playlist_id).await?.len() as i64;
        playlists::insert_at(&self.pool, playlist_id, offset, track_external_id).await
    }

    pub async fn insert_into_playlist(
        &self,
        playlist_id: i64,
        offset: i64,
        track_external_id: &str,
    ) -> Result<()> {
        playlists::insert_at(&self.pool, playlist_id, offset, track_external_id).await
    }

    pub async fn remove_from_playlist(&self, playlist_id: i64, track_external_ids: &[String]) -> Result<()> {
        playlists::remove(&self.pool, playlist_id, track_external_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[tokio::test]
    async fn search_with_empty_query_returns_everything_ordered() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        tracks::upsert(
            catalog.pool(), "/m/a.mp3", 0, "a.mp3", 1, 1, 1.0, None, None, None, None,
            Some("Alpha"), None, None, None, None, None,
        )
        .await
        .unwrap();

        let proxy = MetadataProxy::new(catalog.pool().clone());
        let results = proxy.search_tracks("").await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn playlist_round_trips_append_and_remove() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let proxy = MetadataProxy::new(catalog.pool().clone());

        let playlist_id = proxy.create_playlist("Favorites").await.unwrap();
        proxy.append_to_playlist(playlist_id, "/m/a.mp3").await.unwrap();
        proxy.append_to_playlist(playlist_id, "/m/b.mp3").await.unwrap();

        let ids = proxy.playlist_track_ids(playlist_id).await.unwrap();
        assert_eq!(ids, vec!["/m/a.mp3".to_string(), "/m/b.mp3".to_string()]);

        proxy
            .remove_from_playlist(playlist_id, &["/m/a.mp3".to_string()])
            .await
            .unwrap();
        let ids = proxy.playlist_track_ids(playlist_id).await.unwrap();
        assert_eq!(ids, vec!["/m/b.mp3".to_string()]);
    }
}
