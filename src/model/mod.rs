//! Core data model entities (§3).
//!
//! Each struct mirrors one catalog table. These are plain data carriers used
//! by the catalog query layer and the metadata proxy; the Indexer builds and
//! mutates rows through [`crate::track_record::TrackRecord`] instead, which
//! owns the dirty-bit/save logic.

use sqlx::FromRow;

/// A configured scan root (§3 "Path"). Unique by canonical string.
#[derive(Debug, Clone, FromRow)]
pub struct SyncPath {
    pub id: i64,
    pub path: String,
}

/// A directory discovered under a `SyncPath` (§3 "Folder").
#[derive(Debug, Clone, FromRow)]
pub struct Folder {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub path_id: i64,
    /// Path-relative portion, e.g. `Artist/Album` for a folder nested two
    /// levels under its sync path.
    pub relative_path: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Artist {
    pub id: i64,
    pub name: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct Album {
    pub id: i64,
    pub name: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct Genre {
    pub id: i64,
    pub name: String,
    pub sort_order: i64,
}

/// A single playable item (§3 "Track"). Required attributes per the spec:
/// id, external_id, source_id, filename, filetime, filesize, duration.
#[derive(Debug, Clone, FromRow)]
pub struct Track {
    pub id: i64,
    /// Stable string identity for plugin-owned (non-filesystem) tracks.
    /// Filesystem tracks use their canonical path.
    pub external_id: String,
    /// Owning Indexer Source; 0 is the built-in local-filesystem source.
    pub source_id: i64,
    pub filename: String,
    pub filetime: i64,
    pub filesize: i64,
    pub duration: f64,

    pub track_num: Option<i64>,
    pub disc_num: Option<i64>,
    pub year: Option<i64>,
    pub bpm: Option<f64>,
    pub title: Option<String>,

    pub album_id: Option<i64>,
    pub visual_artist_id: Option<i64>,
    pub album_artist_id: Option<i64>,
    pub visual_genre_id: Option<i64>,
    pub folder_id: Option<i64>,
    pub thumbnail_id: Option<i64>,

    pub sort_order1: i64,
}

impl Track {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.filename)
    }
}

/// A named ordered list of track references (§3 "Playlist").
#[derive(Debug, Clone, FromRow)]
pub struct Playlist {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct PlaylistTrack {
    pub playlist_id: i64,
    pub track_external_id: String,
    pub sort_order: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_title_falls_back_to_filename() {
        let track = Track {
            id: 1,
            external_id: "/m/a.mp3".into(),
            source_id: 0,
            filename: "a.mp3".into(),
            filetime: 0,
            filesize: 0,
            duration: 0.0,
            track_num: None,
            disc_num: None,
            year: None,
            bpm: None,
            title: None,
            album_id: None,
            visual_artist_id: None,
            album_artist_id: None,
            visual_genre_id: None,
            folder_id: None,
            thumbnail_id: None,
            sort_order1: 0,
        };
        assert_eq!(track.display_title(), "a.mp3");
    }
}
