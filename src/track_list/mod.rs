//! Track List (§4.5): an ordered vector of track ids with a bounded LRU of
//! materialized Track rows, mutated exclusively through a scoped `Editor`
//! handle.
//!
//! Grounded on the donor's small in-house ordered collections (no external
//! LRU crate pulled in for a cache on the order of tens of entries, matching
//! §4.5's "Implementation note").

use std::collections::VecDeque;

use sqlx::SqlitePool;

use crate::catalog::tracks;
use crate::error::Result;
use crate::model::Track;

const DEFAULT_CACHE_CAPACITY: usize = 64;

struct LruCache {
    capacity: usize,
    entries: Vec<(i64, Track)>,
    recency: VecDeque<i64>,
}

impl LruCache {
    fn new(capacity: usize) -> Self {
        Self { capacity, entries: Vec::new(), recency: VecDeque::new() }
    }

    fn get(&mut self, id: i64) -> Option<&Track> {
        if self.entries.iter().any(|(k, _)| *k == id) {
            self.touch(id);
            self.entries.iter().find(|(k, _)| *k == id).map(|(_, v)| v)
        } else {
            None
        }
    }

    fn insert(&mut self, id: i64, track: Track) {
        if let Some(pos) = self.entries.iter().position(|(k, _)| *k == id) {
            self.entries[pos].1 = track;
            self.touch(id);
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(evict) = self.recency.pop_front() {
                self.entries.retain(|(k, _)| *k != evict);
            }
        }
        self.entries.push((id, track));
        self.recency.push_back(id);
    }

    fn touch(&mut self, id: i64) {
        self.recency.retain(|k| *k != id);
        self.recency.push_back(id);
    }

    fn invalidate(&mut self, id: i64) {
        self.entries.retain(|(k, _)| *k != id);
        self.recency.retain(|k| *k != id);
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }
}

pub struct TrackList {
    ids: Vec<i64>,
    cache: LruCache,
}

impl TrackList {
    pub fn new() -> Self {
        Self { ids: Vec::new(), cache: LruCache::new(DEFAULT_CACHE_CAPACITY) }
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }

    pub fn get_id(&self, index: usize) -> Option<i64> {
        self.ids.get(index).copied()
    }

    pub fn index_of(&self, id: i64) -> Option<usize> {
        self.ids.iter().position(|&x| x == id)
    }

    /// Materializes the Track at `index`, fetching from the catalog on a
    /// cache miss.
    pub async fn get(&mut self, pool: &SqlitePool, index: usize) -> Result<Option<Track>> {
        let Some(id) = self.get_id(index) else { return Ok(None) };
        if let Some(track) = self.cache.get(id) {
            return Ok(Some(track.clone()));
        }
        let Some(track) = tracks::get_by_id(pool, id).await? else { return Ok(None) };
        self.cache.insert(id, track.clone());
        Ok(Some(track))
    }

    pub fn copy_from(&mut self, other: &TrackList) {
        self.ids = other.ids.clone();
        self.cache.clear();
    }

    pub fn swap(&mut self, other: &mut TrackList) {
        std::mem::swap(&mut self.ids, &mut other.ids);
        self.cache.clear();
        other.cache.clear();
    }

    pub fn editor(&mut self) -> Editor<'_> {
        Editor { list: self, mutated_now_playing: false }
    }
}

impl Default for TrackList {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive editing handle (§4.5). Holds `&mut TrackList` for its
/// lifetime; the owning Playback Service checks `mutated_now_playing()`
/// after the `Editor` is dropped to decide whether to re-resolve its
/// current index and prefetched next track.
pub struct Editor<'a> {
    list: &'a mut TrackList,
    mutated_now_playing: bool,
}

impl Editor<'_> {
    pub fn insert(&mut self, index: usize, id: i64) {
        let index = index.min(self.list.ids.len());
        self.list.ids.insert(index, id);
        self.mutated_now_playing = true;
    }

    pub fn push(&mut self, id: i64) {
        self.list.ids.push(id);
    }

    pub fn swap_indices(&mut self, a: usize, b: usize) {
        if a < self.list.ids.len() && b < self.list.ids.len() {
            self.list.ids.swap(a, b);
            self.mutated_now_playing = true;
        }
    }

    pub fn move_track(&mut self, from: usize, to: usize) {
        if from >= self.list.ids.len() || to >= self.list.ids.len() {
            return;
        }
        let id = self.list.ids.remove(from);
        self.list.ids.insert(to, id);
        self.mutated_now_playing = true;
    }

    pub fn delete(&mut self, index: usize) -> Option<i64> {
        if index >= self.list.ids.len() {
            return None;
        }
        let id = self.list.ids.remove(index);
        self.list.cache.invalidate(id);
        self.mutated_now_playing = true;
        Some(id)
    }

    pub fn clear(&mut self) {
        self.list.ids.clear();
        self.list.cache.clear();
        self.mutated_now_playing = true;
    }

    /// Fisher-Yates shuffle of the whole list, including any now-playing
    /// track; the caller recovers its new position afterward via
    /// `index_of` on its id.
    pub fn shuffle(&mut self) {
        use rand::seq::SliceRandom;
        let mut rng = rand::rng();
        self.list.ids.shuffle(&mut rng);
        self.mutated_now_playing = true;
    }

    pub fn mutated_now_playing(&self) -> bool {
        self.mutated_now_playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_index_of() {
        let mut list = TrackList::new();
        {
            let mut editor = list.editor();
            editor.push(1);
            editor.push(2);
            editor.insert(0, 99);
        }
        assert_eq!(list.get_id(0), Some(99));
        assert_eq!(list.index_of(2), Some(2));
    }

    #[test]
    fn delete_invalidates_cache_entry() {
        let mut list = TrackList::new();
        {
            let mut editor = list.editor();
            editor.push(1);
        }
        list.cache.insert(1, dummy_track(1));
        {
            let mut editor = list.editor();
            editor.delete(0);
        }
        assert!(list.cache.get(1).is_none());
    }

    #[test]
    fn lru_evicts_oldest_entry_past_capacity() {
        let mut cache = LruCache::new(2);
        cache.insert(1, dummy_track(1));
        cache.insert(2, dummy_track(2));
        cache.insert(3, dummy_track(3));
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn shuffle_preserves_the_set_of_ids_and_stays_locatable_by_id() {
        let mut list = TrackList::new();
        {
            let mut editor = list.editor();
            for id in 1..=10 {
                editor.push(id);
            }
        }
        let playing_id = list.get_id(3).unwrap();
        {
            let mut editor = list.editor();
            editor.shuffle();
        }
        let mut ids: Vec<i64> = (0..list.count()).map(|i| list.get_id(i).unwrap()).collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
        assert!(list.index_of(playing_id).is_some());
    }

    fn dummy_track(id: i64) -> Track {
        Track {
            id,
            external_id: format!("/m/{id}.mp3"),
            source_id: 0,
            filename: format!("{id}.mp3"),
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
        }
    }
}
