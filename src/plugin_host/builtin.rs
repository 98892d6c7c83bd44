//! Built-in capability implementations, linked directly into the binary
//! rather than discovered via `libloading`. Every plugin-loadable
//! capability also has a reference implementation here so the engine works
//! with an empty plugin directory.
//!
//! `BuiltinMetadataReader` is grounded on the donor's `metadata/mod.rs::read`
//! (lofty `Probe::open`, primary-tag-or-first-tag fallback) generalized to
//! populate a [`TrackRecord`] instead of the donor's fixed `TrackMetadata`
//! struct, plus embedded cover-art extraction grounded on the donor's
//! `cover/embedded.rs`.
//!
//! `BuiltinAudioOutput` is grounded on the donor's `player/audio.rs` (cpal
//! device selection, device-default stream config) but replaces its
//! lock-free `rtrb` ring buffer with a `parking_lot::Mutex<VecDeque<f32>>`
//! since the `AudioOutputPlugin` capability trait is a synchronous
//! push-buffer API rather than a dedicated real-time thread the donor
//! spawns itself.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::plugin_host::capability::{AudioOutputPlugin, MetadataReader, OutputResult};
use crate::track_record::{CoverArt, TrackRecord};

const READABLE_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "oga", "opus", "wav", "m4a", "aac"];

pub struct BuiltinMetadataReader;

#[async_trait]
impl MetadataReader for BuiltinMetadataReader {
    fn can_read_tag(&self, extension: &str) -> bool {
        READABLE_EXTENSIONS.contains(&extension.to_lowercase().as_str())
    }

    async fn read_tag(&self, path: &Path, writer: &mut TrackRecord) -> Result<bool> {
        // lofty is synchronous; the indexer already runs the scan on its
        // own dedicated thread (§4.4), so blocking here does not stall the
        // async runtime's worker pool.
        read_tag_sync(path, writer)
    }
}

/// Reads `path`'s tags into `writer` synchronously. Mirrors the donor's
/// `primary_tag().or_else(first_tag)` fallback.
fn read_tag_sync(path: &Path, writer: &mut TrackRecord) -> Result<bool> {
    let tagged_file = Probe::open(path)
        .map_err(|e| Error::CorruptFile { path: path.to_path_buf(), message: e.to_string() })?
        .read()
        .map_err(|e| Error::CorruptFile { path: path.to_path_buf(), message: e.to_string() })?;

    let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());

    if let Some(tag) = tag {
        set_if_present(writer, "title", tag.title().map(|s| s.to_string()));
        set_if_present(writer, "artist", tag.artist().map(|s| s.to_string()));
        set_if_present(writer, "album", tag.album().map(|s| s.to_string()));
        set_if_present(writer, "genre", tag.genre().map(|s| s.to_string()));
        if let Some(album_artist) = tag.get_string(ItemKey::AlbumArtist) {
            writer.set("album_artist", album_artist.to_string());
        }
        if let Some(track) = tag.track() {
            writer.set("track_num", track.to_string());
        }
        if let Some(disc) = tag.disk() {
            writer.set("disc_num", disc.to_string());
        }
        if let Some(year) = tag.year() {
            writer.set("year", year.to_string());
        }
        if let Some(bpm) = tag.get_string(ItemKey::Bpm) {
            writer.set("bpm", bpm.to_string());
        }

        if let Some(cover) = extract_cover_art(tag) {
            writer.cover_art = Some(cover);
        }
    }

    let properties = tagged_file.properties();
    writer.set("duration", properties.duration().as_secs_f64().to_string());

    Ok(true)
}

fn set_if_present(writer: &mut TrackRecord, key: &str, value: Option<String>) {
    if let Some(value) = value {
        if !value.is_empty() {
            writer.set(key, value);
        }
    }
}

/// Prefers the `CoverFront` picture type, falls back to the first picture
/// present, matching the donor's `cover/embedded.rs`.
fn extract_cover_art(tag: &Tag) -> Option<CoverArt> {
    use lofty::picture::PictureType;

    let picture = tag
        .pictures()
        .iter()
        .find(|p| p.pic_type() == PictureType::CoverFront)
        .or_else(|| tag.pictures().first())?;

    let extension = match picture.mime_type() {
        Some(lofty::picture::MimeType::Png) => "png",
        Some(lofty::picture::MimeType::Gif) => "gif",
        Some(lofty::picture::MimeType::Bmp) => "bmp",
        Some(lofty::picture::MimeType::Tiff) => "tiff",
        _ => "jpg",
    };

    Some(CoverArt {
        data: picture.data().to_vec(),
        extension,
    })
}

pub struct BuiltinAudioOutput {
    stream: Option<Stream>,
    queue: Arc<Mutex<VecDeque<f32>>>,
    volume_bits: Arc<AtomicU32>,
    device_names: Vec<String>,
    stream_format: Option<(u32, u16)>,
}

impl BuiltinAudioOutput {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device_names = host
            .output_devices()
            .map_err(|e| Error::OutputInvalidFormat(e.to_string()))?
            .filter_map(|d| d.name().ok())
            .collect();

        Ok(Self {
            stream: None,
            queue: Arc::new(Mutex::new(VecDeque::with_capacity(48_000))),
            volume_bits: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            device_names,
            stream_format: None,
        })
    }

    fn ensure_stream(&mut self, sample_rate: u32, channels: u16) -> Result<()> {
        if self.stream_format == Some((sample_rate, channels)) && self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::OutputInvalidFormat("no default output device".into()))?;

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let queue = Arc::clone(&self.queue);
        let volume_bits = Arc::clone(&self.volume_bits);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let volume = f32::from_bits(volume_bits.load(Ordering::Relaxed));
                    let mut queue = queue.lock();
                    for sample in data.iter_mut() {
                        *sample = queue.pop_front().unwrap_or(0.0) * volume;
                    }
                },
                move |err| tracing::error!(%err, "audio output stream error"),
                None,
            )
            .map_err(|e| Error::OutputInvalidFormat(e.to_string()))?;

        stream.play().map_err(|e| Error::OutputInvalidFormat(e.to_string()))?;

        self.stream = Some(stream);
        self.stream_format = Some((sample_rate, channels));
        Ok(())
    }
}

impl AudioOutputPlugin for BuiltinAudioOutput {
    fn play(&mut self, buffer: &[f32], sample_rate: u32, channels: u16) -> OutputResult {
        if let Err(e) = self.ensure_stream(sample_rate, channels) {
            tracing::error!(%e, "failed to open audio stream");
            return OutputResult::InvalidFormat;
        }

        let mut queue = self.queue.lock();
        if queue.len() + buffer.len() > queue.capacity() {
            return OutputResult::BufferFull;
        }
        queue.extend(buffer.iter().copied());
        OutputResult::BufferWritten
    }

    fn pause(&mut self) {
        if let Some(stream) = &self.stream {
            let _ = stream.pause();
        }
    }

    fn resume(&mut self) {
        if let Some(stream) = &self.stream {
            let _ = stream.play();
        }
    }

    fn stop(&mut self) {
        self.pause();
        self.queue.lock().clear();
    }

    fn drain(&mut self) {
        while !self.queue.lock().is_empty() {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume_bits.store(volume.to_bits(), Ordering::Relaxed);
    }

    fn device_names(&self) -> Vec<String> {
        self.device_names.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_read_tag_recognizes_known_extensions() {
        let reader = BuiltinMetadataReader;
        assert!(reader.can_read_tag("mp3"));
        assert!(reader.can_read_tag("FLAC"));
        assert!(!reader.can_read_tag("txt"));
    }

    #[test]
    fn set_if_present_skips_empty_strings() {
        let mut record = TrackRecord::new("x");
        set_if_present(&mut record, "title", Some(String::new()));
        assert!(record.get_string("title").is_none());
        set_if_present(&mut record, "title", Some("Real Title".to_string()));
        assert_eq!(record.get_string("title"), Some("Real Title"));
    }
}
