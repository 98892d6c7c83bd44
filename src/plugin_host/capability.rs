//! Capability traits (§4.2, §6, §9 "collapse virtual-inheritance plugin
//! class hierarchies").
//!
//! musikcube's C-ABI (`musikcore_c.h`) models each capability as a
//! reference-counted opaque handle obtained from a factory function
//! (`get_metadata_reader`, `get_decoder_factory`, …), every handle carrying
//! its own `release()`. Rust has no virtual-inheritance hierarchy to
//! collapse in the first place, so the redesign note is realized directly as
//! one plain trait per capability; a plugin-supplied implementor is held
//! behind `Arc<dyn Trait>` rather than a manually reference-counted C handle.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Track;
use crate::track_record::TrackRecord;

/// `IPlugin`: identity metadata every capability-bearing plugin reports.
pub trait PluginIdentity: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn author(&self) -> &str;
    fn guid(&self) -> &str;
    fn sdk_version(&self) -> u32;
}

/// `IMetadataReader`.
#[async_trait]
pub trait MetadataReader: Send + Sync {
    fn can_read_tag(&self, extension: &str) -> bool;
    async fn read_tag(&self, path: &Path, writer: &mut TrackRecord) -> Result<bool>;
}

/// `IDecoder`: the per-stream handle a `DecoderFactory` produces.
pub trait Decoder: Send {
    fn open(&mut self, stream_uri: &str) -> Result<bool>;
    /// Fills `buffer` with decoded samples; returns false at end of stream.
    fn fill_buffer(&mut self, buffer: &mut Vec<f32>) -> Result<bool>;
    fn set_position(&mut self, seconds: f64) -> f64;
    fn duration(&self) -> f64;
    fn eof(&self) -> bool;
    /// Must be safe to call from any thread (§5: Transport `stop()`
    /// interrupts active decoders via this method).
    fn interrupt(&self);
}

/// `IDecoderFactory`.
pub trait DecoderFactory: Send + Sync {
    fn can_handle(&self, mime_or_extension: &str) -> bool;
    fn create_decoder(&self) -> Box<dyn Decoder>;
}

/// `IDataStream`.
pub trait DataStream: Send {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;
    fn seek(&mut self, position: u64) -> Result<u64>;
    fn tell(&self) -> u64;
    fn length(&self) -> Option<u64>;
    fn interruptible(&self) -> bool;
}

/// `IDataStreamFactory`.
pub trait DataStreamFactory: Send + Sync {
    fn can_open(&self, uri: &str) -> bool;
    fn open(&self, uri: &str) -> Result<Box<dyn DataStream>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputResult {
    BufferWritten,
    BufferFull,
    InvalidState,
    InvalidFormat,
}

/// `IOutput`.
pub trait AudioOutputPlugin: Send + Sync {
    fn play(&mut self, buffer: &[f32], sample_rate: u32, channels: u16) -> OutputResult;
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
    fn drain(&mut self);
    fn set_volume(&mut self, volume: f32);
    fn device_names(&self) -> Vec<String>;
}

/// `IDSP`.
pub trait Dsp: Send + Sync {
    /// Processes `buffer` in place; returns whether it modified anything.
    fn process(&mut self, buffer: &mut [f32]) -> bool;
}

/// Events forwarded to `IPlaybackRemote`s (§4.7 "Remote fan-out").
#[derive(Debug, Clone)]
pub enum RemoteEvent {
    TrackChanged { index: usize },
    PlaybackStateChanged(crate::transport::PlaybackState),
    VolumeChanged(f32),
    ModeChanged,
}

/// `IPlaybackRemote`.
pub trait PlaybackRemote: Send + Sync {
    fn on_event(&self, event: &RemoteEvent) -> Result<()>;
}

/// `IIndexerSource`: owns the scan lifecycle for virtual (non-filesystem)
/// tracks.
#[async_trait]
pub trait IndexerSource: Send + Sync {
    fn source_id(&self) -> i64;
    async fn scan_track(&self, external_id: &str, writer: &mut TrackRecord) -> Result<bool>;
}

/// `IAnalyzer` (§4.4 step 8): observes decoded buffers for a track and
/// optionally writes metadata back (e.g. ReplayGain, BPM detection).
pub trait Analyzer: Send + Sync {
    /// Called once per track before any buffer is fed. Returning false
    /// excludes the analyzer from this track's run.
    fn start(&mut self, track: &Track) -> bool;
    /// Called once per decoded buffer for every analyzer still running.
    /// Returning false stops the analyzer for the remainder of this track.
    fn analyze(&mut self, track: &Track, buffer: &[f32]) -> bool;
    /// Called when the stream ends for every analyzer that was started.
    /// Returning true means the analyzer wrote metadata and the track
    /// should be re-saved.
    fn end(&mut self, track: &Track) -> bool;
}

/// `IEncoder` (referenced in §4.2's factory list; no write path is exercised
/// by the core engine, so this capability is a marker plugins may implement
/// without the host calling into it directly).
pub trait Encoder: Send + Sync {
    fn can_encode(&self, extension: &str) -> bool;
}

/// The set of capabilities one loaded plugin library actually supports.
/// Every field is independently optional — per §4.2, "each plugin exposes
/// zero or more of" the listed factories.
#[derive(Default, Clone)]
pub struct PluginCapabilities {
    pub identity: Option<std::sync::Arc<dyn PluginIdentity>>,
    pub metadata_reader: Option<std::sync::Arc<dyn MetadataReader>>,
    pub decoder_factory: Option<std::sync::Arc<dyn DecoderFactory>>,
    pub data_stream_factory: Option<std::sync::Arc<dyn DataStreamFactory>>,
    pub audio_output: Option<std::sync::Arc<parking_lot::Mutex<dyn AudioOutputPlugin>>>,
    pub dsp: Option<std::sync::Arc<parking_lot::Mutex<dyn Dsp>>>,
    pub playback_remote: Option<std::sync::Arc<dyn PlaybackRemote>>,
    pub indexer_source: Option<std::sync::Arc<dyn IndexerSource>>,
    pub encoder: Option<std::sync::Arc<dyn Encoder>>,
    pub analyzers: Vec<std::sync::Arc<parking_lot::Mutex<dyn Analyzer>>>,
}

/// The fixed entry-point signature every plugin shared library exports. The
/// host resolves this one symbol per library and calls it once at load time
/// to obtain the plugin's capability record.
pub type PluginEntryFn = unsafe extern "C" fn() -> *mut PluginCapabilities;

pub const PLUGIN_ENTRY_SYMBOL: &[u8] = b"tuneforge_plugin_entry";
