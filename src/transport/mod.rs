//! Transport (§4.6): opens a Data Stream and Decoder through the Plugin
//! Host, pulls decoded buffers through the active DSP chain, and hands them
//! to the Output — with a second, *pending* player prepared ahead of time
//! for gapless/crossfade handoff.
//!
//! Grounded on the donor's `player/mod.rs`/`player/audio.rs` command+event
//! channel shape, generalized from the donor's single always-on player to
//! musikcube's two-slot (active/pending) `Transport`/`Player` design.
//! Event fan-out redesigned onto `tokio::sync::broadcast` per the
//! multiple-subscriber note recorded in `SPEC_FULL.md` §4.6.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::plugin_host::capability::{AudioOutputPlugin, Decoder};
use crate::plugin_host::PluginHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Paused,
    Prepared,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEventKind {
    Scheduled,
    Prepared,
    Playing,
    AlmostDone,
    Finished,
    Stopped,
    Error,
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    Stream { kind: StreamEventKind, uri: String },
    Playback(PlaybackState),
    VolumeChanged(f32),
    TimeChanged(f64),
}

/// Fraction of a track's duration remaining that triggers `AlmostDone`
/// (and, when a pending player is armed, its handoff).
const ALMOST_DONE_LOOKAHEAD_SECONDS: f64 = 2.0;

enum PlayerCommand {
    Pause,
    Resume,
    Stop,
    Seek(f64),
}

struct PlayerHandle {
    uri: String,
    position_nanos: Arc<AtomicU64>,
    duration: f64,
    control: Sender<PlayerCommand>,
    join: Option<JoinHandle<()>>,
}

impl PlayerHandle {
    fn position_seconds(&self) -> f64 {
        self.position_nanos.load(Ordering::Relaxed) as f64 / 1_000_000_000.0
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        let _ = self.control.send(PlayerCommand::Stop);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

pub struct Transport {
    plugin_host: Arc<PluginHost>,
    active: Mutex<Option<PlayerHandle>>,
    pending: Mutex<Option<PlayerHandle>>,
    volume_bits: AtomicU32,
    muted: AtomicBool,
    state: Mutex<PlaybackState>,
    events: broadcast::Sender<TransportEvent>,
}

impl Transport {
    pub fn new(plugin_host: Arc<PluginHost>) -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self {
            plugin_host,
            active: Mutex::new(None),
            pending: Mutex::new(None),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            muted: AtomicBool::new(false),
            state: Mutex::new(PlaybackState::Stopped),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: PlaybackState) {
        *self.state.lock() = state;
        self.emit(TransportEvent::Playback(state));
    }

    pub fn get_playback_state(&self) -> PlaybackState {
        *self.state.lock()
    }

    /// Opens `uri` on a fresh decode thread and makes it the active player,
    /// tearing down whatever was active before.
    pub fn start(&self, uri: &str) -> Result<()> {
        let handle = spawn_player(uri, Arc::clone(&self.plugin_host), current_volume(self), self.events.clone())?;
        *self.active.lock() = Some(handle);
        self.set_state(PlaybackState::Playing);
        self.emit(TransportEvent::Stream { kind: StreamEventKind::Playing, uri: uri.to_string() });
        Ok(())
    }

    pub fn stop(&self) {
        *self.active.lock() = None;
        *self.pending.lock() = None;
        self.set_state(PlaybackState::Stopped);
    }

    pub fn pause(&self) {
        if let Some(player) = self.active.lock().as_ref() {
            let _ = player.control.send(PlayerCommand::Pause);
            self.set_state(PlaybackState::Paused);
        }
    }

    pub fn resume(&self) {
        if let Some(player) = self.active.lock().as_ref() {
            let _ = player.control.send(PlayerCommand::Resume);
            self.set_state(PlaybackState::Playing);
        }
    }

    /// Constructs (but does not start) the pending player for gapless or
    /// crossfade handoff. An empty `uri` clears any armed pending player.
    pub fn prepare_next_track(&self, uri: &str) -> Result<()> {
        if uri.is_empty() {
            *self.pending.lock() = None;
            return Ok(());
        }
        let handle = spawn_player(uri, Arc::clone(&self.plugin_host), current_volume(self), self.events.clone())?;
        // The pending player starts paused immediately; `maybe_handoff` below
        // resumes it once the active player signals `almost_done`.
        let _ = handle.control.send(PlayerCommand::Pause);
        *self.pending.lock() = Some(handle);
        self.emit(TransportEvent::Stream { kind: StreamEventKind::Prepared, uri: uri.to_string() });
        Ok(())
    }

    /// Checks whether the active player is within the lookahead of ending
    /// and, if a pending player is armed, hands playback off to it. Callers
    /// (the Playback Service's poll loop) invoke this periodically.
    pub fn maybe_handoff(&self) -> bool {
        let almost_done = {
            let active = self.active.lock();
            match active.as_ref() {
                Some(player) if player.duration > 0.0 => {
                    player.duration - player.position_seconds() <= ALMOST_DONE_LOOKAHEAD_SECONDS
                }
                _ => false,
            }
        };
        if !almost_done {
            return false;
        }

        let mut pending = self.pending.lock();
        let Some(next) = pending.take() else { return false };
        let _ = next.control.send(PlayerCommand::Resume);
        let uri = next.uri.clone();
        *self.active.lock() = Some(next);
        self.emit(TransportEvent::Stream { kind: StreamEventKind::AlmostDone, uri: uri.clone() });
        self.emit(TransportEvent::Stream { kind: StreamEventKind::Playing, uri });
        true
    }

    pub fn set_position(&self, seconds: f64) {
        if let Some(player) = self.active.lock().as_ref() {
            let _ = player.control.send(PlayerCommand::Seek(seconds));
            self.emit(TransportEvent::TimeChanged(seconds));
        }
    }

    pub fn position(&self) -> f64 {
        self.active.lock().as_ref().map(PlayerHandle::position_seconds).unwrap_or(0.0)
    }

    pub fn get_duration(&self) -> f64 {
        self.active.lock().as_ref().map(|p| p.duration).unwrap_or(0.0)
    }

    pub fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.volume_bits.store(volume.to_bits(), Ordering::Relaxed);
        self.emit(TransportEvent::VolumeChanged(volume));
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }
}

fn current_volume(transport: &Transport) -> f32 {
    if transport.is_muted() {
        0.0
    } else {
        transport.volume()
    }
}

fn extension_of(uri: &str) -> String {
    std::path::Path::new(uri)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

fn spawn_player(
    uri: &str,
    plugin_host: Arc<PluginHost>,
    initial_volume: f32,
    events: broadcast::Sender<TransportEvent>,
) -> Result<PlayerHandle> {
    let extension = extension_of(uri);

    let (stream_plugin_path, stream_factory) = plugin_host
        .find_data_stream_factory(uri)
        .ok_or_else(|| Error::DecoderError(format!("no data stream factory can open {uri}")))?;
    let (decoder_plugin_path, decoder_factory) = plugin_host
        .find_decoder_factory(&extension)
        .ok_or_else(|| Error::DecoderError(format!("no decoder can handle .{extension}")))?;

    // Validate the stream actually opens before committing to a decode
    // thread; the decoder itself re-opens `uri` by URI (§4.2 `IDecoder`).
    let stream_open_result = stream_factory.open(uri);
    if stream_open_result.is_err() {
        plugin_host.evict(&stream_plugin_path);
    }
    let _stream = stream_open_result?;

    let mut decoder = decoder_factory.create_decoder();
    if let Err(e) = decoder.open(uri) {
        plugin_host.evict(&decoder_plugin_path);
        return Err(e);
    }
    let duration = decoder.duration();

    let (control_tx, control_rx) = crossbeam_channel::unbounded();
    let position_nanos = Arc::new(AtomicU64::new(0));
    let position_for_thread = Arc::clone(&position_nanos);
    let uri_owned = uri.to_string();

    let audio_output = plugin_host
        .audio_output()
        .ok_or_else(|| Error::OutputInvalidFormat("no audio output plugin loaded".into()))?;
    let dsp_chain = plugin_host.dsp_chain();

    let host_for_thread = Arc::clone(&plugin_host);
    let join = std::thread::Builder::new()
        .name("player-decode".to_string())
        .spawn(move || {
            decode_loop(
                decoder,
                decoder_plugin_path,
                host_for_thread,
                audio_output,
                dsp_chain,
                control_rx,
                position_for_thread,
                initial_volume,
            );
        })
        .map_err(|e| Error::DecoderError(e.to_string()))?;

    let _ = events.send(TransportEvent::Stream { kind: StreamEventKind::Scheduled, uri: uri_owned.clone() });

    Ok(PlayerHandle {
        uri: uri_owned,
        position_nanos,
        duration,
        control: control_tx,
        join: Some(join),
    })
}

fn decode_loop(
    mut decoder: Box<dyn Decoder>,
    decoder_plugin_path: std::path::PathBuf,
    plugin_host: Arc<PluginHost>,
    audio_output: Arc<Mutex<dyn AudioOutputPlugin>>,
    dsp_chain: Vec<Arc<Mutex<dyn crate::plugin_host::capability::Dsp>>>,
    control: Receiver<PlayerCommand>,
    position_nanos: Arc<AtomicU64>,
    initial_volume: f32,
) {
    audio_output.lock().set_volume(initial_volume);

    let mut paused = false;
    let mut buffer = Vec::with_capacity(4096);

    loop {
        while let Ok(command) = control.try_recv() {
            match command {
                PlayerCommand::Pause => paused = true,
                PlayerCommand::Resume => paused = false,
                PlayerCommand::Stop => {
                    decoder.interrupt();
                    audio_output.lock().stop();
                    return;
                }
                PlayerCommand::Seek(seconds) => {
                    let actual = decoder.set_position(seconds);
                    position_nanos.store((actual * 1_000_000_000.0) as u64, Ordering::Relaxed);
                }
            }
        }

        if paused {
            std::thread::sleep(std::time::Duration::from_millis(20));
            continue;
        }

        if decoder.eof() {
            audio_output.lock().drain();
            return;
        }

        buffer.clear();
        match decoder.fill_buffer(&mut buffer) {
            Ok(true) => {
                for dsp in &dsp_chain {
                    dsp.lock().process(&mut buffer);
                }
                audio_output.lock().play(&buffer, 44_100, 2);
                let elapsed = buffer.len() as f64 / (44_100.0 * 2.0);
                position_nanos.fetch_add((elapsed * 1_000_000_000.0) as u64, Ordering::Relaxed);
            }
            Ok(false) => {
                audio_output.lock().drain();
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "decode error, evicting decoder plugin and stopping player");
                plugin_host.evict(&decoder_plugin_path);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_of_lowercases_and_strips_query() {
        assert_eq!(extension_of("/music/Song.MP3"), "mp3");
        assert_eq!(extension_of("noext"), "");
    }
}
