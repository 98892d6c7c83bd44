//! Playback Service (§4.7): a single-threaded cooperative supervisor over
//! the Transport and a Track List, reachable from any caller thread through
//! a message queue.
//!
//! Grounded on musikcube's `PlaybackService.h`/`.cpp` (the constants
//! `NO_POSITION`/`START_OVER`/`PREVIOUS_GRACE_PERIOD`, `PrepareNextTrack`,
//! the next-track selection ladder, shuffle toggle, Editor destructor
//! bookkeeping), translated from its C++ message-queue-plus-mutex shape onto
//! a `tokio::sync::mpsc` task loop per §4.7's own implementation note —
//! every state mutation happens inside the one task that owns `rx`, so the
//! donor's recursive playlist mutex has no counterpart here (§9 "Recursive
//! scoped locks"): playlist edits are themselves messages processed on that
//! task rather than a separate lock callers take.

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::Config;
use crate::model::Track;
use crate::plugin_host::capability::{PlaybackRemote, RemoteEvent};
use crate::plugin_host::PluginHost;
use crate::track_list::TrackList;
use crate::transport::{PlaybackState, StreamEventKind, Transport, TransportEvent};

/// Sentinel for "no current index" (distinct from any real `usize`).
pub const NONE: i64 = -1;
/// Sentinel meaning the playlist was edited out from under the playing
/// item; the next `prepare_next_track` restarts at the top (§4.7 "Editor
/// interactions": "Delete of the currently-playing item sets
/// `play_index = START_OVER`").
pub const START_OVER: i64 = -2;

pub const PREVIOUS_GRACE_PERIOD_SECONDS: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    None,
    Track,
    List,
}

impl RepeatMode {
    fn as_str(self) -> &'static str {
        match self {
            RepeatMode::None => "none",
            RepeatMode::Track => "track",
            RepeatMode::List => "list",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "track" => RepeatMode::Track,
            "list" => RepeatMode::List,
            _ => RepeatMode::None,
        }
    }
}

/// Events surfaced to clients (§6 "Events surfaced to clients").
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    TrackChanged { index: i64, track: Track },
    ModeChanged,
    Shuffled(bool),
    PlaybackState(PlaybackState),
    VolumeChanged(f32),
    TimeChanged(f64),
    PlaylistModified,
}

enum Message {
    Play { index: i64 },
    Stop,
    PauseResume,
    Next,
    Previous,
    ToggleShuffle,
    SetRepeatMode(RepeatMode),
    SetVolume(f32),
    SetMuted(bool),
    Transport(TransportEvent),
    PrepareNextTrack,
    GetPlaybackState(oneshot::Sender<PlaybackState>),
    GetIndex(oneshot::Sender<i64>),
    LoadPlaylist { ids: Vec<i64>, play_index: i64 },
    InsertTrack { index: usize, id: i64 },
    PushTrack { id: i64 },
    DeleteTrack { index: usize },
    MoveTrack { from: usize, to: usize },
    ClearPlaylist,
}

/// A cheap, cloneable front for posting messages to the service task.
#[derive(Clone)]
pub struct PlaybackServiceHandle {
    tx: mpsc::UnboundedSender<Message>,
    events: broadcast::Sender<ServiceEvent>,
}

impl PlaybackServiceHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    pub fn play(&self, index: i64) {
        let _ = self.tx.send(Message::Play { index });
    }

    pub fn stop(&self) {
        let _ = self.tx.send(Message::Stop);
    }

    pub fn pause_or_resume(&self) {
        let _ = self.tx.send(Message::PauseResume);
    }

    pub fn next(&self) {
        let _ = self.tx.send(Message::Next);
    }

    pub fn previous(&self) {
        let _ = self.tx.send(Message::Previous);
    }

    pub fn toggle_shuffle(&self) {
        let _ = self.tx.send(Message::ToggleShuffle);
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) {
        let _ = self.tx.send(Message::SetRepeatMode(mode));
    }

    pub fn set_volume(&self, volume: f32) {
        let _ = self.tx.send(Message::SetVolume(volume));
    }

    pub fn set_muted(&self, muted: bool) {
        let _ = self.tx.send(Message::SetMuted(muted));
    }

    pub fn load_playlist(&self, ids: Vec<i64>, play_index: i64) {
        let _ = self.tx.send(Message::LoadPlaylist { ids, play_index });
    }

    pub fn insert(&self, index: usize, id: i64) {
        let _ = self.tx.send(Message::InsertTrack { index, id });
    }

    pub fn push(&self, id: i64) {
        let _ = self.tx.send(Message::PushTrack { id });
    }

    pub fn delete(&self, index: usize) {
        let _ = self.tx.send(Message::DeleteTrack { index });
    }

    pub fn move_track(&self, from: usize, to: usize) {
        let _ = self.tx.send(Message::MoveTrack { from, to });
    }

    pub fn clear_playlist(&self) {
        let _ = self.tx.send(Message::ClearPlaylist);
    }

    pub async fn get_playback_state(&self) -> Option<PlaybackState> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(Message::GetPlaybackState(reply_tx)).ok()?;
        reply_rx.await.ok()
    }

    pub async fn get_index(&self) -> Option<i64> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(Message::GetIndex(reply_tx)).ok()?;
        reply_rx.await.ok()
    }
}

struct ServiceState {
    pool: SqlitePool,
    playlist: TrackList,
    unshuffled: TrackList,
    index: i64,
    next_index: i64,
    repeat_mode: RepeatMode,
    volume: f32,
    muted: bool,
    pending_uri_index: i64,
}

impl ServiceState {
    fn is_shuffled(&self) -> bool {
        self.unshuffled.count() > 0
    }

    fn current_id(&self) -> Option<i64> {
        if self.index >= 0 {
            self.playlist.get_id(self.index as usize)
        } else {
            None
        }
    }

    async fn track_at(&mut self, index: i64) -> Option<Track> {
        if index < 0 {
            return None;
        }
        self.playlist.get(&self.pool, index as usize).await.ok().flatten()
    }
}

pub struct PlaybackService;

impl PlaybackService {
    /// Spawns the service task and returns a cloneable handle to it. The
    /// task owns `transport`, the loaded remotes, and all playlist state
    /// for its entire lifetime.
    pub fn spawn(pool: SqlitePool, transport: Arc<Transport>, plugin_host: &PluginHost) -> PlaybackServiceHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _rx) = broadcast::channel(256);
        let handle = PlaybackServiceHandle { tx: tx.clone(), events: events.clone() };

        let config = Config::load();
        let state = ServiceState {
            pool,
            playlist: TrackList::new(),
            unshuffled: TrackList::new(),
            index: NONE,
            next_index: NONE,
            repeat_mode: RepeatMode::from_str(&config.audio.repeat_mode),
            volume: config.audio.default_volume,
            muted: false,
            pending_uri_index: NONE,
        };

        let remotes = plugin_host.playback_remotes();

        // Bridge transport broadcast events into this task's own queue so
        // every mutation happens on the one logical thread (§4.7).
        let mut transport_events = transport.subscribe();
        let bridge_tx = tx.clone();
        tokio::spawn(async move {
            while let Ok(event) = transport_events.recv().await {
                if bridge_tx.send(Message::Transport(event)).is_err() {
                    break;
                }
            }
        });

        tokio::spawn(run(rx, state, transport, remotes, events, handle.clone()));

        handle
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Message>,
    mut state: ServiceState,
    transport: Arc<Transport>,
    mut remotes: Vec<Arc<dyn PlaybackRemote>>,
    events: broadcast::Sender<ServiceEvent>,
    handle: PlaybackServiceHandle,
) {
    while let Some(message) = rx.recv().await {
        match message {
            Message::Play { index } => {
                state.index = index;
                if let Some(track) = state.track_at(index).await {
                    let _ = transport.start(&track.external_id);
                    emit(&events, &mut remotes, ServiceEvent::TrackChanged { index, track });
                }
                prepare_next_track(&mut state, &transport).await;
            }
            Message::Stop => {
                transport.stop();
                state.index = NONE;
                state.next_index = NONE;
                state.pending_uri_index = NONE;
            }
            Message::PauseResume => match transport.get_playback_state() {
                PlaybackState::Playing => transport.pause(),
                PlaybackState::Paused => transport.resume(),
                _ => {}
            },
            Message::Next => {
                if state.next_index != NONE {
                    handle.play(state.next_index);
                } else {
                    transport.stop();
                }
            }
            Message::Previous => {
                if transport.position() > PREVIOUS_GRACE_PERIOD_SECONDS {
                    if let Some(track) = state.track_at(state.index).await {
                        let _ = transport.start(&track.external_id);
                    }
                } else if state.index > 0 {
                    handle.play(state.index - 1);
                } else if state.repeat_mode == RepeatMode::List && state.playlist.count() > 0 {
                    handle.play(state.playlist.count() as i64 - 1);
                }
            }
            Message::ToggleShuffle => {
                if state.is_shuffled() {
                    state.playlist.swap(&mut state.unshuffled);
                    state.unshuffled = TrackList::new();
                    if let Some(id) = state.current_id() {
                        state.index = state.playlist.index_of(id).map(|i| i as i64).unwrap_or(NONE);
                    }
                    emit(&events, &mut remotes, ServiceEvent::Shuffled(false));
                } else {
                    state.unshuffled.copy_from(&state.playlist);
                    state.playlist.editor().shuffle();
                    if let Some(id) = state.current_id() {
                        state.index = state.playlist.index_of(id).map(|i| i as i64).unwrap_or(NONE);
                    }
                    emit(&events, &mut remotes, ServiceEvent::Shuffled(true));
                }
                prepare_next_track(&mut state, &transport).await;
            }
            Message::SetRepeatMode(mode) => {
                state.repeat_mode = mode;
                persist_preferences(&state);
                emit(&events, &mut remotes, ServiceEvent::ModeChanged);
                prepare_next_track(&mut state, &transport).await;
            }
            Message::SetVolume(volume) => {
                state.volume = volume.clamp(0.0, 1.0);
                transport.set_volume(state.volume);
                persist_preferences(&state);
                emit(&events, &mut remotes, ServiceEvent::VolumeChanged(state.volume));
            }
            Message::SetMuted(muted) => {
                state.muted = muted;
                transport.set_muted(muted);
            }
            Message::LoadPlaylist { ids, play_index } => {
                let mut list = TrackList::new();
                {
                    let mut editor = list.editor();
                    for id in ids {
                        editor.push(id);
                    }
                }
                state.playlist = list;
                state.unshuffled = TrackList::new();
                emit(&events, &mut remotes, ServiceEvent::PlaylistModified);
                if play_index >= 0 {
                    handle.play(play_index);
                } else {
                    state.index = NONE;
                    state.next_index = NONE;
                }
            }
            Message::InsertTrack { index, id } => {
                let mutated = {
                    let mut editor = state.playlist.editor();
                    editor.insert(index, id);
                    editor.mutated_now_playing()
                };
                emit(&events, &mut remotes, ServiceEvent::PlaylistModified);
                if mutated && index as i64 <= state.index {
                    state.index += 1;
                }
                prepare_next_track(&mut state, &transport).await;
            }
            Message::PushTrack { id } => {
                state.playlist.editor().push(id);
                emit(&events, &mut remotes, ServiceEvent::PlaylistModified);
                prepare_next_track(&mut state, &transport).await;
            }
            Message::DeleteTrack { index } => {
                state.playlist.editor().delete(index);
                emit(&events, &mut remotes, ServiceEvent::PlaylistModified);
                if index as i64 == state.index {
                    state.index = START_OVER;
                } else if (index as i64) < state.index {
                    state.index -= 1;
                }
                prepare_next_track(&mut state, &transport).await;
            }
            Message::MoveTrack { from, to } => {
                state.playlist.editor().move_track(from, to);
                emit(&events, &mut remotes, ServiceEvent::PlaylistModified);
                prepare_next_track(&mut state, &transport).await;
            }
            Message::ClearPlaylist => {
                state.playlist.editor().clear();
                state.unshuffled = TrackList::new();
                state.index = START_OVER;
                emit(&events, &mut remotes, ServiceEvent::PlaylistModified);
                prepare_next_track(&mut state, &transport).await;
            }
            Message::PrepareNextTrack => {
                prepare_next_track(&mut state, &transport).await;
            }
            Message::Transport(event) => {
                handle_transport_event(&mut state, &transport, &events, &mut remotes, &handle, event).await;
            }
            Message::GetPlaybackState(reply) => {
                let _ = reply.send(transport.get_playback_state());
            }
            Message::GetIndex(reply) => {
                let _ = reply.send(state.index);
            }
        }
    }

    persist_preferences(&state);
}

/// §4.7 "Next-track selection": recomputes `next_index` and arms the
/// Transport's pending player.
async fn prepare_next_track(state: &mut ServiceState, transport: &Transport) {
    let count = state.playlist.count() as i64;

    state.next_index = if state.repeat_mode == RepeatMode::Track && state.index >= 0 {
        state.index
    } else if state.index == START_OVER {
        if count > 0 {
            state.index = NONE;
            0
        } else {
            state.index = NONE;
            NONE
        }
    } else if state.index >= 0 && state.index + 1 < count {
        state.index + 1
    } else if state.repeat_mode == RepeatMode::List && count > 0 {
        0
    } else {
        NONE
    };

    if state.next_index == NONE {
        let _ = transport.prepare_next_track("");
        state.pending_uri_index = NONE;
        return;
    }

    if let Some(track) = state.track_at(state.next_index).await {
        let _ = transport.prepare_next_track(&track.external_id);
        state.pending_uri_index = state.next_index;
    }
}

async fn handle_transport_event(
    state: &mut ServiceState,
    transport: &Transport,
    events: &broadcast::Sender<ServiceEvent>,
    remotes: &mut Vec<Arc<dyn PlaybackRemote>>,
    handle: &PlaybackServiceHandle,
    event: TransportEvent,
) {
    match event {
        // §4.7 "Stream transition": when the transport starts playing the
        // URI we prepared as `next_index`, commit it.
        TransportEvent::Stream { kind: StreamEventKind::Playing, uri } => {
            if state.pending_uri_index == NONE || state.next_index != state.pending_uri_index {
                return;
            }
            if let Some(next_track) = state.track_at(state.next_index).await {
                if next_track.external_id == uri {
                    state.index = state.next_index;
                    state.next_index = NONE;
                    state.pending_uri_index = NONE;
                    emit(events, remotes, ServiceEvent::TrackChanged { index: state.index, track: next_track });
                    prepare_next_track(state, transport).await;
                }
            }
        }
        TransportEvent::Stream { kind: StreamEventKind::Finished, .. }
        | TransportEvent::Stream { kind: StreamEventKind::Stopped, .. } => {
            emit(events, remotes, ServiceEvent::PlaybackState(PlaybackState::Stopped));
        }
        TransportEvent::Stream { kind: StreamEventKind::Error, uri } => {
            tracing::warn!(uri = %uri, "transport reported a stream error, treating as end of track");
            handle.next();
        }
        TransportEvent::Stream { .. } => {}
        TransportEvent::Playback(playback_state) => {
            emit(events, remotes, ServiceEvent::PlaybackState(playback_state));
        }
        TransportEvent::VolumeChanged(volume) => {
            emit(events, remotes, ServiceEvent::VolumeChanged(volume));
        }
        TransportEvent::TimeChanged(seconds) => {
            emit(events, remotes, ServiceEvent::TimeChanged(seconds));
        }
    }
}

/// Fans `event` out to every broadcast subscriber plus the loaded
/// `IPlaybackRemote`s. A remote whose `on_event` returns an error is
/// misbehaving (§4.7 "Remote fan-out") and is dropped from `remotes` on the
/// spot, matching `PluginHost::evict`'s "misbehaved at call time, continue"
/// handling of the same failure class.
fn emit(events: &broadcast::Sender<ServiceEvent>, remotes: &mut Vec<Arc<dyn PlaybackRemote>>, event: ServiceEvent) {
    let remote_event = match &event {
        ServiceEvent::TrackChanged { index, .. } => Some(RemoteEvent::TrackChanged { index: (*index).max(0) as usize }),
        ServiceEvent::PlaybackState(s) => Some(RemoteEvent::PlaybackStateChanged(*s)),
        ServiceEvent::VolumeChanged(v) => Some(RemoteEvent::VolumeChanged(*v)),
        ServiceEvent::ModeChanged => Some(RemoteEvent::ModeChanged),
        _ => None,
    };
    if let Some(remote_event) = remote_event {
        remotes.retain(|remote| match remote.on_event(&remote_event) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "remote rejected event, dropping it");
                false
            }
        });
    }
    let _ = events.send(event);
}

fn persist_preferences(state: &ServiceState) {
    let mut config = Config::load();
    config.audio.default_volume = state.volume;
    config.audio.repeat_mode = state.repeat_mode.as_str().to_string();
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "failed to persist playback preferences");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_mode_round_trips_through_str() {
        assert_eq!(RepeatMode::from_str(RepeatMode::Track.as_str()), RepeatMode::Track);
        assert_eq!(RepeatMode::from_str(RepeatMode::List.as_str()), RepeatMode::List);
        assert_eq!(RepeatMode::from_str("bogus"), RepeatMode::None);
    }

    #[test]
    fn none_and_start_over_are_distinct_negative_sentinels() {
        assert_ne!(NONE, START_OVER);
        assert!(NONE < 0);
        assert!(START_OVER < 0);
    }
}
