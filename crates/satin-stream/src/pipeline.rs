//! Pipeline lifecycle and shared state.
//!
//! One producer task (the download scheduler) and the demuxer's calling
//! thread share a single state mutex, never held across an await. Two
//! notifies pair with it: `download_wait` wakes the scheduler when buffer
//! budget frees up or a seek relocates the cursors, `playback_wait` wakes
//! the cursor when a chunk gains data. Teardown cancels the token, wakes
//! both sides and joins the scheduler task.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use satin_abr::SelectorOptions;
use tokio::{
    sync::{Notify, broadcast},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{StreamError, StreamResult},
    events::StreamEvent,
    fetch::Fetcher,
    init::build_init_segment,
    manifest::{Manifest, TrackKind},
    scheduler::DownloadScheduler,
    track::{Track, to_micros},
};

#[derive(Clone, Debug)]
pub struct StreamOptions {
    /// Maximum downloaded-but-unplayed chunks per track.
    pub lookahead_chunks: usize,
    /// Downstream buffering delay; the scheduler also stops once it has
    /// buffered twice this much media time.
    pub pts_delay: Duration,
    /// Quality-selector validation window.
    pub probe_length: Duration,
    /// Live DVR retention.
    pub live_window: Duration,
    pub events_capacity: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            lookahead_chunks: 3,
            pts_delay: Duration::from_secs(1),
            probe_length: Duration::from_secs(8),
            live_window: Duration::from_secs(30),
            events_capacity: 32,
        }
    }
}

/// Where in the virtual stream a chunk sits: which track, which sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Boundary {
    pub(crate) track: usize,
    pub(crate) sequence: usize,
}

/// A rebuilt init segment waiting to be spliced before its boundary chunk.
pub(crate) struct PendingInit {
    pub(crate) data: Bytes,
    pub(crate) read_pos: usize,
    pub(crate) boundary: Boundary,
}

pub(crate) struct State {
    pub(crate) tracks: Vec<Track>,
    /// Current playback time, advanced when a video chunk (or audio, with
    /// no video selected) is consumed.
    pub(crate) toffset_us: u64,
    pub(crate) pending_init: Option<PendingInit>,
    /// Every timeline fully downloaded (on-demand only).
    pub(crate) eof: bool,
    /// Cursor is currently starved; edge-triggers the underrun reaction.
    pub(crate) stalled: bool,
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<State>,
    pub(crate) error: Mutex<Option<StreamError>>,
    pub(crate) download_wait: Notify,
    pub(crate) playback_wait: Notify,
    pub(crate) cancel: CancellationToken,
    pub(crate) events_tx: broadcast::Sender<StreamEvent>,
    pub(crate) is_live: bool,
    pub(crate) movie_timescale: u64,
    pub(crate) movie_duration: u64,
    pub(crate) options: StreamOptions,
}

impl Shared {
    pub(crate) fn emit(&self, event: StreamEvent) {
        let _ = self.events_tx.send(event);
    }

    pub(crate) fn total_duration_us(&self) -> u64 {
        to_micros(self.movie_duration, self.movie_timescale)
    }

    /// Record a fatal error and unblock both sides.
    pub(crate) fn fail(&self, error: StreamError) {
        *self.error.lock() = Some(error);
        self.download_wait.notify_waiters();
        self.playback_wait.notify_waiters();
    }

    pub(crate) fn has_error(&self) -> bool {
        self.error.lock().is_some()
    }
}

/// An open adaptive stream: spawns the scheduler on `open` and serves the
/// forged byte stream through the cursor methods in [`crate::cursor`].
pub struct Pipeline {
    pub(crate) shared: Arc<Shared>,
    scheduler: Option<JoinHandle<()>>,
    /// Bytes served so far.
    pub(crate) position: u64,
    /// Chunk currently being drained.
    pub(crate) current: Option<Boundary>,
}

impl Pipeline {
    /// Validate the manifest, build every timeline, start each selected
    /// track at its lowest bitrate and spawn the download task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn open(
        manifest: &Manifest,
        fetcher: Arc<dyn Fetcher>,
        options: StreamOptions,
    ) -> StreamResult<Self> {
        if manifest.tracks.is_empty() {
            return Err(StreamError::Manifest("manifest has no tracks".into()));
        }
        if manifest.timescale == 0 {
            return Err(StreamError::Manifest("manifest has a zero timescale".into()));
        }

        // First track of each kind is the selected one.
        let selector_opts = SelectorOptions {
            probe_length: options.probe_length,
        };
        let mut tracks: Vec<Track> = Vec::new();
        let mut seen: Vec<TrackKind> = Vec::new();
        for manifest_track in &manifest.tracks {
            if seen.contains(&manifest_track.kind) {
                continue;
            }
            seen.push(manifest_track.kind);
            tracks.push(Track::from_manifest(
                manifest_track,
                &manifest.base_url,
                &selector_opts,
            )?);
        }

        // The stream opens with a header covering all tracks, spliced
        // before the earliest first chunk.
        let boundary = earliest_boundary(&tracks);
        let data = build_init_segment(&tracks, manifest.timescale, manifest.duration);
        debug!(
            tracks = tracks.len(),
            live = manifest.is_live,
            init_len = data.len(),
            "pipeline opened"
        );

        let state = State {
            tracks,
            toffset_us: 0,
            pending_init: Some(PendingInit {
                data,
                read_pos: 0,
                boundary,
            }),
            eof: false,
            stalled: false,
        };

        let (events_tx, _) = broadcast::channel(options.events_capacity);
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            error: Mutex::new(None),
            download_wait: Notify::new(),
            playback_wait: Notify::new(),
            cancel: CancellationToken::new(),
            events_tx,
            is_live: manifest.is_live,
            movie_timescale: manifest.timescale,
            movie_duration: manifest.duration,
            options,
        });

        let scheduler = DownloadScheduler::new(shared.clone(), fetcher);
        let handle = tokio::spawn(scheduler.run());

        Ok(Self {
            shared,
            scheduler: Some(handle),
            position: 0,
            current: None,
        })
    }

    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.shared.events_tx.subscribe()
    }

    /// The fatal error that ended the stream, if any.
    pub fn error(&self) -> Option<StreamError> {
        self.shared.error.lock().clone()
    }

    /// Cancel, wake both sides and join the scheduler task.
    pub async fn close(&mut self) {
        self.shared.cancel.cancel();
        self.shared.download_wait.notify_waiters();
        self.shared.playback_wait.notify_waiters();
        if let Some(handle) = self.scheduler.take() {
            let _ = handle.await;
        }
        debug!("pipeline closed");
    }

    #[cfg(test)]
    pub(crate) fn for_test(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            scheduler: None,
            position: 0,
            current: None,
        }
    }
}

/// Track/sequence pair with the globally earliest unserved start time.
pub(crate) fn earliest_boundary(tracks: &[Track]) -> Boundary {
    let mut best = Boundary {
        track: 0,
        sequence: 0,
    };
    let mut best_at = u64::MAX;
    for (i, track) in tracks.iter().enumerate() {
        if let Some(chunk) = track.chunks.get(track.playback) {
            let at = to_micros(chunk.start_time, track.timescale);
            if at < best_at {
                best_at = at;
                best = Boundary {
                    track: i,
                    sequence: track.playback,
                };
            }
        }
    }
    best
}
