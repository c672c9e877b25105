//! Download scheduler: the single producer task.
//!
//! Picks the track whose next undownloaded chunk has the globally earliest
//! start time, fetches it, feeds the bandwidth estimator and quality
//! selector, restamps the fragment's track id, and (live) discovers newly
//! published fragments from the vendor timing boxes. A fetch failure is
//! fatal: the error lands in the shared slot and the cursor serves a clean
//! end of stream.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use satin_abr::Estimator;
use satin_mp4::{BoxPayload, FourCc, boxes_of_type, parse_boxes, restamp_track_id};
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use url::Url;

use crate::{
    error::StreamResult,
    events::StreamEvent,
    fetch::Fetcher,
    init::{build_init_segment, fabricated_id},
    manifest::TrackKind,
    pipeline::{Boundary, PendingInit, Shared, State},
    track::to_micros,
};

/// Bounded budget wait, so cancellation and seeks are picked up promptly.
const BUDGET_WAIT: Duration = Duration::from_millis(500);

/// Downloads shorter than this give throughput samples too noisy to keep.
const MIN_SAMPLE_MILLIS: u128 = 10;

pub(crate) struct DownloadScheduler {
    shared: Arc<Shared>,
    fetcher: Arc<dyn Fetcher>,
}

struct FetchJob {
    track: usize,
    sequence: usize,
    url: Url,
    kind: TrackKind,
    chunk_duration: Duration,
}

enum Pick {
    Fetch(FetchJob),
    Wait,
}

impl DownloadScheduler {
    pub(crate) fn new(shared: Arc<Shared>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { shared, fetcher }
    }

    pub(crate) async fn run(self) {
        debug!("scheduler started");
        loop {
            if self.shared.cancel.is_cancelled() {
                debug!("scheduler cancelled");
                return;
            }
            if let Err(e) = self.step().await {
                warn!(%e, "chunk fetch failed, stopping pipeline");
                self.shared.fail(e);
                return;
            }
        }
    }

    async fn step(&self) -> StreamResult<()> {
        let job = loop {
            if self.shared.cancel.is_cancelled() {
                return Ok(());
            }
            let pick = {
                let mut state = self.shared.state.lock();
                self.pick(&mut state)?
            };
            match pick {
                Pick::Fetch(job) => break job,
                Pick::Wait => {
                    let woken = self.shared.download_wait.notified();
                    tokio::select! {
                        _ = self.shared.cancel.cancelled() => return Ok(()),
                        _ = tokio::time::timeout(BUDGET_WAIT, woken) => {}
                    }
                }
            }
        };

        debug!(kind = ?job.kind, sequence = job.sequence, url = %job.url, "fetching chunk");
        let started = Instant::now();
        let data = self.fetcher.fetch(&job.url).await?;
        let elapsed = started.elapsed();

        let mut payload = data.to_vec();
        match restamp_track_id(&mut payload, fabricated_id(job.track)) {
            Ok(patched) => trace!(patched, "restamped fragment track ids"),
            Err(e) => warn!(%e, sequence = job.sequence, "fragment restamp failed, serving as-is"),
        }
        let discovered = if self.shared.is_live {
            discover_fragments(&payload)
        } else {
            Vec::new()
        };
        let bytes = payload.len() as u64;

        let switched = {
            let mut state = self.shared.state.lock();
            let state = &mut *state;

            // A seek may have relocated the cursors mid-fetch.
            if state.tracks[job.track].next_download != job.sequence {
                debug!(sequence = job.sequence, "discarding stale fetch after seek");
                return Ok(());
            }

            let track = &mut state.tracks[job.track];
            if elapsed.as_millis() >= MIN_SAMPLE_MILLIS {
                let bps = (bytes as f64 * 8.0 / elapsed.as_secs_f64()) as u64;
                track.estimator.push(bps);
            }

            for (start_time, duration) in &discovered {
                if track.append_if_new(*start_time, *duration) {
                    debug!(start_time, duration, "live fragment discovered");
                }
            }
            if self.shared.is_live {
                track.prune(self.shared.options.live_window.as_micros() as u64);
            }

            let chunk = &mut track.chunks[job.sequence];
            chunk.size = bytes;
            chunk.data = Some(Bytes::from(payload));
            track.next_download += 1;
            track.check_cursors();

            let selection = track
                .selector
                .decide(track.estimator.average(), job.chunk_duration);
            let switched = if selection.changed {
                let from_bps = track.levels[track.selected].bitrate_bps;
                track.selected = selection.level.index;
                Some((from_bps, selection.level.bitrate_bps))
            } else {
                None
            };

            if switched.is_some() {
                // The rebuilt header goes in front of the first chunk at the
                // new quality. While one is pending and unread, a second
                // switch folds into it; once the cursor started draining it,
                // a new rebuild is suppressed entirely.
                let boundary = Boundary {
                    track: job.track,
                    sequence: job.sequence + 1,
                };
                let data = build_init_segment(
                    &state.tracks,
                    self.shared.movie_timescale,
                    self.shared.movie_duration,
                );
                match &mut state.pending_init {
                    Some(pending) if pending.read_pos == 0 => pending.data = data,
                    Some(_) => {}
                    None => {
                        state.pending_init = Some(PendingInit {
                            data,
                            read_pos: 0,
                            boundary,
                        });
                    }
                }
            }

            switched
        };

        if let Some((from_bps, to_bps)) = switched {
            self.shared.emit(StreamEvent::QualitySwitched {
                kind: job.kind,
                from_bps,
                to_bps,
            });
        }
        self.shared.emit(StreamEvent::ChunkDownloaded {
            kind: job.kind,
            sequence: job.sequence,
            bytes,
            elapsed,
        });
        self.shared.playback_wait.notify_waiters();
        Ok(())
    }

    /// Choose the next chunk to fetch, or decide to wait.
    ///
    /// Marks end of stream the first time every on-demand timeline is fully
    /// downloaded; the task itself keeps running so a later seek (which
    /// clears `eof` and resets the cursors) can restart downloads.
    fn pick(&self, state: &mut State) -> StreamResult<Pick> {
        let options = &self.shared.options;
        let time_budget_us = 2 * options.pts_delay.as_micros() as u64;

        let mut best: Option<(u64, usize)> = None;
        let mut all_done = true;
        for (i, track) in state.tracks.iter().enumerate() {
            if track.next_download >= track.chunks.len() {
                continue;
            }
            all_done = false;
            let (count, buffered_us) = track.buffered();
            if count >= options.lookahead_chunks || buffered_us >= time_budget_us {
                continue;
            }
            let start_us = to_micros(track.chunks[track.next_download].start_time, track.timescale);
            if best.is_none_or(|(at, _)| start_us < at) {
                best = Some((start_us, i));
            }
        }

        match best {
            Some((_, i)) => {
                let track = &state.tracks[i];
                let sequence = track.next_download;
                let chunk = &track.chunks[sequence];
                Ok(Pick::Fetch(FetchJob {
                    track: i,
                    sequence,
                    url: track.chunk_url(sequence)?,
                    kind: track.kind,
                    chunk_duration: Duration::from_micros(to_micros(
                        chunk.duration,
                        track.timescale,
                    )),
                }))
            }
            None => {
                if all_done && !self.shared.is_live && !state.eof {
                    debug!("all timelines downloaded");
                    state.eof = true;
                    self.shared.emit(StreamEvent::EndOfStream);
                    self.shared.playback_wait.notify_waiters();
                }
                Ok(Pick::Wait)
            }
        }
    }
}

/// Pull `(start_time, duration)` of upcoming fragments out of the vendor
/// `tfrf` boxes of a live fragment. Unparseable input discovers nothing.
fn discover_fragments(payload: &[u8]) -> Vec<(u64, u64)> {
    let Ok(boxes) = parse_boxes(payload) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for tfrf in boxes_of_type(&boxes, FourCc::TFRF) {
        if let BoxPayload::Tfrf(tfrf) = &tfrf.payload {
            for entry in &tfrf.entries {
                out.push((entry.start_time, entry.duration));
            }
        }
    }
    out
}
