//! Playback cursor: the consumer side of the pipeline.
//!
//! Serves the forged byte stream to the demuxer in increasing time order
//! across tracks, splicing pending init segments at their boundary and
//! blocking (bounded) when the next chunk has no data yet. Byte positions
//! are a fiction: the stream reports a fixed size of [`STREAM_SIZE`] and a
//! seek position is interpreted as a fraction of the total duration unless
//! it lands inside the chunk currently being drained.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use satin_abr::Estimator;
use tracing::debug;

use crate::{
    error::{StreamError, StreamResult},
    events::StreamEvent,
    manifest::TrackKind,
    pipeline::{Boundary, Pipeline, State},
    track::to_micros,
};

/// Reported stream size. True byte size is unknowable for adaptive media;
/// this sentinel makes positions act as fractions of the total duration.
pub const STREAM_SIZE: u64 = 1000;

/// What a `set_position` call actually means, decided once at the API
/// boundary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum SeekIntent {
    /// Target lands inside the chunk being drained: adjust in place.
    ByteOffset(u64),
    /// General case: target is a fraction of the total duration.
    TimeFraction(f64),
}

/// Bounded data wait. A wakeup can race the wait registration, so the
/// cursor re-polls error and close state at least this often.
const DATA_WAIT: Duration = Duration::from_millis(500);

enum Step {
    Served(usize),
    /// Consumed an empty chunk; go around without waiting.
    Retry,
    Wait,
    Eof,
}

enum PeekStep {
    Ready(Bytes),
    Wait,
    Eof,
}

impl Pipeline {
    /// Read the next bytes of the stream. `Ok(0)` is end of stream, which
    /// is also what a fatal fetch failure degrades to.
    pub async fn read(&mut self, buf: &mut [u8]) -> StreamResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let shared = Arc::clone(&self.shared);
        loop {
            if shared.cancel.is_cancelled() {
                return Err(StreamError::Closed);
            }
            let step = {
                let mut state = shared.state.lock();
                self.advance(&mut state, buf)
            };
            match step {
                Step::Served(n) => {
                    self.position += n as u64;
                    return Ok(n);
                }
                Step::Retry => {}
                Step::Eof => return Ok(0),
                Step::Wait => {
                    if shared.has_error() {
                        return Ok(0);
                    }
                    self.wait_for_data().await;
                }
            }
        }
    }

    /// Borrow the next bytes without consuming them. Never crosses a chunk
    /// boundary: the result is at most the remainder of the current chunk
    /// (or of the init segment being spliced).
    pub async fn peek(&mut self, max: usize) -> StreamResult<Bytes> {
        let shared = Arc::clone(&self.shared);
        loop {
            if shared.cancel.is_cancelled() {
                return Err(StreamError::Closed);
            }
            let step = {
                let mut state = shared.state.lock();
                self.peek_at(&mut state, max)
            };
            match step {
                PeekStep::Ready(bytes) => return Ok(bytes),
                PeekStep::Eof => return Ok(Bytes::new()),
                PeekStep::Wait => {
                    if shared.has_error() {
                        return Ok(Bytes::new());
                    }
                    self.wait_for_data().await;
                }
            }
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn size(&self) -> u64 {
        STREAM_SIZE
    }

    pub fn pts_delay(&self) -> Duration {
        self.shared.options.pts_delay
    }

    /// Seek. In-chunk byte targets adjust the read position; fractional
    /// targets reset the whole pipeline to the chunk covering the target
    /// time (on-demand only; a live stream rejects them).
    pub fn set_position(&mut self, pos: u64) -> StreamResult<()> {
        match self.classify(pos) {
            SeekIntent::ByteOffset(target) => {
                let mut state = self.shared.state.lock();
                let Some(current) = self.current else {
                    return Err(StreamError::SeekOutsideWindow);
                };
                let chunk = &mut state.tracks[current.track].chunks[current.sequence];
                let Some(offset) = chunk.offset else {
                    return Err(StreamError::SeekOutsideWindow);
                };
                chunk.read_pos = (target - offset) as usize;
                self.position = pos;
                Ok(())
            }
            SeekIntent::TimeFraction(fraction) => {
                if self.shared.is_live {
                    return Err(StreamError::SeekOutsideWindow);
                }
                let total_us = self.shared.total_duration_us();
                if total_us == 0 {
                    return Err(StreamError::SeekUnsupported);
                }
                let target_us = (total_us as f64 * fraction) as u64;
                debug!(pos, target_us, "fractional seek, resetting pipeline");

                let mut state = self.shared.state.lock();
                for track in &mut state.tracks {
                    let time = to_units(target_us, track.timescale);
                    track.seek_to_time(time);
                }
                state.pending_init = None;
                state.eof = false;
                state.stalled = false;
                state.toffset_us = target_us;
                drop(state);

                self.current = None;
                self.position = pos;
                self.shared.download_wait.notify_waiters();
                Ok(())
            }
        }
    }

    /// Decide once what a position means: inside the currently addressed
    /// chunk it is a plain byte offset, anywhere else a duration fraction.
    fn classify(&self, pos: u64) -> SeekIntent {
        let state = self.shared.state.lock();
        if let Some(current) = self.current {
            let chunk = &state.tracks[current.track].chunks[current.sequence];
            if let Some(offset) = chunk.offset {
                if chunk.data.is_some() && pos >= offset && pos < offset + chunk.size {
                    return SeekIntent::ByteOffset(pos);
                }
            }
        }
        SeekIntent::TimeFraction(pos.min(STREAM_SIZE) as f64 / STREAM_SIZE as f64)
    }

    fn advance(&mut self, state: &mut State, buf: &mut [u8]) -> Step {
        if self.current.is_none() {
            self.current = next_boundary(state);
        }
        let Some(current) = self.current else {
            if state.eof && !self.shared.is_live {
                return Step::Eof;
            }
            self.note_stall(state);
            return Step::Wait;
        };

        // A pending init segment is spliced right before its boundary
        // chunk, and drained to completion once started.
        if let Some(pending) = &mut state.pending_init {
            if pending.read_pos > 0 || pending.boundary == current {
                let n = (pending.data.len() - pending.read_pos).min(buf.len());
                buf[..n].copy_from_slice(&pending.data[pending.read_pos..pending.read_pos + n]);
                pending.read_pos += n;
                if pending.read_pos == pending.data.len() {
                    debug!(bytes = pending.data.len(), "init segment spliced");
                    state.pending_init = None;
                }
                state.stalled = false;
                return Step::Served(n);
            }
        }

        if state.tracks[current.track].chunks[current.sequence]
            .data
            .is_none()
        {
            self.note_stall(state);
            return Step::Wait;
        }

        let video_selected = state.tracks.iter().any(|t| t.kind == TrackKind::Video);
        let track = &mut state.tracks[current.track];
        let kind = track.kind;
        let timescale = track.timescale;
        let chunk = &mut track.chunks[current.sequence];
        let Some(data) = chunk.data.clone() else {
            return Step::Wait;
        };

        // The chunk's first byte goes out at the current stream position;
        // in-chunk byte seeks are resolved against this served-stream
        // offset, so it must count spliced init-segment bytes too.
        if chunk.read_pos == 0 {
            chunk.offset = Some(self.position);
        }

        let n = (data.len() - chunk.read_pos).min(buf.len());
        buf[..n].copy_from_slice(&data[chunk.read_pos..chunk.read_pos + n]);
        chunk.read_pos += n;

        if chunk.read_pos >= data.len() {
            let end_us = to_micros(chunk.end_time(), timescale);
            if self.shared.is_live {
                // A live chunk is gone once played; on-demand keeps the
                // slot so a seek can re-enter it.
                chunk.data = None;
            }
            track.playback = current.sequence + 1;
            track.check_cursors();
            self.current = None;
            if kind == TrackKind::Video || !video_selected {
                state.toffset_us = end_us;
            }
            self.shared.download_wait.notify_waiters();
        }
        state.stalled = false;

        if n == 0 { Step::Retry } else { Step::Served(n) }
    }

    fn peek_at(&mut self, state: &mut State, max: usize) -> PeekStep {
        if self.current.is_none() {
            self.current = next_boundary(state);
        }
        let Some(current) = self.current else {
            if state.eof && !self.shared.is_live {
                return PeekStep::Eof;
            }
            self.note_stall(state);
            return PeekStep::Wait;
        };

        if let Some(pending) = &state.pending_init {
            if pending.read_pos > 0 || pending.boundary == current {
                let end = (pending.read_pos + max).min(pending.data.len());
                return PeekStep::Ready(pending.data.slice(pending.read_pos..end));
            }
        }

        if state.tracks[current.track].chunks[current.sequence]
            .data
            .is_none()
        {
            self.note_stall(state);
            return PeekStep::Wait;
        }
        let chunk = &state.tracks[current.track].chunks[current.sequence];
        match &chunk.data {
            Some(data) => {
                let end = (chunk.read_pos + max).min(data.len());
                PeekStep::Ready(data.slice(chunk.read_pos..end))
            }
            None => PeekStep::Wait,
        }
    }

    /// First starvation after progress collapses every estimator to its
    /// recent ring, so the next selection reacts to the stall.
    fn note_stall(&self, state: &mut State) {
        if !state.stalled {
            state.stalled = true;
            for track in &mut state.tracks {
                track.estimator.on_underrun();
            }
            self.shared.emit(StreamEvent::Underrun);
            debug!("playback underrun");
        }
    }

    async fn wait_for_data(&self) {
        let woken = self.shared.playback_wait.notified();
        tokio::select! {
            _ = self.shared.cancel.cancelled() => {}
            _ = tokio::time::timeout(DATA_WAIT, woken) => {}
        }
    }
}

/// Chunk with the earliest start time among every track's playback cursor.
fn next_boundary(state: &State) -> Option<Boundary> {
    let mut best: Option<(u64, Boundary)> = None;
    for (i, track) in state.tracks.iter().enumerate() {
        let Some(chunk) = track.chunks.get(track.playback) else {
            continue;
        };
        let at = to_micros(chunk.start_time, track.timescale);
        if best.is_none_or(|(b, _)| at < b) {
            best = Some((
                at,
                Boundary {
                    track: i,
                    sequence: track.playback,
                },
            ));
        }
    }
    best.map(|(_, b)| b)
}

/// Convert microseconds back to track timescale units.
fn to_units(micros: u64, timescale: u64) -> u64 {
    let scaled = u128::from(micros) * u128::from(timescale) / 1_000_000;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use satin_abr::SelectorOptions;
    use tokio::sync::{Notify, broadcast};
    use tokio_util::sync::CancellationToken;
    use url::Url;

    use crate::{
        manifest::{ManifestTrack, MediaParams, QualityLevel, SegmentPoint},
        pipeline::{PendingInit, Shared, StreamOptions},
        track::Track,
    };

    use super::*;

    fn video_track(chunk_count: u32, chunk_units: u64) -> Track {
        let manifest_track = ManifestTrack {
            kind: TrackKind::Video,
            timescale: 1000,
            url_template: "v/{bitrate}/{start time}".into(),
            levels: vec![QualityLevel {
                bitrate_bps: 600_000,
                media: MediaParams::Video {
                    fourcc: *b"avc1",
                    width: 640,
                    height: 360,
                    codec_private: vec![],
                },
            }],
            points: vec![SegmentPoint::new(Some(0), Some(chunk_units), Some(chunk_count))],
        };
        let base = Url::parse("http://example.com/m").unwrap();
        Track::from_manifest(&manifest_track, &base, &SelectorOptions::default()).unwrap()
    }

    /// Fill every chunk with the given payloads, as if already downloaded.
    /// Served-stream offsets are left unassigned; the cursor assigns them
    /// when draining begins.
    fn fill_chunks(track: &mut Track, payloads: &[&[u8]]) {
        for (chunk, payload) in track.chunks.iter_mut().zip(payloads) {
            chunk.data = Some(Bytes::copy_from_slice(payload));
            chunk.size = payload.len() as u64;
        }
        track.next_download = payloads.len();
    }

    fn make_shared(tracks: Vec<Track>, is_live: bool, eof: bool) -> Arc<Shared> {
        Arc::new(Shared {
            state: Mutex::new(State {
                tracks,
                toffset_us: 0,
                pending_init: None,
                eof,
                stalled: false,
            }),
            error: Mutex::new(None),
            download_wait: Notify::new(),
            playback_wait: Notify::new(),
            cancel: CancellationToken::new(),
            events_tx: broadcast::channel(8).0,
            is_live,
            movie_timescale: 1000,
            movie_duration: 100_000,
            options: StreamOptions::default(),
        })
    }

    async fn read_to_end(pipeline: &mut Pipeline) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 7]; // odd size to exercise partial chunk reads
        loop {
            let n = pipeline.read(&mut buf).await.unwrap();
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
        haystack.windows(needle.len()).filter(|w| w == &needle).count()
    }

    #[tokio::test]
    async fn init_segment_is_spliced_exactly_once_before_its_boundary() {
        let mut track = video_track(3, 1000);
        fill_chunks(&mut track, &[b"AAAA", b"BBBB", b"CCCC"]);
        let shared = make_shared(vec![track], false, true);
        shared.state.lock().pending_init = Some(PendingInit {
            data: Bytes::from_static(b"<INIT>"),
            read_pos: 0,
            boundary: Boundary {
                track: 0,
                sequence: 1,
            },
        });

        let mut pipeline = Pipeline::for_test(shared);
        let out = read_to_end(&mut pipeline).await;

        assert_eq!(out, b"AAAA<INIT>BBBBCCCC");
        assert_eq!(count_occurrences(&out, b"<INIT>"), 1);
    }

    #[tokio::test]
    async fn opening_header_comes_before_the_first_byte() {
        let mut track = video_track(2, 1000);
        fill_chunks(&mut track, &[b"AAAA", b"BBBB"]);
        let shared = make_shared(vec![track], false, true);
        shared.state.lock().pending_init = Some(PendingInit {
            data: Bytes::from_static(b"<INIT>"),
            read_pos: 0,
            boundary: Boundary {
                track: 0,
                sequence: 0,
            },
        });

        let mut pipeline = Pipeline::for_test(shared);
        let out = read_to_end(&mut pipeline).await;
        assert_eq!(out, b"<INIT>AAAABBBB");
    }

    #[tokio::test]
    async fn tracks_interleave_in_time_order() {
        let mut video = video_track(2, 1000);
        fill_chunks(&mut video, &[b"V0", b"V1"]);
        let mut audio = video_track(2, 1000);
        audio.kind = TrackKind::Audio;
        // Shift audio half a chunk so the order is v0 a0 v1 a1.
        for chunk in &mut audio.chunks {
            chunk.start_time += 500;
        }
        fill_chunks(&mut audio, &[b"A0", b"A1"]);

        let shared = make_shared(vec![video, audio], false, true);
        let mut pipeline = Pipeline::for_test(shared);
        let out = read_to_end(&mut pipeline).await;
        assert_eq!(out, b"V0A0V1A1");
    }

    #[tokio::test]
    async fn peek_never_crosses_a_chunk_boundary() {
        let mut track = video_track(2, 1000);
        fill_chunks(&mut track, &[b"AAAA", b"BBBB"]);
        let shared = make_shared(vec![track], false, true);
        let mut pipeline = Pipeline::for_test(shared);

        let mut buf = [0u8; 2];
        assert_eq!(pipeline.read(&mut buf).await.unwrap(), 2);

        let peeked = pipeline.peek(100).await.unwrap();
        assert_eq!(&peeked[..], b"AA", "only the chunk remainder");

        // Peeking does not advance: the same bytes read back.
        assert_eq!(pipeline.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf, b"AA");
    }

    #[tokio::test]
    async fn empty_chunk_is_skipped_without_faking_end_of_stream() {
        let mut track = video_track(2, 1000);
        fill_chunks(&mut track, &[b"", b"BBBB"]);
        let shared = make_shared(vec![track], false, true);
        let mut pipeline = Pipeline::for_test(shared);
        assert_eq!(read_to_end(&mut pipeline).await, b"BBBB");
    }

    #[tokio::test]
    async fn in_chunk_byte_seek_adjusts_the_read_position() {
        let mut track = video_track(2, 1000);
        fill_chunks(&mut track, &[b"ABCD", b"EFGH"]);
        let shared = make_shared(vec![track], false, true);
        let mut pipeline = Pipeline::for_test(shared);

        let mut buf = [0u8; 3];
        assert_eq!(pipeline.read(&mut buf).await.unwrap(), 3);

        // Offset 1 is inside the chunk being drained: a plain byte seek.
        pipeline.set_position(1).unwrap();
        assert_eq!(pipeline.position(), 1);
        assert_eq!(pipeline.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"BCD");
    }

    #[tokio::test]
    async fn in_chunk_byte_seek_lands_on_served_stream_bytes() {
        let mut track = video_track(2, 1000);
        fill_chunks(&mut track, &[b"ABCD", b"EFGH"]);
        let shared = make_shared(vec![track], false, true);
        shared.state.lock().pending_init = Some(PendingInit {
            data: Bytes::from_static(b"<INIT>"),
            read_pos: 0,
            boundary: Boundary {
                track: 0,
                sequence: 0,
            },
        });

        let mut pipeline = Pipeline::for_test(shared);
        let mut header = [0u8; 6];
        assert_eq!(pipeline.read(&mut header).await.unwrap(), 6);
        assert_eq!(&header, b"<INIT>");

        let mut buf = [0u8; 3];
        assert_eq!(pipeline.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"ABC");

        // The header's six bytes come first in the served stream, so
        // position 7 is the chunk's second byte. A backward seek there must
        // read back exactly what was served at that position.
        pipeline.set_position(7).unwrap();
        assert_eq!(pipeline.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"BCD");
    }

    #[tokio::test]
    async fn fractional_seek_relocates_every_track_to_the_target_time() {
        // 100 second movie: ten 10s chunks, timescale 1000.
        let mut track = video_track(10, 10_000);
        let payloads: Vec<Vec<u8>> = (0..10).map(|i| vec![b'0' + i; 4]).collect();
        let refs: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();
        fill_chunks(&mut track, &refs);
        let shared = make_shared(vec![track], false, true);
        let mut pipeline = Pipeline::for_test(shared.clone());

        // Position 500 of 1000 on a 100s movie lands on t=50s.
        pipeline.set_position(500).unwrap();
        {
            let state = shared.state.lock();
            assert_eq!(state.tracks[0].playback, 5);
            assert_eq!(state.tracks[0].next_download, 5);
            assert!(!state.eof, "seek rearms the scheduler");
            assert!(state.tracks[0].chunks.iter().all(|c| c.data.is_none()));
        }
        assert_eq!(pipeline.position(), 500);
    }

    #[tokio::test]
    async fn live_streams_reject_fractional_seeks() {
        let mut track = video_track(4, 1000);
        fill_chunks(&mut track, &[b"AAAA", b"BBBB", b"CCCC", b"DDDD"]);
        let shared = make_shared(vec![track], true, false);
        let mut pipeline = Pipeline::for_test(shared.clone());

        let err = pipeline.set_position(700).unwrap_err();
        assert!(matches!(err, StreamError::SeekOutsideWindow));
        assert_eq!(shared.state.lock().tracks[0].playback, 0, "state unchanged");
    }

    #[tokio::test]
    async fn starvation_emits_one_underrun_and_collapses_the_estimators() {
        let track = video_track(2, 1000); // no data downloaded
        let shared = make_shared(vec![track], false, false);
        let mut events = shared.events_tx.subscribe();
        let mut pipeline = Pipeline::for_test(shared);

        let mut buf = [0u8; 4];
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            pipeline.read(&mut buf),
        )
        .await;
        assert!(blocked.is_err(), "read blocks while the chunk is empty");
        assert!(matches!(events.try_recv(), Ok(StreamEvent::Underrun)));
    }

    #[tokio::test]
    async fn fatal_error_degrades_to_clean_end_of_stream() {
        let track = video_track(2, 1000);
        let shared = make_shared(vec![track], false, false);
        *shared.error.lock() = Some(StreamError::Fetch(crate::error::FetchError::Http(
            "boom".into(),
        )));
        let mut pipeline = Pipeline::for_test(shared);

        let mut buf = [0u8; 4];
        assert_eq!(pipeline.read(&mut buf).await.unwrap(), 0);
    }
}
