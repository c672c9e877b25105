//! Per-track chunk arena and cursors.
//!
//! Chunks live in a `Vec` indexed by sequence number; `playback`,
//! `next_download` and the arena length act as the three cursors. Live
//! streams drop a chunk's bytes once consumed and advance `head` past
//! pruned entries; on-demand chunks keep their slot so a seek can reset and
//! re-enter them.

use bytes::Bytes;
use satin_abr::{BandwidthEstimator, Level, QualitySelector, SelectorOptions};
use url::Url;

use crate::{
    error::{StreamError, StreamResult},
    manifest::{ManifestTrack, QualityLevel, TrackKind, expand_template},
    timeline,
};

/// One segment of one track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub(crate) sequence: usize,
    /// Start and duration in track timescale units.
    pub(crate) start_time: u64,
    pub(crate) duration: u64,
    pub(crate) size: u64,
    /// Position in the virtual served stream, assigned lazily by the cursor
    /// when it starts draining the chunk. Counts every served byte, spliced
    /// init segments included, so in-chunk byte seeks resolve against it.
    pub(crate) offset: Option<u64>,
    pub(crate) data: Option<Bytes>,
    pub(crate) read_pos: usize,
}

impl Chunk {
    pub(crate) fn new(sequence: usize, start_time: u64, duration: u64) -> Self {
        Self {
            sequence,
            start_time,
            duration,
            size: 0,
            offset: None,
            data: None,
            read_pos: 0,
        }
    }

    pub(crate) fn end_time(&self) -> u64 {
        self.start_time + self.duration
    }

    /// Clear downloaded state so the chunk can be fetched again after a
    /// seek. Timing fields survive; they come from the timeline.
    pub(crate) fn reset(&mut self) {
        self.size = 0;
        self.offset = None;
        self.data = None;
        self.read_pos = 0;
    }
}

/// Convert track-timescale units to microseconds.
pub(crate) fn to_micros(units: u64, timescale: u64) -> u64 {
    let scaled = u128::from(units) * 1_000_000 / u128::from(timescale.max(1));
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

pub(crate) struct Track {
    pub(crate) kind: TrackKind,
    pub(crate) timescale: u64,
    url_template: String,
    base_url: Url,
    pub(crate) levels: Vec<QualityLevel>,
    /// Index of the selected level in `levels`.
    pub(crate) selected: usize,
    pub(crate) chunks: Vec<Chunk>,
    /// Next chunk to serve.
    pub(crate) playback: usize,
    /// Next chunk to fetch.
    pub(crate) next_download: usize,
    /// First retained chunk (live pruning only).
    pub(crate) head: usize,
    pub(crate) estimator: BandwidthEstimator,
    pub(crate) selector: QualitySelector,
}

impl Track {
    pub(crate) fn from_manifest(
        track: &ManifestTrack,
        base_url: &Url,
        opts: &SelectorOptions,
    ) -> StreamResult<Self> {
        if track.levels.is_empty() {
            return Err(StreamError::Manifest(format!(
                "{:?} track has no quality levels",
                track.kind
            )));
        }
        if track.timescale == 0 {
            return Err(StreamError::Manifest(format!(
                "{:?} track has a zero timescale",
                track.kind
            )));
        }
        let chunks = timeline::build(&track.points)?;
        if chunks.is_empty() {
            return Err(StreamError::Manifest(format!(
                "{:?} track has no segment points",
                track.kind
            )));
        }

        let selector_levels = track
            .levels
            .iter()
            .enumerate()
            .map(|(index, level)| Level {
                index,
                bitrate_bps: level.bitrate_bps,
            })
            .collect();
        let selector = QualitySelector::new(selector_levels, opts);
        let selected = selector.current().index;

        Ok(Self {
            kind: track.kind,
            timescale: track.timescale,
            url_template: track.url_template.clone(),
            base_url: base_url.clone(),
            levels: track.levels.clone(),
            selected,
            chunks,
            playback: 0,
            next_download: 0,
            head: 0,
            estimator: BandwidthEstimator::new(),
            selector,
        })
    }

    /// `playback <= next_download <= arena length`, always.
    pub(crate) fn check_cursors(&self) {
        debug_assert!(self.playback <= self.next_download);
        debug_assert!(self.next_download <= self.chunks.len());
    }

    /// Downloaded-but-unplayed budget: chunk count and buffered media time
    /// in microseconds.
    pub(crate) fn buffered(&self) -> (usize, u64) {
        let count = self.next_download - self.playback;
        let units: u64 = self.chunks[self.playback..self.next_download]
            .iter()
            .map(|c| c.duration)
            .sum();
        (count, to_micros(units, self.timescale))
    }

    /// URL of a chunk at the currently selected quality.
    pub(crate) fn chunk_url(&self, sequence: usize) -> StreamResult<Url> {
        let chunk = &self.chunks[sequence];
        let bitrate = self.levels[self.selected].bitrate_bps;
        let path = expand_template(&self.url_template, bitrate, chunk.start_time);
        self.base_url
            .join(&path)
            .map_err(|e| StreamError::Manifest(format!("bad chunk URL {path:?}: {e}")))
    }

    /// Chunk whose interval contains `time`, with an exact-boundary hit
    /// falling back to the timeline head.
    pub(crate) fn lookup(&self, time: u64) -> Option<usize> {
        if let Some(idx) = self
            .chunks
            .iter()
            .position(|c| c.start_time <= time && time < c.end_time())
        {
            return Some(idx);
        }
        self.chunks
            .iter()
            .any(|c| c.start_time == time || c.end_time() == time)
            .then_some(self.head)
    }

    /// Append a live-discovered chunk unless one with the same start time
    /// already exists.
    pub(crate) fn append_if_new(&mut self, start_time: u64, duration: u64) -> bool {
        if self.chunks.iter().any(|c| c.start_time == start_time) {
            return false;
        }
        let sequence = self.chunks.len();
        self.chunks.push(Chunk::new(sequence, start_time, duration));
        true
    }

    /// Drop consumed chunks that fell out of the DVR window.
    pub(crate) fn prune(&mut self, window_us: u64) {
        let Some(last) = self.chunks.last() else {
            return;
        };
        let horizon = to_micros(last.end_time(), self.timescale).saturating_sub(window_us);
        while self.head < self.playback {
            let chunk = &mut self.chunks[self.head];
            if to_micros(chunk.end_time(), self.timescale) > horizon {
                break;
            }
            chunk.data = None;
            self.head += 1;
        }
    }

    /// Relocate both cursors to the chunk covering `time` (clamping to the
    /// timeline edges) and clear every buffer for re-download.
    pub(crate) fn seek_to_time(&mut self, time: u64) -> usize {
        let idx = match self.chunks.last() {
            Some(last) if time >= last.end_time() => self.chunks.len() - 1,
            _ => self.lookup(time).unwrap_or(0),
        };
        for chunk in &mut self.chunks {
            chunk.reset();
        }
        self.playback = idx;
        self.next_download = idx;
        self.check_cursors();
        idx
    }
}
