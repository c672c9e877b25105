//! Adaptive-bitrate streaming client core.
//!
//! Given a typed manifest (tracks, quality levels, segment points), a
//! [`Pipeline`] downloads chunks slightly ahead of playback, picks chunk
//! quality from observed throughput, and serves everything as one forged,
//! seekable fMP4 byte stream to a downstream container demuxer:
//!
//! - a download scheduler task walks every track's segment timeline in
//!   global start-time order and keeps a bounded lookahead buffered;
//! - per-track bandwidth estimation and hysteresis quality selection come
//!   from `satin-abr`, fragment parsing and init-segment synthesis from
//!   `satin-mp4`;
//! - the cursor methods on [`Pipeline`] (`read`, `peek`, `set_position`)
//!   are the byte-stream surface the demuxer consumes.

#![forbid(unsafe_code)]

mod cursor;
mod error;
mod events;
mod fetch;
mod init;
mod manifest;
mod pipeline;
mod scheduler;
mod timeline;
mod track;

pub use cursor::STREAM_SIZE;
pub use error::{FetchError, StreamError, StreamResult};
pub use events::StreamEvent;
pub use fetch::{Fetcher, HttpFetcher};
pub use manifest::{Manifest, ManifestTrack, MediaParams, QualityLevel, SegmentPoint, TrackKind};
pub use pipeline::{Pipeline, StreamOptions};
