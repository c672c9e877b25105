//! `satin-mp4`
//!
//! Minimal ISO-BMFF (fMP4) box primitives for the satin streaming core:
//! - a recursive, fail-soft box reader for the handful of boxes the
//!   scheduler and cursor care about (`sidx`, `tfhd`, `trun`, vendor
//!   `tfrf`/`tfxd` timing boxes),
//! - box writer helpers used to synthesize init segments (`ftyp` + `moov`).
//!
//! All input originates from network bytes, so decoders never panic and
//! never read past the buffer: short input surfaces [`ParseError::Truncated`].

#![forbid(unsafe_code)]

mod boxes;
mod error;
mod reader;
mod writer;

pub use boxes::{
    BoxPayload, FourCc, Mp4Box, SidxBox, SidxReference, SplitPoint, TfhdBox, TfrfBox, TfrfEntry,
    TfxdBox, TrunBox,
};
pub use error::{ParseError, ParseResult};
pub use reader::{boxes_of_type, find_box, parse_boxes, restamp_track_id};
pub use writer::{InitTrack, TrackMedia, write_init_segment};
