//! Synthetic init segment construction.
//!
//! The served stream is a forged single fMP4: fragments from every track are
//! multiplexed behind one `ftyp+moov` header whose tracks carry fabricated
//! ids `1..=n` (fragments are restamped to match). Rebuilt whenever a
//! quality switch changes codec parameters.

use bytes::Bytes;
use satin_mp4::{InitTrack, TrackMedia, write_init_segment};

use crate::{manifest::MediaParams, track::Track};

/// Fabricated track id for the track at `index` in the selected-track list.
pub(crate) fn fabricated_id(index: usize) -> u32 {
    index as u32 + 1
}

/// Build an `ftyp+moov` header describing every track's currently selected
/// quality level.
pub(crate) fn build_init_segment(
    tracks: &[Track],
    movie_timescale: u64,
    movie_duration: u64,
) -> Bytes {
    let init_tracks: Vec<InitTrack> = tracks
        .iter()
        .enumerate()
        .map(|(index, track)| {
            let media = match &track.levels[track.selected].media {
                MediaParams::Video {
                    fourcc,
                    width,
                    height,
                    codec_private,
                } => TrackMedia::Video {
                    fourcc: *fourcc,
                    width: *width,
                    height: *height,
                    codec_private: codec_private.clone(),
                },
                MediaParams::Audio {
                    fourcc,
                    channels,
                    sample_rate,
                    bits_per_sample,
                    codec_private,
                } => TrackMedia::Audio {
                    fourcc: *fourcc,
                    channels: *channels,
                    sample_rate: *sample_rate,
                    bits_per_sample: *bits_per_sample,
                    codec_private: codec_private.clone(),
                },
                MediaParams::Text => TrackMedia::Text,
            };
            InitTrack {
                track_id: fabricated_id(index),
                timescale: u32::try_from(track.timescale).unwrap_or(u32::MAX),
                duration: track.chunks.last().map_or(0, |c| c.end_time()),
                media,
            }
        })
        .collect();

    write_init_segment(
        u32::try_from(movie_timescale).unwrap_or(u32::MAX),
        movie_duration,
        &init_tracks,
    )
}
