//! Typed manifest input.
//!
//! Manifest XML parsing is a collaborator's job; the pipeline consumes this
//! already-typed description of tracks, quality levels and segment points.

use url::Url;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
    Text,
}

/// One raw manifest segment point: a `(start_time?, duration?, repeat?)`
/// triple. Missing fields are resolved by the timeline builder.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SegmentPoint {
    pub start_time: Option<u64>,
    pub duration: Option<u64>,
    /// Total number of occurrences, not extra repetitions.
    pub repeat: Option<u32>,
}

impl SegmentPoint {
    pub fn new(start_time: Option<u64>, duration: Option<u64>, repeat: Option<u32>) -> Self {
        Self {
            start_time,
            duration,
            repeat,
        }
    }
}

/// Codec parameters of one quality level. Immutable once parsed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MediaParams {
    Video {
        fourcc: [u8; 4],
        width: u16,
        height: u16,
        codec_private: Vec<u8>,
    },
    Audio {
        fourcc: [u8; 4],
        channels: u16,
        sample_rate: u32,
        bits_per_sample: u16,
        codec_private: Vec<u8>,
    },
    Text,
}

/// One encoded bitrate variant of a track.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QualityLevel {
    pub bitrate_bps: u64,
    pub media: MediaParams,
}

#[derive(Clone, Debug)]
pub struct ManifestTrack {
    pub kind: TrackKind,
    pub timescale: u64,
    /// Chunk URL template with `{bitrate}` and `{start time}` placeholders,
    /// resolved against the manifest base URL.
    pub url_template: String,
    pub levels: Vec<QualityLevel>,
    pub points: Vec<SegmentPoint>,
}

#[derive(Clone, Debug)]
pub struct Manifest {
    pub base_url: Url,
    pub is_live: bool,
    /// Movie timescale, units per second.
    pub timescale: u64,
    /// Total duration in `timescale` units; 0 for live.
    pub duration: u64,
    pub tracks: Vec<ManifestTrack>,
}

/// Substitute the selected bitrate and chunk start time into a URL template.
pub(crate) fn expand_template(template: &str, bitrate: u64, start_time: u64) -> String {
    let bitrate = bitrate.to_string();
    let start = start_time.to_string();
    template
        .replace("{bitrate}", &bitrate)
        .replace("{start time}", &start)
        .replace("{start_time}", &start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_substitutes_both_placeholders() {
        let url = expand_template(
            "QualityLevels({bitrate})/Fragments(video={start time})",
            800_000,
            20_000_000,
        );
        assert_eq!(url, "QualityLevels(800000)/Fragments(video=20000000)");
    }

    #[test]
    fn template_accepts_underscore_spelling() {
        let url = expand_template("Fragments(audio={start_time})", 64_000, 0);
        assert_eq!(url, "Fragments(audio=0)");
    }
}
