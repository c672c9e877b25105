//! Box writers for synthetic init segments.
//!
//! Layout: 4-byte big-endian size, 4-byte type, then content. The produced
//! `moov` is deliberately minimal: just enough movie/track metadata for a
//! fragmented-MP4 demuxer to pick up codec parameters and track ids; all
//! sample tables are empty (samples live in the fragments).

use bytes::Bytes;

/// Media-specific parameters of one track in the init segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackMedia {
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

/// One track of the synthetic init segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitTrack {
    /// Fabricated track id, matching what fragments are restamped to.
    pub track_id: u32,
    pub timescale: u32,
    /// Duration in `timescale` units; 0 for live.
    pub duration: u64,
    pub media: TrackMedia,
}

fn write_box(fourcc: &[u8; 4], content: &[u8]) -> Vec<u8> {
    let size = (8 + content.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(content);
    out
}

fn write_container(fourcc: &[u8; 4], children: &[&[u8]]) -> Vec<u8> {
    let inner: usize = children.iter().map(|c| c.len()).sum();
    let mut out = Vec::with_capacity(8 + inner);
    out.extend_from_slice(&((8 + inner) as u32).to_be_bytes());
    out.extend_from_slice(fourcc);
    for c in children {
        out.extend_from_slice(c);
    }
    out
}

fn full_box_header(version: u8, flags: u32) -> [u8; 4] {
    ((u32::from(version) << 24) | (flags & 0x00ff_ffff)).to_be_bytes()
}

fn write_ftyp() -> Vec<u8> {
    let mut content = Vec::with_capacity(16);
    content.extend_from_slice(b"isml");
    content.extend_from_slice(&1u32.to_be_bytes());
    content.extend_from_slice(b"piff");
    content.extend_from_slice(b"iso2");
    write_box(b"ftyp", &content)
}

fn write_mvhd(timescale: u32, duration: u64, next_track_id: u32) -> Vec<u8> {
    let mut c = Vec::with_capacity(112);
    c.extend_from_slice(&full_box_header(1, 0));
    c.extend_from_slice(&0u64.to_be_bytes()); // creation_time
    c.extend_from_slice(&0u64.to_be_bytes()); // modification_time
    c.extend_from_slice(&timescale.to_be_bytes());
    c.extend_from_slice(&duration.to_be_bytes());
    c.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate 1.0
    c.extend_from_slice(&0x0100u16.to_be_bytes()); // volume 1.0
    c.extend_from_slice(&[0u8; 10]); // reserved
    c.extend_from_slice(&IDENTITY_MATRIX);
    c.extend_from_slice(&[0u8; 24]); // pre_defined
    c.extend_from_slice(&next_track_id.to_be_bytes());
    write_box(b"mvhd", &c)
}

const IDENTITY_MATRIX: [u8; 36] = {
    let mut m = [0u8; 36];
    m[1] = 0x01; // 0x00010000 at [0..4]
    m[17] = 0x01; // 0x00010000 at [16..20]
    m[32] = 0x40; // 0x40000000 at [32..36]
    m
};

fn write_tkhd(track: &InitTrack) -> Vec<u8> {
    let (width, height) = match &track.media {
        TrackMedia::Video { width, height, .. } => (*width, *height),
        _ => (0, 0),
    };
    let volume: u16 = match track.media {
        TrackMedia::Audio { .. } => 0x0100,
        _ => 0,
    };

    let mut c = Vec::with_capacity(104);
    c.extend_from_slice(&full_box_header(1, 0x7)); // enabled | in_movie | in_preview
    c.extend_from_slice(&0u64.to_be_bytes()); // creation_time
    c.extend_from_slice(&0u64.to_be_bytes()); // modification_time
    c.extend_from_slice(&track.track_id.to_be_bytes());
    c.extend_from_slice(&0u32.to_be_bytes()); // reserved
    c.extend_from_slice(&track.duration.to_be_bytes());
    c.extend_from_slice(&[0u8; 8]); // reserved
    c.extend_from_slice(&0u16.to_be_bytes()); // layer
    c.extend_from_slice(&0u16.to_be_bytes()); // alternate_group
    c.extend_from_slice(&volume.to_be_bytes());
    c.extend_from_slice(&0u16.to_be_bytes()); // reserved
    c.extend_from_slice(&IDENTITY_MATRIX);
    c.extend_from_slice(&(u32::from(width) << 16).to_be_bytes()); // 16.16 fixed
    c.extend_from_slice(&(u32::from(height) << 16).to_be_bytes());
    write_box(b"tkhd", &c)
}

fn write_mdhd(timescale: u32, duration: u64) -> Vec<u8> {
    let mut c = Vec::with_capacity(36);
    c.extend_from_slice(&full_box_header(1, 0));
    c.extend_from_slice(&0u64.to_be_bytes());
    c.extend_from_slice(&0u64.to_be_bytes());
    c.extend_from_slice(&timescale.to_be_bytes());
    c.extend_from_slice(&duration.to_be_bytes());
    c.extend_from_slice(&0x55c4u16.to_be_bytes()); // language "und"
    c.extend_from_slice(&0u16.to_be_bytes());
    write_box(b"mdhd", &c)
}

fn write_hdlr(media: &TrackMedia) -> Vec<u8> {
    let (handler, name): (&[u8; 4], &[u8]) = match media {
        TrackMedia::Video { .. } => (b"vide", b"VideoHandler\0"),
        TrackMedia::Audio { .. } => (b"soun", b"SoundHandler\0"),
        TrackMedia::Text => (b"text", b"TextHandler\0"),
    };
    let mut c = Vec::with_capacity(32 + name.len());
    c.extend_from_slice(&full_box_header(0, 0));
    c.extend_from_slice(&0u32.to_be_bytes()); // pre_defined
    c.extend_from_slice(handler);
    c.extend_from_slice(&[0u8; 12]); // reserved
    c.extend_from_slice(name);
    write_box(b"hdlr", &c)
}

fn write_media_header(media: &TrackMedia) -> Vec<u8> {
    match media {
        TrackMedia::Video { .. } => {
            let mut c = Vec::with_capacity(12);
            c.extend_from_slice(&full_box_header(0, 1));
            c.extend_from_slice(&[0u8; 8]); // graphicsmode + opcolor
            write_box(b"vmhd", &c)
        }
        TrackMedia::Audio { .. } => {
            let mut c = Vec::with_capacity(8);
            c.extend_from_slice(&full_box_header(0, 0));
            c.extend_from_slice(&[0u8; 4]); // balance + reserved
            write_box(b"smhd", &c)
        }
        TrackMedia::Text => write_box(b"nmhd", &full_box_header(0, 0)),
    }
}

fn write_dinf() -> Vec<u8> {
    // dref with a single self-contained "url " entry.
    let url = write_box(b"url ", &full_box_header(0, 1));
    let mut dref_c = Vec::with_capacity(8 + url.len());
    dref_c.extend_from_slice(&full_box_header(0, 0));
    dref_c.extend_from_slice(&1u32.to_be_bytes());
    dref_c.extend_from_slice(&url);
    let dref = write_box(b"dref", &dref_c);
    write_container(b"dinf", &[&dref])
}

fn write_sample_entry(media: &TrackMedia) -> Vec<u8> {
    match media {
        TrackMedia::Video {
            fourcc,
            width,
            height,
            codec_private,
        } => {
            let mut c = Vec::with_capacity(78 + codec_private.len());
            c.extend_from_slice(&[0u8; 6]); // reserved
            c.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
            c.extend_from_slice(&[0u8; 16]); // pre_defined + reserved
            c.extend_from_slice(&width.to_be_bytes());
            c.extend_from_slice(&height.to_be_bytes());
            c.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // horizresolution 72dpi
            c.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // vertresolution
            c.extend_from_slice(&0u32.to_be_bytes()); // reserved
            c.extend_from_slice(&1u16.to_be_bytes()); // frame_count
            c.extend_from_slice(&[0u8; 32]); // compressorname
            c.extend_from_slice(&0x0018u16.to_be_bytes()); // depth
            c.extend_from_slice(&(-1i16).to_be_bytes()); // pre_defined
            if !codec_private.is_empty() {
                c.extend_from_slice(&write_box(b"avcC", codec_private));
            }
            write_box(fourcc, &c)
        }
        TrackMedia::Audio {
            fourcc,
            channels,
            sample_rate,
            bits_per_sample,
            codec_private,
        } => {
            let mut c = Vec::with_capacity(28 + codec_private.len());
            c.extend_from_slice(&[0u8; 6]); // reserved
            c.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
            c.extend_from_slice(&[0u8; 8]); // reserved
            c.extend_from_slice(&channels.to_be_bytes());
            c.extend_from_slice(&bits_per_sample.to_be_bytes());
            c.extend_from_slice(&[0u8; 4]); // pre_defined + reserved
            c.extend_from_slice(&(sample_rate << 16).to_be_bytes()); // 16.16 fixed
            if !codec_private.is_empty() {
                c.extend_from_slice(&write_box(b"esds", codec_private));
            }
            write_box(fourcc, &c)
        }
        TrackMedia::Text => {
            let mut c = Vec::with_capacity(8);
            c.extend_from_slice(&[0u8; 6]);
            c.extend_from_slice(&1u16.to_be_bytes());
            write_box(b"tx3g", &c)
        }
    }
}

fn write_stbl(media: &TrackMedia) -> Vec<u8> {
    let entry = write_sample_entry(media);
    let mut stsd_c = Vec::with_capacity(8 + entry.len());
    stsd_c.extend_from_slice(&full_box_header(0, 0));
    stsd_c.extend_from_slice(&1u32.to_be_bytes());
    stsd_c.extend_from_slice(&entry);
    let stsd = write_box(b"stsd", &stsd_c);

    // Empty sample tables: every sample lives in a later fragment.
    let empty_full = |fourcc: &[u8; 4]| {
        let mut c = Vec::with_capacity(8);
        c.extend_from_slice(&full_box_header(0, 0));
        c.extend_from_slice(&0u32.to_be_bytes());
        write_box(fourcc, &c)
    };
    let stts = empty_full(b"stts");
    let stsc = empty_full(b"stsc");
    let stco = empty_full(b"stco");
    let mut stsz_c = Vec::with_capacity(12);
    stsz_c.extend_from_slice(&full_box_header(0, 0));
    stsz_c.extend_from_slice(&0u32.to_be_bytes()); // sample_size
    stsz_c.extend_from_slice(&0u32.to_be_bytes()); // sample_count
    let stsz = write_box(b"stsz", &stsz_c);

    write_container(b"stbl", &[&stsd, &stts, &stsc, &stsz, &stco])
}

fn write_trak(track: &InitTrack) -> Vec<u8> {
    let tkhd = write_tkhd(track);
    let mdhd = write_mdhd(track.timescale, track.duration);
    let hdlr = write_hdlr(&track.media);
    let mhd = write_media_header(&track.media);
    let dinf = write_dinf();
    let stbl = write_stbl(&track.media);
    let minf = write_container(b"minf", &[&mhd, &dinf, &stbl]);
    let mdia = write_container(b"mdia", &[&mdhd, &hdlr, &minf]);
    write_container(b"trak", &[&tkhd, &mdia])
}

fn write_trex(track_id: u32) -> Vec<u8> {
    let mut c = Vec::with_capacity(24);
    c.extend_from_slice(&full_box_header(0, 0));
    c.extend_from_slice(&track_id.to_be_bytes());
    c.extend_from_slice(&1u32.to_be_bytes()); // default_sample_description_index
    c.extend_from_slice(&0u32.to_be_bytes()); // default_sample_duration
    c.extend_from_slice(&0u32.to_be_bytes()); // default_sample_size
    c.extend_from_slice(&0u32.to_be_bytes()); // default_sample_flags
    write_box(b"trex", &c)
}

/// Build a complete synthetic init segment (`ftyp` + `moov`) for the given
/// tracks. `movie_duration` is in `movie_timescale` units; 0 for live.
pub fn write_init_segment(
    movie_timescale: u32,
    movie_duration: u64,
    tracks: &[InitTrack],
) -> Bytes {
    let next_track_id = tracks.iter().map(|t| t.track_id).max().unwrap_or(0) + 1;

    let ftyp = write_ftyp();
    let mvhd = write_mvhd(movie_timescale, movie_duration, next_track_id);

    let traks: Vec<Vec<u8>> = tracks.iter().map(write_trak).collect();
    let trexes: Vec<Vec<u8>> = tracks.iter().map(|t| write_trex(t.track_id)).collect();
    let trex_refs: Vec<&[u8]> = trexes.iter().map(Vec::as_slice).collect();
    let mvex = write_container(b"mvex", &trex_refs);

    let mut moov_children: Vec<&[u8]> = Vec::with_capacity(2 + traks.len());
    moov_children.push(&mvhd);
    for t in &traks {
        moov_children.push(t);
    }
    moov_children.push(&mvex);
    let moov = write_container(b"moov", &moov_children);

    let mut out = Vec::with_capacity(ftyp.len() + moov.len());
    out.extend_from_slice(&ftyp);
    out.extend_from_slice(&moov);
    Bytes::from(out)
}
