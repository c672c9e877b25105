use std::{fmt, ops::Range};

/// Four-character box type tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const FTYP: FourCc = FourCc(*b"ftyp");
    pub const MDAT: FourCc = FourCc(*b"mdat");
    pub const MOOF: FourCc = FourCc(*b"moof");
    pub const MOOV: FourCc = FourCc(*b"moov");
    pub const SIDX: FourCc = FourCc(*b"sidx");
    pub const TFHD: FourCc = FourCc(*b"tfhd");
    pub const TRAF: FourCc = FourCc(*b"traf");
    pub const TRUN: FourCc = FourCc(*b"trun");
    pub const UUID: FourCc = FourCc(*b"uuid");

    /// Synthetic tags for the vendor `uuid` boxes, assigned after UUID
    /// disambiguation so downstream code can match on a fourcc like any
    /// other box.
    pub const TFRF: FourCc = FourCc(*b"tfrf");
    pub const TFXD: FourCc = FourCc(*b"tfxd");
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({self})")
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

/// Vendor UUID marking a `tfrf` box (absolute times of upcoming live
/// fragments).
pub(crate) const UUID_TFRF: [u8; 16] = [
    0xd4, 0x80, 0x7e, 0xf2, 0xca, 0x39, 0x46, 0x95, 0x8e, 0x54, 0x26, 0xcb, 0x9e, 0x46, 0xa7, 0x9f,
];

/// Vendor UUID marking a `tfxd` box (absolute time/duration of this
/// fragment).
pub(crate) const UUID_TFXD: [u8; 16] = [
    0x6d, 0x1d, 0x9b, 0x05, 0x42, 0xd5, 0x44, 0xe6, 0x80, 0xe2, 0x14, 0x1d, 0xaf, 0xf7, 0x57, 0xb2,
];

/// One parsed box node.
///
/// `span` is the byte range of the whole box (header included) in the buffer
/// handed to [`crate::parse_boxes`]; it lets callers patch bytes in place
/// (track-id restamping) or slice out raw payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4Box {
    pub fourcc: FourCc,
    pub span: Range<usize>,
    pub payload: BoxPayload,
}

/// Decoded payload, one variant per box kind this crate understands.
///
/// Everything else decodes to `Skip` and is ignored by callers; container
/// boxes carry their children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoxPayload {
    Container(Vec<Mp4Box>),
    Sidx(SidxBox),
    Tfhd(TfhdBox),
    Trun(TrunBox),
    Tfrf(TfrfBox),
    Tfxd(TfxdBox),
    Skip,
}

/// Segment index box: maps subsegments to byte ranges and durations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidxBox {
    pub reference_id: u32,
    pub timescale: u32,
    pub earliest_presentation_time: u64,
    pub first_offset: u64,
    pub references: Vec<SidxReference>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SidxReference {
    pub is_index: bool,
    pub referenced_size: u32,
    pub subsegment_duration: u32,
    pub starts_with_sap: bool,
    pub sap_type: u8,
}

/// One derived split point: where a referenced subsegment starts in the
/// enclosing resource, and how long it plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPoint {
    pub offset: u64,
    pub size: u32,
    pub duration: u32,
    pub time: u64,
}

impl SidxBox {
    /// Derive absolute byte offsets and chunk boundaries for the referenced
    /// subsegments. `anchor` is the byte position of the first byte after
    /// the `sidx` box itself (per ISO-BMFF, `first_offset` is relative to
    /// that anchor).
    ///
    /// Offsets in the result are strictly increasing.
    pub fn split_points(&self, anchor: u64) -> Vec<SplitPoint> {
        let mut out = Vec::with_capacity(self.references.len());
        let mut offset = anchor + self.first_offset;
        let mut time = self.earliest_presentation_time;
        for r in &self.references {
            out.push(SplitPoint {
                offset,
                size: r.referenced_size,
                duration: r.subsegment_duration,
                time,
            });
            offset += u64::from(r.referenced_size);
            time += u64::from(r.subsegment_duration);
        }
        out
    }
}

/// Track fragment header. `track_id_offset` is the absolute byte offset of
/// the `track_id` field in the parsed buffer, kept so the scheduler can
/// restamp it when forging the single multiplexed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TfhdBox {
    pub flags: u32,
    pub track_id: u32,
    pub track_id_offset: usize,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
}

/// Track fragment run: sample timing of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrunBox {
    pub flags: u32,
    pub sample_count: u32,
    pub data_offset: Option<i32>,
    /// Sum of per-sample durations, when the run carries them.
    pub total_duration: Option<u64>,
}

/// Vendor box announcing absolute `(time, duration)` of fragments published
/// after this one. Used for live fragment discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TfrfBox {
    pub entries: Vec<TfrfEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TfrfEntry {
    pub start_time: u64,
    pub duration: u64,
}

/// Vendor box carrying the absolute time and duration of this fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TfxdBox {
    pub start_time: u64,
    pub duration: u64,
}
