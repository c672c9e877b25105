//! Recursive box reader.
//!
//! Stateless: every call parses a complete byte buffer into a tree of
//! [`Mp4Box`] nodes. Input comes straight off the network, so every read is
//! bounds-checked and short input surfaces [`ParseError::Truncated`] instead
//! of panicking.

use crate::{
    ParseError, ParseResult,
    boxes::{
        BoxPayload, FourCc, Mp4Box, SidxBox, SidxReference, TfhdBox, TfrfBox, TfrfEntry, TfxdBox,
        TrunBox, UUID_TFRF, UUID_TFXD,
    },
};

/// Container boxes the reader recurses into.
const CONTAINERS: &[FourCc] = &[
    FourCc::MOOV,
    FourCc::MOOF,
    FourCc::TRAF,
    FourCc(*b"trak"),
    FourCc(*b"mdia"),
    FourCc(*b"minf"),
    FourCc(*b"stbl"),
    FourCc(*b"mvex"),
];

/// Bounds-checked big-endian reader over a byte slice.
///
/// `base` is the absolute offset of `buf` in the caller's original buffer,
/// so spans and field offsets stay absolute through recursion.
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8], base: usize) -> Self {
        Self { buf, pos: 0, base }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Absolute offset of the next unread byte.
    fn abs_pos(&self) -> usize {
        self.base + self.pos
    }

    fn take(&mut self, n: usize) -> ParseResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(ParseError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn skip(&mut self, n: usize) -> ParseResult<()> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> ParseResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> ParseResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> ParseResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> ParseResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Full-box header: returns `(version, flags)`.
    fn full_box(&mut self) -> ParseResult<(u8, u32)> {
        let v = self.u32()?;
        Ok(((v >> 24) as u8, v & 0x00ff_ffff))
    }
}

/// Parse every top-level box in `buf`.
///
/// The buffer must hold complete boxes; a trailing partial box yields
/// [`ParseError::Truncated`], which callers treat as "incomplete input".
pub fn parse_boxes(buf: &[u8]) -> ParseResult<Vec<Mp4Box>> {
    parse_siblings(buf, 0)
}

fn parse_siblings(buf: &[u8], base: usize) -> ParseResult<Vec<Mp4Box>> {
    let mut out = Vec::new();
    let mut r = ByteReader::new(buf, base);
    while r.remaining() > 0 {
        let node = parse_one(&mut r)?;
        out.push(node);
    }
    Ok(out)
}

fn parse_one(r: &mut ByteReader<'_>) -> ParseResult<Mp4Box> {
    let start = r.abs_pos();
    let size32 = r.u32()?;
    let tag = r.take(4)?;
    let fourcc = FourCc([tag[0], tag[1], tag[2], tag[3]]);

    // Header length grows with the 64-bit size form.
    let (size, header_len) = match size32 {
        0 => {
            // Size 0 means "box extends to end of file", legal at top level
            // only. The inputs this crate sees are whole segments, so the
            // rest of the buffer is the payload.
            ((r.remaining() + 8) as u64, 8usize)
        }
        1 => (r.u64()?, 16usize),
        n => (u64::from(n), 8usize),
    };

    if (size as usize) < header_len {
        return Err(ParseError::Malformed(format!(
            "box {fourcc} declares size {size} smaller than its header"
        )));
    }

    let payload_len = size as usize - header_len;
    let payload_base = r.abs_pos();
    let payload = r.take(payload_len)?;
    let span = start..start + size as usize;

    let (fourcc, decoded) = decode_payload(fourcc, payload, payload_base)?;
    Ok(Mp4Box {
        fourcc,
        span,
        payload: decoded,
    })
}

/// Decode one payload. Returns the (possibly rewritten, for `uuid` boxes)
/// fourcc together with the payload variant.
fn decode_payload(
    fourcc: FourCc,
    payload: &[u8],
    base: usize,
) -> ParseResult<(FourCc, BoxPayload)> {
    if CONTAINERS.contains(&fourcc) {
        let children = parse_siblings(payload, base)?;
        return Ok((fourcc, BoxPayload::Container(children)));
    }

    let mut r = ByteReader::new(payload, base);
    let decoded = match fourcc {
        FourCc::SIDX => BoxPayload::Sidx(decode_sidx(&mut r)?),
        FourCc::TFHD => BoxPayload::Tfhd(decode_tfhd(&mut r)?),
        FourCc::TRUN => BoxPayload::Trun(decode_trun(&mut r)?),
        FourCc::UUID => {
            let mut uuid = [0u8; 16];
            uuid.copy_from_slice(r.take(16)?);
            match uuid {
                UUID_TFRF => return Ok((FourCc::TFRF, BoxPayload::Tfrf(decode_tfrf(&mut r)?))),
                UUID_TFXD => return Ok((FourCc::TFXD, BoxPayload::Tfxd(decode_tfxd(&mut r)?))),
                // Unknown vendor extension: skip silently.
                _ => BoxPayload::Skip,
            }
        }
        _ => BoxPayload::Skip,
    };
    Ok((fourcc, decoded))
}

fn decode_sidx(r: &mut ByteReader<'_>) -> ParseResult<SidxBox> {
    let (version, _flags) = r.full_box()?;
    let reference_id = r.u32()?;
    let timescale = r.u32()?;
    let (earliest_presentation_time, first_offset) = if version == 0 {
        (u64::from(r.u32()?), u64::from(r.u32()?))
    } else {
        (r.u64()?, r.u64()?)
    };
    r.skip(2)?; // reserved
    let reference_count = r.u16()?;

    let mut references = Vec::with_capacity(usize::from(reference_count));
    for _ in 0..reference_count {
        let word = r.u32()?;
        let subsegment_duration = r.u32()?;
        let sap = r.u32()?;
        references.push(SidxReference {
            is_index: word >> 31 == 1,
            referenced_size: word & 0x7fff_ffff,
            subsegment_duration,
            starts_with_sap: sap >> 31 == 1,
            sap_type: ((sap >> 28) & 0x7) as u8,
        });
    }

    Ok(SidxBox {
        reference_id,
        timescale,
        earliest_presentation_time,
        first_offset,
        references,
    })
}

const TFHD_BASE_DATA_OFFSET: u32 = 0x01;
const TFHD_SAMPLE_DESC_INDEX: u32 = 0x02;
const TFHD_DEFAULT_DURATION: u32 = 0x08;
const TFHD_DEFAULT_SIZE: u32 = 0x10;
const TFHD_DEFAULT_FLAGS: u32 = 0x20;

fn decode_tfhd(r: &mut ByteReader<'_>) -> ParseResult<TfhdBox> {
    let (_version, flags) = r.full_box()?;
    let track_id_offset = r.abs_pos();
    let track_id = r.u32()?;

    if flags & TFHD_BASE_DATA_OFFSET != 0 {
        r.skip(8)?;
    }
    if flags & TFHD_SAMPLE_DESC_INDEX != 0 {
        r.skip(4)?;
    }
    let default_sample_duration = if flags & TFHD_DEFAULT_DURATION != 0 {
        Some(r.u32()?)
    } else {
        None
    };
    let default_sample_size = if flags & TFHD_DEFAULT_SIZE != 0 {
        Some(r.u32()?)
    } else {
        None
    };
    if flags & TFHD_DEFAULT_FLAGS != 0 {
        r.skip(4)?;
    }

    Ok(TfhdBox {
        flags,
        track_id,
        track_id_offset,
        default_sample_duration,
        default_sample_size,
    })
}

const TRUN_DATA_OFFSET: u32 = 0x001;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x004;
const TRUN_SAMPLE_DURATION: u32 = 0x100;
const TRUN_SAMPLE_SIZE: u32 = 0x200;
const TRUN_SAMPLE_FLAGS: u32 = 0x400;
const TRUN_SAMPLE_CTS: u32 = 0x800;

fn decode_trun(r: &mut ByteReader<'_>) -> ParseResult<TrunBox> {
    let (_version, flags) = r.full_box()?;
    let sample_count = r.u32()?;

    let data_offset = if flags & TRUN_DATA_OFFSET != 0 {
        Some(r.u32()? as i32)
    } else {
        None
    };
    if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
        r.skip(4)?;
    }

    let mut total_duration = if flags & TRUN_SAMPLE_DURATION != 0 {
        Some(0u64)
    } else {
        None
    };
    for _ in 0..sample_count {
        if flags & TRUN_SAMPLE_DURATION != 0 {
            let d = r.u32()?;
            if let Some(t) = total_duration.as_mut() {
                *t += u64::from(d);
            }
        }
        if flags & TRUN_SAMPLE_SIZE != 0 {
            r.skip(4)?;
        }
        if flags & TRUN_SAMPLE_FLAGS != 0 {
            r.skip(4)?;
        }
        if flags & TRUN_SAMPLE_CTS != 0 {
            r.skip(4)?;
        }
    }

    Ok(TrunBox {
        flags,
        sample_count,
        data_offset,
        total_duration,
    })
}

fn decode_tfrf(r: &mut ByteReader<'_>) -> ParseResult<TfrfBox> {
    let (version, _flags) = r.full_box()?;
    let count = r.u8()?;
    let mut entries = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let (start_time, duration) = if version == 1 {
            (r.u64()?, r.u64()?)
        } else {
            (u64::from(r.u32()?), u64::from(r.u32()?))
        };
        entries.push(TfrfEntry {
            start_time,
            duration,
        });
    }
    Ok(TfrfBox { entries })
}

fn decode_tfxd(r: &mut ByteReader<'_>) -> ParseResult<TfxdBox> {
    let (version, _flags) = r.full_box()?;
    let (start_time, duration) = if version == 1 {
        (r.u64()?, r.u64()?)
    } else {
        (u64::from(r.u32()?), u64::from(r.u32()?))
    };
    Ok(TfxdBox {
        start_time,
        duration,
    })
}

/// Depth-first search for the first box with the given fourcc.
pub fn find_box<'a>(boxes: &'a [Mp4Box], fourcc: FourCc) -> Option<&'a Mp4Box> {
    for b in boxes {
        if b.fourcc == fourcc {
            return Some(b);
        }
        if let BoxPayload::Container(children) = &b.payload
            && let Some(found) = find_box(children, fourcc)
        {
            return Some(found);
        }
    }
    None
}

/// Depth-first collection of every box with the given fourcc.
pub fn boxes_of_type<'a>(boxes: &'a [Mp4Box], fourcc: FourCc) -> Vec<&'a Mp4Box> {
    let mut out = Vec::new();
    collect(boxes, fourcc, &mut out);
    out
}

fn collect<'a>(boxes: &'a [Mp4Box], fourcc: FourCc, out: &mut Vec<&'a Mp4Box>) {
    for b in boxes {
        if b.fourcc == fourcc {
            out.push(b);
        }
        if let BoxPayload::Container(children) = &b.payload {
            collect(children, fourcc, out);
        }
    }
}

/// Rewrite the track id of every `tfhd` box in `buf` to `new_id`.
///
/// Used when multiplexing fragments from several source tracks into the one
/// forged stream: the demuxer must see the fabricated track ids announced by
/// the synthetic init segment, not the ids the server encoded.
///
/// Returns the number of patched boxes; `Truncated`/`Malformed` input
/// patches nothing.
pub fn restamp_track_id(buf: &mut [u8], new_id: u32) -> ParseResult<usize> {
    let boxes = parse_boxes(buf)?;
    let mut patched = 0;
    for tfhd in boxes_of_type(&boxes, FourCc::TFHD) {
        if let BoxPayload::Tfhd(h) = &tfhd.payload {
            buf[h.track_id_offset..h.track_id_offset + 4].copy_from_slice(&new_id.to_be_bytes());
            patched += 1;
        }
    }
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn plain_box(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
        out.extend_from_slice(fourcc);
        out.extend_from_slice(payload);
        out
    }

    fn full_box(fourcc: &[u8; 4], version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&((u32::from(version) << 24) | flags).to_be_bytes());
        payload.extend_from_slice(body);
        plain_box(fourcc, &payload)
    }

    fn sidx_v0(reference_count: u16, first_offset: u32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_be_bytes()); // reference_id
        body.extend_from_slice(&10_000_000u32.to_be_bytes()); // timescale
        body.extend_from_slice(&0u32.to_be_bytes()); // earliest pts
        body.extend_from_slice(&first_offset.to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes()); // reserved
        body.extend_from_slice(&reference_count.to_be_bytes());
        for i in 0..reference_count {
            body.extend_from_slice(&(1000 + u32::from(i)).to_be_bytes()); // size
            body.extend_from_slice(&20_000_000u32.to_be_bytes()); // duration
            body.extend_from_slice(&0x9000_0000u32.to_be_bytes()); // sap
        }
        full_box(b"sidx", 0, 0, &body)
    }

    #[test]
    fn parses_plain_and_extended_headers() {
        let mut buf = plain_box(b"free", b"abc");
        // 64-bit size form for the second box
        let payload = b"xyz";
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(b"free");
        buf.extend_from_slice(&(16 + payload.len() as u64).to_be_bytes());
        buf.extend_from_slice(payload);

        let boxes = parse_boxes(&buf).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].span, 0..11);
        assert_eq!(boxes[1].span, 11..11 + 16 + 3);
        assert!(matches!(boxes[1].payload, BoxPayload::Skip));
    }

    #[test]
    fn sidx_round_trips_to_split_points() {
        let buf = sidx_v0(3, 40);
        let boxes = parse_boxes(&buf).unwrap();
        let BoxPayload::Sidx(sidx) = &boxes[0].payload else {
            panic!("expected sidx payload");
        };
        assert_eq!(sidx.references.len(), 3);
        assert_eq!(sidx.timescale, 10_000_000);

        // Anchor = first byte after the sidx box.
        let anchor = buf.len() as u64;
        let points = sidx.split_points(anchor);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].offset, anchor + 40);
        for pair in points.windows(2) {
            assert!(pair[1].offset > pair[0].offset, "offsets strictly increase");
        }
        assert_eq!(points[1].offset, anchor + 40 + 1000);
        assert_eq!(points[2].time, 40_000_000);
    }

    #[test]
    fn tfhd_records_track_id_field_offset() {
        let mut body = Vec::new();
        body.extend_from_slice(&7u32.to_be_bytes()); // track id
        body.extend_from_slice(&1234u32.to_be_bytes()); // default duration
        let buf = full_box(b"tfhd", 0, 0x08, &body);

        let boxes = parse_boxes(&buf).unwrap();
        let BoxPayload::Tfhd(tfhd) = &boxes[0].payload else {
            panic!("expected tfhd payload");
        };
        assert_eq!(tfhd.track_id, 7);
        assert_eq!(tfhd.default_sample_duration, Some(1234));
        // header (8) + fullbox (4)
        assert_eq!(tfhd.track_id_offset, 12);
        assert_eq!(
            &buf[tfhd.track_id_offset..tfhd.track_id_offset + 4],
            &7u32.to_be_bytes()
        );
    }

    #[test]
    fn trun_sums_sample_durations() {
        let mut body = Vec::new();
        body.extend_from_slice(&3u32.to_be_bytes()); // sample count
        body.extend_from_slice(&64u32.to_be_bytes()); // data offset
        for d in [100u32, 200, 300] {
            body.extend_from_slice(&d.to_be_bytes());
        }
        let buf = full_box(b"trun", 0, TRUN_DATA_OFFSET | TRUN_SAMPLE_DURATION, &body);

        let boxes = parse_boxes(&buf).unwrap();
        let BoxPayload::Trun(trun) = &boxes[0].payload else {
            panic!("expected trun payload");
        };
        assert_eq!(trun.sample_count, 3);
        assert_eq!(trun.data_offset, Some(64));
        assert_eq!(trun.total_duration, Some(600));
    }

    #[test]
    fn uuid_tfrf_is_disambiguated_by_uuid() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&UUID_TFRF);
        payload.extend_from_slice(&(1u32 << 24).to_be_bytes()); // version 1
        payload.push(2); // fragment count
        for (t, d) in [(20_000_000u64, 20_000_000u64), (40_000_000, 20_000_000)] {
            payload.extend_from_slice(&t.to_be_bytes());
            payload.extend_from_slice(&d.to_be_bytes());
        }
        let buf = plain_box(b"uuid", &payload);

        let boxes = parse_boxes(&buf).unwrap();
        assert_eq!(boxes[0].fourcc, FourCc::TFRF);
        let BoxPayload::Tfrf(tfrf) = &boxes[0].payload else {
            panic!("expected tfrf payload");
        };
        assert_eq!(tfrf.entries.len(), 2);
        assert_eq!(tfrf.entries[1].start_time, 40_000_000);
    }

    #[test]
    fn unknown_uuid_is_skipped() {
        let mut payload = vec![0xAA; 16];
        payload.extend_from_slice(b"whatever");
        let buf = plain_box(b"uuid", &payload);

        let boxes = parse_boxes(&buf).unwrap();
        assert_eq!(boxes[0].fourcc, FourCc::UUID);
        assert!(matches!(boxes[0].payload, BoxPayload::Skip));
    }

    #[rstest]
    #[case::short_header(vec![0, 0, 0, 12, b'f'])]
    #[case::short_payload(plain_box(b"free", b"abcdef")[..10].to_vec())]
    #[case::short_sidx(sidx_v0(3, 0)[..20].to_vec())]
    fn truncated_input_fails_soft(#[case] buf: Vec<u8>) {
        assert!(matches!(
            parse_boxes(&buf),
            Err(ParseError::Truncated { .. })
        ));
    }

    #[test]
    fn undersized_box_is_malformed() {
        let mut buf = plain_box(b"free", b"");
        buf[3] = 4; // size 4 < 8-byte header
        assert!(matches!(parse_boxes(&buf), Err(ParseError::Malformed(_))));
    }

    #[test]
    fn restamp_rewrites_every_tfhd_in_a_moof() {
        let tfhd = full_box(b"tfhd", 0, 0, &7u32.to_be_bytes());
        let traf = plain_box(b"traf", &tfhd);
        let mut moof = plain_box(b"moof", &traf);

        let patched = restamp_track_id(&mut moof, 1).unwrap();
        assert_eq!(patched, 1);

        let boxes = parse_boxes(&moof).unwrap();
        let tfhd = find_box(&boxes, FourCc::TFHD).unwrap();
        let BoxPayload::Tfhd(h) = &tfhd.payload else {
            panic!("expected tfhd payload");
        };
        assert_eq!(h.track_id, 1);
    }
}
