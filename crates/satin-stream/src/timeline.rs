//! Segment timeline construction.
//!
//! Manifest segment points arrive as sparse `(start_time?, duration?,
//! repeat?)` triples. Normalization resolves the missing fields and
//! coalesces runs of identical chunks into repeat records, which bounds
//! memory for long-running live manifests; expansion then materializes the
//! chunk arena.

use crate::{
    error::{StreamError, StreamResult},
    manifest::SegmentPoint,
    track::Chunk,
};

/// One normalized timeline record: `repeat` contiguous chunks of the same
/// duration starting at `start_time`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct TimelineRecord {
    pub(crate) start_time: u64,
    pub(crate) duration: u64,
    pub(crate) repeat: u32,
}

impl TimelineRecord {
    fn end_time(&self) -> u64 {
        self.start_time + self.duration * u64::from(self.repeat)
    }
}

/// Resolve sparse segment points into contiguous records.
///
/// Rules:
/// - a missing `start_time` continues where the previous record ended;
/// - a missing `duration` is inferred from the next point's explicit
///   `start_time` (this also covers manifests whose first point carries only
///   a `t` attribute);
/// - `repeat` counts total occurrences and defaults to 1;
/// - a point starting before the previous record ends is malformed.
pub(crate) fn normalize(points: &[SegmentPoint]) -> StreamResult<Vec<TimelineRecord>> {
    let mut records: Vec<TimelineRecord> = Vec::new();

    for (i, point) in points.iter().enumerate() {
        let repeat = point.repeat.unwrap_or(1);
        if repeat == 0 {
            return Err(StreamError::Manifest(format!(
                "segment point {i} has a zero repeat count"
            )));
        }

        let start_time = match point.start_time {
            Some(t) => t,
            None => match records.last() {
                Some(prev) => prev.end_time(),
                None => {
                    return Err(StreamError::Manifest(
                        "first segment point has no start time".into(),
                    ));
                }
            },
        };

        if let Some(prev) = records.last() {
            if start_time < prev.end_time() {
                return Err(StreamError::Manifest(format!(
                    "segment point {i} at {start_time} overlaps the previous interval"
                )));
            }
        }

        let duration = match point.duration {
            Some(d) => d,
            None => {
                let next_start = points.get(i + 1).and_then(|p| p.start_time).ok_or_else(|| {
                    StreamError::Manifest(format!(
                        "segment point {i} has no duration and none can be inferred"
                    ))
                })?;
                if next_start <= start_time {
                    return Err(StreamError::Manifest(format!(
                        "segment point {i} cannot infer a positive duration"
                    )));
                }
                (next_start - start_time) / u64::from(repeat)
            }
        };
        if duration == 0 {
            return Err(StreamError::Manifest(format!(
                "segment point {i} has a zero duration"
            )));
        }

        // Coalesce with the previous record when this one just continues it.
        if let Some(prev) = records.last_mut() {
            if prev.duration == duration && prev.end_time() == start_time {
                prev.repeat += repeat;
                continue;
            }
        }

        records.push(TimelineRecord {
            start_time,
            duration,
            repeat,
        });
    }

    Ok(records)
}

/// Materialize records into the chunk arena, one chunk per occurrence.
pub(crate) fn expand(records: &[TimelineRecord]) -> Vec<Chunk> {
    let total: usize = records.iter().map(|r| r.repeat as usize).sum();
    let mut chunks = Vec::with_capacity(total);
    for record in records {
        for k in 0..u64::from(record.repeat) {
            let sequence = chunks.len();
            chunks.push(Chunk::new(
                sequence,
                record.start_time + k * record.duration,
                record.duration,
            ));
        }
    }
    chunks
}

pub(crate) fn build(points: &[SegmentPoint]) -> StreamResult<Vec<Chunk>> {
    Ok(expand(&normalize(points)?))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn point(t: Option<u64>, d: Option<u64>, r: Option<u32>) -> SegmentPoint {
        SegmentPoint::new(t, d, r)
    }

    #[test]
    fn repeat_and_inferred_fields_expand_to_four_chunks() {
        let points = [
            point(Some(0), Some(1000), None),
            point(Some(1000), None, Some(2)),
            point(Some(3000), Some(500), None),
        ];
        let chunks = build(&points).unwrap();
        let got: Vec<(u64, u64)> = chunks.iter().map(|c| (c.start_time, c.duration)).collect();
        assert_eq!(
            got,
            vec![(0, 1000), (1000, 1000), (2000, 1000), (3000, 500)]
        );
    }

    #[test]
    fn lone_leading_start_time_infers_duration_from_next_point() {
        let points = [point(Some(0), None, None), point(Some(2000), Some(1000), Some(3))];
        let chunks = build(&points).unwrap();
        assert_eq!(chunks[0].duration, 2000);
        assert_eq!(chunks.len(), 4);
    }

    #[rstest]
    #[case::explicit(vec![
        point(Some(0), Some(500), Some(4)),
        point(None, Some(700), Some(2)),
    ])]
    #[case::inherited_starts(vec![
        point(Some(100), Some(250), None),
        point(None, Some(250), None),
        point(None, Some(1000), Some(3)),
    ])]
    fn chunks_are_contiguous(#[case] points: Vec<SegmentPoint>) {
        let chunks = build(&points).unwrap();
        assert!(!chunks.is_empty());
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].start_time + pair[0].duration, pair[1].start_time);
        }
    }

    #[test]
    fn expansion_is_idempotent() {
        let points = [
            point(Some(0), Some(1000), Some(3)),
            point(None, Some(500), Some(2)),
        ];
        let first = build(&points).unwrap();

        // Re-feed the expanded list as fully explicit points.
        let refed: Vec<SegmentPoint> = first
            .iter()
            .map(|c| point(Some(c.start_time), Some(c.duration), None))
            .collect();
        let second = build(&refed).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn identical_runs_coalesce_into_one_record() {
        let points: Vec<SegmentPoint> = (0..64)
            .map(|k| point(Some(k * 2000), Some(2000), None))
            .collect();
        let records = normalize(&points).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].repeat, 64);
    }

    #[rstest]
    #[case::no_leading_start(vec![point(None, Some(1000), None)])]
    #[case::no_inferable_duration(vec![point(Some(0), None, None)])]
    #[case::overlap(vec![
        point(Some(0), Some(1000), Some(2)),
        point(Some(1500), Some(1000), None),
    ])]
    #[case::zero_repeat(vec![point(Some(0), Some(1000), Some(0))])]
    #[case::zero_duration(vec![point(Some(0), Some(0), None)])]
    fn malformed_points_are_rejected(#[case] points: Vec<SegmentPoint>) {
        assert!(matches!(
            build(&points),
            Err(StreamError::Manifest(_))
        ));
    }
}
