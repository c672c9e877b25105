use std::time::Duration;

use crate::manifest::TrackKind;

/// Pipeline progress notifications, broadcast to any number of observers.
///
/// Delivery is best-effort: a lagging receiver drops the oldest events.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    ChunkDownloaded {
        kind: TrackKind,
        sequence: usize,
        bytes: u64,
        elapsed: Duration,
    },
    QualitySwitched {
        kind: TrackKind,
        from_bps: u64,
        to_bps: u64,
    },
    /// The cursor ran out of downloaded data and is waiting.
    Underrun,
    EndOfStream,
}
