use std::time::Duration;

/// One selectable quality level of a track, as the selector sees it.
///
/// `index` is the caller's stable identifier (position in the manifest's
/// quality list); the selector never interprets it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Level {
    pub index: usize,
    pub bitrate_bps: u64,
}

/// Tuning knobs for [`crate::QualitySelector`].
#[derive(Clone, Debug)]
pub struct SelectorOptions {
    /// Validation window: how much observed playback time a level must
    /// accumulate before it fully qualifies, and how much disqualifying
    /// evidence forces a reselection. Expressed in media time.
    pub probe_length: Duration,
}

impl Default for SelectorOptions {
    fn default() -> Self {
        Self {
            probe_length: Duration::from_secs(8),
        }
    }
}
