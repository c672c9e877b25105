//! Bandwidth adaptation for the satin streaming core.
//!
//! Two pieces, deliberately independent of any streaming protocol:
//! - [`BandwidthEstimator`]: rolling throughput statistics over completed
//!   chunk downloads (asymmetric long-run average plus a short recovery
//!   ring).
//! - [`QualitySelector`]: hysteresis policy that turns the estimate into a
//!   per-track quality-level choice, resistant to single-sample spikes and
//!   dips.
//!
//! The scheduler owns one estimator and one selector per track and drives
//! both once per scheduling decision.

#![forbid(unsafe_code)]

mod estimator;
mod selector;
mod types;

pub use estimator::{BandwidthEstimator, Estimator};
pub use selector::{QualitySelector, Selection, SelectionReason};
pub use types::{Level, SelectorOptions};
