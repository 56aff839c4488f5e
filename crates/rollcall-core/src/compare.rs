//! Descriptor comparison: Euclidean distance against a configured threshold.

use crate::descriptor::{Descriptor, VerificationOutcome};

/// Distance below which two descriptors are considered the same person.
///
/// A global constant rather than a per-deployment calibration; a known
/// accuracy/robustness tradeoff. Overridable via [`Comparator::new`].
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Pure, deterministic descriptor comparator.
#[derive(Debug, Clone, Copy)]
pub struct Comparator {
    threshold: f32,
}

impl Comparator {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Compare two descriptors. Match iff `distance < threshold` (strict,
    /// so a pair sitting exactly on the threshold is rejected).
    pub fn compare(&self, probe: &Descriptor, reference: &Descriptor) -> VerificationOutcome {
        let distance = probe.distance(reference);
        VerificationOutcome {
            matched: distance < self.threshold,
            distance,
        }
    }
}

impl Default for Comparator {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}
