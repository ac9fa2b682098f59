//! Small helpers shared by the code generators.
use crate::Error;

/// Number of saturated samples after which code generators emit a warning.
pub const DEFAULT_SATURATION_THRESHOLD: usize = 10;

/// Counts saturation events of a quantizer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SaturationCounter {
    count: usize,
    threshold: usize,
}

impl Default for SaturationCounter {
    fn default() -> Self {
        Self::new(DEFAULT_SATURATION_THRESHOLD)
    }
}

impl SaturationCounter {
    /// Create a new counter which reports once `threshold` events have been recorded.
    pub fn new(threshold: usize) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
        }
    }

    /// Record a saturation event. Returns `true` exactly once, when the count reaches the
    /// threshold.
    pub fn record(&mut self) -> bool {
        self.count += 1;
        self.count == self.threshold
    }

    /// Number of recorded events
    pub fn count(&self) -> usize {
        self.count
    }

    /// Warning threshold
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether the threshold has been reached
    pub fn exceeded(&self) -> bool {
        self.count >= self.threshold
    }
}

/// Root mean square of a signal. Returns 0 for an empty signal.
pub fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

/// Check that an optional dither signal covers `len` samples.
pub fn check_dither(dither: Option<&[f64]>, len: usize) -> Result<(), Error> {
    match dither {
        Some(d) if d.len() < len => Err(Error::LengthMismatch {
            what: "dither",
            expected: len,
            actual: d.len(),
        }),
        _ => Ok(()),
    }
}

/// Dither sample at index `i`, zero when no dither is used.
#[inline]
pub fn dither_at(dither: Option<&[f64]>, i: usize) -> f64 {
    dither.and_then(|d| d.get(i).copied()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_reports_once() {
        let mut counter = SaturationCounter::new(3);
        let reports: Vec<_> = (0..5).map(|_| counter.record()).collect();
        assert_eq!(vec![false, false, true, false, false], reports);
        assert_eq!(5, counter.count());
        assert!(counter.exceeded());
    }

    #[test]
    fn rms_of_square_wave() {
        assert_eq!(0.0, rms(&[]));
        assert!((rms(&[1.0, -1.0, 1.0, -1.0]) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn dither_must_cover_signal() {
        assert!(check_dither(None, 10).is_ok());
        assert!(check_dither(Some(&[0.0; 4]), 5).is_err());
        assert_eq!(0.0, dither_at(None, 3));
        assert_eq!(0.5, dither_at(Some(&[0.0, 0.5]), 1));
    }
}
