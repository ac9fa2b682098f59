//! Learning over a periodic reference, one padded period at a time.
//!
//! The reference is cut into overlapping segments of `period + 2 * padding` samples, advancing by
//! `period + padding` samples. Each segment runs through its own learning loop. When the padding is
//! a multiple of the period, all segments start at the same phase and each loop starts from the
//! feed-forward signal learned on the previous segment; otherwise every loop starts from zero.
//!
//! The edges of each segment absorb the start-up transients of the inner quantizer and of the
//! plant: only `[padding / 2, padding / 2 + period + padding)` is kept, so that consecutive kept
//! parts abut.
//!
//! # Example
//!
//! ```rust
//! use dalin_ilc::PeriodicLayout;
//!
//! let layout = PeriodicLayout::new(32, 8).unwrap();
//! assert_eq!(layout.segments(144).unwrap(), vec![0..48, 40..88, 80..128]);
//! assert_eq!(layout.kept(), 4..44);
//! ```
use std::ops::Range;

use dalin_core::CodeSequence;

use crate::inner::InnerQuantizer;
use crate::learning::IterativeLearningControl;
use crate::IlcError;

/// Segmentation of a periodic reference.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PeriodicLayout {
    period: usize,
    padding: usize,
}

impl PeriodicLayout {
    /// Create a layout. The period must not be empty.
    pub fn new(period: usize, padding: usize) -> Result<Self, IlcError> {
        if period == 0 {
            return Err(IlcError::Layout { period, padding });
        }
        Ok(Self { period, padding })
    }

    /// Period length
    pub fn period(&self) -> usize {
        self.period
    }

    /// Padding length
    pub fn padding(&self) -> usize {
        self.padding
    }

    /// Length of one segment, which is the size of the learning operators.
    pub fn segment_len(&self) -> usize {
        self.period + 2 * self.padding
    }

    /// Offset between the starts of two consecutive segments.
    pub fn stride(&self) -> usize {
        self.period + self.padding
    }

    /// Whether all segments start at the same phase of the period.
    pub fn is_aligned(&self) -> bool {
        self.stride() % self.period == 0
    }

    /// Samples of a segment that end up in the stitched output, relative to the segment start.
    pub fn kept(&self) -> Range<usize> {
        let start = self.padding / 2;
        start..start + self.stride()
    }

    /// Segments of a reference of `len` samples. Trailing samples that do not fill a whole
    /// segment are left out.
    pub fn segments(&self, len: usize) -> Result<Vec<Range<usize>>, IlcError> {
        let segment_len = self.segment_len();
        if len < segment_len {
            return Err(IlcError::SignalTooShort {
                len,
                required: segment_len,
            });
        }
        let count = (len - segment_len) / self.stride() + 1;
        Ok((0..count)
            .map(|i| {
                let start = i * self.stride();
                start..start + segment_len
            })
            .collect())
    }
}

/// Result of a periodic learning run.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicOutcome {
    /// Reference sample at which the stitched codes start
    pub start: usize,
    /// Stitched codes of the last iteration of every segment
    pub codes: CodeSequence,
    /// Stitched feed-forward signal
    pub feedforward: Vec<f64>,
    /// RMS tracking error of each iteration, per segment
    pub rms_errors: Vec<Vec<f64>>,
}

impl IterativeLearningControl {
    /// Learn over a periodic reference. The controller must be sized for one segment of the
    /// layout.
    #[profiling::function]
    pub fn run_periodic<Q: InnerQuantizer + ?Sized>(
        &self,
        inner: &mut Q,
        layout: PeriodicLayout,
        reference: &[f64],
        dither: Option<&[f64]>,
    ) -> Result<PeriodicOutcome, IlcError> {
        if self.size() != layout.segment_len() {
            return Err(IlcError::Dimension {
                what: "learning operators",
                expected: layout.segment_len(),
                actual: self.size(),
            });
        }
        dalin_core::util::check_dither(dither, reference.len())?;
        let segments = layout.segments(reference.len())?;
        let kept = layout.kept();

        let mut channels: Vec<Vec<u32>> = vec![];
        let mut bits = 0;
        let mut feedforward = Vec::with_capacity(segments.len() * layout.stride());
        let mut rms_errors = Vec::with_capacity(segments.len());
        let mut carry = vec![0.0; layout.segment_len()];
        for (i, segment) in segments.into_iter().enumerate() {
            let outcome = self.run_from(
                inner,
                &reference[segment.clone()],
                dither.map(|d| &d[segment.clone()]),
                &carry,
            )?;
            log::debug!(
                "Segment {i}: RMS tracking error {:.3e} after {} iterations",
                outcome.rms_errors.last().copied().unwrap_or_default(),
                outcome.rms_errors.len()
            );

            bits = outcome.codes.bits();
            channels.resize(outcome.codes.channel_count(), vec![]);
            for (stitched, codes) in channels.iter_mut().zip(outcome.codes.channels()) {
                stitched.extend_from_slice(&codes[kept.clone()]);
            }
            feedforward.extend_from_slice(&outcome.feedforward[kept.clone()]);
            rms_errors.push(outcome.rms_errors);
            if layout.is_aligned() {
                carry = outcome.feedforward;
            }
        }

        Ok(PeriodicOutcome {
            start: kept.start,
            codes: CodeSequence::new(bits, channels)?,
            feedforward,
            rms_errors,
        })
    }
}
