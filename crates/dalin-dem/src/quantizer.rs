//! Segmented requantizer feeding the DEM network.
//!
//! The input is requantized with the segment step `Qseg = range / 2^Nb` into a logical code in
//! `[0, 2(2^Nb - 1)]`, which is then split into the codes of the two sub-DACs.
use dalin_core::util::{check_dither, dither_at, SaturationCounter, DEFAULT_SATURATION_THRESHOLD};
use dalin_core::{CodeSequence, QuantizerSpec};

use crate::{DemError, DemNetwork};

/// Output of the DEM quantizer
#[derive(Debug, Clone, PartialEq)]
pub struct DemOutput {
    /// Codes of both sub-DACs
    pub codes: CodeSequence,
    /// Logical codes before splitting
    pub logical: Vec<u32>,
    /// Number of saturated samples
    pub saturations: usize,
    /// Whether the saturation warning threshold was reached
    pub threshold_exceeded: bool,
}

/// Requantizer and DEM network for two sub-DACs sharing one quantizer description.
#[derive(Debug, Clone, PartialEq)]
pub struct DemQuantizer {
    spec: QuantizerSpec,
    network: DemNetwork,
    saturation_threshold: usize,
}

impl DemQuantizer {
    /// Create a DEM quantizer for sub-DACs described by `spec`.
    pub fn new(spec: QuantizerSpec) -> Result<Self, DemError> {
        Ok(Self {
            spec,
            network: DemNetwork::new(spec.bits())?,
            saturation_threshold: DEFAULT_SATURATION_THRESHOLD,
        })
    }

    /// Set the number of saturated samples after which a warning is logged.
    pub fn with_saturation_threshold(mut self, threshold: usize) -> Self {
        self.saturation_threshold = threshold;
        self
    }

    /// Sub-DAC quantizer
    pub fn spec(&self) -> &QuantizerSpec {
        &self.spec
    }

    /// Switching network
    pub fn network(&self) -> &DemNetwork {
        &self.network
    }

    /// Step size of the logical (segmented) code, `range / 2^Nb`.
    pub fn segment_step(&self) -> f64 {
        self.spec.range() / self.spec.level_count() as f64
    }

    /// Requantize a value into a logical code. The second tuple member is `true` when the code had
    /// to be clamped into `[0, 2(2^Nb - 1)]`.
    pub fn logical_code(&self, x: f64) -> (u32, bool) {
        let half = (self.spec.level_count() / 2) as i64;
        // Bipolar input offset, then segmented code offset
        let code = (x / self.segment_step() + 0.5).floor() as i64 + half + (half - 1);
        let max = self.network.max_code();
        if code < 0 {
            (0, true)
        } else if code > max as i64 {
            (max, true)
        } else {
            (code as u32, false)
        }
    }

    /// Requantize and split a whole signal with a deterministic bit source.
    #[profiling::function]
    pub fn run_with(
        &self,
        x: &[f64],
        dither: Option<&[f64]>,
        mut bit: impl FnMut() -> bool,
    ) -> Result<DemOutput, DemError> {
        check_dither(dither, x.len())?;
        let mut saturation = SaturationCounter::new(self.saturation_threshold);
        let mut logical = Vec::with_capacity(x.len());
        let mut channels = [Vec::with_capacity(x.len()), Vec::with_capacity(x.len())];
        for (i, &sample) in x.iter().enumerate() {
            let (code, saturated) = self.logical_code(sample + dither_at(dither, i));
            if saturated && saturation.record() {
                log::warn!(
                    "DEM requantizer saturated {} times",
                    saturation.threshold()
                );
            }
            let [a, b] = self.network.split_with(code, &mut bit)?;
            logical.push(code);
            channels[0].push(a);
            channels[1].push(b);
        }
        if saturation.exceeded() {
            log::warn!(
                "DEM requantizer saturated {} times over {} samples",
                saturation.count(),
                x.len()
            );
        }
        let [a, b] = channels;
        Ok(DemOutput {
            codes: CodeSequence::new(self.spec.bits(), vec![a, b])?,
            logical,
            saturations: saturation.count(),
            threshold_exceeded: saturation.exceeded(),
        })
    }

    /// Requantize and split a whole signal with random tie-break bits.
    pub fn run(
        &self,
        x: &[f64],
        dither: Option<&[f64]>,
        rng: &mut fastrand::Rng,
    ) -> Result<DemOutput, DemError> {
        self.run_with(x, dither, || rng.bool())
    }
}

#[cfg(test)]
mod tests {
    use dalin_core::{LevelTable, QuantizerPreset};

    use super::*;

    #[test]
    fn zero_maps_to_mid_logical_code() {
        let dem = DemQuantizer::new(QuantizerPreset::Generic4Bit.spec()).unwrap();
        assert_eq!((15, false), dem.logical_code(0.0));
        assert_eq!(2.0 / 16.0, dem.segment_step());
    }

    #[test]
    fn clamps_logical_code() {
        let dem = DemQuantizer::new(QuantizerPreset::Generic4Bit.spec())
            .unwrap()
            .with_saturation_threshold(2);
        assert_eq!((0, true), dem.logical_code(-3.0));
        assert_eq!((30, true), dem.logical_code(3.0));

        let mut rng = fastrand::Rng::with_seed(0);
        let output = dem.run(&[-3.0, 0.0, 3.0, 3.0], None, &mut rng).unwrap();
        assert_eq!(3, output.saturations);
        assert!(output.threshold_exceeded);
        assert_eq!(vec![0, 15, 30, 30], output.logical);
    }

    #[test]
    fn channels_sum_to_logical_code() {
        let spec = QuantizerPreset::Generic6Bit.spec();
        let dem = DemQuantizer::new(spec).unwrap();
        let mut rng = fastrand::Rng::with_seed(99);
        let x: Vec<f64> = (0..500)
            .map(|k| 0.9 * (std::f64::consts::TAU * k as f64 / 125.0).sin())
            .collect();
        let output = dem.run(&x, None, &mut rng).unwrap();
        assert_eq!(2, output.codes.channel_count());
        assert_eq!(0, output.saturations);
        let a = output.codes.channel(0).unwrap();
        let b = output.codes.channel(1).unwrap();
        for ((a, b), c) in a.iter().zip(b).zip(&output.logical) {
            assert_eq!(*c, a + b);
        }

        // With identical ideal sub-DACs the summed output tracks the input
        let table = LevelTable::ideal(&spec, 2);
        let y = table.summed_output(&output.codes).unwrap();
        let offset = spec.vmin() + spec.vmax();
        for (y, x) in y.iter().zip(&x) {
            assert!((y - offset - x).abs() < 2.0 * spec.qstep());
        }
    }

    #[test]
    fn deterministic_bits_are_reproducible() {
        let dem = DemQuantizer::new(QuantizerPreset::Generic4Bit.spec()).unwrap();
        let x = [0.1, -0.4, 0.7];
        let mut rng1 = fastrand::Rng::with_seed(5);
        let mut rng2 = fastrand::Rng::with_seed(5);
        assert_eq!(
            dem.run(&x, None, &mut rng1).unwrap(),
            dem.run(&x, None, &mut rng2).unwrap()
        );
    }
}
