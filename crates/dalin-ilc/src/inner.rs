//! Quantizers driven by the learning loop.
use dalin_core::util::{check_dither, dither_at, SaturationCounter};
use dalin_core::{ChannelLevels, CodeSequence, LevelModel, LevelTable};
use dalin_dem::DemQuantizer;
use dalin_nsq::NoiseShapingQuantizer;

use crate::IlcError;

/// Codes produced by an inner quantizer, with the DAC output they realize.
#[derive(Debug, Clone, PartialEq)]
pub struct InnerOutput {
    /// Codes of every channel
    pub codes: CodeSequence,
    /// Realized DAC output under the level model of the quantizer
    pub levels: Vec<f64>,
}

/// Quantizer run once per learning iteration.
pub trait InnerQuantizer {
    /// Quantize `input`, with an optional dither of the same length.
    fn quantize(
        &mut self,
        input: &[f64],
        dither: Option<&[f64]>,
    ) -> Result<InnerOutput, IlcError>;
}

impl InnerQuantizer for NoiseShapingQuantizer {
    fn quantize(
        &mut self,
        input: &[f64],
        dither: Option<&[f64]>,
    ) -> Result<InnerOutput, IlcError> {
        let bits = self.levels().spec().bits();
        let output = self.run(input, dither)?;
        Ok(InnerOutput {
            codes: CodeSequence::single(bits, output.codes)?,
            levels: output.levels,
        })
    }
}

/// Memoryless quantizer, rounding every sample to the nearest code.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectQuantizer {
    levels: ChannelLevels,
    model: LevelModel,
}

impl DirectQuantizer {
    /// Create a direct quantizer realizing the levels of the given model.
    pub fn new(levels: ChannelLevels, model: LevelModel) -> Self {
        Self { levels, model }
    }
}

impl InnerQuantizer for DirectQuantizer {
    fn quantize(
        &mut self,
        input: &[f64],
        dither: Option<&[f64]>,
    ) -> Result<InnerOutput, IlcError> {
        check_dither(dither, input.len())?;
        let spec = self.levels.spec();
        let mut saturation = SaturationCounter::default();
        let mut codes = Vec::with_capacity(input.len());
        let mut levels = Vec::with_capacity(input.len());
        for (i, &x) in input.iter().enumerate() {
            let (code, saturated) = spec.quantize_clamped(x + dither_at(dither, i));
            if saturated {
                saturation.record();
            }
            levels.push(self.levels.level(code, self.model)?);
            codes.push(code);
        }
        if saturation.exceeded() {
            log::warn!(
                "Direct quantizer saturated {} times over {} samples",
                saturation.count(),
                input.len()
            );
        }
        Ok(InnerOutput {
            codes: CodeSequence::single(spec.bits(), codes)?,
            levels,
        })
    }
}

/// DEM quantizer over two sub-DACs. The realized output is the sum of both sub-DAC levels.
#[derive(Debug, Clone)]
pub struct DemInner {
    quantizer: DemQuantizer,
    channels: [ChannelLevels; 2],
    model: LevelModel,
    rng: fastrand::Rng,
}

impl DemInner {
    /// Create a DEM inner quantizer. `table` holds the calibrated levels of both sub-DACs, and
    /// `rng` supplies the tie-break bits of the switching network.
    pub fn new(
        quantizer: DemQuantizer,
        table: &LevelTable,
        model: LevelModel,
        rng: fastrand::Rng,
    ) -> Result<Self, IlcError> {
        let spec = *quantizer.spec();
        let channels = [
            ChannelLevels::new(spec, table, 0)?,
            ChannelLevels::new(spec, table, 1)?,
        ];
        Ok(Self {
            quantizer,
            channels,
            model,
            rng,
        })
    }
}

impl InnerQuantizer for DemInner {
    fn quantize(
        &mut self,
        input: &[f64],
        dither: Option<&[f64]>,
    ) -> Result<InnerOutput, IlcError> {
        let output = self.quantizer.run(input, dither, &mut self.rng)?;
        let mut levels = vec![0.0; input.len()];
        for (channel, codes) in self.channels.iter().zip(output.codes.channels()) {
            for (level, &code) in levels.iter_mut().zip(codes) {
                *level += channel.level(code, self.model)?;
            }
        }
        Ok(InnerOutput {
            codes: output.codes,
            levels,
        })
    }
}

#[cfg(test)]
mod tests {
    use dalin_core::QuantizerPreset;
    use dalin_filters::design::second_order_ntf;

    use super::*;

    #[test]
    fn direct_quantizer_realizes_model_levels() {
        let spec = QuantizerPreset::Generic4Bit.spec();
        let mut ideal = spec.ideal_levels();
        ideal[8] += 0.01;
        let table = LevelTable::from_channels(&spec, vec![ideal]).unwrap();
        let levels = ChannelLevels::new(spec, &table, 0).unwrap();

        let mut calibrated = DirectQuantizer::new(levels.clone(), LevelModel::Calibrated);
        let output = calibrated.quantize(&[0.0, 5.0], None).unwrap();
        assert_eq!(&[8, 15], output.codes.channel(0).unwrap());
        assert_eq!(vec![table.level(8, 0).unwrap(), 1.0], output.levels);

        let mut ideal = DirectQuantizer::new(levels, LevelModel::Ideal);
        let output = ideal.quantize(&[0.0], None).unwrap();
        assert_eq!(vec![spec.ideal_level(8).unwrap()], output.levels);
    }

    #[test]
    fn noise_shaping_quantizer_as_inner() {
        let levels = ChannelLevels::ideal(QuantizerPreset::Generic4Bit.spec());
        let mut nsq =
            NoiseShapingQuantizer::new(&second_order_ntf(), levels.clone(), LevelModel::Ideal)
                .unwrap();
        let input = [0.0, 0.3, -0.2];
        let output = nsq.quantize(&input, None).unwrap();
        let direct = nsq.run(&input, None).unwrap();
        assert_eq!(direct.codes, output.codes.channel(0).unwrap());
        assert_eq!(direct.levels, output.levels);
        assert!(matches!(
            nsq.quantize(&input, Some(&[0.0][..])),
            Err(IlcError::Nsq(_))
        ));
    }

    #[test]
    fn dem_output_sums_sub_dacs() {
        let spec = QuantizerPreset::Generic4Bit.spec();
        let mut rng = fastrand::Rng::with_seed(4);
        let table = LevelTable::with_random_inl(&spec, 2, 0.3, &mut rng);
        let mut dem = DemInner::new(
            DemQuantizer::new(spec).unwrap(),
            &table,
            LevelModel::Calibrated,
            fastrand::Rng::with_seed(8),
        )
        .unwrap();
        let output = dem.quantize(&[0.0, 0.4, -0.7], None).unwrap();
        assert_eq!(2, output.codes.channel_count());
        assert_eq!(table.summed_output(&output.codes).unwrap(), output.levels);

        let single = LevelTable::ideal(&spec, 1);
        assert!(matches!(
            DemInner::new(
                DemQuantizer::new(spec).unwrap(),
                &single,
                LevelModel::Ideal,
                fastrand::Rng::new()
            ),
            Err(IlcError::Level(dalin_core::Error::MissingChannel { .. }))
        ));
    }
}
