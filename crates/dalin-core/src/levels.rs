//! Measured (calibrated) output levels of the DAC channels, and the level model used when feeding
//! back quantized values.
use serde::{Deserialize, Serialize};

use crate::quantizer::check_word_size;
use crate::{CodeSequence, Error, QuantizerSpec};

/// Which level table a code generator uses for its internal feedback.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LevelModel {
    /// Linearly spaced levels of the quantizer
    #[default]
    Ideal,
    /// Measured levels of the physical channel
    Calibrated,
}

/// Unvalidated level table, as stored in measurement files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelTableParams {
    /// Word size of the quantizer
    pub bits: u32,
    /// Levels, one row of `2^bits` entries per channel
    pub channels: Vec<Vec<f64>>,
}

/// Per-channel output levels, `channels[ch][code]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LevelTableParams", into = "LevelTableParams")]
pub struct LevelTable {
    bits: u32,
    channels: Vec<Vec<f64>>,
}

impl TryFrom<LevelTableParams> for LevelTable {
    type Error = Error;

    fn try_from(value: LevelTableParams) -> Result<Self, Self::Error> {
        Self::new(value.bits, value.channels)
    }
}

impl From<LevelTable> for LevelTableParams {
    fn from(value: LevelTable) -> Self {
        Self {
            bits: value.bits,
            channels: value.channels,
        }
    }
}

impl LevelTable {
    /// Build a level table for a `bits`-bit quantizer. Every channel must hold exactly `2^bits`
    /// levels.
    pub fn new(bits: u32, channels: Vec<Vec<f64>>) -> Result<Self, Error> {
        check_word_size(bits)?;
        if channels.is_empty() {
            return Err(Error::MissingChannel {
                channel: 0,
                channels: 0,
            });
        }
        let expected = 1usize << bits;
        if let Some(bad) = channels.iter().find(|ch| ch.len() != expected) {
            return Err(Error::LevelCount {
                expected,
                actual: bad.len(),
            });
        }
        Ok(Self { bits, channels })
    }

    /// Build a level table from measured channel levels. Every channel must hold exactly one level
    /// per code of the quantizer.
    pub fn from_channels(spec: &QuantizerSpec, channels: Vec<Vec<f64>>) -> Result<Self, Error> {
        Self::new(spec.bits(), channels)
    }

    /// Table where every channel outputs the ideal levels of the quantizer.
    pub fn ideal(spec: &QuantizerSpec, channels: usize) -> Self {
        let levels = spec.ideal_levels();
        Self {
            bits: spec.bits(),
            channels: vec![levels; channels.max(1)],
        }
    }

    /// Synthetic table with a random integral non-linearity on every channel.
    ///
    /// Each level is offset by a uniform random value within `±amplitude` LSB. The end points are
    /// left untouched so that the output range stays calibrated.
    pub fn with_random_inl(
        spec: &QuantizerSpec,
        channels: usize,
        amplitude: f64,
        rng: &mut fastrand::Rng,
    ) -> Self {
        let ideal = spec.ideal_levels();
        let last = ideal.len() - 1;
        let channels = (0..channels.max(1))
            .map(|_| {
                ideal
                    .iter()
                    .enumerate()
                    .map(|(i, &level)| {
                        if i == 0 || i == last {
                            level
                        } else {
                            level + spec.qstep() * amplitude * (2.0 * rng.f64() - 1.0)
                        }
                    })
                    .collect()
            })
            .collect();
        Self {
            bits: spec.bits(),
            channels,
        }
    }

    /// Copy of this table where every level is offset by a uniform random value in
    /// `[-range, range]`, used to model calibration uncertainty.
    pub fn perturbed(&self, range: f64, rng: &mut fastrand::Rng) -> Self {
        let channels = self
            .channels
            .iter()
            .map(|ch| {
                ch.iter()
                    .map(|&level| level + range * (2.0 * rng.f64() - 1.0))
                    .collect()
            })
            .collect();
        Self {
            bits: self.bits,
            channels,
        }
    }

    /// Word size of the quantizer this table was measured for.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of channels in this table.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Levels of a single channel, indexed by code.
    pub fn channel(&self, channel: usize) -> Result<&[f64], Error> {
        self.channels
            .get(channel)
            .map(Vec::as_slice)
            .ok_or(Error::MissingChannel {
                channel,
                channels: self.channels.len(),
            })
    }

    /// Output level of `code` on `channel`.
    pub fn level(&self, code: u32, channel: usize) -> Result<f64, Error> {
        let levels = self.channel(channel)?;
        levels.get(code as usize).copied().ok_or(Error::OutOfRange {
            code: code as i64,
            max: (1 << self.bits) - 1,
        })
    }

    /// Integral non-linearity of a channel, in LSB.
    pub fn inl(&self, spec: &QuantizerSpec, channel: usize) -> Result<Vec<f64>, Error> {
        let levels = self.channel(channel)?;
        check_bits(spec, self.bits)?;
        Ok(levels
            .iter()
            .zip(spec.ideal_levels())
            .map(|(level, ideal)| (level - ideal) / spec.qstep())
            .collect())
    }

    /// Differential non-linearity of a channel, in LSB. Has one entry less than there are codes.
    pub fn dnl(&self, spec: &QuantizerSpec, channel: usize) -> Result<Vec<f64>, Error> {
        let inl = self.inl(spec, channel)?;
        Ok(inl.windows(2).map(|w| w[1] - w[0]).collect())
    }

    /// Physical output of a code sequence: for each channel of the sequence, the level of each
    /// code on that channel.
    pub fn output(&self, codes: &CodeSequence) -> Result<Vec<Vec<f64>>, Error> {
        codes
            .channels()
            .iter()
            .enumerate()
            .map(|(ch, codes)| {
                codes
                    .iter()
                    .map(|&code| self.level(code, ch))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect()
    }

    /// Sum of the outputs of all channels of the code sequence.
    pub fn summed_output(&self, codes: &CodeSequence) -> Result<Vec<f64>, Error> {
        let mut sum = vec![0.0; codes.len()];
        for channel in self.output(codes)? {
            for (acc, y) in sum.iter_mut().zip(channel) {
                *acc += y;
            }
        }
        Ok(sum)
    }
}

fn check_bits(spec: &QuantizerSpec, bits: u32) -> Result<(), Error> {
    if spec.bits() == bits {
        Ok(())
    } else {
        Err(Error::LevelCount {
            expected: spec.level_count(),
            actual: 1usize << bits,
        })
    }
}

/// Ideal and calibrated levels of a single channel, bound to its quantizer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelLevels {
    spec: QuantizerSpec,
    ideal: Vec<f64>,
    calibrated: Vec<f64>,
}

impl ChannelLevels {
    /// Select `channel` of the level table.
    pub fn new(spec: QuantizerSpec, table: &LevelTable, channel: usize) -> Result<Self, Error> {
        check_bits(&spec, table.bits())?;
        let calibrated = table.channel(channel)?.to_vec();
        Ok(Self {
            spec,
            ideal: spec.ideal_levels(),
            calibrated,
        })
    }

    /// Channel whose calibrated levels equal the ideal ones.
    pub fn ideal(spec: QuantizerSpec) -> Self {
        let ideal = spec.ideal_levels();
        Self {
            spec,
            calibrated: ideal.clone(),
            ideal,
        }
    }

    /// Quantizer of this channel.
    pub fn spec(&self) -> &QuantizerSpec {
        &self.spec
    }

    /// Level table for the given model.
    pub fn levels(&self, model: LevelModel) -> &[f64] {
        match model {
            LevelModel::Ideal => &self.ideal,
            LevelModel::Calibrated => &self.calibrated,
        }
    }

    /// Level of `code` under the given model.
    pub fn level(&self, code: u32, model: LevelModel) -> Result<f64, Error> {
        self.levels(model)
            .get(code as usize)
            .copied()
            .ok_or(Error::OutOfRange {
                code: code as i64,
                max: self.spec.max_code(),
            })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{CodeType, QuantizerPreset};

    fn spec() -> QuantizerSpec {
        QuantizerSpec::configure(3, -1.0, 1.0, CodeType::MidTread).unwrap()
    }

    #[test]
    fn rejects_wrong_level_count() {
        let result = LevelTable::from_channels(&spec(), vec![vec![0.0; 8], vec![0.0; 7]]);
        assert_eq!(
            Err(Error::LevelCount {
                expected: 8,
                actual: 7
            }),
            result
        );
    }

    #[test]
    fn rejects_empty_table() {
        let result = LevelTable::from_channels(&spec(), vec![]);
        assert!(matches!(result, Err(Error::MissingChannel { .. })));
    }

    #[rstest]
    #[case("bits = 4\nchannels = [[]]")]
    #[case("bits = 4\nchannels = []")]
    #[case("bits = 2\nchannels = [[0.0, 1.0, 2.0, 3.0], [0.0, 1.0]]")]
    #[case("bits = 0\nchannels = [[0.0]]")]
    fn deserialization_validates(#[case] document: &str) {
        assert!(toml::from_str::<LevelTable>(document).is_err());
    }

    #[test]
    fn deserialized_table_matches_constructed() {
        let table: LevelTable =
            toml::from_str("bits = 1\nchannels = [[-0.5, 0.5], [-0.4, 0.6]]").unwrap();
        assert_eq!(
            LevelTable::new(1, vec![vec![-0.5, 0.5], vec![-0.4, 0.6]]).unwrap(),
            table
        );
        assert_eq!(Ok(0.6), table.level(1, 1));
        assert_eq!(
            Err(Error::OutOfRange { code: 2, max: 1 }),
            table.level(2, 0)
        );
    }

    #[rstest]
    #[case(0, 0, Ok(-1.0))]
    #[case(7, 1, Ok(1.0))]
    #[case(8, 0, Err(Error::OutOfRange { code: 8, max: 7 }))]
    #[case(0, 2, Err(Error::MissingChannel { channel: 2, channels: 2 }))]
    fn level_lookup(#[case] code: u32, #[case] channel: usize, #[case] expected: Result<f64, Error>) {
        let table = LevelTable::ideal(&spec(), 2);
        assert_eq!(expected, table.level(code, channel));
    }

    #[test]
    fn ideal_table_has_no_nonlinearity() {
        let spec = QuantizerPreset::Generic6Bit.spec();
        let table = LevelTable::ideal(&spec, 1);
        let inl = table.inl(&spec, 0).unwrap();
        let dnl = table.dnl(&spec, 0).unwrap();
        assert_eq!(64, inl.len());
        assert_eq!(63, dnl.len());
        assert!(inl.iter().chain(&dnl).all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn random_inl_is_bounded() {
        let spec = QuantizerPreset::Generic6Bit.spec();
        let mut rng = fastrand::Rng::with_seed(42);
        let table = LevelTable::with_random_inl(&spec, 2, 0.5, &mut rng);
        assert_eq!(2, table.channel_count());
        for ch in 0..2 {
            let inl = table.inl(&spec, ch).unwrap();
            assert!(inl.iter().all(|v| v.abs() <= 0.5 + 1e-9));
            assert_eq!(0.0, inl[0]);
        }
        assert_ne!(table.channel(0).unwrap(), table.channel(1).unwrap());
    }

    #[test]
    fn perturbation_stays_within_range() {
        let spec = spec();
        let table = LevelTable::ideal(&spec, 1);
        let mut rng = fastrand::Rng::with_seed(3);
        let perturbed = table.perturbed(1e-3, &mut rng);
        for (a, b) in table
            .channel(0)
            .unwrap()
            .iter()
            .zip(perturbed.channel(0).unwrap())
        {
            assert!((a - b).abs() <= 1e-3);
        }
    }

    #[test]
    fn output_follows_channel_tables() {
        let spec = spec();
        let table = LevelTable::from_channels(
            &spec,
            vec![
                (0..8).map(|i| i as f64).collect(),
                (0..8).map(|i| -(i as f64)).collect(),
            ],
        )
        .unwrap();
        let codes = CodeSequence::new(3, vec![vec![1, 7], vec![2, 3]]).unwrap();
        let output = table.output(&codes).unwrap();
        assert_eq!(vec![vec![1.0, 7.0], vec![-2.0, -3.0]], output);
        assert_eq!(vec![-1.0, 4.0], table.summed_output(&codes).unwrap());
    }

    #[test]
    fn channel_levels_switch_model() {
        let spec = spec();
        let table = LevelTable::from_channels(&spec, vec![vec![0.25; 8]]).unwrap();
        let levels = ChannelLevels::new(spec, &table, 0).unwrap();
        assert_eq!(Ok(0.25), levels.level(0, LevelModel::Calibrated));
        assert_eq!(Ok(-1.0), levels.level(0, LevelModel::Ideal));
        assert!(levels.level(8, LevelModel::Ideal).is_err());
    }

    #[test]
    fn channel_levels_check_word_size() {
        let table = LevelTable::ideal(&QuantizerPreset::Generic4Bit.spec(), 1);
        assert!(ChannelLevels::new(spec(), &table, 0).is_err());
    }
}
