//! Code sequences, the output of every code generator.
use serde::{Deserialize, Serialize};

use crate::quantizer::check_word_size;
use crate::Error;

/// Unvalidated code sequence, as stored in files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSequenceParams {
    /// Word size of the codes
    pub bits: u32,
    /// Codes, one row per channel
    pub channels: Vec<Vec<u32>>,
}

/// Integer codes to apply to the DAC, one row per channel. All channels have the same length and
/// every code lies within `[0, 2^Nb - 1]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CodeSequenceParams", into = "CodeSequenceParams")]
pub struct CodeSequence {
    bits: u32,
    channels: Vec<Vec<u32>>,
}

impl TryFrom<CodeSequenceParams> for CodeSequence {
    type Error = Error;

    fn try_from(value: CodeSequenceParams) -> Result<Self, Self::Error> {
        Self::new(value.bits, value.channels)
    }
}

impl From<CodeSequence> for CodeSequenceParams {
    fn from(value: CodeSequence) -> Self {
        Self {
            bits: value.bits,
            channels: value.channels,
        }
    }
}

impl CodeSequence {
    /// Validate and wrap per-channel codes. The word size must be within `1..=24` bits.
    pub fn new(bits: u32, channels: Vec<Vec<u32>>) -> Result<Self, Error> {
        check_word_size(bits)?;
        if channels.is_empty() {
            return Err(Error::MissingChannel {
                channel: 0,
                channels: 0,
            });
        }
        let max = (1u32 << bits) - 1;
        let len = channels[0].len();
        for channel in &channels {
            if channel.len() != len {
                return Err(Error::LengthMismatch {
                    what: "code channel",
                    expected: len,
                    actual: channel.len(),
                });
            }
            if let Some(&code) = channel.iter().find(|&&c| c > max) {
                return Err(Error::OutOfRange {
                    code: code as i64,
                    max,
                });
            }
        }
        Ok(Self { bits, channels })
    }

    /// Single-channel code sequence.
    pub fn single(bits: u32, codes: Vec<u32>) -> Result<Self, Error> {
        Self::new(bits, vec![codes])
    }

    /// Word size of the codes
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Largest code allowed in this sequence
    pub fn max_code(&self) -> u32 {
        (1 << self.bits) - 1
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of samples per channel
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    /// Returns true when the sequence holds no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Codes of one channel
    pub fn channel(&self, channel: usize) -> Option<&[u32]> {
        self.channels.get(channel).map(Vec::as_slice)
    }

    /// Codes of all channels
    pub fn channels(&self) -> &[Vec<u32>] {
        &self.channels
    }

    /// Consume the sequence, returning the per-channel codes.
    pub fn into_channels(self) -> Vec<Vec<u32>> {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn validates_codes() {
        assert_eq!(
            Err(Error::OutOfRange { code: 16, max: 15 }),
            CodeSequence::single(4, vec![0, 16])
        );
        assert!(matches!(
            CodeSequence::new(4, vec![vec![0, 1], vec![0]]),
            Err(Error::LengthMismatch { .. })
        ));
    }

    #[test]
    fn rejects_unsupported_word_size() {
        assert!(matches!(
            CodeSequence::single(0, vec![0]),
            Err(Error::InvalidQuantizer(_))
        ));
        assert!(matches!(
            CodeSequence::single(64, vec![0]),
            Err(Error::InvalidQuantizer(_))
        ));
        assert!(CodeSequence::single(24, vec![(1 << 24) - 1]).is_ok());
    }

    #[rstest]
    #[case("bits = 4\nchannels = []")]
    #[case("bits = 4\nchannels = [[99]]")]
    #[case("bits = 4\nchannels = [[1, 2], [3]]")]
    #[case("bits = 40\nchannels = [[1]]")]
    fn deserialization_validates(#[case] document: &str) {
        assert!(toml::from_str::<CodeSequence>(document).is_err());
    }

    #[test]
    fn serializes_through_params() {
        let codes = CodeSequence::new(4, vec![vec![0, 15], vec![8, 7]]).unwrap();
        let written = toml::to_string(&codes).unwrap();
        assert_eq!(codes, toml::from_str(&written).unwrap());
    }

    #[test]
    fn exposes_channels() {
        let codes = CodeSequence::new(2, vec![vec![0, 3, 1], vec![2, 2, 2]]).unwrap();
        assert_eq!(2, codes.channel_count());
        assert_eq!(3, codes.len());
        assert_eq!(Some(&[2, 2, 2][..]), codes.channel(1));
        assert_eq!(None, codes.channel(2));
        assert_eq!(3, codes.max_code());
    }
}
