//! Quantizer description and the mapping between DAC codes and ideal output values.
//!
//! # Example
//!
//! ```rust
//! use dalin_core::quantizer::{CodeType, QuantizerSpec};
//!
//! let spec = QuantizerSpec::configure(4, -1.0, 1.0, CodeType::MidTread).unwrap();
//! assert_eq!(spec.quantize(0.0), 8);
//! assert_eq!(spec.ideal_levels().len(), 16);
//! ```
use serde::{Deserialize, Serialize};

use crate::Error;

/// Largest supported word size. Level tables hold `2^bits` entries per channel.
pub const MAX_BITS: u32 = 24;

/// Placement of the zero input with respect to the quantization grid.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodeType {
    /// Zero input sits on a level.
    #[default]
    MidTread,
    /// Zero input sits on a transition between two levels.
    MidRise,
}

pub(crate) fn check_word_size(bits: u32) -> Result<(), Error> {
    if bits == 0 || bits > MAX_BITS {
        return Err(Error::InvalidQuantizer(format!(
            "word size must be within 1..={MAX_BITS} bits, got {bits}"
        )));
    }
    Ok(())
}

/// Unvalidated quantizer parameters, as they appear in configuration files.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QuantizerParams {
    /// Word size in bits
    pub bits: u32,
    /// Lowest output value
    pub vmin: f64,
    /// Highest output value
    pub vmax: f64,
    /// Zero placement
    #[serde(default)]
    pub code_type: CodeType,
}

/// Validated description of an `Nb`-bit quantizer spanning `[vmin, vmax]`.
///
/// Codes go from `0` to `2^Nb - 1`; the step size is `(vmax - vmin) / (2^Nb - 1)`.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "QuantizerParams", into = "QuantizerParams")]
pub struct QuantizerSpec {
    bits: u32,
    vmin: f64,
    vmax: f64,
    code_type: CodeType,
    qstep: f64,
}

impl TryFrom<QuantizerParams> for QuantizerSpec {
    type Error = Error;

    fn try_from(value: QuantizerParams) -> Result<Self, Self::Error> {
        Self::configure(value.bits, value.vmin, value.vmax, value.code_type)
    }
}

impl From<QuantizerSpec> for QuantizerParams {
    fn from(value: QuantizerSpec) -> Self {
        Self {
            bits: value.bits,
            vmin: value.vmin,
            vmax: value.vmax,
            code_type: value.code_type,
        }
    }
}

impl QuantizerSpec {
    /// Create a new quantizer description.
    ///
    /// # Arguments
    ///
    /// * `bits`: Word size, within `1..=24`
    /// * `vmin`: Lowest output value
    /// * `vmax`: Highest output value, strictly above `vmin`
    /// * `code_type`: Zero placement
    ///
    /// returns: Result<QuantizerSpec, Error>
    pub fn configure(bits: u32, vmin: f64, vmax: f64, code_type: CodeType) -> Result<Self, Error> {
        check_word_size(bits)?;
        if !vmin.is_finite() || !vmax.is_finite() {
            return Err(Error::InvalidQuantizer(format!(
                "range bounds must be finite, got [{vmin}, {vmax}]"
            )));
        }
        if vmax <= vmin {
            return Err(Error::InvalidQuantizer(format!(
                "empty range [{vmin}, {vmax}]"
            )));
        }
        Ok(Self::from_parts(bits, vmin, vmax, code_type))
    }

    fn from_parts(bits: u32, vmin: f64, vmax: f64, code_type: CodeType) -> Self {
        let max = ((1u64 << bits) - 1) as f64;
        Self {
            bits,
            vmin,
            vmax,
            code_type,
            qstep: (vmax - vmin) / max,
        }
    }

    /// Word size in bits
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Lowest output value
    pub fn vmin(&self) -> f64 {
        self.vmin
    }

    /// Highest output value
    pub fn vmax(&self) -> f64 {
        self.vmax
    }

    /// Zero placement
    pub fn code_type(&self) -> CodeType {
        self.code_type
    }

    /// Step size between two consecutive ideal levels (1 LSB).
    pub fn qstep(&self) -> f64 {
        self.qstep
    }

    /// Full output range, `vmax - vmin`.
    pub fn range(&self) -> f64 {
        self.vmax - self.vmin
    }

    /// Largest valid code, `2^Nb - 1`.
    pub fn max_code(&self) -> u32 {
        ((1u64 << self.bits) - 1) as u32
    }

    /// Number of codes (and levels per channel), `2^Nb`.
    pub fn level_count(&self) -> usize {
        1usize << self.bits
    }

    fn code_offset(&self) -> f64 {
        (self.vmin / self.qstep).floor()
    }

    /// Quantize a value into a code of this quantizer, without clamping. The returned code may
    /// lie outside of `[0, max_code]` when the input is out of range.
    pub fn quantize(&self, x: f64) -> i64 {
        let offset = self.code_offset();
        let q = match self.code_type {
            CodeType::MidTread => (x / self.qstep + 0.5).floor(),
            CodeType::MidRise => (x / self.qstep).floor(),
        };
        (q - offset) as i64
    }

    /// Clamp an unbounded code into `[0, max_code]`. The second tuple member is `true` when the
    /// code had to be clamped.
    pub fn clamp_code(&self, code: i64) -> (u32, bool) {
        let max = self.max_code();
        if code < 0 {
            (0, true)
        } else if code > max as i64 {
            (max, true)
        } else {
            (code as u32, false)
        }
    }

    /// Quantize and clamp, returning whether the input saturated the quantizer.
    pub fn quantize_clamped(&self, x: f64) -> (u32, bool) {
        self.clamp_code(self.quantize(x))
    }

    /// Ideal value on the quantization grid for the given code.
    pub fn code_value(&self, code: u32) -> f64 {
        let q = code as f64 + self.code_offset();
        match self.code_type {
            CodeType::MidTread => q * self.qstep,
            CodeType::MidRise => (q + 0.5) * self.qstep,
        }
    }

    /// Express a value in code units, such that [`Self::quantize`] is the rounding of this value.
    pub fn to_code_domain(&self, x: f64) -> f64 {
        let q = x / self.qstep - self.code_offset();
        match self.code_type {
            CodeType::MidTread => q,
            CodeType::MidRise => q - 0.5,
        }
    }

    /// Inverse of [`Self::to_code_domain`].
    pub fn from_code_domain(&self, v: f64) -> f64 {
        match self.code_type {
            CodeType::MidTread => (v + self.code_offset()) * self.qstep,
            CodeType::MidRise => (v + 0.5 + self.code_offset()) * self.qstep,
        }
    }

    /// Ideal (linearly spaced) levels from `vmin` to `vmax`, one per code.
    pub fn ideal_levels(&self) -> Vec<f64> {
        let max = self.max_code();
        (0..=max)
            .map(|i| {
                if i == max {
                    self.vmax
                } else {
                    self.vmin + i as f64 * self.qstep
                }
            })
            .collect()
    }

    /// Ideal level of a single code.
    pub fn ideal_level(&self, code: u32) -> Result<f64, Error> {
        self.check_code(code as i64)?;
        Ok(if code == self.max_code() {
            self.vmax
        } else {
            self.vmin + code as f64 * self.qstep
        })
    }

    /// Returns an error if the code is not within `[0, max_code]`.
    pub fn check_code(&self, code: i64) -> Result<(), Error> {
        if (0..=self.max_code() as i64).contains(&code) {
            Ok(())
        } else {
            Err(Error::OutOfRange {
                code,
                max: self.max_code(),
            })
        }
    }

    /// Direct (memoryless) quantization of a whole signal, clamped into the valid code range.
    pub fn direct_codes(&self, x: &[f64]) -> Vec<u32> {
        x.iter().map(|&x| self.quantize_clamped(x).0).collect()
    }
}

/// Quantizers of the DAC setups the tool has been calibrated against.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[allow(missing_docs)]
pub enum QuantizerPreset {
    Generic4Bit,
    Generic6Bit,
    Generic12Bit,
    Generic16Bit,
    NiCard16Bit,
    Spice16Bit,
    Arti6Bit,
    ArtiZtc6Bit,
    Arti10Bit,
    ArtiZtc10Bit,
    Arti16Bit,
    Arti16Bit6t,
    Spice6Bit2Ch,
    Spice10Bit2Ch,
    Spice16Bit2Ch,
}

impl QuantizerPreset {
    /// All presets, in declaration order.
    pub const ALL: [Self; 15] = [
        Self::Generic4Bit,
        Self::Generic6Bit,
        Self::Generic12Bit,
        Self::Generic16Bit,
        Self::NiCard16Bit,
        Self::Spice16Bit,
        Self::Arti6Bit,
        Self::ArtiZtc6Bit,
        Self::Arti10Bit,
        Self::ArtiZtc10Bit,
        Self::Arti16Bit,
        Self::Arti16Bit6t,
        Self::Spice6Bit2Ch,
        Self::Spice10Bit2Ch,
        Self::Spice16Bit2Ch,
    ];

    /// Quantizer description of this preset. All presets are mid-tread.
    pub fn spec(self) -> QuantizerSpec {
        let (bits, vmin, vmax) = match self {
            Self::Generic4Bit => (4, -1.0, 1.0),
            Self::Generic6Bit => (6, -1.0, 1.0),
            Self::Generic12Bit => (12, -5.0, 5.0),
            Self::Generic16Bit => (16, -1.0, 1.0),
            Self::NiCard16Bit => (16, -10.0, 10.0),
            Self::Spice16Bit => (16, -8.0, 8.0),
            Self::Arti6Bit => (6, -0.019294419, 0.019317969),
            Self::ArtiZtc6Bit => (6, -0.01990203, 0.019906069024198073),
            Self::Arti10Bit => (10, -0.018117286, 0.018076990),
            Self::ArtiZtc10Bit => (10, -0.019769005, 0.019769606441919794),
            Self::Arti16Bit => (16, -0.022337035, 0.022341269),
            Self::Arti16Bit6t => (16, -0.02060208, 0.020602487),
            Self::Spice6Bit2Ch => (6, -8.00371104e-05, 7.99005702e-05),
            Self::Spice10Bit2Ch => (10, -0.00528967841, 0.00528972540),
            Self::Spice16Bit2Ch => (16, -0.08022664, 0.08024051),
        };
        QuantizerSpec::from_parts(bits, vmin, vmax, CodeType::MidTread)
    }
}

impl From<QuantizerPreset> for QuantizerSpec {
    fn from(value: QuantizerPreset) -> Self {
        value.spec()
    }
}
