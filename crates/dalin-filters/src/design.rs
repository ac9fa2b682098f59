//! Design of the plant (reconstruction) filters and noise-shaping loop filters.
//!
//! All transfer functions here are discrete-time, with coefficient arrays in descending powers of
//! `z` (equivalently, ascending powers of `z⁻¹` for equal-length arrays).
use std::f64::consts::PI;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::{FilterError, StateSpace};

/// Discrete transfer function `B(z) / A(z)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferFunction {
    /// Numerator coefficients
    pub b: Vec<f64>,
    /// Denominator coefficients
    pub a: Vec<f64>,
}

impl TransferFunction {
    /// Create a new transfer function
    pub fn new(b: impl Into<Vec<f64>>, a: impl Into<Vec<f64>>) -> Self {
        Self {
            b: b.into(),
            a: a.into(),
        }
    }

    /// Realize this transfer function in controllable canonical form.
    pub fn to_state_space(&self) -> Result<StateSpace<f64>, FilterError> {
        StateSpace::from_transfer_function(&self.b, &self.a)
    }
}

fn poly(roots: &[Complex64]) -> Vec<Complex64> {
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for &r in roots {
        let mut next = coeffs.clone();
        next.push(Complex64::new(0.0, 0.0));
        for i in 1..next.len() {
            next[i] -= r * coeffs[i - 1];
        }
        coeffs = next;
    }
    coeffs
}

/// Digital Butterworth lowpass filter designed through the bilinear transform.
///
/// # Arguments
///
/// * `order`: Filter order, at least 1
/// * `cutoff`: Normalized cutoff frequency, where 1 is the Nyquist frequency
///
/// returns: Result<TransferFunction, FilterError>
#[profiling::function]
pub fn butterworth_lowpass(order: usize, cutoff: f64) -> Result<TransferFunction, FilterError> {
    if order == 0 {
        return Err(FilterError::InvalidTransferFunction(
            "Butterworth order must be at least 1".to_string(),
        ));
    }
    if !(cutoff > 0.0 && cutoff < 1.0) {
        return Err(FilterError::InvalidTransferFunction(format!(
            "normalized cutoff must be within (0, 1), got {cutoff}"
        )));
    }

    // Bilinear transform with fs = 2, prewarped
    let fs2 = 4.0;
    let warped = fs2 * (PI * cutoff / 2.0).tan();
    let n = order as f64;
    let analog_poles: Vec<Complex64> = (0..order)
        .map(|k| {
            let m = 2.0 * k as f64 - n + 1.0;
            -Complex64::from_polar(1.0, PI * m / (2.0 * n)) * warped
        })
        .collect();
    let gain = warped.powi(order as i32);

    let poles: Vec<Complex64> = analog_poles
        .iter()
        .map(|&p| (fs2 + p) / (fs2 - p))
        .collect();
    let denom: Complex64 = analog_poles.iter().map(|&p| fs2 - p).product();
    let gain = gain * (1.0 / denom).re;

    let zeros = vec![Complex64::new(-1.0, 0.0); order];
    let b = poly(&zeros).into_iter().map(|c| gain * c.re).collect();
    let a = poly(&poles).into_iter().map(|c| c.re).collect();
    Ok(TransferFunction { b, a })
}

/// Third-order reconstruction filters fitted to measured DAC outputs, indexed by sampling rate.
///
/// The filters fitted at 65 MHz and above have poles slightly outside of the unit circle. They are
/// only ever evaluated over a finite prediction horizon, and cannot be balanced.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ReconstructionFilter {
    #[serde(rename = "fs-1m")]
    Fs1M,
    #[serde(rename = "fs-25m")]
    Fs25M,
    #[serde(rename = "fs-250m")]
    Fs250M,
    #[serde(rename = "fs-1.02m")]
    Fs1_02M,
    #[serde(rename = "fs-16.37m")]
    Fs16_37M,
    #[serde(rename = "fs-32.74m")]
    Fs32_74M,
    #[serde(rename = "fs-65.47m")]
    Fs65_47M,
    #[serde(rename = "fs-130.94m")]
    Fs130_94M,
    #[serde(rename = "fs-261.88m")]
    Fs261_88M,
    #[serde(rename = "fs-209.72m")]
    Fs209_72M,
}

impl ReconstructionFilter {
    /// All reconstruction filters
    pub const ALL: [Self; 10] = [
        Self::Fs1M,
        Self::Fs25M,
        Self::Fs250M,
        Self::Fs1_02M,
        Self::Fs16_37M,
        Self::Fs32_74M,
        Self::Fs65_47M,
        Self::Fs130_94M,
        Self::Fs261_88M,
        Self::Fs209_72M,
    ];

    /// Sampling rate in Hz this filter was fitted for
    pub fn sample_rate(self) -> f64 {
        match self {
            Self::Fs1M => 1e6,
            Self::Fs25M => 25e6,
            Self::Fs250M => 250e6,
            Self::Fs1_02M => 1_022_976.0,
            Self::Fs16_37M => 16_367_616.0,
            Self::Fs32_74M => 32_735_232.0,
            Self::Fs65_47M => 65_470_464.0,
            Self::Fs130_94M => 130_940_928.0,
            Self::Fs261_88M => 261_881_856.0,
            Self::Fs209_72M => 209_715_200.0,
        }
    }

    /// Look up the filter fitted for a sampling rate, within 1 Hz.
    pub fn from_sample_rate(sample_rate: f64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| (f.sample_rate() - sample_rate).abs() < 1.0)
    }

    /// Transfer function of the filter
    pub fn transfer_function(self) -> TransferFunction {
        let (b, a): ([f64; 4], [f64; 4]) = match self {
            Self::Fs1M => (
                [1.0, -0.749062760083214, 0.353567447503785, -0.050452041460215],
                [1.0, -1.760042814801001, 1.182897276395584, -0.278062036214375],
            ),
            Self::Fs25M => (
                [1.0, -1.990229008894999, 1.323868332535894, -0.267430343168738],
                [1.0, -2.955289705643260, 2.911906871095763, -0.956567417062835],
            ),
            Self::Fs250M => (
                [1.0, -2.470675393484270, 2.043773794471696, -0.561431085692549],
                [1.0, -3.060784192584217, 3.120349920951655, -1.059572867383303],
            ),
            Self::Fs1_02M => (
                [1.0, -0.771083876166916, 0.362729852857121, -0.052704512877984],
                [1.0, -1.787286425183212, 1.210436647081342, -0.286499423621113],
            ),
            Self::Fs16_37M => (
                [1.0, -1.864068128668581, 1.217419475964637, -0.264801035128820],
                [1.0, -2.922882099215159, 2.848783841143716, -0.925783393814905],
            ),
            Self::Fs32_74M => (
                [1.0, -2.357352708532972, 1.872697932999750, -0.493866883597173],
                [1.0, -2.961378308694018, 2.923464166872809, -0.962072077069174],
            ),
            Self::Fs65_47M => (
                [1.0, -2.452079101922663, 2.012594245568572, -0.546936407329641],
                [1.0, -2.991353980486378, 2.982661760283041, -0.991306520914544],
            ),
            Self::Fs130_94M => (
                [1.0, -2.421037749701214, 1.964403625777694, -0.528090479775633],
                [1.0, -3.063446439199524, 3.125081334761360, -1.061647191680632],
            ),
            Self::Fs261_88M => (
                [1.0, -2.461113819828369, 2.025309446029859, -0.550808973990026],
                [1.0, -3.065904839601346, 3.130535515512198, -1.064637825987226],
            ),
            Self::Fs209_72M => (
                [1.0, -2.459972414709681, 2.018602635755858, -0.546295559927195],
                [1.0, -3.053527636182428, 3.106090383754101, -1.052566995464895],
            ),
        };
        TransferFunction::new(b, a)
    }
}

/// Noise transfer function of a first-order shaper, `1 - z⁻¹`.
pub fn first_order_ntf() -> TransferFunction {
    TransferFunction::new([1.0, -1.0], [1.0, 0.0])
}

/// Noise transfer function of a second-order shaper, `(1 - z⁻¹)²`.
pub fn second_order_ntf() -> TransferFunction {
    TransferFunction::new([1.0, -2.0, 1.0], [1.0, 0.0, 0.0])
}

/// Loop filter `M = 1 - NTF` realizing a noise transfer function in an error-feedback quantizer.
///
/// Coefficients are read in ascending powers of `z⁻¹`; the shorter array is padded with trailing
/// zeros. The noise transfer function must be monic (`b[0] == a[0]`) so that the loop filter has no
/// direct feedthrough.
pub fn loop_filter(ntf: &TransferFunction) -> Result<TransferFunction, FilterError> {
    let a0 = ntf.a.first().copied().unwrap_or(0.0);
    let b0 = ntf.b.first().copied().unwrap_or(0.0);
    if a0 == 0.0 {
        return Err(FilterError::InvalidTransferFunction(
            "noise transfer function denominator must start with a non-zero coefficient"
                .to_string(),
        ));
    }
    if (b0 - a0).abs() > 1e-12 * a0.abs() {
        return Err(FilterError::InvalidTransferFunction(format!(
            "noise transfer function must be monic, got b[0] = {b0}, a[0] = {a0}"
        )));
    }
    let len = ntf.a.len().max(ntf.b.len());
    let at = |v: &[f64], i: usize| v.get(i).copied().unwrap_or(0.0);
    let a: Vec<f64> = (0..len).map(|i| at(&ntf.a, i) / a0).collect();
    let b: Vec<f64> = (0..len)
        .map(|i| {
            if i == 0 {
                0.0
            } else {
                (at(&ntf.a, i) - at(&ntf.b, i)) / a0
            }
        })
        .collect();
    Ok(TransferFunction { b, a })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn assert_close(expected: &[f64], actual: &[f64], tol: f64) {
        assert_eq!(expected.len(), actual.len());
        for (e, a) in expected.iter().zip(actual) {
            assert!((e - a).abs() < tol, "expected {expected:?}, got {actual:?}");
        }
    }

    #[test]
    fn butterworth_half_band() {
        let tf = butterworth_lowpass(2, 0.5).unwrap();
        assert_close(&[0.29289322, 0.58578644, 0.29289322], &tf.b, 1e-8);
        assert_close(&[1.0, 0.0, 0.17157288], &tf.a, 1e-8);
    }

    #[test]
    fn butterworth_first_order() {
        let tf = butterworth_lowpass(1, 0.5).unwrap();
        assert_close(&[0.5, 0.5], &tf.b, 1e-12);
        assert_close(&[1.0, 0.0], &tf.a, 1e-12);
    }

    #[rstest]
    fn butterworth_has_unit_dc_gain(
        #[values(1, 2, 3, 4, 6)] order: usize,
        #[values(0.05, 0.2, 0.7)] cutoff: f64,
    ) {
        let tf = butterworth_lowpass(order, cutoff).unwrap();
        let dc = tf.b.iter().sum::<f64>() / tf.a.iter().sum::<f64>();
        assert!((dc - 1.0).abs() < 1e-9);
        assert!(tf.to_state_space().unwrap().check_stable().is_ok());
    }

    #[rstest]
    #[case(0, 0.5)]
    #[case(2, 0.0)]
    #[case(2, 1.0)]
    fn butterworth_rejects_invalid(#[case] order: usize, #[case] cutoff: f64) {
        assert!(butterworth_lowpass(order, cutoff).is_err());
    }

    #[test]
    fn reconstruction_filters_lookup() {
        for filter in ReconstructionFilter::ALL {
            let ss = filter.transfer_function().to_state_space().unwrap();
            assert_eq!(3, ss.order());
            assert_eq!(1.0, ss.d);
            assert_eq!(
                Some(filter),
                ReconstructionFilter::from_sample_rate(filter.sample_rate())
            );
        }
        assert_eq!(None, ReconstructionFilter::from_sample_rate(48e3));
    }

    #[test]
    fn reconstruction_filter_sample_rates() {
        let rates: Vec<_> = ReconstructionFilter::ALL
            .iter()
            .map(|f| f.sample_rate().to_string())
            .collect();
        insta::assert_snapshot!(rates.join(", "), @"1000000, 25000000, 250000000, 1022976, 16367616, 32735232, 65470464, 130940928, 261881856, 209715200");
    }

    #[rstest]
    #[case(ReconstructionFilter::Fs1M, true)]
    #[case(ReconstructionFilter::Fs1_02M, true)]
    #[case(ReconstructionFilter::Fs25M, true)]
    #[case(ReconstructionFilter::Fs32_74M, true)]
    #[case(ReconstructionFilter::Fs65_47M, false)]
    #[case(ReconstructionFilter::Fs250M, false)]
    fn reconstruction_filter_stability(#[case] filter: ReconstructionFilter, #[case] stable: bool) {
        let ss = filter.transfer_function().to_state_space().unwrap();
        assert_eq!(stable, ss.check_stable().is_ok());
    }

    #[test]
    fn second_order_loop_filter() {
        let m = loop_filter(&second_order_ntf()).unwrap();
        assert_eq!(vec![0.0, 2.0, -1.0], m.b);
        assert_eq!(vec![1.0, 0.0, 0.0], m.a);
    }

    #[test]
    fn first_order_loop_filter_is_a_delay() {
        let m = loop_filter(&first_order_ntf()).unwrap();
        let ss = m.to_state_space().unwrap();
        assert_eq!(vec![0.0, 1.0, 0.0], ss.impulse_response(3));
    }

    #[test]
    fn loop_filter_requires_monic_ntf() {
        let result = loop_filter(&TransferFunction::new([2.0, -1.0], [1.0, 0.0]));
        assert!(matches!(
            result,
            Err(FilterError::InvalidTransferFunction(_))
        ));
    }
}
