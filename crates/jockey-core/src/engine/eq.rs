//! Per-deck three band EQ (low shelf, mid peak, high shelf)

use serde::{Deserialize, Serialize};

use crate::types::{StereoSample, ONE_SCALE};

/// Largest boost a band accepts, in dB
pub const EQ_MAX_BOOST_DB: f64 = 6.0;
/// Deepest cut a band accepts, in dB
pub const EQ_MAX_CUT_DB: f64 = 70.0;

/// EQ frequency centers
const EQ_LO_FREQ: f32 = 100.0;
const EQ_MID_FREQ: f32 = 1000.0;
const EQ_HI_FREQ: f32 = 10000.0;
const EQ_MID_Q: f32 = 0.7;

/// Map a controller dial in [-one_scale, one_scale] to a band gain in dB
///
/// The curve is asymmetric: the positive half spans 0..+6 dB of boost and the
/// negative half 0..-70 dB of cut, both linear in the dial.
pub fn eq_dial_to_db(value: i32, one_scale: i32) -> f64 {
    let one_scale = one_scale.max(1);
    let value = value.clamp(-one_scale, one_scale) as f64;
    if value > 0.0 {
        EQ_MAX_BOOST_DB * value / one_scale as f64
    } else {
        EQ_MAX_CUT_DB * value / one_scale as f64
    }
}

/// [`eq_dial_to_db`] at the default [`ONE_SCALE`]
pub fn eq_dial_to_db_default(value: i32) -> f64 {
    eq_dial_to_db(value, ONE_SCALE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EqBand {
    Low,
    Mid,
    High,
}

impl EqBand {
    pub const ALL: [EqBand; 3] = [EqBand::Low, EqBand::Mid, EqBand::High];

    pub(crate) fn index(self) -> usize {
        match self {
            EqBand::Low => 0,
            EqBand::Mid => 1,
            EqBand::High => 2,
        }
    }
}

/// Biquad filter state for one band
#[derive(Debug, Clone, Default)]
struct BiquadState {
    x1_l: f32, x2_l: f32, y1_l: f32, y2_l: f32,
    x1_r: f32, x2_r: f32, y1_r: f32, y2_r: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: StereoSample, c: &BiquadCoeffs) -> StereoSample {
        let out_l = c.b0 * input.left + c.b1 * self.x1_l + c.b2 * self.x2_l
                  - c.a1 * self.y1_l - c.a2 * self.y2_l;
        self.x2_l = self.x1_l;
        self.x1_l = input.left;
        self.y2_l = self.y1_l;
        self.y1_l = out_l;

        let out_r = c.b0 * input.right + c.b1 * self.x1_r + c.b2 * self.x2_r
                  - c.a1 * self.y1_r - c.a2 * self.y2_r;
        self.x2_r = self.x1_r;
        self.x1_r = input.right;
        self.y2_r = self.y1_r;
        self.y1_r = out_r;

        StereoSample::new(out_l, out_r)
    }
}

/// Biquad coefficients (RBJ cookbook, normalised by a0)
#[derive(Debug, Clone, PartialEq)]
struct BiquadCoeffs {
    b0: f32, b1: f32, b2: f32,
    a1: f32, a2: f32,
}

impl BiquadCoeffs {
    fn low_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / 2.0 * ((a + 1.0 / a) * (1.0 / 0.9 - 1.0) + 2.0).sqrt();
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha;
        Self {
            b0: (a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha)) / a0,
            b1: (2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha)) / a0,
            a1: (-2.0 * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha) / a0,
        }
    }

    fn peaking(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }

    fn high_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / 2.0 * ((a + 1.0 / a) * (1.0 / 0.9 - 1.0) + 2.0).sqrt();
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha;
        Self {
            b0: (a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha)) / a0,
            b1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha)) / a0,
            a1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha) / a0,
        }
    }

    fn passthrough() -> Self {
        Self { b0: 1.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0 }
    }

    fn is_passthrough(&self) -> bool {
        *self == Self::passthrough()
    }
}

/// Three band EQ with gains in dB
///
/// Coefficients are recomputed only when a gain changes. Setting a gain is
/// real-time safe (no allocation).
#[derive(Debug, Clone)]
pub struct ThreeBandEq {
    sample_rate: f32,
    gains_db: [f64; 3],
    coeffs: [BiquadCoeffs; 3],
    states: [BiquadState; 3],
}

impl ThreeBandEq {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1) as f32,
            gains_db: [0.0; 3],
            coeffs: [
                BiquadCoeffs::passthrough(),
                BiquadCoeffs::passthrough(),
                BiquadCoeffs::passthrough(),
            ],
            states: Default::default(),
        }
    }

    /// Set a band gain, clamped to [-70, +6] dB
    pub fn set_gain_db(&mut self, band: EqBand, db: f64) {
        if !db.is_finite() {
            return;
        }
        let db = db.clamp(-EQ_MAX_CUT_DB, EQ_MAX_BOOST_DB);
        let index = band.index();
        self.gains_db[index] = db;

        let gain = db as f32;
        // Only filter when audibly different from flat
        self.coeffs[index] = if gain.abs() <= 0.1 {
            BiquadCoeffs::passthrough()
        } else {
            match band {
                EqBand::Low => BiquadCoeffs::low_shelf(EQ_LO_FREQ, gain, self.sample_rate),
                EqBand::Mid => BiquadCoeffs::peaking(EQ_MID_FREQ, gain, EQ_MID_Q, self.sample_rate),
                EqBand::High => BiquadCoeffs::high_shelf(EQ_HI_FREQ, gain, self.sample_rate),
            }
        };
    }

    pub fn gain_db(&self, band: EqBand) -> f64 {
        self.gains_db[band.index()]
    }

    pub fn is_flat(&self) -> bool {
        self.coeffs.iter().all(BiquadCoeffs::is_passthrough)
    }

    /// Filter a block in place
    pub fn process(&mut self, samples: &mut [StereoSample]) {
        if self.is_flat() {
            return;
        }
        for sample in samples.iter_mut() {
            let mut out = *sample;
            for (state, coeffs) in self.states.iter_mut().zip(self.coeffs.iter()) {
                out = state.process(out, coeffs);
            }
            *sample = out;
        }
    }

    pub fn reset(&mut self) {
        self.states = Default::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_remap_endpoints() {
        assert_eq!(eq_dial_to_db(1000, 1000), 6.0);
        assert_eq!(eq_dial_to_db(-1000, 1000), -70.0);
        assert_eq!(eq_dial_to_db(0, 1000), 0.0);
        assert_eq!(eq_dial_to_db(500, 1000), 3.0);
        assert_eq!(eq_dial_to_db(-500, 1000), -35.0);
        // Out-of-range dials clamp
        assert_eq!(eq_dial_to_db(5000, 1000), 6.0);
        assert_eq!(eq_dial_to_db_default(-2000), -70.0);
    }

    #[test]
    fn test_flat_eq_is_transparent() {
        let mut eq = ThreeBandEq::new(44100);
        let mut block = [StereoSample::new(0.25, -0.5); 16];
        eq.process(&mut block);
        assert!(block.iter().all(|s| *s == StereoSample::new(0.25, -0.5)));
    }

    #[test]
    fn test_gain_clamped() {
        let mut eq = ThreeBandEq::new(44100);
        eq.set_gain_db(EqBand::Low, 20.0);
        assert_eq!(eq.gain_db(EqBand::Low), 6.0);
        eq.set_gain_db(EqBand::High, -200.0);
        assert_eq!(eq.gain_db(EqBand::High), -70.0);
        assert!(!eq.is_flat());
    }

    #[test]
    fn test_low_cut_attenuates_dc() {
        let mut eq = ThreeBandEq::new(44100);
        eq.set_gain_db(EqBand::Low, -70.0);
        let mut block = vec![StereoSample::mono(1.0); 44100];
        eq.process(&mut block);
        // Settled DC response of a -70 dB low shelf is far below unity
        assert!(block[44099].left.abs() < 0.01);
    }
}
