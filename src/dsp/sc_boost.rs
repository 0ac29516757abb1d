//! Sidechain envelope boost.
//!
//! Tilts the sidechain upward with frequency before band splitting, so the
//! limiters react more to treble than to bass for the same level. Pink rises
//! at +3 dB/oct (alternating zero/pole pairs half an octave apart), brown at
//! +6 dB/oct (one first-order shelf); both start at 10 Hz. `BT` variants are
//! bilinear transforms, `MT` variants place poles and zeros by matched-z.

use crate::dsp::biquad::Biquad;
use crate::dsp::utils::db_to_lin;
use crate::settings::EnvelopeBoost;

const BOOST_FREQ_MIN: f64 = 10.0;
const BOOST_FREQ_MAX: f64 = 20_000.0;
/// One zero per octave from 10 Hz covers the audible range.
const PINK_SECTIONS: usize = 11;
const PINK_DC_DB: f32 = -18.0;
const BROWN_DC_DB: f32 = -36.0;

pub struct SidechainBoost {
    mode: EnvelopeBoost,
    sample_rate: f32,
    sections: [Biquad; PINK_SECTIONS],
    count: usize,
    gain: f32,
}

impl Default for SidechainBoost {
    fn default() -> Self {
        Self::new()
    }
}

impl SidechainBoost {
    pub fn new() -> Self {
        Self {
            mode: EnvelopeBoost::Off,
            sample_rate: 0.0,
            sections: [Biquad::new(); PINK_SECTIONS],
            count: 0,
            gain: 1.0,
        }
    }

    pub fn configure(&mut self, mode: EnvelopeBoost, sample_rate: f32) {
        if self.mode == mode && self.sample_rate == sample_rate {
            return;
        }
        self.mode = mode;
        self.sample_rate = sample_rate;

        let sr = sample_rate as f64;
        let top = BOOST_FREQ_MAX.min(0.45 * sr);
        let (matched, pink) = match mode {
            EnvelopeBoost::Off => {
                self.count = 0;
                self.gain = 1.0;
                return;
            }
            EnvelopeBoost::PinkBt => (false, true),
            EnvelopeBoost::PinkMt => (true, true),
            EnvelopeBoost::BrownBt => (false, false),
            EnvelopeBoost::BrownMt => (true, false),
        };

        self.count = 0;
        if pink {
            for k in 0..PINK_SECTIONS {
                let fz = BOOST_FREQ_MIN * 2.0f64.powi(k as i32);
                let fp = fz * std::f64::consts::SQRT_2;
                if fp >= top {
                    break;
                }
                Self::design(&mut self.sections[k], fz, fp, sr, matched);
                self.count += 1;
            }
            self.gain = db_to_lin(PINK_DC_DB);
        } else {
            Self::design(&mut self.sections[0], BOOST_FREQ_MIN, top, sr, matched);
            self.count = 1;
            self.gain = db_to_lin(BROWN_DC_DB);
        }
        for s in self.sections[..self.count].iter_mut() {
            s.reset();
        }
    }

    /// First-order shelf `(s + wz) / (s + wp)`, normalised to unity at DC.
    fn design(section: &mut Biquad, fz: f64, fp: f64, sr: f64, matched: bool) {
        if matched {
            let zz = (-2.0 * std::f64::consts::PI * fz / sr).exp();
            let zp = (-2.0 * std::f64::consts::PI * fp / sr).exp();
            let k = (1.0 - zp) / (1.0 - zz);
            section.set_first_order(k, -k * zz, -zp);
        } else {
            let kk = 2.0 * sr;
            let wz = kk * (std::f64::consts::PI * fz / sr).tan();
            let wp = kk * (std::f64::consts::PI * fp / sr).tan();
            let norm = wp / wz / (kk + wp);
            section.set_first_order((kk + wz) * norm, (wz - kk) * norm, (wp - kk) / (kk + wp));
        }
    }

    pub fn process(&mut self, buf: &mut [f32]) {
        if self.count == 0 {
            return;
        }
        for x in buf.iter_mut() {
            let mut v = *x;
            for s in self.sections[..self.count].iter_mut() {
                v = s.process(v);
            }
            *x = v * self.gain;
        }
    }

    pub fn magnitude(&self, freq: f32) -> f32 {
        self.sections[..self.count]
            .iter()
            .fold(self.gain, |acc, s| acc * s.magnitude(freq, self.sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::utils::lin_to_db;

    #[test]
    fn test_off_is_transparent() {
        let mut b = SidechainBoost::new();
        b.configure(EnvelopeBoost::Off, 48_000.0);
        let mut buf = [0.3f32, -0.7];
        b.process(&mut buf);
        assert_eq!(buf, [0.3, -0.7]);
    }

    #[test]
    fn test_slopes() {
        for (mode, per_octave) in [
            (EnvelopeBoost::PinkBt, 3.0),
            (EnvelopeBoost::PinkMt, 3.0),
            (EnvelopeBoost::BrownBt, 6.0),
            (EnvelopeBoost::BrownMt, 6.0),
        ] {
            let mut b = SidechainBoost::new();
            b.configure(mode, 48_000.0);
            let rise = lin_to_db(b.magnitude(1600.0)) - lin_to_db(b.magnitude(200.0));
            assert!(
                (rise - 3.0 * per_octave).abs() < 1.5,
                "{:?}: {} dB over three octaves",
                mode,
                rise
            );
            let dc = lin_to_db(b.magnitude(0.5));
            let expected = if per_octave == 3.0 { PINK_DC_DB } else { BROWN_DC_DB };
            assert!((dc - expected).abs() < 0.5, "{:?}: dc {}", mode, dc);
        }
    }
}
