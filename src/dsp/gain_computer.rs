//! Lookahead Peak Gain Computer
//!
//! # Perceptual Contract
//! - **Target Source**: One band's filtered sidechain, or the multiband sum
//!   for the master stage.
//! - **Intended Effect**: Produce a VCA gain trajectory that keeps
//!   `|sidechain| * gain` at or below the threshold for every sample, with the
//!   attenuation already in place when the lookahead-delayed audio arrives.
//! - **Failure Modes**:
//!   - Very short attack with a long lookahead on dense material sounds
//!     like distortion (the ramp becomes a step).
//!   - ALR with a negative knee behaves like a slow compressor, by intent of
//!     the user but easy to overdo.
//! - **Will Not Do**:
//!   - Apply makeup or boost (the caller owns output normalisation).
//!   - Look at more than one channel (linking is done on the gain curves).
//!
//! # Lifecycle
//! - **Init**: `init()` sizes the gain buffer for the largest lookahead at the
//!   largest internal rate. Must run off the audio thread.
//! - **Configure**: `configure()` / `set_lookahead()` from the settings pass.
//! - **Active**: `process()` turns a sidechain block into VCA gains in place.
//!
//! The output gain for position `i` belongs to the audio sample that arrived
//! `lookahead` samples before sidechain sample `i`; the audio path delays by the
//! same amount.

use std::collections::TryReserveError;

use crate::dsp::utils::{
    db_to_lin, lin_to_db, millis_to_samples, time_constant_coeff, GAIN_FLOOR,
};
use crate::settings::{
    CurveFamily, EnvelopeShape, LimiterMode, LimiterSettings, LOOKAHEAD_MAX_MS, OVERSAMPLING_MAX,
    RELEASE_MAX_MS,
};

/// Width of the ALR soft knee in dB.
/// Increasing: regulation starts earlier and feels softer.
/// Decreasing: regulation snaps in right at `threshold * knee`.
const ALR_KNEE_WIDTH_DB: f32 = 6.0;

/// Steepness of the exponential curve family.
/// Increasing: attack front-loads more of the reduction.
/// Decreasing: converges to the linear family.
const EXP_CURVE_K: f32 = 5.0;

/// Normalised ramp from 0 to 1, monotonic in `t` for every family.
#[inline]
fn curve(family: CurveFamily, t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    match family {
        CurveFamily::Hermite => t * t * (3.0 - 2.0 * t),
        CurveFamily::Exponential => {
            (1.0 - (-EXP_CURVE_K * t).exp()) / (1.0 - (-EXP_CURVE_K).exp())
        }
        CurveFamily::Linear => t,
    }
}

pub struct GainComputer {
    sample_rate: f32,
    mode: LimiterMode,
    threshold: f32,
    knee: f32,
    attack_ms: f32,
    release_ms: f32,
    alr: bool,
    alr_attack_ms: f32,
    alr_release_ms: f32,

    lookahead: usize,
    max_lookahead: usize,
    max_release: usize,
    max_block: usize,
    attack: usize,
    release: usize,

    alr_env: f32,
    alr_atk_coeff: f32,
    alr_rel_coeff: f32,

    /// Pending gains, index 0 is the next sample to leave.
    gain_buf: Vec<f32>,
    /// Everything in `gain_buf` from here on is unity.
    pending: usize,
}

impl Default for GainComputer {
    fn default() -> Self {
        Self::new()
    }
}

impl GainComputer {
    pub fn new() -> Self {
        let defaults = LimiterSettings::default();
        Self {
            sample_rate: 0.0,
            mode: defaults.mode,
            threshold: defaults.threshold,
            knee: defaults.knee,
            attack_ms: defaults.attack_ms,
            release_ms: defaults.release_ms,
            alr: defaults.alr,
            alr_attack_ms: defaults.alr_attack_ms,
            alr_release_ms: defaults.alr_release_ms,
            lookahead: 0,
            max_lookahead: 0,
            max_release: 0,
            max_block: 0,
            attack: 0,
            release: 0,
            alr_env: 0.0,
            alr_atk_coeff: 0.0,
            alr_rel_coeff: 0.0,
            gain_buf: Vec::new(),
            pending: 0,
        }
    }

    /// Allocate for `max_sample_rate` (internal rate, oversampling included)
    /// and blocks of up to `max_block` samples.
    pub fn init(&mut self, max_sample_rate: f32, max_block: usize) -> Result<(), TryReserveError> {
        // Headroom for lookaheads quantised at the base rate and then scaled
        self.max_lookahead = millis_to_samples(max_sample_rate, LOOKAHEAD_MAX_MS) + OVERSAMPLING_MAX;
        self.max_release = millis_to_samples(max_sample_rate, RELEASE_MAX_MS);
        self.max_block = max_block.max(1);

        // Attack is clamped to the lookahead, so it shares that bound
        let len = 2 * self.max_lookahead + self.max_block + self.max_release + 1;
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)?;
        buf.resize(len, 1.0);
        self.gain_buf = buf;
        self.pending = 0;
        self.sample_rate = max_sample_rate;
        self.update_timing();
        Ok(())
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.update_timing();
    }

    pub fn configure(&mut self, settings: &LimiterSettings) {
        self.mode = settings.mode;
        self.threshold = settings.threshold.max(GAIN_FLOOR);
        self.knee = settings.knee.max(GAIN_FLOOR);
        self.attack_ms = settings.attack_ms;
        self.release_ms = settings.release_ms;
        if settings.alr != self.alr {
            self.alr_env = 0.0;
        }
        self.alr = settings.alr;
        self.alr_attack_ms = settings.alr_attack_ms;
        self.alr_release_ms = settings.alr_release_ms;
        self.update_timing();
    }

    /// Lookahead in internal-rate samples, clamped to the allocated maximum.
    pub fn set_lookahead(&mut self, samples: usize) {
        self.lookahead = samples.min(self.max_lookahead);
        self.update_timing();
    }

    pub fn lookahead(&self) -> usize {
        self.lookahead
    }

    fn update_timing(&mut self) {
        let sr = self.sample_rate.max(1.0);
        self.attack = millis_to_samples(sr, self.attack_ms).min(self.lookahead);
        self.release = millis_to_samples(sr, self.release_ms).min(self.max_release);
        self.alr_atk_coeff = time_constant_coeff(self.alr_attack_ms, sr);
        self.alr_rel_coeff = time_constant_coeff(self.alr_release_ms, sr);
    }

    pub fn reset(&mut self) {
        self.gain_buf.fill(1.0);
        self.pending = 0;
        self.alr_env = 0.0;
    }

    /// Replace the sidechain in `buf` by the matching VCA gains.
    pub fn process(&mut self, buf: &mut [f32]) {
        if self.gain_buf.is_empty() {
            buf.fill(1.0);
            return;
        }
        for chunk in buf.chunks_mut(self.max_block) {
            self.process_chunk(chunk);
        }
    }

    fn process_chunk(&mut self, buf: &mut [f32]) {
        let n = buf.len();
        let la = self.lookahead;
        // Reductions carved under a longer lookahead or attack still have to drain
        let span = (la + n + self.attack + self.release + 1)
            .max(self.pending)
            .min(self.gain_buf.len());

        for (i, &x) in buf.iter().enumerate() {
            let env = x.abs();
            let base = if self.alr { self.alr_gain(env) } else { 1.0 };

            let pos = la + i;
            let g = self.gain_buf[pos].min(base);
            self.gain_buf[pos] = g;

            if env * g > self.threshold {
                let target = (self.threshold / env).max(GAIN_FLOOR);
                self.apply_patch(pos, target);
            }
        }

        buf.copy_from_slice(&self.gain_buf[..n]);
        self.gain_buf.copy_within(n..span, 0);
        self.gain_buf[span - n..span].fill(1.0);
        self.pending = span - n;
    }

    fn alr_gain(&mut self, env: f32) -> f32 {
        let coeff = if env > self.alr_env {
            self.alr_atk_coeff
        } else {
            self.alr_rel_coeff
        };
        self.alr_env = coeff * self.alr_env + (1.0 - coeff) * env;

        let over_db = lin_to_db(self.alr_env) - lin_to_db(self.threshold * self.knee);
        let half = ALR_KNEE_WIDTH_DB * 0.5;
        let reduction_db = if over_db <= -half {
            return 1.0;
        } else if over_db >= half {
            over_db
        } else {
            let x = over_db + half;
            (x * x) / (2.0 * ALR_KNEE_WIDTH_DB)
        };
        db_to_lin(-reduction_db).max(GAIN_FLOOR)
    }

    /// Carve a reduction envelope reaching `target` at `pos` into the buffer.
    fn apply_patch(&mut self, pos: usize, target: f32) {
        let a = self.attack;
        let r = self.release;
        let (ramp_len, hold_end, rel_len) = match self.mode.shape() {
            EnvelopeShape::Thin => (a, pos, r),
            EnvelopeShape::Wide => (a - a / 2, pos + a / 2, r),
            EnvelopeShape::Tail => (a, pos + a / 2, r),
            EnvelopeShape::Duck => (a - a / 2, pos, r + a),
        };
        let ramp_start = pos - a;
        let family = self.mode.family();
        let depth = 1.0 - target;

        for k in 0..ramp_len {
            let t = (k + 1) as f32 / ramp_len as f32;
            let v = 1.0 - depth * curve(family, t);
            let g = &mut self.gain_buf[ramp_start + k];
            *g = g.min(v);
        }

        for g in self.gain_buf[ramp_start + ramp_len..=hold_end].iter_mut() {
            *g = g.min(target);
        }

        for k in 0..rel_len {
            let t = (k + 1) as f32 / rel_len as f32;
            let v = 1.0 - depth * curve(family, 1.0 - t);
            let g = &mut self.gain_buf[hold_end + 1 + k];
            *g = g.min(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const SR: f32 = 48_000.0;

    fn computer(mode: LimiterMode, threshold: f32) -> GainComputer {
        let mut gc = GainComputer::new();
        gc.init(SR, 512).unwrap();
        gc.configure(&LimiterSettings {
            mode,
            threshold,
            ..LimiterSettings::default()
        });
        gc.set_lookahead(millis_to_samples(SR, 5.0));
        gc
    }

    fn run(gc: &mut GainComputer, sc: &[f32], block: usize) -> Vec<f32> {
        let mut out = sc.to_vec();
        for chunk in out.chunks_mut(block) {
            gc.process(chunk);
        }
        out
    }

    #[test]
    fn test_curves_are_monotonic_and_anchored() {
        for family in [CurveFamily::Hermite, CurveFamily::Exponential, CurveFamily::Linear] {
            assert!(curve(family, 0.0).abs() < 1e-6);
            assert!((curve(family, 1.0) - 1.0).abs() < 1e-6);
            let mut prev = 0.0;
            for i in 1..=100 {
                let v = curve(family, i as f32 / 100.0);
                assert!(v >= prev);
                prev = v;
            }
        }
    }

    #[test]
    fn test_silence_gives_unity() {
        let mut gc = computer(LimiterMode::HermThin, 0.5);
        let out = run(&mut gc, &vec![0.0; 2000], 256);
        assert!(out.iter().all(|&g| g == 1.0));
    }

    #[test]
    fn test_peaks_never_pass_threshold() {
        let mut rng = StdRng::seed_from_u64(7);
        let sc: Vec<f32> = (0..6000).map(|_| rng.gen_range(-2.0f32..2.0)).collect();
        for mode in LimiterMode::ALL {
            let mut gc = computer(mode, 0.5);
            let la = gc.lookahead();
            let gains = run(&mut gc, &sc, 333);
            for i in 0..sc.len() - la {
                let g = gains[i + la];
                assert!(g > 0.0 && g <= 1.0, "{:?}: gain {} out of range", mode, g);
                assert!(
                    sc[i].abs() * g <= 0.5 * (1.0 + 1e-5),
                    "{:?}: sample {} passes threshold",
                    mode,
                    i
                );
            }
        }
    }

    #[test]
    fn test_single_peak_envelope_shape() {
        for mode in LimiterMode::ALL {
            let mut gc = computer(mode, 1.0);
            let la = gc.lookahead();
            let mut sc = vec![0.0f32; 4000];
            sc[1000] = 2.0;
            let gains = run(&mut gc, &sc, 512);
            let peak = 1000 + la;

            assert!((gains[peak] - 0.5).abs() < 1e-6, "{:?}", mode);
            // Monotonic attack and release around the peak
            for i in 1..=peak {
                assert!(gains[i] <= gains[i - 1] + 1e-7, "{:?}: attack rises at {}", mode, i);
            }
            for i in peak + 1..gains.len() {
                assert!(gains[i] >= gains[i - 1] - 1e-7, "{:?}: release falls at {}", mode, i);
            }
            // Attack never starts before the lookahead window
            assert_eq!(gains[peak - la - 1], 1.0);
            assert_eq!(*gains.last().unwrap(), 1.0);
        }
    }

    #[test]
    fn test_alr_holds_reduction_between_peaks() {
        let mut gc = computer(LimiterMode::HermThin, 0.5);
        gc.configure(&LimiterSettings {
            threshold: 0.5,
            alr: true,
            alr_attack_ms: 1.0,
            alr_release_ms: 500.0,
            ..LimiterSettings::default()
        });
        let sc: Vec<f32> = (0..24_000)
            .map(|i| (2.0 * std::f32::consts::PI * 100.0 * i as f32 / SR).sin())
            .collect();
        let gains = run(&mut gc, &sc, 480);
        // Near zero crossings late in the signal the gain stays reduced
        let tail = &gains[20_000..];
        assert!(tail.iter().all(|&g| g < 0.9));
        assert!(tail.iter().all(|&g| g > 0.0));
    }

    #[test]
    fn test_reset_clears_pending_reduction() {
        let mut gc = computer(LimiterMode::LineWide, 0.25);
        let mut sc = vec![1.0f32; 256];
        gc.process(&mut sc);
        gc.reset();
        let out = run(&mut gc, &vec![0.0; 1024], 256);
        assert!(out.iter().all(|&g| g == 1.0));
    }

    #[test]
    fn test_shrinking_lookahead_drains_pending_reduction() {
        let mut gc = computer(LimiterMode::HermThin, 0.5);
        let la = gc.lookahead();
        let mut loud = vec![1.0f32; 512];
        gc.process(&mut loud);

        gc.set_lookahead(5);
        let _ = run(&mut gc, &vec![0.0; 100 * 512], 512);

        gc.set_lookahead(la);
        let out = run(&mut gc, &vec![0.0; 4 * 512], 512);
        let min = out.iter().fold(1.0f32, |a, &g| a.min(g));
        assert_eq!(min, 1.0);
    }
}
