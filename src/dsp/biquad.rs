//! Biquad Filter Implementation (IIR 2nd Order)
//!
//! Second-order recursive section used by the classic crossover, the
//! sidechain band filters, the oversampler's anti-alias stage and the
//! sidechain envelope boost.
//!
//! # Design Notes
//! - Coefficients and state are kept in f64: crossover corners go down to
//!   10 Hz while the internal rate goes up to 8x the host rate, which puts
//!   the poles very close to the unit circle.
//! - Coefficient updates never touch the delay state. Call `reset()` for that.
//! - All operations are safe for the audio thread (no allocations)

use std::f64::consts::PI;

/// Q of a 2nd-order Butterworth section.
pub const BUTTERWORTH_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Biquad filter implementation (IIR 2nd order, transposed direct form II).
///
/// `a*` are the feed-forward and `b*` the feedback coefficients.
#[derive(Debug, Clone, Copy)]
pub struct Biquad {
    a0: f64,
    a1: f64,
    a2: f64,
    b1: f64,
    b2: f64,
    z1: f64,
    z2: f64,
}

impl Default for Biquad {
    fn default() -> Self {
        Self::new()
    }
}

impl Biquad {
    /// Identity section.
    pub fn new() -> Self {
        Self {
            a0: 1.0,
            a1: 0.0,
            a2: 0.0,
            b1: 0.0,
            b2: 0.0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Process a single sample
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let x = input as f64;
        let out = x * self.a0 + self.z1;

        // Anti-denormal: tiny DC offset
        self.z1 = x * self.a1 + self.z2 - self.b1 * out + 1e-25;
        self.z2 = x * self.a2 - self.b2 * out + 1e-25;

        out as f32
    }

    pub fn process_block(&mut self, buf: &mut [f32]) {
        for x in buf.iter_mut() {
            *x = self.process(*x);
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    pub fn set_identity(&mut self) {
        self.a0 = 1.0;
        self.a1 = 0.0;
        self.a2 = 0.0;
        self.b1 = 0.0;
        self.b2 = 0.0;
    }

    /// First-order section `(a0 + a1 z^-1) / (1 + b1 z^-1)`.
    pub fn set_first_order(&mut self, a0: f64, a1: f64, b1: f64) {
        self.a0 = a0;
        self.a1 = a1;
        self.a2 = 0.0;
        self.b1 = b1;
        self.b2 = 0.0;
    }

    /// Linear magnitude response at `freq`.
    pub fn magnitude(&self, freq: f32, sr: f32) -> f32 {
        let w = 2.0 * PI * (freq as f64) / (sr as f64);
        let (s1, c1) = w.sin_cos();
        let (s2, c2) = (2.0 * w).sin_cos();

        let num_re = self.a0 + self.a1 * c1 + self.a2 * c2;
        let num_im = -(self.a1 * s1 + self.a2 * s2);
        let den_re = 1.0 + self.b1 * c1 + self.b2 * c2;
        let den_im = -(self.b1 * s1 + self.b2 * s2);

        let num = (num_re * num_re + num_im * num_im).sqrt();
        let den = (den_re * den_re + den_im * den_im).sqrt().max(1e-30);
        (num / den) as f32
    }

    // ---------------------------------------------------------------------
    // Filter design helpers (RBJ-style)
    // ---------------------------------------------------------------------

    fn rbj(cutoff: f32, q: f32, sr: f32) -> (f64, f64) {
        let nyq = sr as f64 * 0.5;
        let fc = (cutoff as f64).clamp(1.0, nyq * 0.999);
        let w0 = 2.0 * PI * fc / sr as f64;
        let alpha = w0.sin() / (2.0 * (q as f64).max(1e-6));
        (w0.cos(), alpha)
    }

    fn set_normalized(&mut self, b: [f64; 3], a: [f64; 3]) {
        let inv_a0 = 1.0 / a[0];
        self.a0 = b[0] * inv_a0;
        self.a1 = b[1] * inv_a0;
        self.a2 = b[2] * inv_a0;
        self.b1 = a[1] * inv_a0;
        self.b2 = a[2] * inv_a0;
    }

    pub fn update_hpf(&mut self, cutoff: f32, q: f32, sr: f32) {
        let (cw0, alpha) = Self::rbj(cutoff, q, sr);
        self.set_normalized(
            [(1.0 + cw0) * 0.5, -(1.0 + cw0), (1.0 + cw0) * 0.5],
            [1.0 + alpha, -2.0 * cw0, 1.0 - alpha],
        );
    }

    pub fn update_lpf(&mut self, cutoff: f32, q: f32, sr: f32) {
        let (cw0, alpha) = Self::rbj(cutoff, q, sr);
        self.set_normalized(
            [(1.0 - cw0) * 0.5, 1.0 - cw0, (1.0 - cw0) * 0.5],
            [1.0 + alpha, -2.0 * cw0, 1.0 - alpha],
        );
    }

    pub fn update_allpass(&mut self, cutoff: f32, q: f32, sr: f32) {
        let (cw0, alpha) = Self::rbj(cutoff, q, sr);
        self.set_normalized(
            [1.0 - alpha, -2.0 * cw0, 1.0 + alpha],
            [1.0 + alpha, -2.0 * cw0, 1.0 - alpha],
        );
    }
}

/// Role of a Linkwitz-Riley section inside a crossover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LrKind {
    /// Pass-through.
    None,
    Lowpass,
    Highpass,
    /// Phase match for the LR4 pair at the same corner.
    Allpass,
}

/// 4th-order Linkwitz-Riley filter: two cascaded Butterworth sections.
///
/// The lowpass and highpass at one corner sum to the 2nd-order allpass at the
/// same corner, which is what lets the classic crossover rebuild the input.
#[derive(Debug, Clone, Copy)]
pub struct LrFilter {
    kind: LrKind,
    freq: f32,
    sample_rate: f32,
    stages: [Biquad; 2],
}

impl Default for LrFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl LrFilter {
    pub fn new() -> Self {
        Self {
            kind: LrKind::None,
            freq: 0.0,
            sample_rate: 0.0,
            stages: [Biquad::new(); 2],
        }
    }

    pub fn kind(&self) -> LrKind {
        self.kind
    }

    /// Reconfigure; filter state survives so a moving corner does not click.
    pub fn update(&mut self, kind: LrKind, freq: f32, sr: f32) {
        self.kind = kind;
        self.freq = freq;
        self.sample_rate = sr;
        match kind {
            LrKind::None => {
                self.stages[0].set_identity();
                self.stages[1].set_identity();
            }
            LrKind::Lowpass => {
                self.stages[0].update_lpf(freq, BUTTERWORTH_Q, sr);
                self.stages[1].update_lpf(freq, BUTTERWORTH_Q, sr);
            }
            LrKind::Highpass => {
                self.stages[0].update_hpf(freq, BUTTERWORTH_Q, sr);
                self.stages[1].update_hpf(freq, BUTTERWORTH_Q, sr);
            }
            LrKind::Allpass => {
                self.stages[0].update_allpass(freq, BUTTERWORTH_Q, sr);
                self.stages[1].set_identity();
            }
        }
    }

    pub fn reset(&mut self) {
        self.stages[0].reset();
        self.stages[1].reset();
    }

    pub fn process_in_place(&mut self, buf: &mut [f32]) {
        match self.kind {
            LrKind::None => {}
            LrKind::Allpass => self.stages[0].process_block(buf),
            _ => {
                for x in buf.iter_mut() {
                    let y = self.stages[0].process(*x);
                    *x = self.stages[1].process(y);
                }
            }
        }
    }

    pub fn process(&mut self, dst: &mut [f32], src: &[f32]) {
        dst.copy_from_slice(src);
        self.process_in_place(dst);
    }

    pub fn magnitude(&self, freq: f32) -> f32 {
        match self.kind {
            LrKind::None | LrKind::Allpass => 1.0,
            _ => {
                self.stages[0].magnitude(freq, self.sample_rate)
                    * self.stages[1].magnitude(freq, self.sample_rate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lpf_hpf_corner_gain() {
        let sr = 48_000.0;
        let mut lp = Biquad::new();
        lp.update_lpf(1000.0, BUTTERWORTH_Q, sr);
        let mut hp = Biquad::new();
        hp.update_hpf(1000.0, BUTTERWORTH_Q, sr);

        assert!((lp.magnitude(10.0, sr) - 1.0).abs() < 1e-3);
        assert!((hp.magnitude(20_000.0, sr) - 1.0).abs() < 0.05);
        // Butterworth corner sits at -3 dB
        assert!((lp.magnitude(1000.0, sr) - BUTTERWORTH_Q).abs() < 1e-3);
        assert!(hp.magnitude(10.0, sr) < 1e-3);
    }

    #[test]
    fn test_allpass_is_flat() {
        let sr = 48_000.0;
        let mut ap = Biquad::new();
        ap.update_allpass(700.0, BUTTERWORTH_Q, sr);
        for f in [20.0, 700.0, 5000.0, 20_000.0] {
            assert!((ap.magnitude(f, sr) - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_lr4_pair_sums_to_allpass() {
        let sr = 48_000.0;
        let fc = 1000.0;
        let mut lp = LrFilter::new();
        let mut hp = LrFilter::new();
        let mut ap = LrFilter::new();
        lp.update(LrKind::Lowpass, fc, sr);
        hp.update(LrKind::Highpass, fc, sr);
        ap.update(LrKind::Allpass, fc, sr);

        // LR4 corner sits at -6 dB on both sides
        assert!((lp.magnitude(fc) - 0.5).abs() < 1e-3);
        assert!((hp.magnitude(fc) - 0.5).abs() < 1e-3);

        let mut impulse = vec![0.0f32; 2048];
        impulse[0] = 1.0;
        let mut low = vec![0.0f32; 2048];
        let mut high = vec![0.0f32; 2048];
        let mut all = vec![0.0f32; 2048];
        lp.process(&mut low, &impulse);
        hp.process(&mut high, &impulse);
        ap.process(&mut all, &impulse);

        for i in 0..impulse.len() {
            assert!((low[i] + high[i] - all[i]).abs() < 1e-4, "mismatch at {}", i);
        }
    }

    #[test]
    fn test_first_order_section() {
        let mut bq = Biquad::new();
        bq.set_first_order(0.5, 0.5, 0.0);
        assert!((bq.magnitude(0.0, 48_000.0) - 1.0).abs() < 1e-6);
        assert_eq!(bq.process(1.0), 0.5);
    }
}
