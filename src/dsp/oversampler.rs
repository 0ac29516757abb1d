//! Oversampler
//!
//! # Perceptual Contract
//! - **Target Source**: One channel's input (and, without filtering, its
//!   external sidechain).
//! - **Intended Effect**: Run the limiters at a multiple of the host rate so
//!   the fast gain changes do not fold distortion back into the audible band.
//! - **Failure Modes**:
//!   - `Half` modes decimate without a lowpass: content the limiters create
//!     above the host Nyquist aliases back.
//!   - The 2-lobe kernel droops slightly near the top octave.
//! - **Will Not Do**:
//!   - Resample by non-integer ratios.
//!
//! # Lifecycle
//! - **Configure**: `set_sample_rate()` + `set_mode()`; both are allocation free.
//! - **Active**: `upsample()` before band splitting, `downsample()` after the
//!   master stage.
//! - **Latency**: `lobes` base-rate samples whenever the ratio exceeds one.

use crate::dsp::biquad::Biquad;
use crate::settings::{OversamplingMode, OVERSAMPLING_MAX};

/// Widest Lanczos kernel in taps per phase (3 lobes each side).
const MAX_TAPS: usize = 6;

/// Anti-alias lowpass: 8th-order Butterworth as four biquads.
const AA_Q: [f32; 4] = [0.509_795_6, 0.601_344_9, 0.899_976_2, 2.562_915_5];

/// Anti-alias corner as a fraction of the base sample rate.
/// Increasing: flatter top octave, more residual alias.
/// Decreasing: darker output.
const AA_CORNER: f32 = 0.45;

#[inline]
fn lanczos(x: f32, lobes: f32) -> f32 {
    if x.abs() < 1e-6 {
        return 1.0;
    }
    if x.abs() >= lobes || (x - x.round()).abs() < 1e-6 {
        return 0.0;
    }
    let px = std::f32::consts::PI * x;
    lobes * px.sin() * (px / lobes).sin() / (px * px)
}

pub struct Oversampler {
    mode: OversamplingMode,
    ratio: usize,
    lobes: usize,
    filtering: bool,
    sample_rate: f32,
    kernel: [[f32; MAX_TAPS]; OVERSAMPLING_MAX],
    /// `history[j]` is the input sample `j` steps in the past.
    history: [f32; MAX_TAPS],
    anti_alias: [Biquad; 4],
}

impl Default for Oversampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Oversampler {
    pub fn new() -> Self {
        let mut os = Self {
            mode: OversamplingMode::None,
            ratio: 1,
            lobes: 0,
            filtering: false,
            sample_rate: 48_000.0,
            kernel: [[0.0; MAX_TAPS]; OVERSAMPLING_MAX],
            history: [0.0; MAX_TAPS],
            anti_alias: [Biquad::new(); 4],
        };
        os.update_settings();
        os
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        if self.sample_rate != sample_rate {
            self.sample_rate = sample_rate;
            self.update_settings();
        }
    }

    /// Mode change; the caller decides whether the sidechain copy filters.
    pub fn set_mode(&mut self, mode: OversamplingMode, allow_filtering: bool) {
        let filtering = allow_filtering && mode.filtering();
        if self.mode != mode || self.filtering != filtering {
            self.mode = mode;
            self.filtering = filtering;
            self.update_settings();
            self.reset();
        }
    }

    pub fn ratio(&self) -> usize {
        self.ratio
    }

    /// Intrinsic delay in base-rate samples.
    pub fn latency(&self) -> usize {
        if self.ratio > 1 {
            self.lobes
        } else {
            0
        }
    }

    fn update_settings(&mut self) {
        self.ratio = self.mode.ratio();
        self.lobes = self.mode.lobes();

        let taps = 2 * self.lobes;
        let a = self.lobes as f32;
        for (p, phase) in self.kernel.iter_mut().enumerate().take(self.ratio) {
            phase.fill(0.0);
            let frac = p as f32 / self.ratio as f32;
            for (j, c) in phase.iter_mut().enumerate().take(taps) {
                *c = lanczos(j as f32 - a + frac, a);
            }
        }

        let inner_rate = self.sample_rate * self.ratio as f32;
        for (stage, q) in self.anti_alias.iter_mut().zip(AA_Q) {
            stage.update_lpf(self.sample_rate * AA_CORNER, q, inner_rate);
        }
    }

    pub fn reset(&mut self) {
        self.history = [0.0; MAX_TAPS];
        for stage in self.anti_alias.iter_mut() {
            stage.reset();
        }
    }

    /// `dst.len()` must be `src.len() * ratio`.
    pub fn upsample(&mut self, dst: &mut [f32], src: &[f32]) {
        if self.ratio == 1 {
            dst[..src.len()].copy_from_slice(src);
            return;
        }
        let taps = 2 * self.lobes;
        for (frame, &x) in dst.chunks_exact_mut(self.ratio).zip(src) {
            self.history.copy_within(0..taps - 1, 1);
            self.history[0] = x;
            for (y, phase) in frame.iter_mut().zip(self.kernel.iter()) {
                *y = phase[..taps]
                    .iter()
                    .zip(self.history[..taps].iter())
                    .map(|(c, h)| c * h)
                    .sum();
            }
        }
    }

    /// `src.len()` must be `dst.len() * ratio`.
    pub fn downsample(&mut self, dst: &mut [f32], src: &[f32]) {
        if self.ratio == 1 {
            dst.copy_from_slice(&src[..dst.len()]);
            return;
        }
        for (y, frame) in dst.iter_mut().zip(src.chunks_exact(self.ratio)) {
            if self.filtering {
                let mut first = 0.0;
                for (p, &x) in frame.iter().enumerate() {
                    let mut v = x;
                    for stage in self.anti_alias.iter_mut() {
                        v = stage.process(v);
                    }
                    if p == 0 {
                        first = v;
                    }
                }
                *y = first;
            } else {
                *y = frame[0];
            }
        }
    }
}
