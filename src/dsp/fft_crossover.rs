//! Linear-Phase FFT Crossover
//!
//! # Perceptual Contract
//! - **Target Source**: One channel (audio path or sidechain) at the internal
//!   rate.
//! - **Intended Effect**: Split into up to eight bands with zero phase
//!   distortion in the passband; each band is a real, zero-phase magnitude
//!   mask (optional highpass at its lower edge, optional lowpass at its upper
//!   edge) so adjacent bands sum back to unity.
//! - **Failure Modes**:
//!   - Pre-ringing ahead of transients near steep corners.
//!   - Very low corners at very high internal rates run into the frame
//!     resolution; the rank grows with the rate to compensate.
//! - **Will Not Do**:
//!   - Apply gain. Bands are recombined by the caller.
//!
//! # Framing
//! Frames of `M = N/2` samples are Hann-windowed (50% overlap, sums to one),
//! zero-padded to the FFT size `N`, masked, and overlap-added. The zero-phase
//! kernel spreads each frame by up to `M/2` samples in both directions, which
//! the padding absorbs. A sample is complete once every frame that can reach
//! it has been processed, giving a latency of `3M/2 - 1` samples.

use std::collections::TryReserveError;
use std::sync::Arc;

use ringbuf::{Consumer, Producer, RingBuffer};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::dsp::try_filled;
use crate::dsp::utils::int_log2;
use crate::settings::{BANDS_MAX, FFT_XOVER_FREQ_MIN, FFT_XOVER_RANK_MIN};

/// Corner slope in dB/octave.
/// Increasing: narrower overlap between neighbouring bands.
/// Decreasing: longer kernels are needed less, but bands bleed more.
pub const XOVER_SLOPE_DB: f64 = 96.0;

/// FFT rank for an internal sample rate: one extra rank per doubling above
/// the reference rate keeps the absolute bin spacing.
pub fn select_rank(sample_rate: usize) -> usize {
    let k = (sample_rate + FFT_XOVER_FREQ_MIN / 2) / FFT_XOVER_FREQ_MIN;
    FFT_XOVER_RANK_MIN + int_log2(k)
}

#[inline]
fn lowpass_mask(freq: f64, corner: f64) -> f64 {
    let order = XOVER_SLOPE_DB / (20.0 * 2.0f64.log10());
    1.0 / (1.0 + (freq / corner).powf(order))
}

struct XoverBand {
    enabled: bool,
    hpf: Option<f32>,
    lpf: Option<f32>,
    dirty: bool,
    /// Mask for bins `0..=N/2`.
    mask: Vec<f32>,
    /// Overlap-add accumulator indexed by absolute time modulo `N`.
    accum: Vec<f32>,
}

impl XoverBand {
    fn new(max_size: usize) -> Result<Self, TryReserveError> {
        Ok(Self {
            enabled: false,
            hpf: None,
            lpf: None,
            dirty: true,
            mask: try_filled(max_size / 2 + 1, 0.0)?,
            accum: try_filled(max_size, 0.0)?,
        })
    }

    fn response(&self, freq: f32) -> f32 {
        let f = freq as f64;
        let mut g = 1.0;
        if let Some(hp) = self.hpf {
            g *= 1.0 - lowpass_mask(f, hp as f64);
        }
        if let Some(lp) = self.lpf {
            g *= lowpass_mask(f, lp as f64);
        }
        g as f32
    }
}

pub struct FftCrossover {
    /// Forward/inverse plans, index `rank - FFT_XOVER_RANK_MIN`.
    plans: Vec<(Arc<dyn Fft<f32>>, Arc<dyn Fft<f32>>)>,
    rank: usize,
    fft_size: usize,
    frame_len: usize,
    hop: usize,
    sample_rate: f32,

    window: Vec<f32>,
    frame: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    work: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,

    input_producer: Producer<f32>,
    input_consumer: Consumer<f32>,

    bands: Vec<XoverBand>,
    /// Current time modulo `fft_size`.
    clock: usize,
}

impl FftCrossover {
    /// Plans every rank up to `max_rank`; the active rank starts at the minimum.
    pub fn new(max_rank: usize) -> Result<Self, TryReserveError> {
        let max_rank = max_rank.max(FFT_XOVER_RANK_MIN);
        let max_size = 1usize << max_rank;

        let mut planner = FftPlanner::<f32>::new();
        let mut plans = Vec::new();
        plans.try_reserve_exact(max_rank - FFT_XOVER_RANK_MIN + 1)?;
        let mut scratch_len = 0;
        for rank in FFT_XOVER_RANK_MIN..=max_rank {
            let fft = planner.plan_fft_forward(1 << rank);
            let ifft = planner.plan_fft_inverse(1 << rank);
            scratch_len = scratch_len
                .max(fft.get_inplace_scratch_len())
                .max(ifft.get_inplace_scratch_len());
            plans.push((fft, ifft));
        }

        let mut bands = Vec::new();
        bands.try_reserve_exact(BANDS_MAX)?;
        for _ in 0..BANDS_MAX {
            bands.push(XoverBand::new(max_size)?);
        }

        let (input_producer, input_consumer) = RingBuffer::<f32>::new(max_size).split();

        let mut xover = Self {
            plans,
            rank: FFT_XOVER_RANK_MIN,
            fft_size: 0,
            frame_len: 0,
            hop: 0,
            sample_rate: 0.0,
            window: try_filled(max_size / 2, 0.0)?,
            frame: try_filled(max_size / 2, 0.0)?,
            spectrum: try_filled(max_size, Complex::new(0.0, 0.0))?,
            work: try_filled(max_size, Complex::new(0.0, 0.0))?,
            scratch: try_filled(scratch_len, Complex::new(0.0, 0.0))?,
            input_producer,
            input_consumer,
            bands,
            clock: 0,
        };
        xover.set_rank(FFT_XOVER_RANK_MIN);
        Ok(xover)
    }

    pub fn max_rank(&self) -> usize {
        FFT_XOVER_RANK_MIN + self.plans.len() - 1
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Switch the frame size. Clears all streaming state.
    pub fn set_rank(&mut self, rank: usize) {
        let rank = rank.clamp(FFT_XOVER_RANK_MIN, self.max_rank());
        self.rank = rank;
        self.fft_size = 1 << rank;
        self.frame_len = self.fft_size / 2;
        self.hop = self.frame_len / 2;

        // Periodic Hann: shifted copies at half-frame spacing sum to one
        let m = self.frame_len as f32;
        for (i, w) in self.window[..self.frame_len].iter_mut().enumerate() {
            *w = 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / m).cos();
        }
        for band in self.bands.iter_mut() {
            band.dirty = true;
        }
        self.clear();
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        if self.sample_rate != sample_rate {
            self.sample_rate = sample_rate;
            for band in self.bands.iter_mut() {
                band.dirty = true;
            }
        }
    }

    pub fn enable_band(&mut self, band: usize, enabled: bool) {
        let b = &mut self.bands[band];
        if b.enabled != enabled {
            b.enabled = enabled;
            b.accum.fill(0.0);
        }
    }

    pub fn set_hpf(&mut self, band: usize, corner: Option<f32>) {
        let b = &mut self.bands[band];
        if b.hpf != corner {
            b.hpf = corner;
            b.dirty = true;
        }
    }

    pub fn set_lpf(&mut self, band: usize, corner: Option<f32>) {
        let b = &mut self.bands[band];
        if b.lpf != corner {
            b.lpf = corner;
            b.dirty = true;
        }
    }

    /// Samples between an input sample and its band outputs.
    pub fn latency(&self) -> usize {
        3 * self.frame_len / 2 - 1
    }

    /// Magnitude of `band`'s mask at `freq`.
    pub fn band_response(&self, band: usize, freq: f32) -> f32 {
        self.bands[band].response(freq)
    }

    pub fn clear(&mut self) {
        let pending = self.input_consumer.len();
        self.input_consumer.discard(pending);
        for band in self.bands.iter_mut() {
            band.accum.fill(0.0);
        }
        self.clock = 0;
    }

    /// Split `input` into `outputs[band]` for every band; disabled bands get
    /// silence. Every output slice must be at least `input.len()` long.
    pub fn process(&mut self, input: &[f32], outputs: &mut [&mut [f32]]) {
        let n = self.fft_size;
        let latency = self.latency();

        for (i, &x) in input.iter().enumerate() {
            let _ = self.input_producer.push(x);
            if self.input_consumer.len() >= self.frame_len {
                self.process_frame();
                self.input_consumer.discard(self.hop);
            }

            let slot = (self.clock + n - latency) % n;
            for (band, out) in self.bands.iter_mut().zip(outputs.iter_mut()) {
                if band.enabled {
                    out[i] = band.accum[slot];
                    band.accum[slot] = 0.0;
                } else {
                    out[i] = 0.0;
                }
            }
            self.clock = (self.clock + 1) % n;
        }
    }

    fn refresh_mask(band: &mut XoverBand, fft_size: usize, sample_rate: f32) {
        let bin_hz = sample_rate / fft_size as f32;
        for k in 0..=fft_size / 2 {
            band.mask[k] = band.response(k as f32 * bin_hz);
        }
        band.dirty = false;
    }

    fn process_frame(&mut self) {
        let n = self.fft_size;
        let m = self.frame_len;
        let half = n / 2;
        let (fft, ifft) = {
            let (f, i) = &self.plans[self.rank - FFT_XOVER_RANK_MIN];
            (Arc::clone(f), Arc::clone(i))
        };

        for (dst, src) in self.frame[..m].iter_mut().zip(self.input_consumer.iter()) {
            *dst = *src;
        }
        for q in 0..n {
            self.spectrum[q] = if q < m {
                Complex::new(self.frame[q] * self.window[q], 0.0)
            } else {
                Complex::new(0.0, 0.0)
            };
        }
        fft.process_with_scratch(&mut self.spectrum[..n], &mut self.scratch);

        let norm = 1.0 / n as f32;
        // Buffer position q maps to time offset q (or q - N past 3M/2)
        // relative to the frame start, which lies M - 1 samples before now.
        let start = self.clock as isize - (m as isize - 1);
        let wrap = 3 * m / 2;

        for band in self.bands.iter_mut() {
            if !band.enabled {
                continue;
            }
            if band.dirty {
                Self::refresh_mask(band, n, self.sample_rate);
            }

            for k in 0..=half {
                self.work[k] = self.spectrum[k] * band.mask[k];
            }
            self.work[0].im = 0.0;
            self.work[half].im = 0.0;
            for k in 1..half {
                self.work[n - k] = self.work[k].conj();
            }
            ifft.process_with_scratch(&mut self.work[..n], &mut self.scratch);

            for q in 0..n {
                let offset = if q < wrap { q as isize } else { q as isize - n as isize };
                let slot = (start + offset).rem_euclid(n as isize) as usize;
                band.accum[slot] += self.work[q].re * norm;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48_000.0;

    fn run(xover: &mut FftCrossover, input: &[f32]) -> Vec<Vec<f32>> {
        let mut outs = vec![vec![0.0f32; input.len()]; BANDS_MAX];
        for (start, chunk) in input.chunks(1000).enumerate().map(|(i, c)| (i * 1000, c)) {
            let mut views: Vec<&mut [f32]> = outs
                .iter_mut()
                .map(|o| &mut o[start..start + chunk.len()])
                .collect();
            xover.process(chunk, &mut views);
        }
        outs
    }

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / SR).sin())
            .collect()
    }

    #[test]
    fn test_rank_selection() {
        assert_eq!(select_rank(44_100), 12);
        assert_eq!(select_rank(48_000), 12);
        assert_eq!(select_rank(96_000), 13);
        assert_eq!(select_rank(192_000), 14);
        assert_eq!(select_rank(384_000), 15);
    }

    #[test]
    fn test_single_band_is_pure_delay() {
        let mut xover = FftCrossover::new(12).unwrap();
        xover.set_sample_rate(SR);
        xover.enable_band(0, true);
        let input = sine(440.0, 16_000);
        let outs = run(&mut xover, &input);
        let la = xover.latency();
        assert_eq!(la, 3071);
        for i in 2 * 2048 + la..input.len() {
            assert!((outs[0][i] - input[i - la]).abs() < 1e-3, "sample {}", i);
        }
        assert!(outs[1].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_bands_sum_to_delayed_input() {
        let mut xover = FftCrossover::new(12).unwrap();
        xover.set_sample_rate(SR);
        for b in 0..3 {
            xover.enable_band(b, true);
        }
        xover.set_lpf(0, Some(200.0));
        xover.set_hpf(1, Some(200.0));
        xover.set_lpf(1, Some(2000.0));
        xover.set_hpf(2, Some(2000.0));

        let input: Vec<f32> = sine(90.0, 20_000)
            .iter()
            .zip(sine(1000.0, 20_000))
            .zip(sine(7000.0, 20_000))
            .map(|((a, b), c)| (a + b + c) / 3.0)
            .collect();
        let outs = run(&mut xover, &input);
        let la = xover.latency();
        for i in 3 * 2048 + la..input.len() {
            let sum = outs[0][i] + outs[1][i] + outs[2][i];
            assert!((sum - input[i - la]).abs() < 1e-3, "sample {}", i);
        }
    }

    #[test]
    fn test_band_isolation() {
        let mut xover = FftCrossover::new(12).unwrap();
        xover.set_sample_rate(SR);
        xover.enable_band(0, true);
        xover.enable_band(1, true);
        xover.set_lpf(0, Some(200.0));
        xover.set_hpf(1, Some(200.0));

        let input = sine(1000.0, 20_000);
        let outs = run(&mut xover, &input);
        let tail = 3 * 2048 + xover.latency();
        let low: f32 = outs[0][tail..].iter().fold(0.0, |a, &x| a.max(x.abs()));
        let high: f32 = outs[1][tail..].iter().fold(0.0, |a, &x| a.max(x.abs()));
        assert!(low < 0.01, "low band leaks {}", low);
        assert!((high - 1.0).abs() < 0.01, "high band peak {}", high);

        assert!((xover.band_response(0, 200.0) - 0.5).abs() < 1e-4);
        assert!((xover.band_response(1, 200.0) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_mask_is_rebuilt_after_corner_change() {
        let mut xover = FftCrossover::new(12).unwrap();
        xover.set_sample_rate(SR);
        xover.enable_band(0, true);
        xover.set_lpf(0, Some(500.0));
        let _ = run(&mut xover, &sine(300.0, 6000));
        assert!(!xover.bands[0].dirty);

        xover.set_lpf(0, Some(4000.0));
        assert!(xover.bands[0].dirty);
        let _ = run(&mut xover, &sine(300.0, 6000));
        let n = xover.fft_size;
        let bin_hz = SR / n as f32;
        for k in [0, 10, n / 8, n / 2] {
            let want = xover.bands[0].response(k as f32 * bin_hz);
            assert_eq!(xover.bands[0].mask[k], want, "bin {}", k);
        }
    }
}
