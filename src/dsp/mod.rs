pub mod arena;
pub mod band_plan;
pub mod biquad;
pub mod bypass;
pub mod channel;
pub mod crossover;
pub mod dither;
pub mod fft_crossover;
pub mod gain_computer;
pub mod link;
pub mod oversampler;
pub mod sc_boost;
pub mod utils;

pub use band_plan::{BandPlan, SplitPoint};
pub use biquad::Biquad;
pub use bypass::Bypass;
pub use channel::{Channel, ChannelState};
pub use crossover::CrossoverBank;
pub use dither::Dither;
pub use fft_crossover::FftCrossover;
pub use gain_computer::GainComputer;
pub use oversampler::Oversampler;
pub use sc_boost::SidechainBoost;

use std::collections::TryReserveError;

/// `vec![value; len]` that reports allocation failure instead of aborting.
pub(crate) fn try_filled<T: Clone>(len: usize, value: T) -> Result<Vec<T>, TryReserveError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)?;
    v.resize(len, value);
    Ok(v)
}

/// Fixed-capacity sample delay. The delay can change at runtime up to the
/// capacity chosen at construction without reallocating.
pub struct DelayLine {
    buf: Vec<f32>,
    head: usize,
    delay: usize,
}

impl DelayLine {
    /// Zero-capacity line; only a delay of 0 is possible.
    pub fn empty() -> Self {
        Self {
            buf: Vec::new(),
            head: 0,
            delay: 0,
        }
    }

    pub fn with_capacity(max_delay: usize) -> Result<Self, TryReserveError> {
        Ok(Self {
            buf: try_filled(max_delay + 1, 0.0)?,
            head: 0,
            delay: 0,
        })
    }

    pub fn max_delay(&self) -> usize {
        self.buf.len().saturating_sub(1)
    }

    /// Clamped to the capacity.
    pub fn set_delay(&mut self, delay: usize) {
        self.delay = delay.min(self.max_delay());
    }

    pub fn delay(&self) -> usize {
        self.delay
    }

    #[inline]
    pub fn push(&mut self, sample: f32) -> f32 {
        let len = self.buf.len();
        if len == 0 {
            return sample;
        }
        self.buf[self.head] = sample;
        let out = self.buf[(self.head + len - self.delay) % len];
        self.head = (self.head + 1) % len;
        out
    }

    pub fn process_in_place(&mut self, buf: &mut [f32]) {
        for x in buf.iter_mut() {
            *x = self.push(*x);
        }
    }

    pub fn process(&mut self, dst: &mut [f32], src: &[f32]) {
        for (y, &x) in dst.iter_mut().zip(src) {
            *y = self.push(x);
        }
    }

    pub fn clear(&mut self) {
        self.buf.fill(0.0);
        self.head = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_line_delays() {
        let mut d = DelayLine::with_capacity(8).unwrap();
        d.set_delay(3);
        let out: Vec<f32> = (1..=6).map(|i| d.push(i as f32)).collect();
        assert_eq!(out, vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_delay_line_clamps_to_capacity() {
        let mut d = DelayLine::with_capacity(4).unwrap();
        d.set_delay(100);
        assert_eq!(d.delay(), 4);

        let mut e = DelayLine::empty();
        e.set_delay(10);
        assert_eq!(e.delay(), 0);
        assert_eq!(e.push(0.5), 0.5);
    }
}
