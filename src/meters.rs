//! Thread-safe metering shared between the audio thread and any reader
//! (editor, host automation lane, render tool).
//!
//! Every value is an `f32` stored as bits in an `AtomicU32`, so writes never
//! block and readers always see a whole value. Levels and reductions are the
//! extreme of the last processed host block; readers that want ballistics
//! apply them on their side.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use crate::settings::BANDS_MAX;

/// Channels the level meters are laid out for.
pub const METER_CHANNELS: usize = 2;

struct AtomicF32(AtomicU32);

impl AtomicF32 {
    const fn zero() -> Self {
        Self(AtomicU32::new(0))
    }

    fn set(&self, val: f32) {
        self.0.store(val.to_bits(), Ordering::Relaxed);
    }

    fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::zero()
    }
}

/// Input level and gain reduction of one limiter, worst case over channels.
struct LimiterMeter {
    input: AtomicF32,
    reduction: AtomicF32,
}

impl Default for LimiterMeter {
    fn default() -> Self {
        let m = Self {
            input: AtomicF32::zero(),
            reduction: AtomicF32::zero(),
        };
        m.reduction.set(1.0);
        m
    }
}

#[derive(Default)]
struct BandEcho {
    active: AtomicBool,
    freq_start: AtomicF32,
    freq_end: AtomicF32,
}

/// Meter block for one plugin instance.
#[derive(Default)]
pub struct Meters {
    input_peak: [AtomicF32; METER_CHANNELS],
    output_peak: [AtomicF32; METER_CHANNELS],
    bands: [LimiterMeter; BANDS_MAX],
    master: LimiterMeter,
    echo: [BandEcho; BANDS_MAX],
    /// Set on every plan change, cleared by the reader.
    sync: AtomicBool,
    latency: AtomicUsize,
}

impl Meters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_input_peak(&self, ch: usize, val: f32) {
        if let Some(m) = self.input_peak.get(ch) {
            m.set(val);
        }
    }

    pub fn set_output_peak(&self, ch: usize, val: f32) {
        if let Some(m) = self.output_peak.get(ch) {
            m.set(val);
        }
    }

    pub fn set_band(&self, band: usize, input: f32, reduction: f32) {
        self.bands[band].input.set(input);
        self.bands[band].reduction.set(reduction);
    }

    pub fn set_master(&self, input: f32, reduction: f32) {
        self.master.input.set(input);
        self.master.reduction.set(reduction);
    }

    pub fn set_band_echo(&self, band: usize, active: bool, freq_start: f32, freq_end: f32) {
        let e = &self.echo[band];
        e.active.store(active, Ordering::Relaxed);
        e.freq_start.set(freq_start);
        e.freq_end.set(freq_end);
    }

    pub fn mark_sync(&self) {
        self.sync.store(true, Ordering::Release);
    }

    pub fn set_latency(&self, samples: usize) {
        self.latency.store(samples, Ordering::Relaxed);
    }

    pub fn get_input_peak(&self, ch: usize) -> f32 {
        self.input_peak.get(ch).map_or(0.0, AtomicF32::get)
    }

    pub fn get_output_peak(&self, ch: usize) -> f32 {
        self.output_peak.get(ch).map_or(0.0, AtomicF32::get)
    }

    pub fn get_band_input(&self, band: usize) -> f32 {
        self.bands[band].input.get()
    }

    /// Linear VCA gain, 1.0 when the band is idle or disabled.
    pub fn get_band_reduction(&self, band: usize) -> f32 {
        self.bands[band].reduction.get()
    }

    pub fn get_master_input(&self) -> f32 {
        self.master.input.get()
    }

    pub fn get_master_reduction(&self) -> f32 {
        self.master.reduction.get()
    }

    /// `(active, freq_start, freq_end)` as resolved by the last plan rebuild.
    pub fn get_band_echo(&self, band: usize) -> (bool, f32, f32) {
        let e = &self.echo[band];
        (
            e.active.load(Ordering::Relaxed),
            e.freq_start.get(),
            e.freq_end.get(),
        )
    }

    /// True once after each plan change.
    pub fn take_sync(&self) -> bool {
        self.sync.swap(false, Ordering::Acquire)
    }

    pub fn get_latency(&self) -> usize {
        self.latency.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let m = Meters::new();
        assert_eq!(m.get_input_peak(0), 0.0);
        assert_eq!(m.get_band_reduction(3), 1.0);
        assert_eq!(m.get_master_reduction(), 1.0);
        assert_eq!(m.get_band_echo(0), (false, 0.0, 0.0));
    }

    #[test]
    fn test_out_of_range_channel_is_ignored() {
        let m = Meters::new();
        m.set_output_peak(5, 0.7);
        assert_eq!(m.get_output_peak(5), 0.0);
        m.set_output_peak(1, 0.7);
        assert_eq!(m.get_output_peak(1), 0.7);
    }

    #[test]
    fn test_sync_is_cleared_on_read() {
        let m = Meters::new();
        assert!(!m.take_sync());
        m.mark_sync();
        assert!(m.take_sync());
        assert!(!m.take_sync());
    }
}
