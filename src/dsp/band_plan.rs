//! Band plan: which bands are active and where they start and end.
//!
//! Band 0 always exists and starts at 0 Hz. Enabling split `i` activates band
//! `i + 1`, whose lower edge is that split's frequency. The active bands are
//! ordered by lower edge, so the user can drag splits past each other and the
//! plan simply re-sorts.
//!
//! # Lifecycle
//! - **Dirty**: any split toggle, any enabled split moving, a sample-rate or
//!   crossover-mode change.
//! - **Rebuilt**: once, in the settings pass before the next block.

use crate::settings::{BANDS_MAX, SPLITS_MAX};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SplitPoint {
    pub enabled: bool,
    pub frequency: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BandPlan {
    order: [usize; BANDS_MAX],
    len: usize,
    enabled: [bool; BANDS_MAX],
    freq_start: [f32; BANDS_MAX],
    freq_end: [f32; BANDS_MAX],
}

impl Default for BandPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl BandPlan {
    /// Single full-range band with an unknown upper edge.
    pub fn new() -> Self {
        let mut enabled = [false; BANDS_MAX];
        enabled[0] = true;
        Self {
            order: std::array::from_fn(|i| i),
            len: 1,
            enabled,
            freq_start: [0.0; BANDS_MAX],
            freq_end: [0.0; BANDS_MAX],
        }
    }

    pub fn rebuild(&mut self, splits: &[SplitPoint; SPLITS_MAX], nyquist: f32) {
        let split_freq = |band: usize| -> f32 {
            if band == 0 {
                0.0
            } else {
                splits[band - 1].frequency
            }
        };

        // Collect candidates: band 0 plus every enabled split inside the spectrum
        let mut order = [0usize; BANDS_MAX];
        let mut len = 1;
        for (i, split) in splits.iter().enumerate() {
            if split.enabled && split.frequency > 0.0 && split.frequency < nyquist {
                order[len] = i + 1;
                len += 1;
            }
        }

        // Stable insertion sort on the lower edge; band 0 stays in front
        for i in 2..len {
            let mut j = i;
            while j > 1 && split_freq(order[j - 1]) > split_freq(order[j]) {
                order.swap(j - 1, j);
                j -= 1;
            }
        }

        // Two splits on the same frequency would make an empty band
        let mut kept = 1;
        for i in 1..len {
            if split_freq(order[i]) > split_freq(order[kept - 1]) {
                order[kept] = order[i];
                kept += 1;
            }
        }
        let len = kept;

        self.enabled = [false; BANDS_MAX];
        self.freq_start = [0.0; BANDS_MAX];
        self.freq_end = [0.0; BANDS_MAX];
        for j in 0..len {
            let band = order[j];
            self.enabled[band] = true;
            self.freq_start[band] = split_freq(band);
            self.freq_end[band] = if j + 1 < len {
                split_freq(order[j + 1])
            } else {
                nyquist
            };
        }

        // Inactive bands keep a well-defined order after the active ones
        let mut tail = len;
        for band in 0..BANDS_MAX {
            if !self.enabled[band] {
                order[tail] = band;
                tail += 1;
            }
        }

        self.order = order;
        self.len = len;
    }

    /// Number of active bands, always in `1..=BANDS_MAX`.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Active band indices in ascending frequency order.
    pub fn active(&self) -> &[usize] {
        &self.order[..self.len]
    }

    pub fn is_enabled(&self, band: usize) -> bool {
        self.enabled[band]
    }

    /// Position of `band` within the active list.
    pub fn position(&self, band: usize) -> Option<usize> {
        self.active().iter().position(|&b| b == band)
    }

    pub fn is_first(&self, band: usize) -> bool {
        self.position(band) == Some(0)
    }

    pub fn is_last(&self, band: usize) -> bool {
        self.position(band) == Some(self.len - 1)
    }

    pub fn freq_start(&self, band: usize) -> f32 {
        self.freq_start[band]
    }

    pub fn freq_end(&self, band: usize) -> f32 {
        self.freq_end[band]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splits(cfg: &[(usize, f32)]) -> [SplitPoint; SPLITS_MAX] {
        let mut s = [SplitPoint::default(); SPLITS_MAX];
        for (i, f) in s.iter_mut().enumerate() {
            f.frequency = 100.0 * (i + 1) as f32;
        }
        for &(i, f) in cfg {
            s[i] = SplitPoint {
                enabled: true,
                frequency: f,
            };
        }
        s
    }

    fn assert_tiles(plan: &BandPlan, nyquist: f32) {
        let active = plan.active();
        assert!(!active.is_empty());
        assert_eq!(active[0], 0);
        assert_eq!(plan.freq_start(active[0]), 0.0);
        for w in active.windows(2) {
            assert_eq!(plan.freq_end(w[0]), plan.freq_start(w[1]));
        }
        for &b in active {
            assert!(plan.freq_start(b) < plan.freq_end(b));
        }
        assert_eq!(plan.freq_end(*active.last().unwrap()), nyquist);
    }

    #[test]
    fn test_no_splits_is_single_band() {
        let mut plan = BandPlan::new();
        plan.rebuild(&splits(&[]), 24_000.0);
        assert_eq!(plan.active(), &[0]);
        assert_eq!(plan.freq_start(0), 0.0);
        assert_eq!(plan.freq_end(0), 24_000.0);
        for b in 1..BANDS_MAX {
            assert!(!plan.is_enabled(b));
        }
    }

    #[test]
    fn test_three_splits_make_four_bands() {
        let mut plan = BandPlan::new();
        plan.rebuild(&splits(&[(0, 200.0), (1, 2000.0), (2, 8000.0)]), 24_000.0);
        assert_eq!(plan.active(), &[0, 1, 2, 3]);
        let edges: Vec<(f32, f32)> = plan
            .active()
            .iter()
            .map(|&b| (plan.freq_start(b), plan.freq_end(b)))
            .collect();
        assert_eq!(
            edges,
            vec![
                (0.0, 200.0),
                (200.0, 2000.0),
                (2000.0, 8000.0),
                (8000.0, 24_000.0)
            ]
        );
        assert_tiles(&plan, 24_000.0);
    }

    #[test]
    fn test_crossed_splits_are_sorted() {
        let mut plan = BandPlan::new();
        plan.rebuild(&splits(&[(1, 5000.0), (4, 300.0), (6, 1000.0)]), 22_050.0);
        assert_eq!(plan.active(), &[0, 5, 7, 2]);
        assert_eq!(plan.freq_end(0), 300.0);
        assert_eq!(plan.freq_end(7), 5000.0);
        assert!(plan.is_first(0));
        assert!(plan.is_last(2));
        assert_tiles(&plan, 22_050.0);
    }

    #[test]
    fn test_degenerate_splits_dropped() {
        let mut plan = BandPlan::new();
        plan.rebuild(
            &splits(&[(0, 1000.0), (1, 1000.0), (2, 30_000.0)]),
            24_000.0,
        );
        assert_eq!(plan.len(), 2);
        assert!(!plan.is_enabled(3));
        assert_tiles(&plan, 24_000.0);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let cfg = splits(&[(0, 40.0), (3, 632.0), (5, 3984.0), (6, 10_000.0)]);
        let mut a = BandPlan::new();
        a.rebuild(&cfg, 96_000.0);
        let first = a.clone();
        a.rebuild(&cfg, 96_000.0);
        assert_eq!(a, first);
        assert_tiles(&a, 96_000.0);
    }

    #[test]
    fn test_every_split_combination_tiles() {
        let freqs = [4000.0, 63.0, 900.0, 12_000.0, 250.0, 2200.0, 90.0];
        for mask in 0u32..(1 << SPLITS_MAX) {
            let mut s = [SplitPoint::default(); SPLITS_MAX];
            for i in 0..SPLITS_MAX {
                s[i] = SplitPoint {
                    enabled: mask & (1 << i) != 0,
                    frequency: freqs[i],
                };
            }
            let mut plan = BandPlan::new();
            plan.rebuild(&s, 24_000.0);
            assert_eq!(plan.len(), 1 + mask.count_ones() as usize);
            assert_tiles(&plan, 24_000.0);
        }
    }
}
