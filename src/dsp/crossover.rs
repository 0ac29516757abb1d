//! Crossover bank: splits the sidechain into band envelopes and rebuilds the
//! audio from per-band VCA gains.
//!
//! # Perceptual Contract
//! - **Target Source**: One channel at the internal rate.
//! - **Intended Effect**: With every VCA at unity the output equals the input,
//!   up to an allpass (classic) or a pure delay (linear phase).
//! - **Failure Modes**:
//!   - Classic: phase rotation around each split, audible on transients when
//!     neighbouring bands are reduced by very different amounts.
//!   - Linear phase: pre-ringing and one FFT frame of extra latency.
//! - **Will Not Do**:
//!   - Decide the band layout. That comes from [`BandPlan`].
//!
//! # Lifecycle
//! - **Init**: `new()` allocates both implementations for the largest
//!   internal rate, so switching modes never allocates.
//! - **Configure**: `configure()` after every plan rebuild.
//! - **Active**: `split_sidechain()` then, once the gains exist,
//!   `apply()` on the lookahead-delayed audio.

use std::collections::TryReserveError;

use crate::dsp::band_plan::BandPlan;
use crate::dsp::biquad::{LrFilter, LrKind};
use crate::dsp::fft_crossover::{select_rank, FftCrossover};
use crate::settings::{CrossoverMode, BANDS_MAX};

/// IIR crossover built from LR4 sections.
///
/// Audio is peeled from the bottom: band `j` takes the lowpass of what is
/// left, the remainder is highpassed, and everything below is run through the
/// allpass of the same split so the phases line up again.
struct ClassicCrossover {
    pass: [LrFilter; BANDS_MAX],
    reject: [LrFilter; BANDS_MAX],
    allpass: [LrFilter; BANDS_MAX],
    sc_hpf: [LrFilter; BANDS_MAX],
    sc_lpf: [LrFilter; BANDS_MAX],
}

impl ClassicCrossover {
    fn new() -> Self {
        Self {
            pass: [LrFilter::new(); BANDS_MAX],
            reject: [LrFilter::new(); BANDS_MAX],
            allpass: [LrFilter::new(); BANDS_MAX],
            sc_hpf: [LrFilter::new(); BANDS_MAX],
            sc_lpf: [LrFilter::new(); BANDS_MAX],
        }
    }

    fn configure(&mut self, plan: &BandPlan, sample_rate: f32) {
        fn set(filter: &mut LrFilter, kind: LrKind, freq: f32, sr: f32) {
            let changed = filter.kind() != kind;
            filter.update(kind, freq, sr);
            if changed {
                filter.reset();
            }
        }

        for &b in plan.active() {
            let first = plan.is_first(b);
            let last = plan.is_last(b);
            let lo = plan.freq_start(b);
            let hi = plan.freq_end(b);
            let split = |kind| if last { LrKind::None } else { kind };

            set(&mut self.pass[b], split(LrKind::Lowpass), hi, sample_rate);
            set(&mut self.reject[b], split(LrKind::Highpass), hi, sample_rate);
            let ap = if first || last {
                LrKind::None
            } else {
                LrKind::Allpass
            };
            set(&mut self.allpass[b], ap, hi, sample_rate);

            let hpf = if first { LrKind::None } else { LrKind::Highpass };
            set(&mut self.sc_hpf[b], hpf, lo, sample_rate);
            set(&mut self.sc_lpf[b], split(LrKind::Lowpass), hi, sample_rate);
        }
    }

    fn reset(&mut self) {
        for f in self
            .pass
            .iter_mut()
            .chain(self.reject.iter_mut())
            .chain(self.allpass.iter_mut())
            .chain(self.sc_hpf.iter_mut())
            .chain(self.sc_lpf.iter_mut())
        {
            f.reset();
        }
    }

    fn split_sidechain(&mut self, plan: &BandPlan, sc: &[f32], outs: &mut [&mut [f32]]) {
        let n = sc.len();
        for &b in plan.active() {
            let out = &mut outs[b][..n];
            self.sc_hpf[b].process(out, sc);
            self.sc_lpf[b].process_in_place(out);
        }
    }

    fn apply(
        &mut self,
        plan: &BandPlan,
        audio: &[f32],
        vcas: &[&mut [f32]],
        out: &mut [f32],
        scratch: &mut [&mut [f32]],
    ) {
        let n = audio.len();
        let (tmp, rest) = match scratch.split_first_mut() {
            Some((tmp, rest)) if !rest.is_empty() => (tmp, rest),
            _ => return,
        };
        let tmp = &mut tmp[..n];
        let env = &mut rest[0][..n];
        let out = &mut out[..n];

        tmp.copy_from_slice(audio);
        out.fill(0.0);
        for &b in plan.active() {
            self.allpass[b].process_in_place(out);
            self.pass[b].process(env, tmp);
            for ((y, &e), &g) in out.iter_mut().zip(env.iter()).zip(vcas[b].iter()) {
                *y += e * g;
            }
            self.reject[b].process_in_place(tmp);
        }
    }

    fn band_response(&self, band: usize, freq: f32) -> f32 {
        self.sc_hpf[band].magnitude(freq) * self.sc_lpf[band].magnitude(freq)
    }
}

/// FFT crossover pair: one for the audio, one for the sidechain, so both
/// carry the same delay and the gains stay aligned with the audio.
struct LinearPhaseCrossover {
    audio: FftCrossover,
    sidechain: FftCrossover,
}

impl LinearPhaseCrossover {
    fn new(max_rank: usize) -> Result<Self, TryReserveError> {
        Ok(Self {
            audio: FftCrossover::new(max_rank)?,
            sidechain: FftCrossover::new(max_rank)?,
        })
    }

    fn configure(&mut self, plan: &BandPlan, sample_rate: f32) {
        let rank = select_rank(sample_rate as usize);
        for xover in [&mut self.audio, &mut self.sidechain] {
            if xover.rank() != rank.min(xover.max_rank()) {
                xover.set_rank(rank);
            }
            xover.set_sample_rate(sample_rate);
            for b in 0..BANDS_MAX {
                let enabled = plan.is_enabled(b);
                xover.enable_band(b, enabled);
                if enabled {
                    let hpf = (!plan.is_first(b)).then(|| plan.freq_start(b));
                    let lpf = (!plan.is_last(b)).then(|| plan.freq_end(b));
                    xover.set_hpf(b, hpf);
                    xover.set_lpf(b, lpf);
                }
            }
        }
    }

    fn reset(&mut self) {
        self.audio.clear();
        self.sidechain.clear();
    }

    fn apply(
        &mut self,
        plan: &BandPlan,
        audio: &[f32],
        vcas: &[&mut [f32]],
        out: &mut [f32],
        scratch: &mut [&mut [f32]],
    ) {
        let n = audio.len();
        self.audio.process(audio, scratch);
        let out = &mut out[..n];
        out.fill(0.0);
        for &b in plan.active() {
            for ((y, &x), &g) in out.iter_mut().zip(scratch[b].iter()).zip(vcas[b].iter()) {
                *y += x * g;
            }
        }
    }
}

/// The two splitting strategies behind one interface.
enum Crossover {
    Classic(ClassicCrossover),
    LinearPhase(Box<LinearPhaseCrossover>),
}

impl Crossover {
    fn mode(&self) -> CrossoverMode {
        match self {
            Crossover::Classic(_) => CrossoverMode::Classic,
            Crossover::LinearPhase(_) => CrossoverMode::LinearPhase,
        }
    }

    fn reset(&mut self) {
        match self {
            Crossover::Classic(x) => x.reset(),
            Crossover::LinearPhase(x) => x.reset(),
        }
    }
}

pub struct CrossoverBank {
    active: Crossover,
    /// The other strategy, kept allocated for a mode switch.
    spare: Crossover,
    sample_rate: f32,
}

impl CrossoverBank {
    /// Allocate for internal rates up to `max_sample_rate`.
    pub fn new(max_sample_rate: f32) -> Result<Self, TryReserveError> {
        let linear = LinearPhaseCrossover::new(select_rank(max_sample_rate as usize))?;
        Ok(Self {
            active: Crossover::Classic(ClassicCrossover::new()),
            spare: Crossover::LinearPhase(Box::new(linear)),
            sample_rate: 0.0,
        })
    }

    pub fn mode(&self) -> CrossoverMode {
        self.active.mode()
    }

    /// Apply a rebuilt plan. A mode change starts the new path from silence.
    pub fn configure(&mut self, mode: CrossoverMode, plan: &BandPlan, sample_rate: f32) {
        if self.active.mode() != mode {
            std::mem::swap(&mut self.active, &mut self.spare);
            self.active.reset();
        } else if self.sample_rate != sample_rate {
            self.active.reset();
        }
        self.sample_rate = sample_rate;
        match &mut self.active {
            Crossover::Classic(x) => x.configure(plan, sample_rate),
            Crossover::LinearPhase(x) => x.configure(plan, sample_rate),
        }
    }

    /// Internal-rate samples the band outputs lag the input.
    pub fn latency(&self) -> usize {
        match &self.active {
            Crossover::Classic(_) => 0,
            Crossover::LinearPhase(x) => x.audio.latency(),
        }
    }

    pub fn reset(&mut self) {
        self.active.reset();
    }

    /// Band-limit `sc` into `outs[band]` for every active band, then scale by
    /// that band's preamp. `outs` is indexed by band, not by plan position.
    pub fn split_sidechain(
        &mut self,
        plan: &BandPlan,
        sc: &[f32],
        preamps: &[f32; BANDS_MAX],
        outs: &mut [&mut [f32]],
    ) {
        match &mut self.active {
            Crossover::Classic(x) => x.split_sidechain(plan, sc, outs),
            Crossover::LinearPhase(x) => x.sidechain.process(sc, outs),
        }
        let n = sc.len();
        for &b in plan.active() {
            let k = preamps[b];
            if k != 1.0 {
                for x in outs[b][..n].iter_mut() {
                    *x *= k;
                }
            }
        }
    }

    /// Rebuild `out` from `audio` with each active band scaled by its VCA.
    /// `scratch` needs `BANDS_MAX` buffers of at least `audio.len()`.
    pub fn apply(
        &mut self,
        plan: &BandPlan,
        audio: &[f32],
        vcas: &[&mut [f32]],
        out: &mut [f32],
        scratch: &mut [&mut [f32]],
    ) {
        match &mut self.active {
            Crossover::Classic(x) => x.apply(plan, audio, vcas, out, scratch),
            Crossover::LinearPhase(x) => x.apply(plan, audio, vcas, out, scratch),
        }
    }

    /// Magnitude of the sidechain filter for `band` at `freq`.
    pub fn band_response(&self, plan: &BandPlan, band: usize, freq: f32) -> f32 {
        if !plan.is_enabled(band) {
            return 0.0;
        }
        match &self.active {
            Crossover::Classic(x) => x.band_response(band, freq),
            Crossover::LinearPhase(x) => x.sidechain.band_response(band, freq),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::band_plan::SplitPoint;
    use crate::settings::SPLITS_MAX;

    const SR: f32 = 48_000.0;
    const LEN: usize = 1024;

    fn plan_200_2k_8k() -> BandPlan {
        let mut splits = [SplitPoint::default(); SPLITS_MAX];
        for (i, f) in [200.0, 2000.0, 8000.0].into_iter().enumerate() {
            splits[i] = SplitPoint {
                enabled: true,
                frequency: f,
            };
        }
        let mut plan = BandPlan::new();
        plan.rebuild(&splits, SR / 2.0);
        plan
    }

    /// Run `input` through with every VCA at `gain`, in blocks of `LEN`.
    fn render(bank: &mut CrossoverBank, plan: &BandPlan, input: &[f32], gain: f32) -> Vec<f32> {
        let mut vca = vec![gain; BANDS_MAX * LEN];
        let mut scratch = vec![0.0f32; BANDS_MAX * LEN];
        let mut out = vec![0.0f32; input.len()];
        for (chunk, dst) in input.chunks(LEN).zip(out.chunks_mut(LEN)) {
            let vcas: Vec<&mut [f32]> = vca.chunks_mut(LEN).collect();
            let mut bufs: Vec<&mut [f32]> = scratch.chunks_mut(LEN).collect();
            bank.apply(plan, chunk, &vcas, dst, &mut bufs);
        }
        out
    }

    #[test]
    fn test_classic_unity_is_allpass() {
        let plan = plan_200_2k_8k();
        let mut bank = CrossoverBank::new(SR).unwrap();
        bank.configure(CrossoverMode::Classic, &plan, SR);
        assert_eq!(bank.latency(), 0);

        let mut impulse = vec![0.0f32; 16 * LEN];
        impulse[0] = 1.0;
        let out = render(&mut bank, &plan, &impulse, 1.0);
        let energy: f32 = out.iter().map(|x| x * x).sum();
        assert!((energy - 1.0).abs() < 1e-3, "energy {}", energy);
    }

    #[test]
    fn test_mode_switch_swaps_strategy() {
        let plan = plan_200_2k_8k();
        let mut bank = CrossoverBank::new(SR).unwrap();
        bank.configure(CrossoverMode::LinearPhase, &plan, SR);
        assert_eq!(bank.mode(), CrossoverMode::LinearPhase);
        assert!(bank.latency() > 0);
        bank.configure(CrossoverMode::Classic, &plan, SR);
        assert_eq!(bank.mode(), CrossoverMode::Classic);
        assert_eq!(bank.latency(), 0);
    }

    #[test]
    fn test_linear_phase_unity_is_delay() {
        let plan = plan_200_2k_8k();
        let mut bank = CrossoverBank::new(SR).unwrap();
        bank.configure(CrossoverMode::LinearPhase, &plan, SR);
        let la = bank.latency();
        assert_eq!(la, 3071);

        let input: Vec<f32> = (0..20 * LEN)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / SR).sin())
            .collect();
        let out = render(&mut bank, &plan, &input, 1.0);
        for i in 4096 + la..input.len() {
            assert!((out[i] - input[i - la]).abs() < 1e-3, "sample {}", i);
        }
    }

    #[test]
    fn test_vca_scales_only_its_band() {
        let plan = plan_200_2k_8k();
        let mut bank = CrossoverBank::new(SR).unwrap();
        bank.configure(CrossoverMode::Classic, &plan, SR);

        // 1 kHz sits in band 1; pulling band 3 down must leave it alone
        let input: Vec<f32> = (0..16 * LEN)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / SR).sin())
            .collect();
        let mut vca = vec![1.0f32; BANDS_MAX * LEN];
        vca[3 * LEN..4 * LEN].fill(0.0);
        let mut scratch = vec![0.0f32; BANDS_MAX * LEN];
        let mut out = vec![0.0f32; input.len()];
        for (chunk, dst) in input.chunks(LEN).zip(out.chunks_mut(LEN)) {
            let vcas: Vec<&mut [f32]> = vca.chunks_mut(LEN).collect();
            let mut bufs: Vec<&mut [f32]> = scratch.chunks_mut(LEN).collect();
            bank.apply(&plan, chunk, &vcas, dst, &mut bufs);
        }
        let peak = out[8 * LEN..].iter().fold(0.0f32, |a, &x| a.max(x.abs()));
        assert!((peak - 1.0).abs() < 0.02, "peak {}", peak);
    }

    #[test]
    fn test_sidechain_split_applies_preamp() {
        let plan = plan_200_2k_8k();
        for mode in [CrossoverMode::Classic, CrossoverMode::LinearPhase] {
            let mut bank = CrossoverBank::new(SR).unwrap();
            bank.configure(mode, &plan, SR);
            let mut preamps = [1.0f32; BANDS_MAX];
            preamps[1] = 2.0;

            let sc: Vec<f32> = (0..16 * LEN)
                .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / SR).sin())
                .collect();
            let mut bands = vec![0.0f32; BANDS_MAX * LEN];
            let mut peak = [0.0f32; BANDS_MAX];
            for (k, chunk) in sc.chunks(LEN).enumerate() {
                let mut outs: Vec<&mut [f32]> = bands.chunks_mut(LEN).collect();
                bank.split_sidechain(&plan, chunk, &preamps, &mut outs);
                if k >= 10 {
                    for b in 0..4 {
                        peak[b] = outs[b].iter().fold(peak[b], |a, &x| a.max(x.abs()));
                    }
                }
            }
            assert!((peak[1] - 2.0).abs() < 0.2, "{:?}: band 1 peak {}", mode, peak[1]);
            assert!(peak[3] < 0.05, "{:?}: band 3 leak {}", mode, peak[3]);
        }
    }

    #[test]
    fn test_band_response_of_inactive_band_is_zero() {
        let plan = plan_200_2k_8k();
        let mut bank = CrossoverBank::new(SR).unwrap();
        bank.configure(CrossoverMode::Classic, &plan, SR);
        assert_eq!(bank.band_response(&plan, 6, 1000.0), 0.0);
        assert!((bank.band_response(&plan, 1, 1000.0) - 1.0).abs() < 0.1);
    }
}
