//! Per-channel processing chain.
//!
//! # Lifecycle
//! - **Idle**: constructed, nothing configured yet; the engine passes audio
//!   through untouched.
//! - **Configured**: `configure()` has applied a settings snapshot; delays
//!   and filters are primed with silence.
//! - **Processing**: at least one block went through since the last reset.
//!
//! A block is processed in three stages so the engine can link gains across
//! channels in between: `analyze_bands()` computes the per-band VCA gains,
//! `apply_bands()` rebuilds the audio and computes the master gain, and
//! `finish()` applies it and writes the output.
//!
//! The control path always works on an undelayed copy of the signal; the
//! audio path reads through the lookahead delays. The two meet only at the
//! multiplications.

use std::collections::TryReserveError;

use crate::dsp::arena::{ArenaLayout, Region, ScratchArena};
use crate::dsp::band_plan::BandPlan;
use crate::dsp::bypass::Bypass;
use crate::dsp::crossover::CrossoverBank;
use crate::dsp::dither::Dither;
use crate::dsp::fft_crossover::select_rank;
use crate::dsp::gain_computer::GainComputer;
use crate::dsp::oversampler::Oversampler;
use crate::dsp::sc_boost::SidechainBoost;
use crate::dsp::utils::{abs_max, millis_to_samples, min_value};
use crate::dsp::DelayLine;
use crate::settings::{
    LimiterSettings, OversamplingMode, Settings, BANDS_MAX, BUFFER_SIZE, LOOKAHEAD_MAX_MS,
    LOOKAHEAD_MIN_MS, OVERSAMPLING_MAX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Configured,
    Processing,
}

/// Per-band controls derived once per settings pass and shared read-only by
/// every channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandControl {
    pub preamp: f32,
    /// Makeup, already divided by the threshold when boost is on.
    pub gain: f32,
    /// Mute after solo resolution.
    pub mute: bool,
}

impl Default for BandControl {
    fn default() -> Self {
        Self {
            preamp: 1.0,
            gain: 1.0,
            mute: false,
        }
    }
}

/// Everything a channel reads during a block that is not its own state.
#[derive(Debug, Clone, PartialEq)]
pub struct Controls {
    pub plan: BandPlan,
    pub bands: [BandControl; BANDS_MAX],
    pub preamps: [f32; BANDS_MAX],
    pub input_gain: f32,
    /// Output gain, already divided by the master threshold when boost is on.
    pub output_gain: f32,
    pub external_sidechain: bool,
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            plan: BandPlan::new(),
            bands: [BandControl::default(); BANDS_MAX],
            preamps: [1.0; BANDS_MAX],
            input_gain: 1.0,
            output_gain: 1.0,
            external_sidechain: false,
        }
    }
}

/// Delay bookkeeping for one configuration, in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timing {
    /// Lookahead at the internal rate; always a multiple of the ratio.
    pub lookahead: usize,
    /// Extra internal delay that rounds the crossover latency up to a whole
    /// number of base-rate samples.
    pub xover_pad: usize,
    /// Total base-rate latency.
    pub latency: usize,
}

/// One limiter (a band or the master) with its block statistics.
pub struct LimiterStage {
    pub computer: GainComputer,
    pub enabled: bool,
    pub stereo_link: f32,
    /// Sidechain peak of the last block.
    pub in_level: f32,
    /// Smallest VCA gain of the last block.
    pub reduction: f32,
}

impl LimiterStage {
    fn new() -> Self {
        Self {
            computer: GainComputer::new(),
            enabled: true,
            stereo_link: 1.0,
            in_level: 0.0,
            reduction: 1.0,
        }
    }

    fn configure(&mut self, settings: &LimiterSettings, sample_rate: f32, lookahead: usize) {
        self.enabled = settings.enabled;
        self.stereo_link = settings.stereo_link.clamp(0.0, 1.0);
        self.computer.set_sample_rate(sample_rate);
        self.computer.configure(settings);
        self.computer.set_lookahead(lookahead);
    }

    /// Sidechain in, VCA gain out.
    fn process(&mut self, buf: &mut [f32]) {
        self.in_level = abs_max(buf);
        if self.enabled {
            self.computer.process(buf);
        } else {
            buf.fill(1.0);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Regions {
    dry: Region,
    sc_in: Region,
    out: Region,
    in_buf: Region,
    sc_buf: Region,
    data_buf: Region,
    master_vca: Region,
    band_vca: Region,
    band_data: Region,
}

/// Largest internal block.
const STRIDE: usize = BUFFER_SIZE * OVERSAMPLING_MAX;

const RATIOS: [usize; 6] = [1, 2, 3, 4, 6, 8];

/// Worst-case base-rate latency at `sample_rate` across every mode.
pub fn max_latency(sample_rate: f32) -> usize {
    let lookahead = millis_to_samples(sample_rate, LOOKAHEAD_MAX_MS);
    let xover = RATIOS
        .iter()
        .map(|&r| {
            let rank = select_rank((sample_rate * r as f32) as usize);
            (3 * (1usize << rank) / 4 - 1).div_ceil(r)
        })
        .max()
        .unwrap_or(0);
    2 * lookahead + OversamplingMode::Full8x3.lobes() + xover
}

pub struct Channel {
    state: ChannelState,
    sample_rate: f32,
    ratio: usize,

    over: Oversampler,
    sc_over: Oversampler,
    sc_boost: SidechainBoost,
    xover: CrossoverBank,
    pub bands: [LimiterStage; BANDS_MAX],
    pub master: LimiterStage,

    mb_delay: DelayLine,
    xover_delay: DelayLine,
    sb_delay: DelayLine,
    dry_delay: DelayLine,
    bypass: Bypass,
    dither: Dither,

    arena: ScratchArena,
    regions: Regions,

    /// Peak after the input gain, last block.
    pub in_level: f32,
    /// Peak of the final output, last block.
    pub out_level: f32,
}

impl Channel {
    /// Allocate everything for host rate `sample_rate`. Must run off the
    /// audio thread.
    pub fn new(sample_rate: f32, seed: u64) -> Result<Self, TryReserveError> {
        let max_rate = sample_rate * OVERSAMPLING_MAX as f32;

        let mut layout = ArenaLayout::new();
        let regions = Regions {
            dry: layout.reserve(BUFFER_SIZE),
            sc_in: layout.reserve(BUFFER_SIZE),
            out: layout.reserve(BUFFER_SIZE),
            in_buf: layout.reserve(STRIDE),
            sc_buf: layout.reserve(STRIDE),
            data_buf: layout.reserve(STRIDE),
            master_vca: layout.reserve(STRIDE),
            band_vca: layout.reserve(STRIDE * BANDS_MAX),
            band_data: layout.reserve(STRIDE * BANDS_MAX),
        };
        let arena = layout.build()?;

        let mut bands: [LimiterStage; BANDS_MAX] = std::array::from_fn(|_| LimiterStage::new());
        for band in bands.iter_mut() {
            band.computer.init(max_rate, STRIDE)?;
        }
        let mut master = LimiterStage::new();
        master.computer.init(max_rate, STRIDE)?;

        let max_lookahead = millis_to_samples(sample_rate, LOOKAHEAD_MAX_MS) * OVERSAMPLING_MAX;
        let max_pad = OVERSAMPLING_MAX;

        let mut over = Oversampler::new();
        over.set_sample_rate(sample_rate);
        let mut sc_over = Oversampler::new();
        sc_over.set_sample_rate(sample_rate);
        let mut bypass = Bypass::new();
        bypass.init(sample_rate);

        Ok(Self {
            state: ChannelState::Idle,
            sample_rate,
            ratio: 1,
            over,
            sc_over,
            sc_boost: SidechainBoost::new(),
            xover: CrossoverBank::new(max_rate)?,
            bands,
            master,
            mb_delay: DelayLine::with_capacity(max_lookahead)?,
            xover_delay: DelayLine::with_capacity(max_pad)?,
            sb_delay: DelayLine::with_capacity(max_lookahead)?,
            dry_delay: DelayLine::with_capacity(max_latency(sample_rate))?,
            bypass,
            dither: Dither::new(seed),
            arena,
            regions,
            in_level: 0.0,
            out_level: 0.0,
        })
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn crossover(&self) -> &CrossoverBank {
        &self.xover
    }

    /// Internal sample rate under the current oversampling mode.
    pub fn internal_rate(&self) -> f32 {
        self.sample_rate * self.ratio as f32
    }

    /// Apply a settings snapshot and a freshly built plan. Allocation free.
    pub fn configure(&mut self, settings: &Settings, plan: &BandPlan) -> Timing {
        let old_ratio = self.ratio;
        self.over.set_mode(settings.oversampling, true);
        self.sc_over.set_mode(settings.oversampling, false);
        self.ratio = self.over.ratio();
        let rate = self.internal_rate();
        let rate_changed = old_ratio != self.ratio;

        // Quantised at the base rate so the delay is whole base samples
        let lookahead_ms = settings.lookahead_ms.clamp(LOOKAHEAD_MIN_MS, LOOKAHEAD_MAX_MS);
        let lookahead = millis_to_samples(self.sample_rate, lookahead_ms) * self.ratio;

        self.sc_boost.configure(settings.envelope_boost, rate);
        self.xover.configure(settings.crossover, plan, rate);
        for (stage, band) in self.bands.iter_mut().zip(settings.bands.iter()) {
            stage.configure(&band.limiter, rate, lookahead);
        }
        self.master.configure(&settings.master, rate, lookahead);

        let xover = self.xover.latency();
        let xover_base = xover.div_ceil(self.ratio);
        let timing = Timing {
            lookahead,
            xover_pad: xover_base * self.ratio - xover,
            latency: 2 * lookahead / self.ratio + self.over.latency() + xover_base,
        };

        self.mb_delay.set_delay(timing.lookahead);
        self.sb_delay.set_delay(timing.lookahead);
        self.xover_delay.set_delay(timing.xover_pad);
        self.dry_delay.set_delay(timing.latency);
        self.dither.set_bits(settings.dithering.bits());
        self.bypass.set_bypass(settings.bypass);

        if rate_changed {
            self.reset();
        }
        if self.state == ChannelState::Idle {
            self.bypass.settle();
            self.state = ChannelState::Configured;
        }
        timing
    }

    /// Flush all signal history, keeping the configuration.
    pub fn reset(&mut self) {
        self.over.reset();
        self.sc_over.reset();
        self.xover.reset();
        for stage in self.bands.iter_mut().chain(std::iter::once(&mut self.master)) {
            stage.computer.reset();
        }
        self.mb_delay.clear();
        self.xover_delay.clear();
        self.sb_delay.clear();
        self.dry_delay.clear();
        self.arena.clear();
        if self.state == ChannelState::Processing {
            self.state = ChannelState::Configured;
        }
    }

    /// VCA buffer of `band` for an internal block of `len` samples.
    pub fn band_vca_mut(&mut self, band: usize, len: usize) -> &mut [f32] {
        let vca = self.arena.get_mut(self.regions.band_vca);
        &mut vca[band * STRIDE..band * STRIDE + len]
    }

    pub fn master_vca_mut(&mut self, len: usize) -> &mut [f32] {
        &mut self.arena.get_mut(self.regions.master_vca)[..len]
    }

    /// Internal block length for `len` host samples.
    pub fn internal_len(&self, len: usize) -> usize {
        len * self.ratio
    }

    /// Stage 1: dry copy, input gain, oversampling, sidechain selection,
    /// band split and per-band gain computation. `input` holds at most
    /// `BUFFER_SIZE` samples.
    pub fn analyze_bands(&mut self, input: &[f32], sidechain: Option<&[f32]>, ctl: &Controls) {
        let n = input.len();
        let m = n * self.ratio;
        let r = self.regions;
        let [dry, sc_in, in_buf, sc_buf, band_vca] =
            self.arena
                .slices_mut([r.dry, r.sc_in, r.in_buf, r.sc_buf, r.band_vca]);

        self.dry_delay.process(&mut dry[..n], input);

        let staged = &mut sc_in[..n];
        for (y, &x) in staged.iter_mut().zip(input) {
            *y = x * ctl.input_gain;
        }
        self.in_level = abs_max(staged);
        self.over.upsample(&mut in_buf[..m], staged);

        match sidechain {
            // The key is taken as delivered; input gain only stages the main input
            Some(ext) if ctl.external_sidechain && ext.len() >= n => {
                self.sc_over.upsample(&mut sc_buf[..m], &ext[..n]);
            }
            _ => sc_buf[..m].copy_from_slice(&in_buf[..m]),
        }
        self.sc_boost.process(&mut sc_buf[..m]);

        let mut chunks = band_vca.chunks_exact_mut(STRIDE);
        let mut outs: [&mut [f32]; BANDS_MAX] =
            std::array::from_fn(|_| chunks.next().unwrap_or_default());
        self.xover
            .split_sidechain(&ctl.plan, &sc_buf[..m], &ctl.preamps, &mut outs);

        for &b in ctl.plan.active() {
            self.bands[b].process(&mut outs[b][..m]);
        }
    }

    /// Stage 2, after band linking: mute and makeup, recombination, then the
    /// master gain computation on the recombined signal.
    pub fn apply_bands(&mut self, n: usize, ctl: &Controls) {
        let m = n * self.ratio;
        let r = self.regions;
        let [in_buf, data_buf, master_vca, band_vca, band_data] =
            self.arena
                .slices_mut([r.in_buf, r.data_buf, r.master_vca, r.band_vca, r.band_data]);

        let mut chunks = band_vca.chunks_exact_mut(STRIDE);
        let mut vcas: [&mut [f32]; BANDS_MAX] =
            std::array::from_fn(|_| chunks.next().unwrap_or_default());
        for &b in ctl.plan.active() {
            let vca = &mut vcas[b][..m];
            self.bands[b].reduction = min_value(vca);
            let control = &ctl.bands[b];
            if control.mute {
                vca.fill(0.0);
            } else if control.gain != 1.0 {
                for g in vca.iter_mut() {
                    *g *= control.gain;
                }
            }
        }

        self.mb_delay.process_in_place(&mut in_buf[..m]);

        let mut chunks = band_data.chunks_exact_mut(STRIDE);
        let mut scratch: [&mut [f32]; BANDS_MAX] =
            std::array::from_fn(|_| chunks.next().unwrap_or_default());
        self.xover
            .apply(&ctl.plan, &in_buf[..m], &vcas, &mut data_buf[..m], &mut scratch);
        self.xover_delay.process_in_place(&mut data_buf[..m]);

        let vca = &mut master_vca[..m];
        vca.copy_from_slice(&data_buf[..m]);
        self.master.process(vca);
    }

    /// Stage 3, after master linking: master gain, downsampling, dither and
    /// the bypass mix into `output`.
    pub fn finish(&mut self, output: &mut [f32], ctl: &Controls) {
        let n = output.len();
        let m = n * self.ratio;
        let r = self.regions;
        let [dry, out, data_buf, master_vca] =
            self.arena
                .slices_mut([r.dry, r.out, r.data_buf, r.master_vca]);

        let vca = &master_vca[..m];
        self.master.reduction = min_value(vca);

        let data = &mut data_buf[..m];
        self.sb_delay.process_in_place(data);
        for (x, &g) in data.iter_mut().zip(vca) {
            *x *= g * ctl.output_gain;
        }

        let wet = &mut out[..n];
        self.over.downsample(wet, data);
        self.dither.process(wet);
        self.bypass.process(output, &dry[..n], wet);

        self.out_level = abs_max(output);
        self.state = ChannelState::Processing;
    }
}
