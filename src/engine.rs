//! Multiband limiter engine: owns the channels and runs one host block
//! through them.
//!
//! # Lifecycle
//! - **New**: no channels; `process()` passes audio through untouched.
//! - **Initialize**: `initialize()` allocates every channel for the host
//!   rate. Off the audio thread, may fail.
//! - **Settings pass**: `update_settings()` once per block before
//!   `process()`. Rebuilds the band plan when the split layout, the rate or
//!   the crossover mode changed and derives the shared [`Controls`].
//! - **Process**: chunks of at most `BUFFER_SIZE` samples, channels in
//!   lockstep so band and master gains can be linked between them.

use std::sync::Arc;

use anyhow::Context;

use crate::dsp::band_plan::{BandPlan, SplitPoint};
use crate::dsp::channel::{BandControl, Channel, ChannelState, Controls};
use crate::dsp::link::stereo_link;
use crate::meters::Meters;
use crate::mbl_log;
use crate::settings::{Settings, BANDS_MAX, BUFFER_SIZE, SPLITS_MAX};

/// Per-block meter accumulators.
struct BlockStats {
    in_peak: [f32; 2],
    out_peak: [f32; 2],
    band_input: [f32; BANDS_MAX],
    band_reduction: [f32; BANDS_MAX],
    master_input: f32,
    master_reduction: f32,
}

impl BlockStats {
    fn new() -> Self {
        Self {
            in_peak: [0.0; 2],
            out_peak: [0.0; 2],
            band_input: [0.0; BANDS_MAX],
            band_reduction: [1.0; BANDS_MAX],
            master_input: 0.0,
            master_reduction: 1.0,
        }
    }
}

pub struct Engine {
    num_channels: usize,
    sample_rate: f32,
    channels: Vec<Channel>,
    settings: Settings,
    controls: Controls,
    splits: [SplitPoint; SPLITS_MAX],
    configured: bool,
    latency: usize,
    meters: Arc<Meters>,
}

impl Engine {
    pub fn new(num_channels: usize, meters: Arc<Meters>) -> Self {
        Self {
            num_channels,
            sample_rate: 0.0,
            channels: Vec::new(),
            settings: Settings::default(),
            controls: Controls::default(),
            splits: [SplitPoint::default(); SPLITS_MAX],
            configured: false,
            latency: 0,
            meters,
        }
    }

    /// Allocate every channel for `sample_rate` and apply the last settings.
    pub fn initialize(&mut self, sample_rate: f32) -> anyhow::Result<()> {
        anyhow::ensure!(
            sample_rate.is_finite() && sample_rate > 0.0,
            "invalid sample rate {}",
            sample_rate
        );

        let mut channels = Vec::new();
        channels
            .try_reserve_exact(self.num_channels)
            .context("reserving channel list")?;
        for ch in 0..self.num_channels {
            let channel = Channel::new(sample_rate, 0x6d62_6c00 + ch as u64)
                .with_context(|| format!("allocating channel {} at {} Hz", ch, sample_rate))?;
            channels.push(channel);
        }

        self.channels = channels;
        self.sample_rate = sample_rate;
        self.configured = false;
        let settings = self.settings.clone();
        self.update_settings(&settings);
        log::info!(
            "engine ready: {} channel(s) at {} Hz, latency {} samples",
            self.num_channels,
            sample_rate,
            self.latency
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        !self.channels.is_empty()
    }

    pub fn latency(&self) -> usize {
        self.latency
    }

    pub fn plan(&self) -> &BandPlan {
        &self.controls.plan
    }

    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    /// Settings pass. Cheap when nothing changed, never allocates.
    pub fn update_settings(&mut self, settings: &Settings) {
        if self.configured && *settings == self.settings {
            return;
        }

        let splits: [SplitPoint; SPLITS_MAX] = std::array::from_fn(|i| SplitPoint {
            enabled: settings.splits[i].enabled,
            frequency: settings.splits[i].frequency,
        });
        let plan_dirty = !self.configured
            || splits != self.splits
            || settings.crossover != self.settings.crossover;
        if settings.crossover != self.settings.crossover {
            mbl_log!("crossover mode -> {:?}", settings.crossover);
        }
        if settings.oversampling != self.settings.oversampling {
            mbl_log!("oversampling -> {:?}", settings.oversampling);
        }

        if plan_dirty {
            self.splits = splits;
            self.controls.plan.rebuild(&splits, self.sample_rate * 0.5);
            self.publish_plan();
            mbl_log!("plan rebuilt: {} band(s)", self.controls.plan.len());
        }

        self.derive_controls(settings);

        let mut latency = self.latency;
        for ch in self.channels.iter_mut() {
            latency = ch.configure(settings, &self.controls.plan).latency;
        }
        if latency != self.latency {
            mbl_log!("latency {} -> {}", self.latency, latency);
        }
        self.latency = latency;
        self.meters.set_latency(latency);

        self.settings.clone_from(settings);
        self.configured = true;
    }

    /// Mute after solo, makeup with boost, master output gain.
    fn derive_controls(&mut self, settings: &Settings) {
        let plan = &self.controls.plan;
        let any_solo = settings
            .bands
            .iter()
            .enumerate()
            .any(|(b, band)| band.solo && plan.is_enabled(b));

        let mut bands = [BandControl::default(); BANDS_MAX];
        for (ctl, band) in bands.iter_mut().zip(settings.bands.iter()) {
            let lim = &band.limiter;
            let makeup = if lim.boost && lim.enabled {
                band.makeup / lim.threshold.max(f32::EPSILON)
            } else {
                band.makeup
            };
            *ctl = BandControl {
                preamp: band.preamp,
                gain: makeup,
                mute: band.mute || (any_solo && !band.solo),
            };
        }

        let master = &settings.master;
        let output_gain = if master.boost && master.enabled {
            settings.output_gain / master.threshold.max(f32::EPSILON)
        } else {
            settings.output_gain
        };

        self.controls.bands = bands;
        self.controls.preamps = std::array::from_fn(|b| bands[b].preamp);
        self.controls.input_gain = settings.input_gain;
        self.controls.output_gain = output_gain;
        self.controls.external_sidechain = settings.external_sidechain;
    }

    fn publish_plan(&self) {
        let plan = &self.controls.plan;
        for b in 0..BANDS_MAX {
            self.meters
                .set_band_echo(b, plan.is_enabled(b), plan.freq_start(b), plan.freq_end(b));
        }
        self.meters.mark_sync();
    }

    /// Flush signal history in every channel.
    pub fn reset(&mut self) {
        for ch in self.channels.iter_mut() {
            ch.reset();
        }
    }

    /// Process `io` in place. `sidechain`, when given, holds the auxiliary
    /// input channels; a mono sidechain keys every channel.
    pub fn process(&mut self, io: &mut [&mut [f32]], sidechain: Option<&[&[f32]]>) {
        let ready = !self.channels.is_empty()
            && self
                .channels
                .iter()
                .all(|ch| ch.state() != ChannelState::Idle);
        if !ready {
            return;
        }

        let len = io.iter().map(|c| c.len()).min().unwrap_or(0);
        let used = io.len().min(self.channels.len());
        let mut stats = BlockStats::new();

        let mut offset = 0;
        while offset < len {
            let n = (len - offset).min(BUFFER_SIZE);
            let end = offset + n;

            for (c, ch) in self.channels[..used].iter_mut().enumerate() {
                let key = sidechain
                    .and_then(|sc| sc.get(c).or_else(|| sc.first()))
                    .filter(|s| s.len() >= end)
                    .map(|s| &s[offset..end]);
                ch.analyze_bands(&io[c][offset..end], key, &self.controls);
            }

            let m = self.channels[0].internal_len(n);
            if let [left, right, ..] = &mut self.channels[..used] {
                for &b in self.controls.plan.active() {
                    let link = left.bands[b].stereo_link;
                    stereo_link(left.band_vca_mut(b, m), right.band_vca_mut(b, m), link);
                }
            }

            for ch in self.channels[..used].iter_mut() {
                ch.apply_bands(n, &self.controls);
            }

            if let [left, right, ..] = &mut self.channels[..used] {
                let link = left.master.stereo_link;
                stereo_link(left.master_vca_mut(m), right.master_vca_mut(m), link);
            }

            for (c, ch) in self.channels[..used].iter_mut().enumerate() {
                ch.finish(&mut io[c][offset..end], &self.controls);
                Self::collect(&mut stats, c, ch, &self.controls.plan);
            }

            offset = end;
        }

        self.publish(&stats, used);
    }

    fn collect(stats: &mut BlockStats, c: usize, ch: &Channel, plan: &BandPlan) {
        if let Some(p) = stats.in_peak.get_mut(c) {
            *p = p.max(ch.in_level);
        }
        if let Some(p) = stats.out_peak.get_mut(c) {
            *p = p.max(ch.out_level);
        }
        for &b in plan.active() {
            let stage = &ch.bands[b];
            stats.band_input[b] = stats.band_input[b].max(stage.in_level);
            stats.band_reduction[b] = stats.band_reduction[b].min(stage.reduction);
        }
        stats.master_input = stats.master_input.max(ch.master.in_level);
        stats.master_reduction = stats.master_reduction.min(ch.master.reduction);
    }

    fn publish(&self, stats: &BlockStats, used: usize) {
        for c in 0..used.min(2) {
            self.meters.set_input_peak(c, stats.in_peak[c]);
            self.meters.set_output_peak(c, stats.out_peak[c]);
        }
        for b in 0..BANDS_MAX {
            let enabled = self.controls.plan.is_enabled(b) && self.settings.bands[b].limiter.enabled;
            let reduction = if enabled { stats.band_reduction[b] } else { 1.0 };
            self.meters.set_band(b, stats.band_input[b], reduction);
        }
        self.meters
            .set_master(stats.master_input, stats.master_reduction);
    }

    /// Sidechain filter magnitude of `band` at `freq`, including its preamp.
    pub fn band_response(&self, band: usize, freq: f32) -> f32 {
        let Some(ch) = self.channels.first() else {
            return 0.0;
        };
        ch.crossover().band_response(&self.controls.plan, band, freq) * self.controls.preamps[band]
    }

    /// Sum of the band responses of channel `ch`, each scaled by its last
    /// reduction and makeup.
    pub fn channel_response(&self, ch: usize, freq: f32) -> f32 {
        let Some(channel) = self.channels.get(ch) else {
            return 0.0;
        };
        self.controls
            .plan
            .active()
            .iter()
            .map(|&b| {
                let ctl = &self.controls.bands[b];
                let gain = if ctl.mute { 0.0 } else { ctl.gain };
                self.band_response(b, freq) * channel.bands[b].reduction * gain
            })
            .sum()
    }
}
