mod debug;
pub mod dsp;
pub mod engine;
pub mod meters;
pub mod settings;

use crate::dsp::utils::db_to_lin;
use crate::engine::Engine;
use crate::meters::Meters;
use crate::settings::{
    CrossoverMode, Dithering, EnvelopeBoost, LimiterMode, LimiterSettings, OversamplingMode,
    Settings, ALR_ATTACK_DFL_MS, ALR_ATTACK_MAX_MS, ALR_ATTACK_MIN_MS, ALR_RELEASE_DFL_MS,
    ALR_RELEASE_MAX_MS, ALR_RELEASE_MIN_MS, ATTACK_DFL_MS, ATTACK_MAX_MS, ATTACK_MIN_MS,
    BANDS_MAX, FREQ_MAX, FREQ_MIN, GAIN_MAX_DB, GAIN_MIN_DB, KNEE_MAX_DB, KNEE_MIN_DB,
    LOOKAHEAD_DFL_MS, LOOKAHEAD_MAX_MS, LOOKAHEAD_MIN_MS, RELEASE_DFL_MS, RELEASE_MAX_MS,
    RELEASE_MIN_MS, SPLITS_MAX, SPLIT_ENABLED_DFL, SPLIT_FREQ_DFL, THRESHOLD_MAX_DB,
    THRESHOLD_MIN_DB,
};
use assert_no_alloc::permit_alloc;
use nih_plug::prelude::*;
use std::sync::Arc;

const DEFAULT_SAMPLE_RATE: f32 = 48_000.0;

// -----------------------------------------------------------------------------
// PARAMETERS
// -----------------------------------------------------------------------------

/// One limiter's controls; used for the master and inside every band.
#[derive(Params)]
pub struct LimiterParams {
    #[id = "lim_on"]
    pub enabled: BoolParam,

    #[id = "mode"]
    pub mode: EnumParam<LimiterMode>,

    #[id = "thresh"]
    pub threshold: FloatParam,

    #[id = "boost"]
    pub boost: BoolParam,

    #[id = "attack"]
    pub attack: FloatParam,

    #[id = "release"]
    pub release: FloatParam,

    #[id = "knee"]
    pub knee: FloatParam,

    #[id = "alr"]
    pub alr: BoolParam,

    #[id = "alr_attack"]
    pub alr_attack: FloatParam,

    #[id = "alr_release"]
    pub alr_release: FloatParam,

    #[id = "link"]
    pub stereo_link: FloatParam,
}

#[derive(Params)]
pub struct SplitParams {
    #[id = "split_on"]
    pub enabled: BoolParam,

    #[id = "split_freq"]
    pub frequency: FloatParam,
}

#[derive(Params)]
pub struct BandParams {
    #[id = "solo"]
    pub solo: BoolParam,

    #[id = "mute"]
    pub mute: BoolParam,

    #[id = "preamp"]
    pub preamp: FloatParam,

    #[id = "makeup"]
    pub makeup: FloatParam,

    #[nested(group = "Limiter")]
    pub limiter: LimiterParams,
}

#[derive(Params)]
pub struct MbLimiterParams {
    #[id = "bypass"]
    pub bypass: BoolParam,

    #[id = "in_gain"]
    pub input_gain: FloatParam,

    #[id = "out_gain"]
    pub output_gain: FloatParam,

    #[id = "xover"]
    pub crossover: EnumParam<CrossoverMode>,

    #[id = "lookahead"]
    pub lookahead: FloatParam,

    #[id = "ovs"]
    pub oversampling: EnumParam<OversamplingMode>,

    #[id = "dither"]
    pub dithering: EnumParam<Dithering>,

    #[id = "env_boost"]
    pub envelope_boost: EnumParam<EnvelopeBoost>,

    #[id = "ext_sc"]
    pub external_sidechain: BoolParam,

    #[nested(id_prefix = "master", group = "Master")]
    pub master: LimiterParams,

    #[nested(array, group = "Split")]
    pub splits: [SplitParams; SPLITS_MAX],

    #[nested(array, group = "Band")]
    pub bands: [BandParams; BANDS_MAX],
}

fn format_percent(v: f32) -> String {
    format!("{:.0}%", v * 100.0)
}

fn format_db(v: f32) -> String {
    format!("{:.1} dB", v)
}

fn format_ms(v: f32) -> String {
    format!("{:.2} ms", v)
}

fn format_hz(v: f32) -> String {
    if v >= 1000.0 {
        format!("{:.2} kHz", v / 1000.0)
    } else {
        format!("{:.0} Hz", v)
    }
}

fn gain_param(name: String) -> FloatParam {
    FloatParam::new(
        name,
        0.0,
        FloatRange::Linear {
            min: GAIN_MIN_DB,
            max: GAIN_MAX_DB,
        },
    )
    .with_value_to_string(Arc::new(format_db))
}

fn time_param(name: String, default: f32, min: f32, max: f32) -> FloatParam {
    FloatParam::new(
        name,
        default,
        FloatRange::Skewed {
            min,
            max,
            factor: FloatRange::skew_factor(-1.0),
        },
    )
    .with_value_to_string(Arc::new(format_ms))
}

impl LimiterParams {
    fn new(prefix: &str) -> Self {
        Self {
            enabled: BoolParam::new(format!("{} Limiter", prefix), true),
            mode: EnumParam::new(format!("{} Mode", prefix), LimiterMode::default()),
            threshold: FloatParam::new(
                format!("{} Threshold", prefix),
                0.0,
                FloatRange::Linear {
                    min: THRESHOLD_MIN_DB,
                    max: THRESHOLD_MAX_DB,
                },
            )
            .with_value_to_string(Arc::new(format_db)),
            boost: BoolParam::new(format!("{} Boost", prefix), false),
            attack: time_param(
                format!("{} Attack", prefix),
                ATTACK_DFL_MS,
                ATTACK_MIN_MS,
                ATTACK_MAX_MS,
            ),
            release: time_param(
                format!("{} Release", prefix),
                RELEASE_DFL_MS,
                RELEASE_MIN_MS,
                RELEASE_MAX_MS,
            ),
            knee: FloatParam::new(
                format!("{} Knee", prefix),
                0.0,
                FloatRange::Linear {
                    min: KNEE_MIN_DB,
                    max: KNEE_MAX_DB,
                },
            )
            .with_value_to_string(Arc::new(format_db)),
            alr: BoolParam::new(format!("{} ALR", prefix), false),
            alr_attack: time_param(
                format!("{} ALR Attack", prefix),
                ALR_ATTACK_DFL_MS,
                ALR_ATTACK_MIN_MS,
                ALR_ATTACK_MAX_MS,
            ),
            alr_release: time_param(
                format!("{} ALR Release", prefix),
                ALR_RELEASE_DFL_MS,
                ALR_RELEASE_MIN_MS,
                ALR_RELEASE_MAX_MS,
            ),
            stereo_link: FloatParam::new(
                format!("{} Stereo Link", prefix),
                1.0,
                FloatRange::Linear { min: 0.0, max: 1.0 },
            )
            .with_value_to_string(Arc::new(format_percent)),
        }
    }

    fn snapshot(&self) -> LimiterSettings {
        LimiterSettings {
            enabled: self.enabled.value(),
            mode: self.mode.value(),
            threshold: db_to_lin(self.threshold.value()),
            boost: self.boost.value(),
            attack_ms: self.attack.value(),
            release_ms: self.release.value(),
            knee: db_to_lin(self.knee.value()),
            alr: self.alr.value(),
            alr_attack_ms: self.alr_attack.value(),
            alr_release_ms: self.alr_release.value(),
            stereo_link: self.stereo_link.value(),
        }
    }
}

impl SplitParams {
    fn new(index: usize) -> Self {
        Self {
            enabled: BoolParam::new(format!("Split {}", index + 1), SPLIT_ENABLED_DFL[index]),
            frequency: FloatParam::new(
                format!("Split {} Frequency", index + 1),
                SPLIT_FREQ_DFL[index],
                FloatRange::Skewed {
                    min: FREQ_MIN,
                    max: FREQ_MAX,
                    factor: FloatRange::skew_factor(-2.0),
                },
            )
            .with_value_to_string(Arc::new(format_hz)),
        }
    }
}

impl BandParams {
    fn new(index: usize) -> Self {
        let prefix = format!("Band {}", index + 1);
        Self {
            solo: BoolParam::new(format!("{} Solo", prefix), false),
            mute: BoolParam::new(format!("{} Mute", prefix), false),
            preamp: gain_param(format!("{} Preamp", prefix)),
            makeup: gain_param(format!("{} Makeup", prefix)),
            limiter: LimiterParams::new(&prefix),
        }
    }
}

impl Default for MbLimiterParams {
    fn default() -> Self {
        Self {
            bypass: BoolParam::new("Bypass", false),
            input_gain: gain_param("Input Gain".to_string()),
            output_gain: gain_param("Output Gain".to_string()),
            crossover: EnumParam::new("Crossover", CrossoverMode::default()),
            lookahead: FloatParam::new(
                "Lookahead",
                LOOKAHEAD_DFL_MS,
                FloatRange::Linear {
                    min: LOOKAHEAD_MIN_MS,
                    max: LOOKAHEAD_MAX_MS,
                },
            )
            .with_value_to_string(Arc::new(format_ms)),
            oversampling: EnumParam::new("Oversampling", OversamplingMode::default()),
            dithering: EnumParam::new("Dither", Dithering::default()),
            envelope_boost: EnumParam::new("Sidechain Boost", EnvelopeBoost::default()),
            external_sidechain: BoolParam::new("External Sidechain", false),
            master: LimiterParams::new("Master"),
            splits: std::array::from_fn(SplitParams::new),
            bands: std::array::from_fn(BandParams::new),
        }
    }
}

impl MbLimiterParams {
    /// Fill `out` from the current parameter values. Allocation free.
    pub fn snapshot(&self, out: &mut Settings) {
        out.bypass = self.bypass.value();
        out.input_gain = db_to_lin(self.input_gain.value());
        out.output_gain = db_to_lin(self.output_gain.value());
        out.crossover = self.crossover.value();
        out.lookahead_ms = self.lookahead.value();
        out.oversampling = self.oversampling.value();
        out.dithering = self.dithering.value();
        out.envelope_boost = self.envelope_boost.value();
        out.external_sidechain = self.external_sidechain.value();
        out.master = self.master.snapshot();
        for (dst, p) in out.splits.iter_mut().zip(self.splits.iter()) {
            dst.enabled = p.enabled.value();
            dst.frequency = p.frequency.value();
        }
        for (dst, p) in out.bands.iter_mut().zip(self.bands.iter()) {
            dst.solo = p.solo.value();
            dst.mute = p.mute.value();
            dst.preamp = db_to_lin(p.preamp.value());
            dst.makeup = db_to_lin(p.makeup.value());
            dst.limiter = p.limiter.snapshot();
        }
    }
}

// -----------------------------------------------------------------------------
// PLUGIN
// -----------------------------------------------------------------------------
struct MbLimiterPlugin {
    params: Arc<MbLimiterParams>,
    meters: Arc<Meters>,
    engine: Engine,
    settings: Settings,
    sample_rate: f32,
}

impl Default for MbLimiterPlugin {
    fn default() -> Self {
        let meters = Arc::new(Meters::new());
        Self {
            params: Arc::new(MbLimiterParams::default()),
            engine: Engine::new(2, meters.clone()),
            meters,
            settings: Settings::default(),
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl Plugin for MbLimiterPlugin {
    const NAME: &'static str = "MB Limiter";
    const VENDOR: &'static str = "Andrzej Marczewski";
    const URL: &'static str = "";
    const EMAIL: &'static str = "";
    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(2),
            main_output_channels: NonZeroU32::new(2),
            aux_input_ports: &[new_nonzero_u32(2)],
            names: PortNames {
                aux_inputs: &["Sidechain"],
                ..PortNames::const_default()
            },
            ..AudioIOLayout::const_default()
        },
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(1),
            main_output_channels: NonZeroU32::new(1),
            aux_input_ports: &[new_nonzero_u32(1)],
            names: PortNames {
                aux_inputs: &["Sidechain"],
                ..PortNames::const_default()
            },
            ..AudioIOLayout::const_default()
        },
    ];

    const MIDI_INPUT: MidiConfig = MidiConfig::None;
    const SAMPLE_ACCURATE_AUTOMATION: bool = false;

    type SysExMessage = ();
    type BackgroundTask = ();

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    fn initialize(
        &mut self,
        audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        context: &mut impl InitContext<Self>,
    ) -> bool {
        #[cfg(feature = "debug")]
        crate::debug::logger::init_logger();

        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.sample_rate = buffer_config.sample_rate;
            let channels = audio_io_layout
                .main_output_channels
                .map(NonZeroU32::get)
                .unwrap_or(2) as usize;

            self.params.snapshot(&mut self.settings);
            let result = permit_alloc(|| {
                let mut engine = Engine::new(channels, self.meters.clone());
                engine.update_settings(&self.settings);
                engine.initialize(self.sample_rate)?;
                anyhow::Ok(engine)
            });

            let ok = match result {
                Ok(engine) => {
                    self.engine = engine;
                    context.set_latency_samples(self.engine.latency() as u32);
                    true
                }
                Err(err) => {
                    log::error!("initialisation failed: {:#}", err);
                    false
                }
            };

            #[cfg(feature = "debug")]
            crate::debug::logger::drain_to_file();

            ok
        }))
        .unwrap_or(false)
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        aux: &mut AuxiliaryBuffers,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.process_internal(buffer, aux, context)
        }))
        .unwrap_or(ProcessStatus::Normal)
    }

    fn reset(&mut self) {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.engine.reset();
            log::info!("reset at {} Hz", self.sample_rate);

            #[cfg(feature = "debug")]
            crate::debug::logger::drain_to_file();
        }))
        .unwrap_or(());
    }
}

impl MbLimiterPlugin {
    fn process_internal(
        &mut self,
        buffer: &mut Buffer,
        aux: &mut AuxiliaryBuffers,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        self.params.snapshot(&mut self.settings);
        let latency = self.engine.latency();
        self.engine.update_settings(&self.settings);
        if self.engine.latency() != latency {
            context.set_latency_samples(self.engine.latency() as u32);
        }

        // At most a stereo key; extra aux channels are ignored
        let mut keys: [&[f32]; 2] = [&[], &[]];
        let mut key_count = 0;
        if let Some(sc) = aux.inputs.first() {
            for (key, ch) in keys.iter_mut().zip(sc.as_slice_immutable().iter()) {
                *key = &ch[..];
                key_count += 1;
            }
        }
        let sidechain = (key_count > 0).then(|| &keys[..key_count]);

        self.engine.process(buffer.as_slice(), sidechain);
        ProcessStatus::Normal
    }
}

impl ClapPlugin for MbLimiterPlugin {
    const CLAP_ID: &'static str = "com.andrzej.mblimiter";
    const CLAP_DESCRIPTION: Option<&'static str> = Some("Multiband Lookahead Peak Limiter");
    const CLAP_MANUAL_URL: Option<&'static str> = None;
    const CLAP_SUPPORT_URL: Option<&'static str> = None;
    const CLAP_FEATURES: &'static [ClapFeature] = &[
        ClapFeature::AudioEffect,
        ClapFeature::Limiter,
        ClapFeature::Mastering,
        ClapFeature::Stereo,
        ClapFeature::Mono,
    ];
}

impl Vst3Plugin for MbLimiterPlugin {
    const VST3_CLASS_ID: [u8; 16] = *b"MbLimiterLookAhd";
    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] = &[
        Vst3SubCategory::Fx,
        Vst3SubCategory::Dynamics,
        Vst3SubCategory::Mastering,
    ];
}

nih_export_clap!(MbLimiterPlugin);
nih_export_vst3!(MbLimiterPlugin);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_snapshot_matches_default_settings() {
        let params = MbLimiterParams::default();
        let mut s = Settings::single_band();
        params.snapshot(&mut s);
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn test_param_ids_are_unique_across_groups() {
        let params = MbLimiterParams::default();
        let map = params.param_map();
        let mut ids: Vec<&str> = map.iter().map(|(id, _, _)| id.as_str()).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert!(ids.contains(&"master_thresh"));
        assert!(ids.contains(&"thresh_8"));
        assert!(ids.contains(&"split_freq_7"));
    }
}
