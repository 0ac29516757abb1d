//! Settings snapshot consumed by the engine.
//!
//! The plugin builds one [`Settings`] from its parameters at the start of
//! every block; the engine never touches host parameters directly. The same
//! struct is what the offline render tool loads from JSON.

use nih_plug::prelude::Enum;
use serde::{Deserialize, Serialize};

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum number of bands (and therefore of band limiters per channel).
pub const BANDS_MAX: usize = 8;
/// Split points sit between bands.
pub const SPLITS_MAX: usize = BANDS_MAX - 1;
/// Largest supported oversampling ratio.
pub const OVERSAMPLING_MAX: usize = 8;
/// Base-rate processing chunk. Host blocks longer than this are split.
pub const BUFFER_SIZE: usize = 0x1000;

pub const FREQ_MIN: f32 = 10.0;
pub const FREQ_MAX: f32 = 20_000.0;
pub const SPLIT_FREQ_DFL: [f32; SPLITS_MAX] = [40.0, 100.0, 252.0, 632.0, 1587.0, 3984.0, 10_000.0];
pub const SPLIT_ENABLED_DFL: [bool; SPLITS_MAX] = [false, true, false, true, false, true, false];

pub const LOOKAHEAD_MIN_MS: f32 = 0.1;
pub const LOOKAHEAD_MAX_MS: f32 = 20.0;
pub const LOOKAHEAD_DFL_MS: f32 = 5.0;

pub const ATTACK_MIN_MS: f32 = 0.25;
pub const ATTACK_MAX_MS: f32 = 20.0;
pub const ATTACK_DFL_MS: f32 = 5.0;

pub const RELEASE_MIN_MS: f32 = 0.25;
pub const RELEASE_MAX_MS: f32 = 20.0;
pub const RELEASE_DFL_MS: f32 = 5.0;

pub const ALR_ATTACK_MIN_MS: f32 = 0.1;
pub const ALR_ATTACK_MAX_MS: f32 = 200.0;
pub const ALR_ATTACK_DFL_MS: f32 = 5.0;

pub const ALR_RELEASE_MIN_MS: f32 = 10.0;
pub const ALR_RELEASE_MAX_MS: f32 = 1000.0;
pub const ALR_RELEASE_DFL_MS: f32 = 50.0;

pub const THRESHOLD_MIN_DB: f32 = -48.0;
pub const THRESHOLD_MAX_DB: f32 = 0.0;

pub const KNEE_MIN_DB: f32 = -12.0;
pub const KNEE_MAX_DB: f32 = 12.0;

pub const GAIN_MIN_DB: f32 = -48.0;
pub const GAIN_MAX_DB: f32 = 48.0;

/// Linear-phase crossover window rank at the reference rate.
pub const FFT_XOVER_RANK_MIN: usize = 12;
/// Reference rate for the linear-phase window rank.
pub const FFT_XOVER_FREQ_MIN: usize = 44_100;

// =============================================================================
// SELECTORS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[repr(usize)]
pub enum CrossoverMode {
    #[serde(rename = "Classic")]
    #[name = "Classic"]
    Classic,
    #[serde(rename = "Linear Phase")]
    #[name = "Linear Phase"]
    LinearPhase,
}

impl Default for CrossoverMode {
    fn default() -> Self {
        CrossoverMode::Classic
    }
}

/// Interpolation kernel used inside attack and release segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveFamily {
    Hermite,
    Exponential,
    Linear,
}

/// Placement of the attack/hold/release segments around a peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeShape {
    Thin,
    Wide,
    Tail,
    Duck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[repr(usize)]
pub enum LimiterMode {
    #[name = "Herm Thin"]
    HermThin,
    #[name = "Herm Wide"]
    HermWide,
    #[name = "Herm Tail"]
    HermTail,
    #[name = "Herm Duck"]
    HermDuck,
    #[name = "Exp Thin"]
    ExpThin,
    #[name = "Exp Wide"]
    ExpWide,
    #[name = "Exp Tail"]
    ExpTail,
    #[name = "Exp Duck"]
    ExpDuck,
    #[name = "Line Thin"]
    LineThin,
    #[name = "Line Wide"]
    LineWide,
    #[name = "Line Tail"]
    LineTail,
    #[name = "Line Duck"]
    LineDuck,
}

impl LimiterMode {
    pub const ALL: [LimiterMode; 12] = [
        LimiterMode::HermThin,
        LimiterMode::HermWide,
        LimiterMode::HermTail,
        LimiterMode::HermDuck,
        LimiterMode::ExpThin,
        LimiterMode::ExpWide,
        LimiterMode::ExpTail,
        LimiterMode::ExpDuck,
        LimiterMode::LineThin,
        LimiterMode::LineWide,
        LimiterMode::LineTail,
        LimiterMode::LineDuck,
    ];

    pub fn family(self) -> CurveFamily {
        match self {
            LimiterMode::HermThin
            | LimiterMode::HermWide
            | LimiterMode::HermTail
            | LimiterMode::HermDuck => CurveFamily::Hermite,
            LimiterMode::ExpThin
            | LimiterMode::ExpWide
            | LimiterMode::ExpTail
            | LimiterMode::ExpDuck => CurveFamily::Exponential,
            _ => CurveFamily::Linear,
        }
    }

    pub fn shape(self) -> EnvelopeShape {
        match self {
            LimiterMode::HermThin | LimiterMode::ExpThin | LimiterMode::LineThin => {
                EnvelopeShape::Thin
            }
            LimiterMode::HermWide | LimiterMode::ExpWide | LimiterMode::LineWide => {
                EnvelopeShape::Wide
            }
            LimiterMode::HermTail | LimiterMode::ExpTail | LimiterMode::LineTail => {
                EnvelopeShape::Tail
            }
            LimiterMode::HermDuck | LimiterMode::ExpDuck | LimiterMode::LineDuck => {
                EnvelopeShape::Duck
            }
        }
    }
}

impl Default for LimiterMode {
    fn default() -> Self {
        LimiterMode::HermThin
    }
}

/// Oversampling ratio, Lanczos kernel size and anti-alias filtering.
///
/// `Half` variants decimate without filtering, `Full` variants run the
/// anti-alias lowpass first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[repr(usize)]
pub enum OversamplingMode {
    #[name = "None"]
    None,
    #[name = "Half x2/2L"]
    Half2x2,
    #[name = "Half x2/3L"]
    Half2x3,
    #[name = "Half x3/2L"]
    Half3x2,
    #[name = "Half x3/3L"]
    Half3x3,
    #[name = "Half x4/2L"]
    Half4x2,
    #[name = "Half x4/3L"]
    Half4x3,
    #[name = "Half x6/2L"]
    Half6x2,
    #[name = "Half x6/3L"]
    Half6x3,
    #[name = "Half x8/2L"]
    Half8x2,
    #[name = "Half x8/3L"]
    Half8x3,
    #[name = "Full x2/2L"]
    Full2x2,
    #[name = "Full x2/3L"]
    Full2x3,
    #[name = "Full x3/2L"]
    Full3x2,
    #[name = "Full x3/3L"]
    Full3x3,
    #[name = "Full x4/2L"]
    Full4x2,
    #[name = "Full x4/3L"]
    Full4x3,
    #[name = "Full x6/2L"]
    Full6x2,
    #[name = "Full x6/3L"]
    Full6x3,
    #[name = "Full x8/2L"]
    Full8x2,
    #[name = "Full x8/3L"]
    Full8x3,
}

impl OversamplingMode {
    pub fn ratio(self) -> usize {
        use OversamplingMode::*;
        match self {
            None => 1,
            Half2x2 | Half2x3 | Full2x2 | Full2x3 => 2,
            Half3x2 | Half3x3 | Full3x2 | Full3x3 => 3,
            Half4x2 | Half4x3 | Full4x2 | Full4x3 => 4,
            Half6x2 | Half6x3 | Full6x2 | Full6x3 => 6,
            Half8x2 | Half8x3 | Full8x2 | Full8x3 => 8,
        }
    }

    /// Lanczos kernel half-width in base-rate samples.
    pub fn lobes(self) -> usize {
        use OversamplingMode::*;
        match self {
            None => 0,
            Half2x3 | Half3x3 | Half4x3 | Half6x3 | Half8x3 | Full2x3 | Full3x3 | Full4x3
            | Full6x3 | Full8x3 => 3,
            _ => 2,
        }
    }

    pub fn filtering(self) -> bool {
        use OversamplingMode::*;
        matches!(
            self,
            Full2x2
                | Full2x3
                | Full3x2
                | Full3x3
                | Full4x2
                | Full4x3
                | Full6x2
                | Full6x3
                | Full8x2
                | Full8x3
        )
    }
}

impl Default for OversamplingMode {
    fn default() -> Self {
        OversamplingMode::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[repr(usize)]
pub enum Dithering {
    #[name = "None"]
    None,
    #[name = "7 bit"]
    Bits7,
    #[name = "8 bit"]
    Bits8,
    #[name = "11 bit"]
    Bits11,
    #[name = "12 bit"]
    Bits12,
    #[name = "15 bit"]
    Bits15,
    #[name = "16 bit"]
    Bits16,
    #[name = "23 bit"]
    Bits23,
    #[name = "24 bit"]
    Bits24,
}

impl Dithering {
    pub fn bits(self) -> u32 {
        match self {
            Dithering::None => 0,
            Dithering::Bits7 => 7,
            Dithering::Bits8 => 8,
            Dithering::Bits11 => 11,
            Dithering::Bits12 => 12,
            Dithering::Bits15 => 15,
            Dithering::Bits16 => 16,
            Dithering::Bits23 => 23,
            Dithering::Bits24 => 24,
        }
    }
}

impl Default for Dithering {
    fn default() -> Self {
        Dithering::None
    }
}

/// Sidechain pre-emphasis applied before band splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[repr(usize)]
pub enum EnvelopeBoost {
    #[name = "None"]
    Off,
    #[name = "Pink BT"]
    PinkBt,
    #[name = "Pink MT"]
    PinkMt,
    #[name = "Brown BT"]
    BrownBt,
    #[name = "Brown MT"]
    BrownMt,
}

impl Default for EnvelopeBoost {
    fn default() -> Self {
        EnvelopeBoost::PinkBt
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// One limiter instance (band or master). Gains are linear.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterSettings {
    pub enabled: bool,
    pub mode: LimiterMode,
    pub threshold: f32,
    pub boost: bool,
    pub attack_ms: f32,
    pub release_ms: f32,
    pub knee: f32,
    pub alr: bool,
    pub alr_attack_ms: f32,
    pub alr_release_ms: f32,
    /// 0 = independent channels, 1 = fully linked.
    pub stereo_link: f32,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: LimiterMode::default(),
            threshold: 1.0,
            boost: false,
            attack_ms: ATTACK_DFL_MS,
            release_ms: RELEASE_DFL_MS,
            knee: 1.0,
            alr: false,
            alr_attack_ms: ALR_ATTACK_DFL_MS,
            alr_release_ms: ALR_RELEASE_DFL_MS,
            stereo_link: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitSettings {
    pub enabled: bool,
    pub frequency: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandSettings {
    pub solo: bool,
    pub mute: bool,
    pub preamp: f32,
    pub makeup: f32,
    pub limiter: LimiterSettings,
}

impl Default for BandSettings {
    fn default() -> Self {
        Self {
            solo: false,
            mute: false,
            preamp: 1.0,
            makeup: 1.0,
            limiter: LimiterSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bypass: bool,
    pub input_gain: f32,
    pub output_gain: f32,
    pub crossover: CrossoverMode,
    pub lookahead_ms: f32,
    pub oversampling: OversamplingMode,
    pub dithering: Dithering,
    pub envelope_boost: EnvelopeBoost,
    pub external_sidechain: bool,
    pub master: LimiterSettings,
    pub splits: [SplitSettings; SPLITS_MAX],
    pub bands: [BandSettings; BANDS_MAX],
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bypass: false,
            input_gain: 1.0,
            output_gain: 1.0,
            crossover: CrossoverMode::default(),
            lookahead_ms: LOOKAHEAD_DFL_MS,
            oversampling: OversamplingMode::default(),
            dithering: Dithering::default(),
            envelope_boost: EnvelopeBoost::default(),
            external_sidechain: false,
            master: LimiterSettings::default(),
            splits: std::array::from_fn(|i| SplitSettings {
                enabled: SPLIT_ENABLED_DFL[i],
                frequency: SPLIT_FREQ_DFL[i],
            }),
            bands: [BandSettings::default(); BANDS_MAX],
        }
    }
}

impl Settings {
    /// All splits off: one full-range band plus the master stage.
    pub fn single_band() -> Self {
        let mut s = Self::default();
        for split in s.splits.iter_mut() {
            split.enabled = false;
        }
        s
    }
}
