//! Offline render: `mbl_render <input.wav> <output.wav> [settings.json]`.
//!
//! Runs the file through the limiter engine with latency compensation and
//! prints sample peak, true peak and integrated loudness of the result.
use anyhow::{Context, Result};
use ebur128::{EbuR128, Mode};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use mblimiter::engine::Engine;
use mblimiter::meters::Meters;
use mblimiter::settings::{Settings, BUFFER_SIZE};
use std::path::PathBuf;
use std::sync::Arc;

fn read_planar(path: &PathBuf) -> Result<(WavSpec, Vec<Vec<f32>>)> {
    let reader = WavReader::open(path)
        .with_context(|| format!("failed to open input WAV '{}'", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    anyhow::ensure!(channels > 0, "input has no channels");

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .context("decoding float samples")?,
        SampleFormat::Int => {
            let full_scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / full_scale))
                .collect::<Result<_, _>>()
                .context("decoding integer samples")?
        }
    };

    let frames = interleaved.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (dst, &s) in planar.iter_mut().zip(frame) {
            dst.push(s);
        }
    }
    Ok((spec, planar))
}

fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read settings '{}'", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse settings '{}'", path.display()))
}

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let input = args
        .next()
        .map(PathBuf::from)
        .context("usage: mbl_render <input.wav> <output.wav> [settings.json]")?;
    let output = args
        .next()
        .map(PathBuf::from)
        .context("missing output path")?;
    let settings = load_settings(args.next().map(PathBuf::from))?;

    let (spec, mut planar) = read_planar(&input)?;
    let channels = planar.len();
    let frames = planar[0].len();
    let sample_rate = spec.sample_rate as f32;

    let meters = Arc::new(Meters::new());
    let mut engine = Engine::new(channels, meters.clone());
    engine.update_settings(&settings);
    engine
        .initialize(sample_rate)
        .context("engine initialisation")?;
    let latency = engine.latency();
    log::info!(
        "rendering {} frame(s), {} channel(s), latency {}",
        frames,
        channels,
        latency
    );

    // Flush the lookahead tail so the compensated output keeps every frame
    for ch in planar.iter_mut() {
        ch.resize(frames + latency, 0.0);
    }
    let total = frames + latency;
    let mut offset = 0;
    while offset < total {
        let end = (offset + BUFFER_SIZE).min(total);
        let mut io: Vec<&mut [f32]> = planar.iter_mut().map(|c| &mut c[offset..end]).collect();
        engine.process(&mut io, None);
        offset = end;
    }

    let out_spec = WavSpec {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(&output, out_spec)
        .with_context(|| format!("failed to create output WAV '{}'", output.display()))?;
    let mut meter = EbuR128::new(channels as u32, spec.sample_rate, Mode::I | Mode::TRUE_PEAK)
        .context("creating loudness meter")?;
    let mut frame = vec![0.0f32; channels];
    let mut sample_peak = 0.0f32;
    for i in latency..total {
        for (dst, ch) in frame.iter_mut().zip(planar.iter()) {
            *dst = ch[i];
            sample_peak = sample_peak.max(dst.abs());
            writer.write_sample(*dst)?;
        }
        meter
            .add_frames_f32(&frame)
            .context("feeding loudness meter")?;
    }
    writer.finalize().context("finalising output WAV")?;

    let true_peak = (0..channels as u32)
        .filter_map(|c| meter.true_peak(c).ok())
        .fold(0.0f64, f64::max);
    let lufs = meter.loudness_global().ok();

    println!("Render summary for '{}':", input.display());
    println!("  frames rendered  : {}", frames);
    println!("  latency          : {} samples", latency);
    println!("  sample peak      : {:.2} dBFS", 20.0 * sample_peak.max(1e-9).log10());
    println!("  true peak        : {:.2} dBTP", 20.0 * true_peak.max(1e-9).log10());
    match lufs {
        Some(l) if l.is_finite() => println!("  integrated       : {:.2} LUFS", l),
        _ => println!("  integrated       : n/a"),
    }
    Ok(())
}
