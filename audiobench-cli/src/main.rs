//! AudioBench CLI: plays one engine instance on an output device.

use audiobench_engine::{AudioBlockView, Engine, ParamId};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_BLOCK: usize = 512;

#[derive(Debug, Default)]
struct Args {
    list_devices: bool,
    device_name: Option<String>,
    sample_rate: Option<u32>,
    channels: Option<u16>,
    duration_sec: Option<u64>,
    gain: Option<f32>,
    freq: Option<f32>,
    shape: Option<f32>,
    cutoff: Option<f32>,
    block: Option<usize>,
}

fn parse_args() -> Args {
    let mut a = Args::default();
    for s in std::env::args().skip(1) {
        if s == "--list-devices" { a.list_devices = true; continue; }
        if let Some(rest) = s.strip_prefix("--device=")       { a.device_name = Some(rest.to_string()); continue; }
        if let Some(rest) = s.strip_prefix("--sample-rate=")  { a.sample_rate = rest.parse().ok();     continue; }
        if let Some(rest) = s.strip_prefix("--channels=")     { a.channels    = rest.parse().ok();     continue; }
        if let Some(rest) = s.strip_prefix("--duration=")     { a.duration_sec= rest.parse().ok();     continue; }
        if let Some(rest) = s.strip_prefix("--gain=")         { a.gain        = rest.parse().ok();     continue; }
        if let Some(rest) = s.strip_prefix("--freq=")         { a.freq        = rest.parse().ok();     continue; }
        if let Some(rest) = s.strip_prefix("--shape=")        { a.shape       = rest.parse().ok();     continue; }
        if let Some(rest) = s.strip_prefix("--cutoff=")       { a.cutoff      = rest.parse().ok();     continue; }
        if let Some(rest) = s.strip_prefix("--block=")        { a.block       = rest.parse().ok();     continue; }
        log::warn!("unknown arg: {s}");
    }
    a
}

fn list_output_devices() -> Result<(), Box<dyn Error>> {
    let host = cpal::default_host();
    println!("Available output devices:");
    for dev in host.output_devices()? {
        println!("- {}", dev.name()?);
    }
    Ok(())
}

fn pick_device(args: &Args) -> Result<cpal::Device, Box<dyn Error>> {
    let host = cpal::default_host();
    if let Some(name) = &args.device_name {
        for d in host.output_devices()? {
            if d.name()? == *name { return Ok(d); }
        }
        return Err(format!("requested device not found: {name}").into());
    }
    host.default_output_device()
        .ok_or_else(|| "no default output device".into())
}

fn choose_config(
    device: &cpal::Device,
    req_sr: Option<u32>,
    req_ch: Option<u16>,
) -> Result<cpal::SupportedStreamConfig, Box<dyn Error>> {
    if req_sr.is_none() && req_ch.is_none() {
        return Ok(device.default_output_config()?);
    }

    // Closest range: sample rate first, then channel count.
    let mut best: Option<(u64, cpal::SupportedStreamConfigRange)> = None;
    for range in device.supported_output_configs()? {
        let ch     = range.channels();
        let sr_min = range.min_sample_rate().0;
        let sr_max = range.max_sample_rate().0;

        let ch_pen = req_ch.map_or(0, |c| u64::from(ch.abs_diff(c)));
        let sr_pen = req_sr.map_or(0, |sr| {
            if (sr_min..=sr_max).contains(&sr) { 0 } else { u64::from(sr_min.abs_diff(sr).min(sr_max.abs_diff(sr))) }
        });

        let score = sr_pen.saturating_mul(1000) + ch_pen;
        if best.as_ref().map_or(true, |(s, _)| score < *s) {
            best = Some((score, range));
        }
    }

    let (_, range) = best.ok_or("no supported output configs")?;
    let pick_sr = match req_sr {
        Some(sr) => cpal::SampleRate(sr.clamp(range.min_sample_rate().0, range.max_sample_rate().0)),
        None => range.max_sample_rate(),
    };
    Ok(range.with_sample_rate(pick_sr))
}

/// Running peak shared with the main thread as `f32` bits.
#[derive(Default)]
struct PeakMeter(AtomicU32);

impl PeakMeter {
    fn record(&self, block: &[f32]) {
        let peak = block.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        let _ = self.0.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            (peak > f32::from_bits(bits)).then_some(peak.to_bits())
        });
    }

    fn take(&self) -> f32 {
        f32::from_bits(self.0.swap(0, Ordering::Relaxed))
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    cfg: &cpal::StreamConfig,
    mut engine: Engine,
    block: usize,
    meter: Arc<PeakMeter>,
) -> Result<cpal::Stream, Box<dyn Error>>
where
    T: cpal::Sample + cpal::FromSample<f32> + cpal::SizedSample + Send + 'static,
{
    let channels = usize::from(cfg.channels);
    // Planar scratch; allocated here, never in the callback.
    let mut scratch = vec![0.0_f32; block * channels];

    let stream = device.build_output_stream(
        cfg,
        move |output: &mut [T], _| {
            for chunk in output.chunks_mut(block * channels) {
                let frames = chunk.len() / channels;
                let planar = &mut scratch[..frames * channels];
                planar.fill(0.0);
                let rendered = AudioBlockView::planar(planar, channels, frames)
                    .and_then(|mut view| engine.process(&mut view));
                if rendered.is_err() {
                    planar.fill(0.0);
                }
                meter.record(planar);

                for (i, frame) in chunk.chunks_mut(channels).enumerate() {
                    for (c, out) in frame.iter_mut().enumerate() {
                        *out = T::from_sample(planar[c * frames + i].clamp(-1.0, 1.0));
                    }
                }
            }
        },
        |e| log::error!("stream error: {e}"),
        None,
    )?;

    Ok(stream)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args();

    if args.list_devices {
        list_output_devices()?;
        return Ok(());
    }

    let device  = pick_device(&args)?;
    let sup_cfg = choose_config(&device, args.sample_rate, args.channels)?;
    let sample_format = sup_cfg.sample_format();
    let mut cfg = sup_cfg.config();

    if let Some(sr) = args.sample_rate { cfg.sample_rate = cpal::SampleRate(sr); }
    if let Some(ch) = args.channels    { cfg.channels    = ch; }
    let block = args.block.unwrap_or(DEFAULT_BLOCK).max(1);

    let mut engine = Engine::new();
    engine.prepare(f64::from(cfg.sample_rate.0), block)?;
    let params = Arc::clone(engine.params());
    params.set_id(ParamId::Gain, args.gain.unwrap_or(0.35))?;
    if let Some(v) = args.freq   { params.set_id(ParamId::Frequency, v)?; }
    if let Some(v) = args.shape  { params.set_id(ParamId::Shape, v)?; }
    if let Some(v) = args.cutoff { params.set_id(ParamId::Cutoff, v)?; }

    log::info!("device: {}", device.name()?);
    log::info!("stream config: {cfg:?} (sample format {sample_format:?}), block {block}");
    log::info!("params: {params:?}");

    let meter = Arc::new(PeakMeter::default());
    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &cfg, engine, block, Arc::clone(&meter))?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &cfg, engine, block, Arc::clone(&meter))?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &cfg, engine, block, Arc::clone(&meter))?,
        other => return Err(format!("unsupported device sample format: {other:?}").into()),
    };

    stream.play()?;
    println!("Press Ctrl+C to stop…");

    let deadline = args.duration_sec.map(|d| Instant::now() + Duration::from_secs(d));
    loop {
        std::thread::sleep(Duration::from_secs(1));
        log::info!("peak {:.3}", meter.take());
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_keeps_the_running_maximum() {
        let m = PeakMeter::default();
        m.record(&[0.1, -0.4]);
        m.record(&[0.2]);
        assert_eq!(m.take(), 0.4);
        assert_eq!(m.take(), 0.0);
    }
}
