//! Example: stream a WAV file through the denoiser as a live player would
//!
//! A tiny in-process playback graph renders the file in 128-sample callbacks
//! at real-time pace while the engine runs on its own thread, exactly like an
//! audio device would drive it. Enable/disable can be toggled mid-stream.
//!
//! Usage: cargo run --example stream_file --features onnx -- input.wav output.wav [model_dir] [--config denoise.ini] [--toggle-every SECONDS]

use denoise_rt::{
    DenoiseConfig, DenoiseNode, EngineController, HandleId, OrtSessionFactory, PlaybackGraph, Result,
    MODEL_SAMPLE_RATE,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const BLOCK: usize = 128;

/// Mono graph owning the tap; `render` plays the role of the device callback.
struct FilePlayer {
    sample_rate: u32,
    node: Mutex<Option<DenoiseNode>>,
    connected: AtomicBool,
}

impl FilePlayer {
    fn render(&self, input: &[f32], output: &mut [f32]) {
        let mut node = self.node.lock();
        match node.as_mut() {
            Some(node) if self.connected.load(Ordering::Acquire) => node.process(&[input], &mut [output]),
            _ => output.copy_from_slice(input),
        }
    }
}

impl PlaybackGraph for FilePlayer {
    fn handle_id(&self) -> HandleId {
        1
    }

    fn is_live(&self) -> bool {
        true
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn output_channels(&self) -> usize {
        1
    }

    fn create_tap(&self, node: DenoiseNode) -> Result<()> {
        *self.node.lock() = Some(node);
        Ok(())
    }

    fn connect_tap(&self) -> Result<()> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    fn disconnect_tap(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn read_mono(path: &str) -> std::result::Result<(Vec<f32>, u32), Box<dyn std::error::Error>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    println!("Input: {} Hz, {} ch, {:?}", spec.sample_rate, spec.channels, spec.sample_format);

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };
    let channels = spec.channels.max(1) as usize;
    let mono = samples
        .chunks(channels)
        .map(|c| c.iter().sum::<f32>() / c.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let mut positional = Vec::new();
    let mut i = 1;
    while i < args.len() {
        if args[i].starts_with("--") {
            i += 2;
        } else {
            positional.push(args[i].as_str());
            i += 1;
        }
    }
    if positional.len() < 2 {
        eprintln!(
            "Usage: {} <input.wav> <output.wav> [model_dir] [--config denoise.ini] [--toggle-every SECONDS]",
            args[0]
        );
        std::process::exit(1);
    }
    let model_dir = positional
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(env!("CARGO_MANIFEST_DIR")).join("models/dfn3_streaming"));
    let config = match flag_value(&args, "--config") {
        Some(path) => DenoiseConfig::from_file(Path::new(path))?,
        None => DenoiseConfig::default(),
    };
    let toggle_every: Option<f32> = flag_value(&args, "--toggle-every").map(str::parse).transpose()?;

    let (input, sample_rate) = read_mono(positional[0])?;
    if sample_rate != MODEL_SAMPLE_RATE {
        eprintln!("Warning: input is {} Hz, the model expects {} Hz. Resample first!", sample_rate, MODEL_SAMPLE_RATE);
    }

    let factory = OrtSessionFactory::from_config(&config);
    let mut engine = EngineController::new(config, Box::new(factory));
    engine.init(&model_dir, sample_rate)?;
    println!("Engine: {}", engine.status());

    let player = Arc::new(FilePlayer {
        sample_rate,
        node: Mutex::new(None),
        connected: AtomicBool::new(false),
    });
    engine.attach(player.clone())?;
    engine.set_enabled(true);

    let block_time = Duration::from_secs_f64(BLOCK as f64 / sample_rate as f64);
    let toggle_blocks = toggle_every.map(|s| ((s * sample_rate as f32) as usize / BLOCK).max(1));
    let mut output = vec![0.0f32; input.len()];
    let start = Instant::now();

    for (n, (inp, out)) in input.chunks(BLOCK).zip(output.chunks_mut(BLOCK)).enumerate() {
        if let Some(every) = toggle_blocks {
            if n > 0 && n % every == 0 {
                let enable = !engine.is_enabled();
                println!("{:.2}s: denoising {}", (n * BLOCK) as f32 / sample_rate as f32, if enable { "on" } else { "off" });
                engine.set_enabled(enable);
            }
        }
        player.render(inp, out);

        // Pace like a sound card would.
        let due = block_time * (n as u32 + 1);
        if let Some(wait) = due.checked_sub(start.elapsed()) {
            std::thread::sleep(wait);
        }
    }

    if let Some(stats) = engine.stats() {
        println!(
            "Frames: {} submitted, {} applied ({} passthrough, {} stale); {} underruns; {} input samples dropped",
            stats.frames_submitted,
            stats.frames_applied,
            stats.passthrough_frames,
            stats.stale_results,
            stats.underruns,
            stats.dropped_input_samples
        );
    }
    engine.dispose();

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(positional[1], spec)?;
    for s in &output {
        writer.write_sample(*s)?;
    }
    writer.finalize()?;
    println!("Wrote {} ({:.2}s)", positional[1], output.len() as f32 / sample_rate as f32);
    Ok(())
}
