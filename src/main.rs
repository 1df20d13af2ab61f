use std::{io, path::PathBuf};

use anyhow::Result;
use clap::Parser;
use log::info;
use tunechain::{
    config::{EffectParams, PipelineConfig},
    device::{AudioDevice, WavInput},
    pipeline,
};

/// Record a voice, clean it up and run it through autotune, pitch shift,
/// echo and reverb.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Recording length in seconds.
    #[arg(long, default_value_t = 170.0)]
    duration: f32,

    #[arg(long, default_value_t = 44100)]
    sample_rate: u32,

    /// Process this WAV file instead of recording from the microphone.
    #[arg(long)]
    input: Option<PathBuf>,

    #[arg(long, default_value = "raw_recording.wav")]
    raw_output: PathBuf,

    #[arg(long, default_value = "processed_output.wav")]
    output: PathBuf,

    #[arg(long, default_value = "plots")]
    plot_dir: PathBuf,

    #[arg(long)]
    no_plots: bool,

    #[arg(long)]
    no_playback: bool,

    /// Use the default effect settings instead of asking for them.
    #[arg(long)]
    defaults: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PipelineConfig {
        sample_rate: args.sample_rate,
        duration_secs: args.duration,
        raw_path: args.raw_output,
        output_path: args.output,
        plot_dir: (!args.no_plots).then_some(args.plot_dir),
        playback: !args.no_playback,
        ..Default::default()
    };

    let params = if args.defaults {
        EffectParams::default()
    } else {
        EffectParams::prompt(io::stdin().lock(), io::stdout())?
    };
    info!("effect settings: {params:?}");

    let mut device: Box<dyn AudioDevice> = match args.input {
        Some(path) => {
            let input = WavInput::open(&path)?;
            config.sample_rate = input.sample_rate();
            Box::new(input)
        }
        None => system_device()?,
    };

    pipeline::run(&config, &params, device.as_mut())?;
    Ok(())
}

#[cfg(feature = "device")]
fn system_device() -> Result<Box<dyn AudioDevice>> {
    Ok(Box::new(tunechain::device::SystemDevice::new()))
}

#[cfg(not(feature = "device"))]
fn system_device() -> Result<Box<dyn AudioDevice>> {
    anyhow::bail!("built without the `device` feature; pass --input <wav> or rebuild with --features device")
}
