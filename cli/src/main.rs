use std::{
    fs,
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use argh::FromArgs;
use log::{info, warn};
use netcart::{
    core::{
        audio::{CpalOutput, Synthesizer},
        disk::{FileDisk, MemoryDisk, UserwideDisk},
    },
    Backend, RuntimeConfig, State, WasmiBackend,
};

const FRAME_DURATION: Duration = Duration::from_micros(1_000_000 / 60);

#[derive(FromArgs)]
#[argh(description = "Run WASM-4 compatible carts headless.")]
struct Args {
    #[argh(positional)]
    path: PathBuf,
    #[argh(
        option,
        short = 'n',
        default = "60",
        description = "number of frames to run"
    )]
    frames: u32,
    #[argh(option, short = 'o', description = "write a state snapshot here when done")]
    save_state: Option<PathBuf>,
    #[argh(option, short = 'l', description = "resume from a state snapshot")]
    load_state: Option<PathBuf>,
    #[argh(
        option,
        default = "String::from(\"file\")",
        description = "where the cart disk lives: file, userwide or memory"
    )]
    disk: String,
    #[argh(switch, description = "play sound and run at 60 frames per second")]
    audio: bool,
    #[argh(switch, description = "accept carts larger than 64 KiB")]
    no_size_limit: bool,
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();

    pretty_env_logger::init();

    let cart = fs::read(&args.path)
        .with_context(|| format!("failed to read cart {}", args.path.display()))?;
    let name = args
        .path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("cart")
        .to_string();

    let config = RuntimeConfig::default()
        .with_enforce_size_limit(!args.no_size_limit)
        .with_disk_name(name);

    let mut backend = WasmiBackend::new(&config)?;
    match args.disk.as_str() {
        "file" => backend.set_disk_manager(Box::new(FileDisk::new(&args.path))),
        "userwide" => backend.set_disk_manager(Box::new(UserwideDisk::new(&config.disk_name)?)),
        "memory" => backend.set_disk_manager(Box::new(MemoryDisk::default())),
        other => anyhow::bail!("unknown disk kind {other:?}"),
    }
    backend.load(&cart)?;

    let _output = if args.audio {
        let receiver = backend
            .take_audio_receiver()
            .context("audio queue already in use")?;
        Some(CpalOutput::start(Synthesizer::new(config.sample_rate, receiver))?)
    } else {
        None
    };

    match &args.load_state {
        Some(path) => {
            let bytes = fs::read(path)
                .with_context(|| format!("failed to read state {}", path.display()))?;
            backend.load_state(&State::from_bytes(&bytes)?)?;
            info!("resumed from {}", path.display());
        }
        None => backend.call_start(),
    }

    let started = Instant::now();
    let mut next_frame = started;
    for _ in 0..args.frames {
        backend.call_update();
        if args.audio {
            next_frame += FRAME_DURATION;
            if let Some(wait) = next_frame.checked_duration_since(Instant::now()) {
                thread::sleep(wait);
            }
        }
    }
    info!("ran {} frames in {:?}", args.frames, started.elapsed());

    if let Some(reason) = backend.crash_reason() {
        warn!("cart crashed: {}", reason);
    }

    if let Some(path) = &args.save_state {
        fs::write(path, backend.save_state().to_bytes()?)
            .with_context(|| format!("failed to write state {}", path.display()))?;
        info!("state written to {}", path.display());
    }

    Ok(())
}
