mod config;
mod host;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use config::DemoConfig;
use host::DemoHost;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uacstream_engine::hw::sim::simulated_device;
use uacstream_engine::{
    BufferRequest, Driver, HostDriver, MemorySettingsStore, SettingsStore, TomlSettingsStore,
};

const POLL: Duration = Duration::from_millis(100);
const STATS_EVERY: u32 = 10;

#[derive(Parser)]
#[command(name = "uacstream", version, about = "Stream a simulated USB audio device")]
struct Cli {
    /// TOML demo configuration
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Seconds to stream, 0 runs until interrupted
    #[arg(short, long)]
    seconds: Option<u64>,
    /// Buffer size in frames, defaults to the driver's preferred size
    #[arg(short, long)]
    buffer_frames: Option<u32>,
    /// Sample rate to select before streaming
    #[arg(short = 'r', long)]
    sample_rate: Option<u32>,
    /// Settings file, kept in memory when omitted
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(short, long)]
    verbose: bool,
}

fn start_stream(driver: &mut Driver, host: &Arc<DemoHost>, frames: Option<u32>) -> Result<()> {
    let counts = driver.channels()?;
    let range = driver.buffer_size()?;
    let frames = match frames {
        Some(frames) if range.contains(frames) => frames,
        Some(frames) => {
            warn!(
                "{} frames outside {}..={}, using {}",
                frames, range.min, range.max, range.preferred
            );
            range.preferred
        }
        None => range.preferred,
    };
    let requests: Vec<BufferRequest> = (0..counts.outputs)
        .map(BufferRequest::output)
        .chain((0..counts.inputs).map(BufferRequest::input))
        .collect();
    let infos = driver
        .create_buffers(&requests, frames, host.clone())
        .with_context(|| format!("creating {} frame buffers", frames))?;
    let rate = driver.sample_rate()?;
    host.attach(infos, driver.settings().sample_format(), rate);
    driver.start()?;
    let latencies = driver.latencies()?;
    info!(
        "streaming {} in / {} out at {} Hz, {} frames, latency {} / {} frames",
        counts.inputs, counts.outputs, rate, frames, latencies.input, latencies.output
    );
    Ok(())
}

fn stop_stream(driver: &mut Driver, host: &DemoHost) -> Result<()> {
    driver.dispose_buffers()?;
    host.detach();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => DemoConfig::load(path)?,
        None => DemoConfig::default(),
    };
    if let Some(seconds) = cli.seconds {
        config.stream.seconds = seconds;
    }
    if cli.buffer_frames.is_some() {
        config.stream.buffer_frames = cli.buffer_frames;
    }
    if cli.sample_rate.is_some() {
        config.stream.sample_rate = cli.sample_rate;
    }
    if cli.settings.is_some() {
        config.settings_path = cli.settings.clone();
    }

    let store: Box<dyn SettingsStore> = match &config.settings_path {
        Some(path) => Box::new(TomlSettingsStore::new(path)),
        None => Box::new(MemorySettingsStore::new()),
    };
    let (description, _device) = simulated_device(&config.device);
    let mut driver = Driver::new(description, store, config.driver.clone());
    driver.init()?;
    info!(
        "{} version {}, rates {:?}",
        driver.driver_name(),
        driver.driver_version(),
        config.device.rates
    );
    if let Some(rate) = config.stream.sample_rate {
        driver
            .set_sample_rate(rate)
            .with_context(|| format!("selecting {} Hz", rate))?;
    }

    let host = Arc::new(DemoHost::new(config.stream.tone_hz, config.stream.level));
    start_stream(&mut driver, &host, config.stream.buffer_frames)?;

    let run_for = match config.stream.seconds {
        0 => Duration::from_secs(u32::MAX as u64),
        s => Duration::from_secs(s),
    };
    let deadline = tokio::time::sleep(run_for);
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(POLL);
    let mut ticks = 0_u32;
    let mut last_switches = 0_u64;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = &mut deadline => break,
            _ = poll.tick() => {
                if host.take_reset_request() {
                    warn!("driver requested a reset, recreating buffers");
                    stop_stream(&mut driver, &host)?;
                    start_stream(&mut driver, &host, config.stream.buffer_frames)?;
                }
                ticks += 1;
                if ticks % STATS_EVERY == 0 {
                    let stats = driver.stats();
                    let switches = host.switches();
                    info!(
                        "{} switches/s, read slot {}, write slot {}, resets {} ({} watchdog), input peak {:.3}",
                        switches - last_switches,
                        stats.read_slot,
                        stats.write_slot,
                        stats.resets,
                        stats.watchdog_resets,
                        host.take_input_peak()
                    );
                    last_switches = switches;
                }
            }
        }
    }

    driver.stop()?;
    stop_stream(&mut driver, &host)?;
    info!("{} buffer switches delivered", host.switches());
    Ok(())
}
