use anyhow::Context;
use clap::Parser;
use rcar_core::utils::config::AppConfig;
use rcar_core::utils::controllers::{CarState, ShieldDriver, SimulatedShieldBus};
use rcar_core::utils::{serve, share, ShutdownHandle};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts
{
    /// TOML configuration file
    #[clap(long, short)]
    config: Option<PathBuf>,
    /// override the listen address, e.g. 127.0.0.1:12345
    #[clap(long)]
    bind: Option<String>,
    /// obstacle distance reported by the simulated ultrasonic sensor, in cm
    #[clap(long, default_value_t = 50.0)]
    distance: f32,
}

fn main() -> anyhow::Result<()> {
    let opts: Opts = Opts::parse();

    let mut config = match &opts.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(bind) = opts.bind {
        config.server.bind_address = bind;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Expansion board on a simulated bus
    let bus = SimulatedShieldBus::new();
    let board = bus.handle();
    board.set_distance(opts.distance);

    let mut shield = ShieldDriver::with_config(bus, config.shield.clone());
    if let Err(e) = shield.probe() {
        warn!("expansion board did not answer at 0x{:02X}: {:?}", config.shield.address, e);
    }

    let mut car = CarState::new(shield, config.car.clone());
    if let Err(e) = car.initialize() {
        warn!("failed to drive car to neutral at startup: {}", e);
    }

    let shutdown = ShutdownHandle::new();
    let handle = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("received Ctrl-C, shutting down");
        handle.shutdown();
    })
    .context("installing Ctrl-C handler")?;

    info!("Starting command server on {}", config.server.bind_address);
    serve(config.server, share(car), shutdown)?;
    info!("command server stopped");
    Ok(())
}
