mod files;
mod hardware;
mod modes;
mod motion;
mod shutdown;

use std::path::PathBuf;

use hardware::raspi::RaspiCamera;
use modes::pir::InertPin;
use modes::CaptureContext;
use picam_common::config::{Config, Mode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = %config.app.mode,
        image_dir = %config.storage.image_dir.display(),
        video_dir = %config.storage.video_dir.display(),
        "starting picam"
    );

    let mode = match config.app.mode.parse::<Mode>() {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "invalid mode, nothing to do");
            return;
        }
    };

    if let Err(e) = files::ensure_directories(mode, &config.storage) {
        error!(error = %e, "failed to prepare output folders");
        std::process::exit(1);
    }

    let token = CancellationToken::new();
    shutdown::spawn_signal_listener(token.clone());

    let camera = RaspiCamera::new(&config);
    let pir = InertPin::new(config.pir.sensor_pin);
    let ctx = CaptureContext::new(config, token);

    match modes::run(mode, camera, pir, &ctx).await {
        Ok(actions) => info!(mode = %mode, actions, "picam ended"),
        Err(e) => {
            error!(mode = %mode, error = %e, "capture failed");
            std::process::exit(1);
        }
    }
    debug!("exiting");
}
