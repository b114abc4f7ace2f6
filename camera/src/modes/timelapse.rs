use std::time::Instant;

use tracing::{debug, info};

use super::session::CameraSession;
use super::{CaptureContext, CaptureError};
use crate::hardware::Camera;

/// Take `total_images` numbered stills, one every `time_between`. The time
/// spent capturing is taken off the following pause.
pub async fn run<C: Camera>(
    session: &mut CameraSession<C>,
    ctx: &CaptureContext,
) -> Result<(), CaptureError> {
    let cfg = &ctx.config.timelapse;
    let between = cfg.time_between();
    info!(
        total_images = cfg.total_images,
        approx_secs = cfg.total_images as f64 * cfg.time_between_secs,
        "start timelapse"
    );

    for index in 0..cfg.total_images {
        if ctx.shutdown.is_cancelled() {
            break;
        }
        let started = Instant::now();
        let sequence = cfg.sequence_start + index;
        session
            .capture_still(&ctx.files.sequenced_image(sequence))
            .await?;
        session.record_action();
        debug!(index, sequence, "timelapse image");

        if index + 1 == cfg.total_images {
            break;
        }
        let pause = between.saturating_sub(started.elapsed());
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    info!("timelapse has ended");
    Ok(())
}
