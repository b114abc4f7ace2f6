use tracing::{debug, info};

use super::session::CameraSession;
use super::{CaptureContext, CaptureError};
use crate::hardware::Camera;

/// Take one still, named with the "test" label, for positioning the camera
/// and checking settings.
pub async fn run<C: Camera>(
    session: &mut CameraSession<C>,
    ctx: &CaptureContext,
) -> Result<(), CaptureError> {
    info!("start test image");
    session.capture_still(&ctx.files.image("test")).await?;
    session.record_action();
    debug!("test image ended");
    Ok(())
}
