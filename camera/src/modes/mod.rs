//! Capture strategies and the dispatcher that runs exactly one of them.

pub mod motion;
pub mod pir;
pub mod session;
pub mod test_image;
pub mod timelapse;

use picam_common::config::{Config, Mode};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::files::FileNamer;
use crate::hardware::{Camera, CameraError};
use pir::PirInput;
use session::{CameraSession, Outcome};

/// Everything a strategy needs besides the camera itself.
pub struct CaptureContext {
    pub config: Config,
    pub files: FileNamer,
    pub shutdown: CancellationToken,
}

impl CaptureContext {
    pub fn new(config: Config, shutdown: CancellationToken) -> Self {
        let files = FileNamer::from_config(&config);
        Self {
            config,
            files,
            shutdown,
        }
    }
}

/// What a trigger produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Image,
    Video,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("failed to read PIR input on pin {0}: {1}")]
    Pir(u8, std::io::Error),
}

/// Run `mode` until it finishes or `ctx.shutdown` fires, then close the
/// camera exactly once, whatever the outcome. Returns the number of actions
/// (stills or clips) taken.
pub async fn run<C, P>(
    mode: Mode,
    camera: C,
    pir_input: P,
    ctx: &CaptureContext,
) -> Result<u64, CaptureError>
where
    C: Camera,
    P: PirInput,
{
    info!(mode = %mode, "starting capture mode");
    let mut session = CameraSession::new(camera, &ctx.config);

    let result = dispatch(mode, &mut session, pir_input, ctx).await;
    let closed = session.shutdown().await;

    if let (Err(_), Err(e)) = (&result, &closed) {
        warn!(error = %e, "camera close failed after capture error");
    }
    result?;
    closed?;
    Ok(session.actions())
}

async fn dispatch<C, P>(
    mode: Mode,
    session: &mut CameraSession<C>,
    pir_input: P,
    ctx: &CaptureContext,
) -> Result<(), CaptureError>
where
    C: Camera,
    P: PirInput,
{
    session.open().await?;
    match mode {
        Mode::TestImage => test_image::run(session, ctx).await,
        Mode::Timelapse => timelapse::run(session, ctx).await,
        Mode::MotionImage => motion::run(session, ctx, CaptureKind::Image).await,
        Mode::MotionVideo => motion::run(session, ctx, CaptureKind::Video).await,
        Mode::PirImage => pir::run(session, ctx, pir_input, CaptureKind::Image).await,
        Mode::PirVideo => pir::run(session, ctx, pir_input, CaptureKind::Video).await,
    }
}

/// Take one numbered still or clip for a trigger.
async fn take<C: Camera>(
    session: &mut CameraSession<C>,
    ctx: &CaptureContext,
    kind: CaptureKind,
    sequence: u64,
) -> Result<Outcome, CaptureError> {
    let outcome = match kind {
        CaptureKind::Image => {
            session
                .capture_still(&ctx.files.sequenced_image(sequence))
                .await?;
            Outcome::Done
        }
        CaptureKind::Video => {
            session
                .record_clip(
                    ctx.files.video(sequence),
                    ctx.config.video.duration(),
                    &ctx.shutdown,
                )
                .await?
        }
    };
    session.record_action();
    Ok(outcome)
}
