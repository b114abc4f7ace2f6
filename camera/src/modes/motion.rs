use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::session::{CameraSession, Outcome};
use super::{take, CaptureContext, CaptureError, CaptureKind};
use crate::hardware::{Camera, RecordTarget};
use crate::motion::{MotionEstimator, MotionState, VectorSink};

/// Shortest flag poll, so a zero cooldown does not spin on the encoder.
const MIN_POLL: Duration = Duration::from_millis(50);

fn poll_period(cooldown: Duration) -> Duration {
    cooldown.max(MIN_POLL)
}

/// Keep the encoder running into a discard sink with the motion estimator
/// attached, and take a still or clip each time it reports motion.
///
/// The flag is polled once per cooldown period, or every `MIN_POLL` when the
/// cooldown is shorter. A triggered capture stops the
/// discard recording, captures, clears the flag and resumes.
pub async fn run<C: Camera>(
    session: &mut CameraSession<C>,
    ctx: &CaptureContext,
    kind: CaptureKind,
) -> Result<(), CaptureError> {
    info!(?kind, "start motion detection");

    let state = Arc::new(MotionState::new());
    let sink: Arc<dyn VectorSink> = Arc::new(MotionEstimator::new(
        Arc::clone(&state),
        &ctx.config.motion,
    ));
    let poll = poll_period(ctx.config.motion.minimum_still());
    let mut sequence: u64 = 1;

    session
        .camera()
        .start_recording(RecordTarget::Discard(Arc::clone(&sink)))
        .await?;
    state.clear();
    debug!("waiting for motion");

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            waited = session.camera().wait_recording(poll) => waited?,
        }
        if !state.is_detected() {
            continue;
        }

        debug!(sequence, "motion triggered, stopping discard recording");
        session.camera().stop_recording().await?;

        let outcome = take(session, ctx, kind, sequence).await?;
        if outcome == Outcome::Interrupted {
            break;
        }
        sequence += 1;
        state.clear();
        state.mark_still_captured(Instant::now());

        session
            .camera()
            .start_recording(RecordTarget::Discard(Arc::clone(&sink)))
            .await?;
        debug!("waiting for motion");
    }

    info!("detect motion has ended");
    Ok(())
}
