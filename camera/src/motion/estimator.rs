use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use picam_common::config::MotionConfig;
use picam_common::frame::MotionVectorFrame;
use tracing::{debug, trace};

use super::traits::VectorSink;

/// Shared state between the vector sink and the capture loop.
///
/// The sink only ever raises `detected`; the capture loop only ever clears it
/// and moves `last_still_capture` forward.
#[derive(Debug)]
pub struct MotionState {
    detected: AtomicBool,
    origin: Instant,
    /// Nanoseconds after `origin`.
    last_still_capture: AtomicU64,
}

impl MotionState {
    /// Fresh state with no motion and the last capture set to now.
    pub fn new() -> Self {
        Self {
            detected: AtomicBool::new(false),
            origin: Instant::now(),
            last_still_capture: AtomicU64::new(0),
        }
    }

    pub fn is_detected(&self) -> bool {
        self.detected.load(Ordering::Acquire)
    }

    fn raise(&self) {
        self.detected.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.detected.store(false, Ordering::Release);
    }

    pub fn mark_still_captured(&self, at: Instant) {
        let nanos = at.saturating_duration_since(self.origin).as_nanos();
        self.last_still_capture
            .store(u64::try_from(nanos).unwrap_or(u64::MAX), Ordering::Release);
    }

    pub fn last_still_capture(&self) -> Instant {
        self.origin + Duration::from_nanos(self.last_still_capture.load(Ordering::Acquire))
    }
}

impl Default for MotionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Motion-vector heuristic: raise the motion flag when more than
/// `occurrences` macroblocks move faster than `magnitude`.
///
/// Frames arriving within `cooldown` of the last still capture are ignored
/// without being looked at.
pub struct MotionEstimator {
    state: Arc<MotionState>,
    cooldown: Duration,
    magnitude: u8,
    occurrences: usize,
}

impl MotionEstimator {
    pub fn new(state: Arc<MotionState>, config: &MotionConfig) -> Self {
        Self {
            state,
            cooldown: config.minimum_still(),
            magnitude: config.magnitude,
            occurrences: config.occurrences,
        }
    }

    pub(crate) fn analyse_at(&self, frame: &MotionVectorFrame, now: Instant) {
        let since_capture = now.saturating_duration_since(self.state.last_still_capture());
        if since_capture < self.cooldown {
            return;
        }

        let moving = frame.count_above(self.magnitude);
        trace!(moving, threshold = self.magnitude, "vector frame analysed");
        if moving > self.occurrences {
            debug!(
                moving,
                magnitude = self.magnitude,
                occurrences = self.occurrences,
                "motion detected"
            );
            self.state.raise();
        }
    }
}

impl VectorSink for MotionEstimator {
    fn consume(&self, frame: &MotionVectorFrame) {
        self.analyse_at(frame, Instant::now());
    }

    fn name(&self) -> &str {
        "motion-estimator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use picam_common::frame::{MotionVector, VectorLayout};

    const LAYOUT: VectorLayout = VectorLayout { cols: 8, rows: 4 };

    fn config() -> MotionConfig {
        MotionConfig {
            minimum_still_secs: 1.0,
            magnitude: 80,
            occurrences: 10,
        }
    }

    /// Frame with `count` macroblocks of magnitude 90 and the rest still.
    fn frame_with_moving(count: usize) -> MotionVectorFrame {
        let mut vectors = vec![MotionVector::default(); LAYOUT.len()];
        for v in vectors.iter_mut().take(count) {
            *v = MotionVector::new(54, 72);
        }
        MotionVectorFrame::new(LAYOUT, vectors).unwrap()
    }

    fn setup() -> (Arc<MotionState>, MotionEstimator, Instant) {
        let state = Arc::new(MotionState::new());
        let estimator = MotionEstimator::new(Arc::clone(&state), &config());
        let captured = Instant::now();
        state.mark_still_captured(captured);
        (state, estimator, captured)
    }

    #[test]
    fn eleven_moving_blocks_after_cooldown_raise_flag() {
        let (state, estimator, captured) = setup();
        estimator.analyse_at(&frame_with_moving(11), captured + Duration::from_secs(1));
        assert!(state.is_detected());
    }

    #[test]
    fn frame_inside_cooldown_is_ignored() {
        let (state, estimator, captured) = setup();
        estimator.analyse_at(&frame_with_moving(11), captured + Duration::from_millis(500));
        assert!(!state.is_detected());
    }

    #[test]
    fn ten_moving_blocks_are_not_enough() {
        let (state, estimator, captured) = setup();
        estimator.analyse_at(&frame_with_moving(10), captured + Duration::from_secs(5));
        assert!(!state.is_detected());
    }

    #[test]
    fn magnitude_must_exceed_threshold() {
        let (state, estimator, captured) = setup();
        // magnitude exactly 80 in every block
        let frame = MotionVectorFrame::filled(LAYOUT, MotionVector::new(48, 64));
        estimator.analyse_at(&frame, captured + Duration::from_secs(5));
        assert!(!state.is_detected());
    }

    #[test]
    fn extreme_vectors_count_as_motion() {
        let (state, estimator, captured) = setup();
        let frame = MotionVectorFrame::filled(LAYOUT, MotionVector::new(1000, 1000));
        estimator.analyse_at(&frame, captured + Duration::from_secs(2));
        assert!(state.is_detected());
    }

    #[test]
    fn estimator_never_clears_flag() {
        let (state, estimator, captured) = setup();
        estimator.analyse_at(&frame_with_moving(20), captured + Duration::from_secs(2));
        assert!(state.is_detected());
        estimator.analyse_at(&frame_with_moving(0), captured + Duration::from_secs(3));
        assert!(state.is_detected());
        assert_eq!(state.last_still_capture(), captured);
    }

    #[test]
    fn cooldown_restarts_after_capture() {
        let (state, estimator, captured) = setup();
        estimator.analyse_at(&frame_with_moving(11), captured + Duration::from_secs(2));
        assert!(state.is_detected());

        let recaptured = captured + Duration::from_secs(3);
        state.clear();
        state.mark_still_captured(recaptured);
        estimator.analyse_at(&frame_with_moving(11), recaptured + Duration::from_millis(200));
        assert!(!state.is_detected());
        estimator.analyse_at(&frame_with_moving(11), recaptured + Duration::from_millis(1200));
        assert!(state.is_detected());
    }

    #[test]
    fn consume_uses_wall_clock() {
        let state = Arc::new(MotionState::new());
        let estimator = MotionEstimator::new(
            Arc::clone(&state),
            &MotionConfig {
                minimum_still_secs: 0.0,
                ..config()
            },
        );
        estimator.consume(&frame_with_moving(11));
        assert!(state.is_detected());
    }
}
