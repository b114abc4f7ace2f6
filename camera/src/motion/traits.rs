use picam_common::frame::MotionVectorFrame;

/// Consumer of the per-frame motion vectors produced while the encoder records.
///
/// Called from the encoder's reader task, once per encoded frame, so
/// implementations must be cheap and share state only through atomics.
pub trait VectorSink: Send + Sync {
    fn consume(&self, frame: &MotionVectorFrame);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

impl<F> VectorSink for F
where
    F: Fn(&MotionVectorFrame) + Send + Sync,
{
    fn consume(&self, frame: &MotionVectorFrame) {
        self(frame)
    }

    fn name(&self) -> &str {
        "closure"
    }
}
