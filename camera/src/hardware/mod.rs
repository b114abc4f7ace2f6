//! Hardware boundary: the camera/encoder operations the capture modes rely on.

#[cfg(test)]
pub mod mock;
pub mod raspi;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use picam_common::frame::FrameError;

use crate::motion::VectorSink;

/// Where a recording's encoded output goes.
#[derive(Clone)]
pub enum RecordTarget {
    /// Encode into a null sink; only the per-frame motion vectors are used,
    /// each one handed to the sink.
    Discard(Arc<dyn VectorSink>),
    /// Encode `duration` of H.264 elementary stream into a file. The encoder
    /// ends the clip itself; stopping earlier finalises what was written.
    File { path: PathBuf, duration: Duration },
}

impl fmt::Debug for RecordTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordTarget::Discard(sink) => write!(f, "Discard({})", sink.name()),
            RecordTarget::File { path, duration } => {
                write!(f, "File({}, {}ms)", path.display(), duration.as_millis())
            }
        }
    }
}

/// A still/video camera with an H.264 encoder that can report motion vectors.
///
/// At most one recording is active at a time. `wait_recording` is the only
/// place a running encoder's failure surfaces while the caller is idle.
#[allow(async_fn_in_trait)]
pub trait Camera {
    /// Acquire and configure the device.
    async fn open(&mut self) -> Result<(), CameraError>;

    /// Capture one still into `path`, optionally stamped with `annotation`.
    async fn capture_still(
        &mut self,
        path: &Path,
        annotation: Option<&str>,
    ) -> Result<(), CameraError>;

    async fn start_recording(&mut self, target: RecordTarget) -> Result<(), CameraError>;

    /// Let the active recording run for `timeout`, returning early with an
    /// error if the encoder fails in the meantime.
    async fn wait_recording(&mut self, timeout: Duration) -> Result<(), CameraError>;

    /// End the active recording. File recordings are finalised, not killed.
    async fn stop_recording(&mut self) -> Result<(), CameraError>;

    /// Release the device. Stops any active recording first.
    async fn close(&mut self) -> Result<(), CameraError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("camera tool {0} is not available: {1}")]
    Unavailable(String, String),
    #[error("camera is not open")]
    NotOpen,
    #[error("failed to spawn {0}: {1}")]
    Spawn(String, String),
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("a recording is already active")]
    AlreadyRecording,
    #[error("no recording is active")]
    NotRecording,
    #[error("encoder stopped unexpectedly: {0}")]
    EncoderExited(String),
    #[error("failed to read motion vector stream: {0}")]
    Read(String),
    #[error("malformed motion vector stream: {0}")]
    Vectors(#[from] FrameError),
}
