use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use picam_common::frame::MotionVectorFrame;
use tokio_util::sync::CancellationToken;

use super::{Camera, CameraError, RecordTarget};
use crate::motion::VectorSink;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open,
    Still {
        path: PathBuf,
        annotation: Option<String>,
    },
    StartDiscard,
    StartFile(PathBuf),
    Wait,
    Stop,
    Close,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// In-memory camera. Each `wait_recording` during a discard recording feeds
/// the next scripted batch of frames to the attached sink; file recordings
/// just sleep for the requested time.
#[derive(Default)]
pub struct MockCamera {
    calls: CallLog,
    script: VecDeque<Vec<MotionVectorFrame>>,
    sink: Option<Arc<dyn VectorSink>>,
    recording: bool,
    cancel_when_exhausted: Option<CancellationToken>,
    fail_on_wait: Option<usize>,
    fail_open: bool,
    paced: bool,
    waits: usize,
}

impl MockCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> CallLog {
        Arc::clone(&self.calls)
    }

    pub fn with_script(mut self, batches: Vec<Vec<MotionVectorFrame>>) -> Self {
        self.script = batches.into();
        self
    }

    /// Cancel `token` on the first discard wait after the script runs out.
    pub fn cancel_when_exhausted(mut self, token: CancellationToken) -> Self {
        self.cancel_when_exhausted = Some(token);
        self
    }

    /// Make the `n`th wait (1-based) fail as if the encoder died.
    pub fn fail_on_wait(mut self, n: usize) -> Self {
        self.fail_on_wait = Some(n);
        self
    }

    /// Let each discard wait take its full timeout after feeding its batch,
    /// so wall-clock cooldowns elapse between batches.
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    fn log(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Camera for MockCamera {
    async fn open(&mut self) -> Result<(), CameraError> {
        self.log(Call::Open);
        if self.fail_open {
            return Err(CameraError::Unavailable("mock".into(), "scripted".into()));
        }
        Ok(())
    }

    async fn capture_still(
        &mut self,
        path: &Path,
        annotation: Option<&str>,
    ) -> Result<(), CameraError> {
        if self.recording {
            return Err(CameraError::AlreadyRecording);
        }
        self.log(Call::Still {
            path: path.to_path_buf(),
            annotation: annotation.map(str::to_string),
        });
        Ok(())
    }

    async fn start_recording(&mut self, target: RecordTarget) -> Result<(), CameraError> {
        if self.recording {
            return Err(CameraError::AlreadyRecording);
        }
        self.recording = true;
        match target {
            RecordTarget::Discard(sink) => {
                self.log(Call::StartDiscard);
                self.sink = Some(sink);
            }
            RecordTarget::File { path, .. } => {
                self.log(Call::StartFile(path));
                self.sink = None;
            }
        }
        Ok(())
    }

    async fn wait_recording(&mut self, timeout: Duration) -> Result<(), CameraError> {
        self.log(Call::Wait);
        self.waits += 1;
        if self.fail_on_wait == Some(self.waits) {
            self.recording = false;
            return Err(CameraError::EncoderExited("scripted failure".into()));
        }
        if !self.recording {
            return Err(CameraError::NotRecording);
        }

        match &self.sink {
            Some(sink) => {
                match self.script.pop_front() {
                    Some(frames) => frames.iter().for_each(|f| sink.consume(f)),
                    None => {
                        if let Some(token) = &self.cancel_when_exhausted {
                            token.cancel();
                        }
                    }
                }
                if self.paced {
                    tokio::time::sleep(timeout).await;
                } else {
                    tokio::task::yield_now().await;
                }
            }
            None => tokio::time::sleep(timeout).await,
        }
        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<(), CameraError> {
        if !self.recording {
            return Err(CameraError::NotRecording);
        }
        self.log(Call::Stop);
        self.recording = false;
        self.sink = None;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), CameraError> {
        self.log(Call::Close);
        self.recording = false;
        self.sink = None;
        Ok(())
    }
}
