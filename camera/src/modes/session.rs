use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use picam_common::config::Config;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::hardware::{Camera, CameraError, RecordTarget};

/// How a capture that can be interrupted ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Interrupted,
}

/// Scoped ownership of the camera for one run: counts actions and guarantees
/// a single close.
pub struct CameraSession<C> {
    camera: C,
    /// strftime pattern for annotation text, when annotation is enabled.
    annotation_format: Option<String>,
    actions: u64,
    closed: bool,
}

impl<C: Camera> CameraSession<C> {
    pub fn new(camera: C, config: &Config) -> Self {
        let annotation_format = config
            .camera
            .annotate
            .then(|| config.storage.datetime_format.clone());
        Self {
            camera,
            annotation_format,
            actions: 0,
            closed: false,
        }
    }

    pub async fn open(&mut self) -> Result<(), CameraError> {
        self.camera.open().await
    }

    pub fn camera(&mut self) -> &mut C {
        &mut self.camera
    }

    pub async fn capture_still(&mut self, path: &Path) -> Result<(), CameraError> {
        info!(path = %path.display(), "capture image");
        let annotation = self.annotation_text();
        self.camera.capture_still(path, annotation.as_deref()).await
    }

    /// Record `duration` of video into `path`. Stops early, keeping what was
    /// recorded, if `shutdown` fires.
    pub async fn record_clip(
        &mut self,
        path: PathBuf,
        duration: Duration,
        shutdown: &CancellationToken,
    ) -> Result<Outcome, CameraError> {
        info!(path = %path.display(), secs = duration.as_secs_f64(), "recording video");
        self.camera
            .start_recording(RecordTarget::File { path, duration })
            .await?;

        let outcome = tokio::select! {
            _ = shutdown.cancelled() => Outcome::Interrupted,
            waited = self.camera.wait_recording(duration) => {
                waited?;
                Outcome::Done
            }
        };

        self.camera.stop_recording().await?;
        debug!(?outcome, "video recording ended");
        Ok(outcome)
    }

    pub fn record_action(&mut self) {
        self.actions += 1;
    }

    pub fn actions(&self) -> u64 {
        self.actions
    }

    /// Close the camera and log the action count. Only the first call does
    /// anything.
    pub async fn shutdown(&mut self) -> Result<(), CameraError> {
        if self.closed {
            debug!("camera already closed");
            return Ok(());
        }
        self.closed = true;

        info!("close camera");
        let result = self.camera.close().await;
        info!(actions = self.actions, "camera turned off");
        result
    }

    fn annotation_text(&self) -> Option<String> {
        let format = self.annotation_format.as_ref()?;
        let mut text = String::new();
        if write!(text, "{}", chrono::Local::now().format(format)).is_err() {
            warn!(pattern = %format, "invalid annotation datetime format, skipping annotation");
            return None;
        }
        Some(text)
    }
}
