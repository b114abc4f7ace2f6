use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use picam_common::config::{CameraConfig, Config, ImageFormat};
use picam_common::frame::{FrameError, MotionVectorFrame, VectorLayout};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Camera, CameraError, RecordTarget};
use crate::motion::VectorSink;

const STILL_TOOL: &str = "raspistill";
const VIDEO_TOOL: &str = "raspivid";

/// Preview/metering time given to the still tool before it fires, in ms.
const STILL_SETTLE_MS: u32 = 1000;

/// How long a finishing encoder gets to flush its file before the next step
/// (interrupt, then kill).
const FINISH_GRACE: Duration = Duration::from_secs(5);

/// Upper bound on waiting for an exited encoder's stderr to drain.
const STDERR_DRAIN: Duration = Duration::from_secs(1);

/// Camera driven through the Raspberry Pi userland tools.
///
/// Stills come from one `raspistill` run per capture. Discard recordings are
/// an open-ended `raspivid` that sends the video to /dev/null and streams
/// inline motion vectors over stdout, which a reader task decodes and hands
/// to the attached sink; they are killed when stopped. File recordings run
/// `raspivid -t <ms>` and are left to finish on their own, or interrupted
/// with SIGINT so the tool can flush the clip.
pub struct RaspiCamera {
    settings: CameraConfig,
    image_format: ImageFormat,
    layout: VectorLayout,
    still_tool: String,
    video_tool: String,
    opened: bool,
    recording: Option<Recording>,
}

struct Recording {
    child: Child,
    /// Present for discard recordings only.
    reader: Option<JoinHandle<Result<(), CameraError>>>,
    stderr: Option<JoinHandle<String>>,
    /// When a file recording is due to end on its own.
    clip_deadline: Option<Instant>,
    target: String,
}

impl Recording {
    /// Everything the encoder wrote to stderr, once it has exited.
    async fn drain_stderr(&mut self) -> String {
        let Some(handle) = self.stderr.take() else {
            return String::new();
        };
        match tokio::time::timeout(STDERR_DRAIN, handle).await {
            Ok(Ok(text)) => text.trim().to_string(),
            _ => String::new(),
        }
    }
}

impl RaspiCamera {
    pub fn new(config: &Config) -> Self {
        Self {
            settings: config.camera.clone(),
            image_format: config.image.format,
            layout: VectorLayout::for_resolution(config.camera.width, config.camera.height),
            still_tool: STILL_TOOL.into(),
            video_tool: VIDEO_TOOL.into(),
            opened: false,
            recording: None,
        }
    }

    /// Arguments shared by still and video captures.
    fn common_args(&self) -> Vec<String> {
        let s = &self.settings;
        let mut args = vec![
            "-n".to_string(),
            "-w".to_string(),
            s.width.to_string(),
            "-h".to_string(),
            s.height.to_string(),
            "-rot".to_string(),
            s.rotation.to_string(),
            "-ex".to_string(),
            exposure_mode(s.day).to_string(),
            "-awb".to_string(),
            "auto".to_string(),
        ];
        if s.vflip {
            args.push("-vf".to_string());
        }
        if s.hflip {
            args.push("-hf".to_string());
        }
        args
    }

    fn still_args(&self, path: &Path, annotation: Option<&str>) -> Vec<String> {
        let s = &self.settings;
        let mut args = self.common_args();
        args.extend([
            "-t".to_string(),
            STILL_SETTLE_MS.to_string(),
            "-e".to_string(),
            self.image_format.encoding().to_string(),
            "-o".to_string(),
            path.display().to_string(),
        ]);
        if let Some(text) = annotation {
            args.extend([
                "-a".to_string(),
                text.to_string(),
                "-ae".to_string(),
                format!(
                    "{},{},{}",
                    s.annotate_text_size,
                    s.annotate_foreground.to_yuv_hex(),
                    s.annotate_background.to_yuv_hex()
                ),
            ]);
        }
        args
    }

    fn video_args(&self, target: &RecordTarget) -> Vec<String> {
        let mut args = self.common_args();
        args.extend(["-fps".to_string(), self.settings.framerate.to_string()]);
        match target {
            RecordTarget::Discard(_) => {
                args.extend(["-t", "0", "-o", "/dev/null", "-x", "-"].map(String::from));
            }
            RecordTarget::File { path, duration } => {
                args.extend([
                    "-t".to_string(),
                    duration.as_millis().to_string(),
                    "-o".to_string(),
                    path.display().to_string(),
                ]);
            }
        }
        args
    }

    /// Kill the active recording. Returns an error the vector reader already
    /// produced before the stop, if any.
    async fn teardown(&mut self) -> Result<(), CameraError> {
        let Some(mut rec) = self.recording.take() else {
            return Err(CameraError::NotRecording);
        };

        let reader_result = match rec.reader.take() {
            Some(handle) if handle.is_finished() => Some(join_reader(handle).await),
            Some(handle) => {
                handle.abort();
                None
            }
            None => None,
        };

        if let Err(e) = rec.child.kill().await {
            warn!(recording = %rec.target, error = %e, "failed to stop encoder process");
        }
        if let Some(handle) = rec.stderr.take() {
            handle.abort();
        }
        debug!(recording = %rec.target, "recording stopped");

        match reader_result {
            Some(Err(e)) => Err(e),
            _ => Ok(()),
        }
    }

    /// Let a file recording end cleanly. Before its deadline the encoder is
    /// interrupted straight away; after it, the encoder gets `FINISH_GRACE` to
    /// exit by itself first. A kill is the last resort.
    async fn finish_clip(&mut self, deadline: Instant) -> Result<(), CameraError> {
        let Some(mut rec) = self.recording.take() else {
            return Err(CameraError::NotRecording);
        };
        let tool = self.video_tool.clone();

        if let Ok(Some(status)) = rec.child.try_wait() {
            return clip_result(tool, &mut rec, Ok(status), false).await;
        }

        if Instant::now() >= deadline {
            if let Ok(status) = tokio::time::timeout(FINISH_GRACE, rec.child.wait()).await {
                return clip_result(tool, &mut rec, status, false).await;
            }
            warn!(recording = %rec.target, "encoder overran the clip length, interrupting");
        } else {
            debug!(recording = %rec.target, "interrupting clip before its end");
        }

        if !interrupt(&rec.child) {
            let _ = rec.child.start_kill();
        }
        match tokio::time::timeout(FINISH_GRACE, rec.child.wait()).await {
            Ok(status) => clip_result(tool, &mut rec, status, true).await,
            Err(_) => {
                warn!(recording = %rec.target, "encoder ignored interrupt, killing it");
                let _ = rec.child.kill().await;
                Err(CameraError::EncoderExited(format!(
                    "{tool} did not finish within {}s of an interrupt",
                    FINISH_GRACE.as_secs()
                )))
            }
        }
    }
}

impl Camera for RaspiCamera {
    async fn open(&mut self) -> Result<(), CameraError> {
        info!("init camera");
        for tool in [&self.still_tool, &self.video_tool] {
            probe_tool(tool).await?;
        }

        let s = &self.settings;
        debug!(width = s.width, height = s.height, "camera.resolution");
        debug!(rotation = s.rotation, vflip = s.vflip, hflip = s.hflip, "camera orientation");
        debug!(framerate = s.framerate, led = s.led, "camera.framerate");
        debug!(exposure_mode = exposure_mode(s.day), awb_mode = "auto", "camera exposure");
        debug!(
            annotate = s.annotate,
            annotate_text_size = s.annotate_text_size,
            "camera annotation"
        );
        debug!(cols = self.layout.cols, rows = self.layout.rows, "motion vector grid");
        if s.led {
            warn!("camera.led is not controllable through the userland tools; ignoring");
        }

        self.opened = true;
        info!("camera initialized");
        Ok(())
    }

    async fn capture_still(
        &mut self,
        path: &Path,
        annotation: Option<&str>,
    ) -> Result<(), CameraError> {
        if !self.opened {
            return Err(CameraError::NotOpen);
        }
        if self.recording.is_some() {
            return Err(CameraError::AlreadyRecording);
        }

        let args = self.still_args(path, annotation);
        debug!(tool = %self.still_tool, ?args, "capturing still");

        let output = Command::new(&self.still_tool)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CameraError::Spawn(self.still_tool.clone(), e.to_string()))?;

        if !output.status.success() {
            return Err(CameraError::Failed {
                tool: self.still_tool.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        debug!(path = %path.display(), "still captured");
        Ok(())
    }

    async fn start_recording(&mut self, target: RecordTarget) -> Result<(), CameraError> {
        if !self.opened {
            return Err(CameraError::NotOpen);
        }
        if self.recording.is_some() {
            return Err(CameraError::AlreadyRecording);
        }

        let args = self.video_args(&target);
        debug!(tool = %self.video_tool, ?args, "starting encoder");

        let stdout = match target {
            RecordTarget::Discard(_) => Stdio::piped(),
            RecordTarget::File { .. } => Stdio::null(),
        };
        let mut child = Command::new(&self.video_tool)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CameraError::Spawn(self.video_tool.clone(), e.to_string()))?;

        let stderr = child.stderr.take().map(spawn_stderr_reader);

        let reader = match &target {
            RecordTarget::Discard(sink) => {
                let stdout = child.stdout.take().ok_or_else(|| {
                    CameraError::Spawn(self.video_tool.clone(), "could not get stdout handle".into())
                })?;
                Some(tokio::spawn(pump_vectors(stdout, self.layout, Arc::clone(sink))))
            }
            RecordTarget::File { .. } => None,
        };
        let clip_deadline = match &target {
            RecordTarget::File { duration, .. } => Some(Instant::now() + *duration),
            RecordTarget::Discard(_) => None,
        };

        self.recording = Some(Recording {
            child,
            reader,
            stderr,
            clip_deadline,
            target: format!("{target:?}"),
        });
        Ok(())
    }

    async fn wait_recording(&mut self, timeout: Duration) -> Result<(), CameraError> {
        let rec = self.recording.as_mut().ok_or(CameraError::NotRecording)?;

        let ended = {
            let Recording { child, reader, .. } = &mut *rec;
            tokio::select! {
                _ = tokio::time::sleep(timeout) => None,
                status = child.wait() => Some(Ok(status)),
                err = reader_failure(reader) => Some(Err(err)),
            }
        };

        let failure = match ended {
            None => return Ok(()),
            // A clip that reached its length exits by itself; `stop_recording`
            // collects it.
            Some(Ok(Ok(status))) if status.success() && rec.clip_deadline.is_some() => {
                debug!(recording = %rec.target, "clip complete");
                return Ok(());
            }
            Some(Ok(Ok(status))) => CameraError::Failed {
                tool: self.video_tool.clone(),
                status: status.to_string(),
                stderr: rec.drain_stderr().await,
            },
            Some(Ok(Err(e))) => CameraError::EncoderExited(e.to_string()),
            Some(Err(e)) => e,
        };

        // The reader handle may already be consumed; drop it before killing.
        rec.reader = None;
        let _ = self.teardown().await;
        Err(failure)
    }

    async fn stop_recording(&mut self) -> Result<(), CameraError> {
        let deadline = self
            .recording
            .as_ref()
            .ok_or(CameraError::NotRecording)?
            .clip_deadline;
        match deadline {
            Some(deadline) => self.finish_clip(deadline).await,
            None => self.teardown().await,
        }
    }

    async fn close(&mut self) -> Result<(), CameraError> {
        let result = if self.recording.is_some() {
            self.stop_recording().await
        } else {
            Ok(())
        };
        self.opened = false;
        result
    }
}

fn exposure_mode(day: bool) -> &'static str {
    if day {
        "auto"
    } else {
        "night"
    }
}

/// Check that a camera tool can be launched at all.
async fn probe_tool(tool: &str) -> Result<(), CameraError> {
    match Command::new(tool).arg("--help").output().await {
        Ok(_) => {
            debug!(tool, "camera tool is available");
            Ok(())
        }
        Err(e) => Err(CameraError::Unavailable(tool.to_string(), e.to_string())),
    }
}

/// Ask the encoder to stop the way Ctrl-C would, so it closes its output
/// file. Returns false when no signal could be sent.
#[cfg(unix)]
fn interrupt(child: &Child) -> bool {
    let Some(pid) = child.id().and_then(|id| libc::pid_t::try_from(id).ok()) else {
        return false;
    };
    // SAFETY: kill(2) only delivers a signal; `pid` is our own unreaped child.
    unsafe { libc::kill(pid, libc::SIGINT) == 0 }
}

#[cfg(not(unix))]
fn interrupt(_child: &Child) -> bool {
    false
}

/// Map how a file recording's encoder exited. An exit we caused with an
/// interrupt is the expected way for a shortened clip to end.
async fn clip_result(
    tool: String,
    rec: &mut Recording,
    status: std::io::Result<std::process::ExitStatus>,
    interrupted: bool,
) -> Result<(), CameraError> {
    let status = status.map_err(|e| CameraError::EncoderExited(e.to_string()))?;
    let stderr = rec.drain_stderr().await;
    if status.success() || interrupted {
        debug!(recording = %rec.target, %status, interrupted, "clip finalised");
        return Ok(());
    }
    Err(CameraError::Failed {
        tool,
        status: status.to_string(),
        stderr,
    })
}

fn spawn_stderr_reader(mut stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut bytes = Vec::new();
        if let Err(e) = stderr.read_to_end(&mut bytes).await {
            debug!(error = %e, "failed to read encoder stderr");
        }
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

/// Resolves only when the vector reader has finished, with the error that
/// describes why.
async fn reader_failure(reader: &mut Option<JoinHandle<Result<(), CameraError>>>) -> CameraError {
    match reader.as_mut() {
        Some(handle) => match handle.await {
            Ok(Ok(())) => CameraError::EncoderExited("motion vector stream closed".into()),
            Ok(Err(e)) => e,
            Err(e) => CameraError::Read(e.to_string()),
        },
        None => std::future::pending().await,
    }
}

async fn join_reader(handle: JoinHandle<Result<(), CameraError>>) -> Result<(), CameraError> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(CameraError::Read(e.to_string())),
    }
}

/// Read the encoder's inline vector stream, decoding one frame per
/// `layout.frame_bytes()` and handing each frame to the sink.
async fn pump_vectors<R>(
    mut stdout: R,
    layout: VectorLayout,
    sink: Arc<dyn VectorSink>,
) -> Result<(), CameraError>
where
    R: AsyncRead + Unpin,
{
    let frame_bytes = layout.frame_bytes();
    let mut buf = BytesMut::with_capacity(frame_bytes * 2);
    let mut frames: u64 = 0;

    debug!(sink = sink.name(), frame_bytes, "motion vector reader started");

    loop {
        let n = stdout
            .read_buf(&mut buf)
            .await
            .map_err(|e| CameraError::Read(e.to_string()))?;
        if n == 0 {
            if !buf.is_empty() {
                return Err(FrameError::Truncated {
                    got: buf.len(),
                    expected: frame_bytes,
                }
                .into());
            }
            debug!(frames, "motion vector stream ended");
            return Ok(());
        }

        while buf.len() >= frame_bytes {
            let chunk = buf.split_to(frame_bytes);
            let frame = MotionVectorFrame::decode(&chunk, layout)?;
            sink.consume(&frame);
            frames += 1;
            if frames % 100 == 0 {
                debug!(frames, "motion vector frames analysed");
            }
        }
    }
}
