use std::io;

use tracing::{debug, info};

use super::session::{CameraSession, Outcome};
use super::{take, CaptureContext, CaptureError, CaptureKind};
use crate::hardware::Camera;

/// Digital input wired to a passive-infrared sensor.
pub trait PirInput {
    fn pin(&self) -> u8;

    /// Current level of the line, `true` = high.
    fn read(&mut self) -> io::Result<bool>;
}

/// Placeholder input: the sensor line is not wired up, so it always reads low.
#[derive(Debug, Clone, Copy)]
pub struct InertPin {
    pin: u8,
}

impl InertPin {
    pub fn new(pin: u8) -> Self {
        Self { pin }
    }
}

impl PirInput for InertPin {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn read(&mut self) -> io::Result<bool> {
        Ok(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// Tracks the previous level of a line and reports transitions.
#[derive(Debug, Default)]
pub struct EdgeDetector {
    level: bool,
}

impl EdgeDetector {
    pub fn update(&mut self, level: bool) -> Option<Edge> {
        let previous = std::mem::replace(&mut self.level, level);
        match (previous, level) {
            (false, true) => Some(Edge::Rising),
            (true, false) => Some(Edge::Falling),
            _ => None,
        }
    }
}

/// Poll the PIR line and take a still or clip on every rising edge.
pub async fn run<C, P>(
    session: &mut CameraSession<C>,
    ctx: &CaptureContext,
    mut pir: P,
    kind: CaptureKind,
) -> Result<(), CaptureError>
where
    C: Camera,
    P: PirInput,
{
    let pin = pir.pin();
    let poll = ctx.config.pir.poll_interval();
    let mut edges = EdgeDetector::default();
    let mut sequence: u64 = 1;

    info!(?kind, pin, "start PIR detection");
    debug!("waiting for PIR trigger");

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            _ = tokio::time::sleep(poll) => {}
        }

        let level = pir.read().map_err(|e| CaptureError::Pir(pin, e))?;
        match edges.update(level) {
            Some(Edge::Rising) => {
                debug!(pin, state = "HIGH", "PIR input changed");
                if take(session, ctx, kind, sequence).await? == Outcome::Interrupted {
                    break;
                }
                sequence += 1;
            }
            Some(Edge::Falling) => debug!(pin, state = "LOW", "PIR input changed"),
            None => {}
        }
    }

    debug!("detect PIR has ended");
    Ok(())
}
