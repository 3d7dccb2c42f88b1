use crate::capture::FrameSource;
use crate::error::{PipelineError, Result};
use crate::output::OutputSink;
use crate::session::{Session, TickOutcome};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound on committed composites per second
    pub target_fps: u32,
    /// Rate of the repaint signal that clocks the scheduler
    pub repaint_hz: u32,
}

impl SchedulerConfig {
    pub fn new(target_fps: u32, repaint_hz: u32) -> Result<Self> {
        if target_fps == 0 || repaint_hz == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "rates must be positive (fps={target_fps}, repaint={repaint_hz})"
            )));
        }
        Ok(Self {
            target_fps,
            repaint_hz,
        })
    }

    pub fn repaint_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.repaint_hz))
    }
}

/// Software rate limiter over the repaint clock.
///
/// Holds the cycle state: when the last composite was committed.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    target_interval: Duration,
    last_composited_at: Option<Instant>,
}

impl FrameScheduler {
    pub fn new(target_fps: u32) -> Result<Self> {
        if target_fps == 0 {
            return Err(PipelineError::InvalidConfig("target fps must be positive".into()));
        }
        Ok(Self {
            target_interval: Duration::from_secs_f64(1.0 / f64::from(target_fps)),
            last_composited_at: None,
        })
    }

    pub fn target_interval(&self) -> Duration {
        self.target_interval
    }

    pub fn last_composited_at(&self) -> Option<Instant> {
        self.last_composited_at
    }

    /// Whether a cycle at `now` respects the target interval
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_composited_at {
            Some(last) => now.saturating_duration_since(last) >= self.target_interval,
            None => true,
        }
    }

    pub fn mark_composited(&mut self, now: Instant) {
        self.last_composited_at = Some(now);
    }

    pub fn reset(&mut self) {
        self.last_composited_at = None;
    }
}

/// Drive `session` from a repaint clock until it is torn down.
///
/// The clock is re-armed after every tick regardless of the outcome, so
/// per-cycle failures never stop frame production. Returns the fatal error
/// if the session halts.
pub async fn run<S, O>(session: &mut Session<S, O>, config: &SchedulerConfig) -> Result<()>
where
    S: FrameSource,
    O: OutputSink,
{
    let liveness = session.liveness();
    let mut repaint = tokio::time::interval(config.repaint_period());
    repaint.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        "Scheduler started: target {} fps on a {} Hz repaint clock",
        config.target_fps,
        config.repaint_hz
    );

    while liveness.is_alive() {
        let now = repaint.tick().await;
        if !liveness.is_alive() {
            break;
        }

        if let TickOutcome::Halted(e) = session.tick(now).await {
            tracing::error!("Session halted: {}", e);
            return Err(e);
        }
    }

    tracing::info!("Scheduler stopped");
    Ok(())
}
