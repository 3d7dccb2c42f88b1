//! Session object owning all cycle state.
//!
//! One `Session` runs composite cycles strictly one at a time: `tick` takes
//! `&mut self`, so a new cycle cannot start until the previous one has
//! committed or been skipped.

use crate::background::{Background, BackgroundStore};
use crate::capture::FrameSource;
use crate::compositor::Compositor;
use crate::error::{PipelineError, Result};
use crate::output::OutputSink;
use crate::raster::Dimensions;
use crate::scheduler::FrameScheduler;
use crate::segmentation::{ModelSlot, ModelState, SegmentationProvider};
use crate::stats::{CycleStats, CycleTimings};
use image::imageops;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// Consecutive dimension failures before the mismatch is escalated
const MISMATCH_ALERT_AFTER: u32 = 30;

/// Consecutive frame-less cycles before the source is reported as stalled
const FRAME_STALL_WARN_AFTER: u32 = 30;

/// Shared liveness flag. Flipped once on teardown; async work checks it
/// before committing results.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn teardown(&self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Background shown until the user picks another
    pub initial_background: Option<Background>,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "canvas {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.target_fps == 0 {
            return Err(PipelineError::InvalidConfig("target fps must be positive".into()));
        }
        Ok(())
    }
}

/// Result of one repaint signal
#[derive(Debug, Clone)]
pub enum TickOutcome {
    Committed,
    /// Arrived before the target interval elapsed
    Throttled,
    /// Model still loading, no background, or no frame yet
    NotReady,
    /// Per-cycle failure; the previous frame stays on screen
    Skipped(PipelineError),
    /// Teardown happened while the cycle was in flight
    Discarded,
    /// Startup failure; no further cycles will run
    Halted(PipelineError),
}

pub struct Session<S, O> {
    source: S,
    output: O,
    compositor: Compositor,
    scheduler: FrameScheduler,
    model: ModelSlot,
    backgrounds: Arc<BackgroundStore>,
    liveness: Liveness,
    stats: CycleStats,
    consecutive_mismatches: u32,
    consecutive_missing_frames: u32,
    fatal: Option<PipelineError>,
}

impl<S, O> Session<S, O>
where
    S: FrameSource,
    O: OutputSink,
{
    pub fn new(config: SessionConfig, source: S, output: O, model: ModelSlot) -> Result<Self> {
        config.validate()?;

        let canvas = Dimensions::new(config.width, config.height);
        if source.dimensions() != canvas {
            tracing::warn!(
                "Frame source yields {} but canvas is {}; cycles will be rejected",
                source.dimensions(),
                canvas
            );
        }

        let liveness = Liveness::new();
        let backgrounds = Arc::new(BackgroundStore::new(
            config.initial_background,
            liveness.clone(),
        ));

        Ok(Self {
            source,
            output,
            compositor: Compositor::new(config.width, config.height),
            scheduler: FrameScheduler::new(config.target_fps)?,
            model,
            backgrounds,
            liveness,
            stats: CycleStats::default(),
            consecutive_mismatches: 0,
            consecutive_missing_frames: 0,
            fatal: None,
        })
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    pub fn backgrounds(&self) -> Arc<BackgroundStore> {
        Arc::clone(&self.backgrounds)
    }

    pub fn model(&self) -> &ModelSlot {
        &self.model
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn last_composited_at(&self) -> Option<Instant> {
        self.scheduler.last_composited_at()
    }

    /// Dimension mismatches seen back to back, with no other outcome between
    pub fn consecutive_mismatches(&self) -> u32 {
        self.consecutive_mismatches
    }

    /// Whether the mismatch has persisted long enough to need an operator
    pub fn mismatch_alert(&self) -> bool {
        self.consecutive_mismatches >= MISMATCH_ALERT_AFTER
    }

    /// Whether the frame source has stopped yielding frames
    pub fn frame_source_stalled(&self) -> bool {
        self.consecutive_missing_frames >= FRAME_STALL_WARN_AFTER
    }

    /// Handle one repaint signal at monotonic time `now`.
    ///
    /// Never panics or propagates per-cycle errors; the outcome says what
    /// happened. `last_composited_at` only moves on `Committed`.
    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        let outcome = self.cycle(now).await;
        if !matches!(
            outcome,
            TickOutcome::Skipped(PipelineError::DimensionMismatch { .. })
        ) {
            self.consecutive_mismatches = 0;
        }
        outcome
    }

    async fn cycle(&mut self, now: Instant) -> TickOutcome {
        if !self.liveness.is_alive() {
            return TickOutcome::Discarded;
        }
        if let Some(e) = &self.fatal {
            return TickOutcome::Halted(e.clone());
        }
        if !self.scheduler.is_due(now) {
            self.stats.skipped_rate += 1;
            return TickOutcome::Throttled;
        }

        let provider = match self.model.state() {
            ModelState::Ready(provider) => provider,
            ModelState::Loading => return self.not_ready("model loading"),
            ModelState::Unavailable(reason) => return self.halt(PipelineError::ModelLoad(reason)),
        };
        // Snapshot for the whole cycle; replacements land next cycle
        let Some(background) = self.backgrounds.current() else {
            return self.not_ready("no background");
        };

        match self.run_cycle(&provider, &background).await {
            Ok(Some(timings)) => {
                self.scheduler.mark_composited(now);
                self.stats.record_commit(timings);
                TickOutcome::Committed
            }
            Ok(None) => {
                tracing::debug!("Session torn down mid-cycle, result discarded");
                TickOutcome::Discarded
            }
            Err(PipelineError::NoFrameAvailable) => self.frame_missing(),
            Err(e) if e.is_fatal() => self.halt(e),
            Err(e) => self.skip(e),
        }
    }

    /// Frame, segment, composite, commit. Returns `None` when teardown
    /// happened during segmentation.
    async fn run_cycle(
        &mut self,
        provider: &SegmentationProvider,
        background: &Arc<Background>,
    ) -> Result<Option<CycleTimings>> {
        let mut timings = CycleTimings::default();

        let started = std::time::Instant::now();
        let frame = self.source.current_frame()?;
        if self.frame_source_stalled() {
            tracing::info!("Frame source recovered");
        }
        self.consecutive_missing_frames = 0;
        self.compositor
            .dimensions()
            .ensure(Dimensions::of(&frame), "frame")?;
        timings.capture = started.elapsed();

        let started = std::time::Instant::now();
        let frame = Arc::new(frame);
        let mask = provider.segment(Arc::clone(&frame)).await?;
        timings.segment = started.elapsed();

        if !self.liveness.is_alive() {
            return Ok(None);
        }

        let started = std::time::Instant::now();
        let composited = if provider.mirrored() {
            let drawn = imageops::flip_horizontal(frame.as_ref());
            self.compositor.composite(&drawn, &mask, background)?
        } else {
            self.compositor.composite(&frame, &mask, background)?
        };
        timings.composite = started.elapsed();

        let started = std::time::Instant::now();
        self.output.write_frame(&composited)?;
        timings.output = started.elapsed();

        Ok(Some(timings))
    }

    fn not_ready(&mut self, reason: &str) -> TickOutcome {
        tracing::trace!("Cycle skipped: {}", reason);
        self.stats.skipped_not_ready += 1;
        TickOutcome::NotReady
    }

    fn frame_missing(&mut self) -> TickOutcome {
        self.consecutive_missing_frames += 1;
        if self.consecutive_missing_frames == FRAME_STALL_WARN_AFTER {
            tracing::warn!(
                "No camera frame for {} cycles; is the device still connected?",
                self.consecutive_missing_frames
            );
        }
        self.not_ready("no frame")
    }

    fn skip(&mut self, e: PipelineError) -> TickOutcome {
        self.stats.failed += 1;
        match &e {
            PipelineError::DimensionMismatch { .. } => {
                self.consecutive_mismatches += 1;
                if self.consecutive_mismatches % MISMATCH_ALERT_AFTER == 0 {
                    tracing::error!(
                        "Dimension mismatch persisted for {} cycles: {}",
                        self.consecutive_mismatches,
                        e
                    );
                } else if self.consecutive_mismatches == 1 {
                    tracing::warn!("Cycle abandoned: {}", e);
                }
            }
            _ => tracing::warn!("Cycle skipped: {}", e),
        }
        TickOutcome::Skipped(e)
    }

    fn halt(&mut self, e: PipelineError) -> TickOutcome {
        tracing::error!("Fatal pipeline error: {}", e);
        self.fatal = Some(e.clone());
        TickOutcome::Halted(e)
    }

    /// Stop the session: flips the liveness flag first so in-flight work
    /// discards its results, then clears cycle state and drops the model.
    pub fn teardown(&mut self) {
        self.liveness.teardown();
        self.scheduler.reset();
        self.model.clear();
        tracing::info!("Session torn down after {} frames", self.stats.committed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::BackgroundSource;
    use crate::output::CanvasSink;
    use crate::raster::Raster;
    use crate::segmentation::{Matte, SegmentationConfig, SegmentationModel};
    use image::Rgba;
    use std::collections::VecDeque;
    use std::sync::mpsc;
    use std::time::Duration;

    const W: u32 = 8;
    const H: u32 = 6;
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    /// Yields queued frames (`None` = no frame), then repeats a fixed one
    struct StubSource {
        queued: VecDeque<Option<Raster>>,
        fallback: Option<Raster>,
    }

    impl StubSource {
        fn repeating(frame: Raster) -> Self {
            Self {
                queued: VecDeque::new(),
                fallback: Some(frame),
            }
        }
    }

    impl FrameSource for StubSource {
        fn current_frame(&mut self) -> Result<Raster> {
            match self.queued.pop_front() {
                Some(Some(frame)) => Ok(frame),
                Some(None) => Err(PipelineError::NoFrameAvailable),
                None => self.fallback.clone().ok_or(PipelineError::NoFrameAvailable),
            }
        }

        fn dimensions(&self) -> Dimensions {
            Dimensions::new(W, H)
        }
    }

    /// Left half foreground; optionally waits for a release signal first
    struct HalfModel {
        gate: Option<mpsc::Receiver<()>>,
        fail: bool,
    }

    impl SegmentationModel for HalfModel {
        fn segment(&mut self, frame: &Raster) -> Result<Matte> {
            if let Some(gate) = &self.gate {
                // A dropped sender releases every later call too
                let _ = gate.recv();
            }
            if self.fail {
                return Err(PipelineError::Segmentation("model threw".into()));
            }
            let (width, height) = frame.dimensions();
            Ok((0..width * height)
                .map(|i| if i % width < width / 2 { 1.0 } else { 0.0 })
                .collect())
        }

        fn input_size(&self) -> (u32, u32) {
            (W, H)
        }
    }

    fn ready_slot(model: HalfModel) -> ModelSlot {
        ModelSlot::ready(SegmentationProvider::from_model(
            Box::new(model),
            SegmentationConfig::default(),
        ))
    }

    fn config(background: Option<Background>) -> SessionConfig {
        SessionConfig {
            width: W,
            height: H,
            target_fps: 30,
            initial_background: background,
        }
    }

    fn session(model: ModelSlot, source: StubSource) -> (Session<StubSource, CanvasSink>, CanvasSink) {
        let canvas = CanvasSink::new(W, H);
        let session = Session::new(
            config(Some(Background::Solid(RED))),
            source,
            canvas.clone(),
            model,
        )
        .unwrap();
        (session, canvas)
    }

    fn assert_left_half(frame: &Raster, left: Rgba<u8>, right: Rgba<u8>) {
        for (x, _, pixel) in frame.enumerate_pixels() {
            let expected = if x < W / 2 { left } else { right };
            assert_eq!(*pixel, expected, "column {x}");
        }
    }

    #[tokio::test]
    async fn committed_cycle_draws_person_over_background() {
        let model = HalfModel { gate: None, fail: false };
        let (mut session, canvas) = session(
            ready_slot(model),
            StubSource::repeating(Raster::from_pixel(W, H, WHITE)),
        );
        let now = Instant::now();

        assert!(matches!(session.tick(now).await, TickOutcome::Committed));
        assert_eq!(session.last_composited_at(), Some(now));
        assert_left_half(&canvas.shown().unwrap(), WHITE, RED);
    }

    #[tokio::test]
    async fn tick_before_model_load_does_nothing() {
        let (mut session, canvas) = session(
            ModelSlot::new(),
            StubSource::repeating(Raster::from_pixel(W, H, WHITE)),
        );

        let outcome = session.tick(Instant::now()).await;

        assert!(matches!(outcome, TickOutcome::NotReady));
        assert_eq!(session.stats().committed, 0);
        assert!(session.last_composited_at().is_none());
        assert!(canvas.shown().is_none());
    }

    #[tokio::test]
    async fn tick_without_background_does_nothing() {
        let canvas = CanvasSink::new(W, H);
        let mut session = Session::new(
            config(None),
            StubSource::repeating(Raster::from_pixel(W, H, WHITE)),
            canvas.clone(),
            ready_slot(HalfModel { gate: None, fail: false }),
        )
        .unwrap();

        assert!(matches!(session.tick(Instant::now()).await, TickOutcome::NotReady));
        assert!(canvas.shown().is_none());
    }

    #[tokio::test]
    async fn missing_frame_is_not_ready() {
        let source = StubSource {
            queued: VecDeque::new(),
            fallback: None,
        };
        let (mut session, _) = session(ready_slot(HalfModel { gate: None, fail: false }), source);

        assert!(matches!(session.tick(Instant::now()).await, TickOutcome::NotReady));
        assert!(session.last_composited_at().is_none());
    }

    #[tokio::test]
    async fn early_ticks_are_throttled() {
        let (mut session, _) = session(
            ready_slot(HalfModel { gate: None, fail: false }),
            StubSource::repeating(Raster::from_pixel(W, H, WHITE)),
        );
        let start = Instant::now();

        assert!(matches!(session.tick(start).await, TickOutcome::Committed));
        let early = start + Duration::from_millis(10);
        assert!(matches!(session.tick(early).await, TickOutcome::Throttled));
        assert_eq!(session.last_composited_at(), Some(start));

        let later = start + Duration::from_millis(40);
        assert!(matches!(session.tick(later).await, TickOutcome::Committed));
        assert_eq!(session.stats().committed, 2);
        assert_eq!(session.stats().skipped_rate, 1);
    }

    #[tokio::test]
    async fn segmentation_failure_keeps_previous_frame() {
        let (mut session, canvas) = session(
            ready_slot(HalfModel { gate: None, fail: true }),
            StubSource::repeating(Raster::from_pixel(W, H, WHITE)),
        );

        let outcome = session.tick(Instant::now()).await;

        assert!(matches!(outcome, TickOutcome::Skipped(PipelineError::Segmentation(_))));
        assert!(session.last_composited_at().is_none());
        assert!(canvas.shown().is_none());
        assert_eq!(session.stats().failed, 1);
    }

    #[tokio::test]
    async fn wrong_sized_frame_leaves_output_unchanged() {
        let source = StubSource {
            queued: VecDeque::from([
                Some(Raster::from_pixel(W, H, WHITE)),
                Some(Raster::from_pixel(W * 2, H, BLUE)),
            ]),
            fallback: None,
        };
        let (mut session, canvas) = session(ready_slot(HalfModel { gate: None, fail: false }), source);
        let start = Instant::now();

        assert!(matches!(session.tick(start).await, TickOutcome::Committed));
        let before = canvas.shown().unwrap();

        let outcome = session.tick(start + Duration::from_secs(1)).await;

        assert!(matches!(
            outcome,
            TickOutcome::Skipped(PipelineError::DimensionMismatch { what: "frame", .. })
        ));
        assert_eq!(canvas.shown().unwrap(), before);
        assert_eq!(session.last_composited_at(), Some(start));
    }

    fn wrong_sized() -> Option<Raster> {
        Some(Raster::from_pixel(W * 2, H, BLUE))
    }

    #[tokio::test]
    async fn mismatch_alert_after_thirty_in_a_row() {
        let mut queued: VecDeque<_> = (0..30).map(|_| wrong_sized()).collect();
        queued.push_back(None);
        let source = StubSource {
            queued,
            fallback: None,
        };
        let (mut session, _) = session(ready_slot(HalfModel { gate: None, fail: false }), source);
        let start = Instant::now();

        for k in 1..=29u64 {
            session.tick(start + Duration::from_secs(k)).await;
        }
        assert_eq!(session.consecutive_mismatches(), 29);
        assert!(!session.mismatch_alert());

        session.tick(start + Duration::from_secs(30)).await;
        assert_eq!(session.consecutive_mismatches(), 30);
        assert!(session.mismatch_alert());

        // A frame-less cycle breaks the streak
        let outcome = session.tick(start + Duration::from_secs(31)).await;
        assert!(matches!(outcome, TickOutcome::NotReady));
        assert_eq!(session.consecutive_mismatches(), 0);
        assert!(!session.mismatch_alert());
    }

    #[tokio::test]
    async fn interrupted_mismatches_do_not_alert() {
        let mut queued: VecDeque<_> = (0..20).map(|_| wrong_sized()).collect();
        queued.push_back(None);
        queued.extend((0..20).map(|_| wrong_sized()));
        let source = StubSource {
            queued,
            fallback: None,
        };
        let (mut session, _) = session(ready_slot(HalfModel { gate: None, fail: false }), source);
        let start = Instant::now();

        for k in 1..=41u64 {
            session.tick(start + Duration::from_secs(k)).await;
        }

        assert_eq!(session.consecutive_mismatches(), 20);
        assert!(!session.mismatch_alert());
        assert_eq!(session.stats().failed, 40);
    }

    #[tokio::test]
    async fn missing_frames_mark_source_stalled_until_recovery() {
        let source = StubSource {
            queued: (0..30).map(|_| None).collect(),
            fallback: Some(Raster::from_pixel(W, H, WHITE)),
        };
        let (mut session, _) = session(ready_slot(HalfModel { gate: None, fail: false }), source);
        let start = Instant::now();

        for k in 1..=29u64 {
            session.tick(start + Duration::from_secs(k)).await;
        }
        assert!(!session.frame_source_stalled());

        session.tick(start + Duration::from_secs(30)).await;
        assert!(session.frame_source_stalled());

        let outcome = session.tick(start + Duration::from_secs(31)).await;
        assert!(matches!(outcome, TickOutcome::Committed));
        assert!(!session.frame_source_stalled());
    }

    #[tokio::test]
    async fn unavailable_model_halts_session() {
        let slot = ModelSlot::new();
        slot.publish(Err(PipelineError::ModelLoad("bad weights".into())));
        let (mut session, _) = session(slot, StubSource::repeating(Raster::from_pixel(W, H, WHITE)));

        assert!(matches!(
            session.tick(Instant::now()).await,
            TickOutcome::Halted(PipelineError::ModelLoad(_))
        ));
        assert!(matches!(
            session.tick(Instant::now() + Duration::from_secs(1)).await,
            TickOutcome::Halted(_)
        ));
    }

    #[tokio::test]
    async fn background_swap_mid_cycle_applies_next_cycle() {
        let (release, gate) = mpsc::channel();
        let model = HalfModel { gate: Some(gate), fail: false };
        let (mut session, canvas) = session(
            ready_slot(model),
            StubSource::repeating(Raster::from_pixel(W, H, WHITE)),
        );
        let store = session.backgrounds();
        let start = Instant::now();

        let swap = async move {
            store
                .set_background(BackgroundSource::Solid(BLUE))
                .await
                .unwrap();
            drop(release);
        };
        let (outcome, ()) = tokio::join!(session.tick(start), swap);

        assert!(matches!(outcome, TickOutcome::Committed));
        assert_left_half(&canvas.shown().unwrap(), WHITE, RED);

        let outcome = session.tick(start + Duration::from_secs(1)).await;
        assert!(matches!(outcome, TickOutcome::Committed));
        assert_left_half(&canvas.shown().unwrap(), WHITE, BLUE);
    }

    #[tokio::test]
    async fn teardown_during_segmentation_discards_result() {
        let (release, gate) = mpsc::channel();
        let model = HalfModel { gate: Some(gate), fail: false };
        let (mut session, canvas) = session(
            ready_slot(model),
            StubSource::repeating(Raster::from_pixel(W, H, WHITE)),
        );
        let liveness = session.liveness();

        let teardown = async move {
            liveness.teardown();
            drop(release);
        };
        let (outcome, ()) = tokio::join!(session.tick(Instant::now()), teardown);

        assert!(matches!(outcome, TickOutcome::Discarded));
        assert!(canvas.shown().is_none());
        assert!(session.last_composited_at().is_none());

        session.teardown();
        assert!(matches!(session.tick(Instant::now()).await, TickOutcome::Discarded));
        assert!(session.model().is_loading());
    }

    #[tokio::test]
    async fn mirrored_session_draws_mirrored_frame() {
        let frame = Raster::from_fn(W, H, |x, _| if x < W / 2 { WHITE } else { BLUE });
        let provider = SegmentationProvider::from_model(
            Box::new(HalfModel { gate: None, fail: false }),
            SegmentationConfig {
                mirror: true,
                ..SegmentationConfig::default()
            },
        );
        let (mut session, canvas) = session(ModelSlot::ready(provider), StubSource::repeating(frame));

        assert!(matches!(session.tick(Instant::now()).await, TickOutcome::Committed));
        // Mirrored frame has blue on the left, where the mask says person
        assert_left_half(&canvas.shown().unwrap(), BLUE, RED);
    }

    #[test]
    fn config_rejects_empty_canvas() {
        let mut bad = config(None);
        bad.width = 0;
        assert!(bad.validate().is_err());
    }
}
