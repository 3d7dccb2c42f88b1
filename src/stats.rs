use std::time::{Duration, Instant};

/// Stage timings for one committed cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleTimings {
    pub capture: Duration,
    pub segment: Duration,
    pub composite: Duration,
    pub output: Duration,
}

/// Running totals across the session, logged every `log_every` commits
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    pub committed: u64,
    pub skipped_rate: u64,
    pub skipped_not_ready: u64,
    pub failed: u64,
    total_capture: Duration,
    total_segment: Duration,
    total_composite: Duration,
    total_output: Duration,
    first_commit_at: Option<Instant>,
    last_commit_at: Option<Instant>,
}

impl CycleStats {
    const LOG_EVERY: u64 = 30;

    pub fn record_commit(&mut self, timings: CycleTimings) {
        self.record_commit_at(timings, Instant::now());
    }

    pub fn record_commit_at(&mut self, timings: CycleTimings, at: Instant) {
        self.committed += 1;
        self.first_commit_at.get_or_insert(at);
        self.last_commit_at = Some(at);
        self.total_capture += timings.capture;
        self.total_segment += timings.segment;
        self.total_composite += timings.composite;
        self.total_output += timings.output;

        if self.committed % Self::LOG_EVERY == 0 {
            self.log_averages();
        }
    }

    fn average_ms(&self, total: Duration) -> f64 {
        if self.committed == 0 {
            return 0.0;
        }
        total.as_secs_f64() * 1000.0 / self.committed as f64
    }

    /// Commits per second of wall-clock time between the first and latest commit
    pub fn commit_rate(&self) -> f64 {
        let (Some(first), Some(last)) = (self.first_commit_at, self.last_commit_at) else {
            return 0.0;
        };
        let elapsed = last.saturating_duration_since(first).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (self.committed - 1) as f64 / elapsed
    }

    pub fn log_averages(&self) {
        let capture_ms = self.average_ms(self.total_capture);
        let segment_ms = self.average_ms(self.total_segment);
        let composite_ms = self.average_ms(self.total_composite);
        let output_ms = self.average_ms(self.total_output);
        let total_ms = capture_ms + segment_ms + composite_ms + output_ms;
        let fps = self.commit_rate();

        tracing::info!(
            "Frame {}: capture={:.1}ms, segment={:.1}ms, composite={:.1}ms, output={:.1}ms, total={:.1}ms, fps={:.1}, skipped={}, failed={}",
            self.committed,
            capture_ms,
            segment_ms,
            composite_ms,
            output_ms,
            total_ms,
            fps,
            self.skipped_rate + self.skipped_not_ready,
            self.failed
        );
    }
}
