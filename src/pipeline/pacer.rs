use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Emission timestamps kept for the realized-FPS estimate.
pub const FPS_WINDOW: usize = 30;

/// Throttles emission to a target rate and measures the rate achieved.
///
/// Pacing only looks forward: after a stall the next emission happens
/// immediately and the schedule restarts from there, with no burst to catch
/// up on missed slots.
#[derive(Debug)]
pub struct OutputPacer {
    interval: Duration,
    last_emit: Option<Instant>,
    window: VecDeque<Instant>,
}

impl OutputPacer {
    pub fn new(target_fps: u32) -> Self {
        Self {
            interval: interval_for(target_fps),
            last_emit: None,
            window: VecDeque::with_capacity(FPS_WINDOW),
        }
    }

    pub fn set_target_fps(&mut self, target_fps: u32) {
        self.interval = interval_for(target_fps);
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// How long to wait before the next emission is due.
    pub fn delay(&self, now: Instant) -> Duration {
        match self.last_emit {
            Some(last) => self.interval.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    /// Sleep until the next slot, then record the emission.
    pub fn pace(&mut self) -> Instant {
        let delay = self.delay(Instant::now());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let now = Instant::now();
        self.record(now);
        now
    }

    /// Record an emission at `at` without sleeping.
    pub fn record(&mut self, at: Instant) {
        self.last_emit = Some(at);
        if self.window.len() == FPS_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(at);
    }

    /// Realized emissions per second over the window.
    pub fn realized_fps(&self) -> f64 {
        let (Some(first), Some(last)) = (self.window.front(), self.window.back()) else {
            return 0.0;
        };
        let span = last.saturating_duration_since(*first).as_secs_f64();
        if self.window.len() < 2 || span <= 0.0 {
            return 0.0;
        }
        (self.window.len() - 1) as f64 / span
    }
}

fn interval_for(target_fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(target_fps.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_emission_is_immediate() {
        let pacer = OutputPacer::new(30);
        assert_eq!(pacer.delay(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn delay_covers_remaining_interval() {
        let mut pacer = OutputPacer::new(10);
        let start = Instant::now();
        pacer.record(start);
        assert_eq!(pacer.delay(start + Duration::from_millis(40)), Duration::from_millis(60));
        // after a stall: no negative delay, no catch-up burst
        assert_eq!(pacer.delay(start + Duration::from_secs(2)), Duration::ZERO);
    }

    #[test]
    fn realized_fps_from_synthetic_timestamps() {
        let mut pacer = OutputPacer::new(20);
        let start = Instant::now();
        for i in 0..40u64 {
            pacer.record(start + Duration::from_millis(50 * i));
        }
        assert!((pacer.realized_fps() - 20.0).abs() < 1e-6);
    }

    #[test]
    fn tracks_thirty_fps_over_one_second() {
        let mut pacer = OutputPacer::new(30);
        let start = pacer.pace();
        let mut last = start;
        let mut emissions = 0u32;
        while last.duration_since(start) < Duration::from_secs(1) {
            last = pacer.pace();
            emissions += 1;
        }
        let mean = last.duration_since(start).as_secs_f64() / f64::from(emissions);
        let target = 1.0 / 30.0;
        assert!(
            (mean - target).abs() < target * 0.15,
            "mean interval {:.4}s vs target {:.4}s",
            mean,
            target
        );
        assert!(pacer.realized_fps() > 25.0 && pacer.realized_fps() < 31.0);
    }
}
