use std::time::{Duration, Instant};

/// Control-thread frame timing.
///
/// `delta` is the scaled time since the previous [`tick`](Self::tick); the
/// first tick reports zero so nothing jumps on startup.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    pub elapsed: Duration,
    pub delta: Duration,
    pub time_scale: f32,
    pub frame_count: u64,
    last: Option<Instant>,
}

impl Default for FrameClock {
    fn default() -> Self {
        FrameClock {
            elapsed: Duration::ZERO,
            delta: Duration::ZERO,
            time_scale: 1.0,
            frame_count: 0,
            last: None,
        }
    }
}

impl FrameClock {
    pub fn with_time_scale(time_scale: f32) -> Self {
        FrameClock {
            time_scale,
            ..Default::default()
        }
    }

    /// Measure wall time since the last call and advance the clock.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let raw = match self.last {
            Some(last) => now - last,
            None => Duration::ZERO,
        };
        self.last = Some(now);
        self.advance(raw)
    }

    /// Advance by an explicit amount of unscaled time.
    pub fn advance(&mut self, raw: Duration) -> Duration {
        self.delta = raw.mul_f32(self.time_scale.max(0.0));
        self.elapsed += self.delta;
        self.frame_count += 1;
        self.delta
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }
}
