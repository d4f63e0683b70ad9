// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::{Duration, Instant};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// Wall-clock time since the engine started; drives the uniform animation.
#[derive(Clone, Copy, Debug)]
pub struct FrameClock {
    start: Instant,
}

impl FrameClock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::start()
    }
}

/// Counts rendered frames and reports once per window.
#[derive(Debug)]
pub struct FpsCounter {
    frames: u32,
    window: Duration,
    last: Instant,
}

impl FpsCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            frames: 0,
            window,
            last: Instant::now(),
        }
    }

    pub fn frame(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.frames = 0;
        self.last = Instant::now();
    }

    /// Returns the frame count of the elapsed window, if one just closed.
    pub fn tick(&mut self, now: Instant) -> Option<u32> {
        if now.duration_since(self.last) >= self.window {
            let n = self.frames;
            self.frames = 0;
            self.last = now;
            Some(n)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_counter_reports_only_after_window() {
        let mut fps = FpsCounter::new(Duration::from_secs(1));
        let t0 = fps.last;
        fps.frame();
        fps.frame();
        assert_eq!(fps.tick(t0 + Duration::from_millis(500)), None);
        assert_eq!(fps.tick(t0 + Duration::from_secs(1)), Some(2));
        // counter restarts after a report
        assert_eq!(fps.tick(t0 + Duration::from_secs(2)), Some(0));
    }

    #[test]
    fn frame_clock_is_monotonic() {
        let clock = FrameClock::start();
        let a = clock.elapsed_secs();
        let b = clock.elapsed_secs();
        assert!(b >= a);
    }
}
