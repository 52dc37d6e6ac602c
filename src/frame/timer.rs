//! Frame pacing and FPS bookkeeping

use std::time::{Duration, Instant};

/// Tracks delta time and a frames-per-second figure over a fixed window.
#[derive(Debug, Clone)]
pub struct FrameTimer {
    last: Instant,
    min_frame_time: f32,
    fps_window: f32,
    delta: f32,
    elapsed: f32,
    frames: u32,
    fps: u32,
}

impl FrameTimer {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
            min_frame_time: 0.0,
            fps_window: 1.0,
            delta: 0.0,
            elapsed: 0.0,
            frames: 0,
            fps: 0,
        }
    }

    /// Cap the frame rate by sleeping until `seconds` have passed since the last tick.
    pub fn with_min_frame_time(mut self, seconds: f32) -> Self {
        self.min_frame_time = seconds.max(0.0);
        self
    }

    pub fn with_fps_window(mut self, seconds: f32) -> Self {
        self.fps_window = seconds.max(f32::EPSILON);
        self
    }

    /// Measure the time since the previous tick and fold it into the FPS window.
    pub fn tick(&mut self) -> f32 {
        let mut now = Instant::now();
        let mut delta = now.duration_since(self.last).as_secs_f32();
        if delta < self.min_frame_time {
            std::thread::sleep(Duration::from_secs_f32(self.min_frame_time - delta));
            now = Instant::now();
            delta = now.duration_since(self.last).as_secs_f32();
        }
        self.last = now;
        self.advance(delta)
    }

    /// Account for one frame that took `delta` seconds.
    pub fn advance(&mut self, delta: f32) -> f32 {
        self.delta = delta;
        self.frames += 1;
        self.elapsed += delta;
        if self.elapsed >= self.fps_window {
            self.fps = (self.frames as f32 / self.elapsed * self.fps_window).round() as u32;
            log::debug!("{} fps ({:.3} ms last frame)", self.fps, delta * 1000.0);
            self.frames = 0;
            self.elapsed = 0.0;
        }
        delta
    }

    /// Seconds the last frame took.
    pub fn delta_time(&self) -> f32 {
        self.delta
    }

    /// Frames counted over the last completed window.
    pub fn frames_per_second(&self) -> u32 {
        self.fps
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_updates_after_window() {
        let mut timer = FrameTimer::new();
        for _ in 0..59 {
            timer.advance(1.0 / 60.0);
        }
        assert_eq!(timer.frames_per_second(), 0);

        timer.advance(1.0 / 60.0 + 0.001);
        assert_eq!(timer.frames_per_second(), 60);
    }

    #[test]
    fn test_fps_window_resets() {
        let mut timer = FrameTimer::new();
        for _ in 0..4 {
            timer.advance(0.25);
        }
        assert_eq!(timer.frames_per_second(), 4);
        for _ in 0..3 {
            timer.advance(0.5);
        }
        assert_eq!(timer.frames_per_second(), 2);
    }

    #[test]
    fn test_min_frame_time_caps_rate() {
        let mut timer = FrameTimer::new().with_min_frame_time(0.01);
        timer.tick();
        let delta = timer.tick();
        assert!(delta >= 0.01);
    }
}
