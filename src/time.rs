//! Frame timing for the windowed effect.
//!
//! The compositor receives elapsed seconds each frame, and the app logs the
//! frame rate at debug level. Timestamps are passed in so the clock can be
//! driven deterministically in tests.
//!
//! ```ignore
//! let mut clock = FrameClock::new(Instant::now());
//!
//! // Once per redraw:
//! let elapsed = clock.tick(Instant::now());
//! ```

use std::time::{Duration, Instant};

/// How often the FPS estimate is refreshed.
const FPS_INTERVAL: Duration = Duration::from_millis(500);

/// Elapsed time, frame count and a periodically refreshed FPS estimate.
#[derive(Debug)]
pub struct FrameClock {
    start: Instant,
    last_frame: Instant,
    elapsed_secs: f32,
    delta_secs: f32,
    frame_count: u64,
    fps: f32,
    fps_frame_count: u64,
    fps_update_time: Instant,
    /// Set while the window is hidden.
    paused_at: Option<Instant>,
    /// Total time spent paused.
    paused_total: Duration,
}

impl FrameClock {
    pub fn new(now: Instant) -> Self {
        Self {
            start: now,
            last_frame: now,
            elapsed_secs: 0.0,
            delta_secs: 0.0,
            frame_count: 0,
            fps: 0.0,
            fps_frame_count: 0,
            fps_update_time: now,
            paused_at: None,
            paused_total: Duration::ZERO,
        }
    }

    /// Advance one frame and return the elapsed seconds, excluding paused
    /// time.
    pub fn tick(&mut self, now: Instant) -> f32 {
        if self.paused_at.is_some() {
            self.delta_secs = 0.0;
            return self.elapsed_secs;
        }

        self.delta_secs = now.saturating_duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        let running = now.saturating_duration_since(self.start).saturating_sub(self.paused_total);
        self.elapsed_secs = running.as_secs_f32();
        self.frame_count += 1;

        let since_fps = now.saturating_duration_since(self.fps_update_time);
        if since_fps >= FPS_INTERVAL {
            let frames = self.frame_count - self.fps_frame_count;
            self.fps = frames as f32 / since_fps.as_secs_f32();
            self.fps_frame_count = self.frame_count;
            self.fps_update_time = now;
            log::debug!("{:.1} fps", self.fps);
        }

        self.elapsed_secs
    }

    #[inline]
    pub fn elapsed(&self) -> f32 {
        self.elapsed_secs
    }

    #[inline]
    pub fn delta(&self) -> f32 {
        self.delta_secs
    }

    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame_count
    }

    #[inline]
    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Stop the clock, e.g. while the window is occluded.
    pub fn pause(&mut self, now: Instant) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    pub fn resume(&mut self, now: Instant) {
        if let Some(at) = self.paused_at.take() {
            self.paused_total += now.saturating_duration_since(at);
            self.last_frame = now;
        }
    }
}
