//! Pointer tracking for the flowmap.
//!
//! [`PointerTracker`] turns raw window events into the position/velocity
//! pair the flowmap consumes. Events only record the latest sample; the
//! once-per-frame [`PointerTracker::sample_frame`] decides what the flowmap
//! sees:
//!
//! - one or more moves since the last frame: [`PointerPhase::Moving`], the
//!   latest position and velocity are used
//! - no moves: [`PointerPhase::Idle`], the position becomes the inactive
//!   sentinel and the target velocity drops to zero
//!
//! The velocity handed to the flowmap is eased toward that target. By
//! default the rate is the same while moving and while fading out;
//! [`VelocityEasing::Fading`] slows the fade so trails linger.
//!
//! # Usage
//!
//! ```ignore
//! // In the window event handler
//! tracker.handle_event(&event, Instant::now());
//!
//! // Once per frame
//! let pointer = tracker.sample_frame();
//! flowmap.set_input(pointer.state());
//! ```

use std::time::Instant;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use winit::event::WindowEvent;

use crate::flowmap::PointerState;

/// Lower bound on the time between two moves, in milliseconds. Keeps
/// velocity finite when events arrive in bursts.
pub const MIN_EVENT_DELTA_MS: f32 = 14.0;

/// Easing rate toward a non-zero target velocity.
pub const EASE_MOVING: f32 = 0.5;

/// Easing rate toward zero once the pointer stops, under
/// [`VelocityEasing::Fading`].
pub const EASE_FADING: f32 = 0.1;

/// How the eased velocity follows its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocityEasing {
    /// [`EASE_MOVING`] toward every target, zero included.
    #[default]
    Constant,
    /// [`EASE_MOVING`] toward a moving target, [`EASE_FADING`] toward zero.
    Fading,
}

impl VelocityEasing {
    /// Lerp factor for one frame toward `target`.
    pub fn rate(self, target: Vec2) -> f32 {
        match self {
            VelocityEasing::Constant => EASE_MOVING,
            VelocityEasing::Fading if target.length() > 0.0 => EASE_MOVING,
            VelocityEasing::Fading => EASE_FADING,
        }
    }
}

/// Whether the pointer moved during the last frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointerPhase {
    #[default]
    Idle,
    Moving,
}

/// What the flowmap should see this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerSample {
    pub phase: PointerPhase,
    /// Normalized position, or [`PointerState::INACTIVE`] when idle.
    pub position: Vec2,
    /// Eased velocity in pixels per millisecond.
    pub velocity: Vec2,
}

impl PointerSample {
    pub fn state(&self) -> PointerState {
        PointerState::new(self.position, self.velocity)
    }
}

#[derive(Debug, Clone, Copy)]
struct LastMove {
    pixel: Vec2,
    at: Instant,
}

/// Pointer tracking state.
#[derive(Debug)]
pub struct PointerTracker {
    window_size: (u32, u32),
    easing: VelocityEasing,

    // Written by events
    position: Vec2,
    raw_velocity: Vec2,
    last_move: Option<LastMove>,
    moves_since_frame: u32,

    // Written by sample_frame
    phase: PointerPhase,
    eased_velocity: Vec2,
}

impl Default for PointerTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PointerTracker {
    /// Create a new tracker with no pointer on screen.
    pub fn new() -> Self {
        Self {
            window_size: (800, 600),
            easing: VelocityEasing::default(),
            position: PointerState::INACTIVE,
            raw_velocity: Vec2::ZERO,
            last_move: None,
            moves_since_frame: 0,
            phase: PointerPhase::Idle,
            eased_velocity: Vec2::ZERO,
        }
    }

    pub fn with_easing(mut self, easing: VelocityEasing) -> Self {
        self.easing = easing;
        self
    }

    /// Update window size for normalization.
    pub fn set_window_size(&mut self, width: u32, height: u32) {
        self.window_size = (width, height);
    }

    /// Current phase, as decided by the last [`Self::sample_frame`].
    pub fn phase(&self) -> PointerPhase {
        self.phase
    }

    /// Eased velocity from the last [`Self::sample_frame`].
    pub fn velocity(&self) -> Vec2 {
        self.eased_velocity
    }

    /// Process a winit window event.
    pub fn handle_event(&mut self, event: &WindowEvent, now: Instant) {
        match event {
            WindowEvent::CursorMoved { position, .. } => {
                self.pointer_moved(Vec2::new(position.x as f32, position.y as f32), now);
            }
            WindowEvent::CursorLeft { .. } => self.pointer_left(),
            WindowEvent::Resized(size) => {
                self.set_window_size(size.width, size.height);
            }
            _ => {}
        }
    }

    /// Record a pointer move at `pixel` (origin top-left, y down).
    pub fn pointer_moved(&mut self, pixel: Vec2, now: Instant) {
        let (w, h) = self.window_size;
        if w == 0 || h == 0 {
            return;
        }

        // 0..1 with y flipped so up is positive
        self.position = Vec2::new(pixel.x / w as f32, 1.0 - pixel.y / h as f32);

        let last = self.last_move.unwrap_or(LastMove { pixel, at: now });
        let delta = pixel - last.pixel;
        let elapsed_ms = now.saturating_duration_since(last.at).as_secs_f32() * 1000.0;
        self.raw_velocity = delta / elapsed_ms.max(MIN_EVENT_DELTA_MS);

        self.last_move = Some(LastMove { pixel, at: now });
        self.moves_since_frame += 1;
    }

    /// The pointer left the window. The next frame is Idle, and re-entry
    /// starts a fresh velocity estimate.
    pub fn pointer_left(&mut self) {
        self.last_move = None;
        self.moves_since_frame = 0;
    }

    /// Advance the Moving/Idle state machine by one frame and return what
    /// the flowmap should see.
    pub fn sample_frame(&mut self) -> PointerSample {
        let (phase, position, target) = if self.moves_since_frame == 0 {
            (PointerPhase::Idle, PointerState::INACTIVE, Vec2::ZERO)
        } else {
            (PointerPhase::Moving, self.position, self.raw_velocity)
        };
        self.moves_since_frame = 0;

        if phase != self.phase {
            log::trace!("pointer {:?} -> {:?}", self.phase, phase);
        }
        self.phase = phase;

        self.eased_velocity = self.eased_velocity.lerp(target, self.easing.rate(target));

        PointerSample {
            phase,
            position,
            velocity: self.eased_velocity,
        }
    }
}
