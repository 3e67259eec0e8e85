//! Per-connection fixed-window rate limiting.
//!
//! Each connection carries one [`RateLimitWindow`]. The limiter is a pure
//! function over that window: it never owns state, so the registry stays the
//! single writer of per-connection records while the limiter stays
//! independent of the codec and the registry.

use serde::{Deserialize, Serialize};

/// Limits read from the live configuration on every admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitParams {
    /// Frames allowed per window
    pub max_messages: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
}

/// Counter state for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    count: u32,
    window_start_ms: i64,
}

impl RateLimitWindow {
    /// Fresh window starting at `now_ms`
    pub fn new(now_ms: i64) -> Self {
        Self {
            count: 0,
            window_start_ms: now_ms,
        }
    }

    /// Frames counted in the current window, including throttled ones
    pub fn count(&self) -> u32 {
        self.count
    }

    /// When the current window started (ms since epoch)
    pub fn window_start_ms(&self) -> i64 {
        self.window_start_ms
    }
}

/// Limiter verdict for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Frame may be decoded and dispatched
    Allowed,
    /// Frame exceeds the window quota
    Throttled,
}

impl Admission {
    /// Whether the frame was allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Fixed-window limiter
pub struct RateLimiter;

impl RateLimiter {
    /// Count one inbound frame against `window`.
    ///
    /// The window rolls over the first time a frame arrives more than
    /// `params.window_ms` after it started. Throttled frames still count.
    pub fn admit(window: &mut RateLimitWindow, now_ms: i64, params: RateLimitParams) -> Admission {
        let elapsed = now_ms.saturating_sub(window.window_start_ms);
        if elapsed > 0 && elapsed as u64 > params.window_ms {
            window.count = 0;
            window.window_start_ms = now_ms;
        }

        window.count = window.count.saturating_add(1);

        if window.count > params.max_messages {
            Admission::Throttled
        } else {
            Admission::Allowed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(max_messages: u32, window_ms: u64) -> RateLimitParams {
        RateLimitParams {
            max_messages,
            window_ms,
        }
    }

    #[test]
    fn test_throttles_then_resets_after_window() {
        let limits = params(3, 1000);
        let mut window = RateLimitWindow::new(0);

        let verdicts: Vec<_> = [0, 10, 20, 30]
            .into_iter()
            .map(|t| RateLimiter::admit(&mut window, t, limits))
            .collect();
        assert_eq!(
            verdicts,
            vec![
                Admission::Allowed,
                Admission::Allowed,
                Admission::Allowed,
                Admission::Throttled
            ]
        );

        assert_eq!(RateLimiter::admit(&mut window, 1001, limits), Admission::Allowed);
        assert_eq!(window.count(), 1);
        assert_eq!(window.window_start_ms(), 1001);
    }

    #[test]
    fn test_window_boundary_is_exclusive() {
        let limits = params(1, 1000);
        let mut window = RateLimitWindow::new(0);
        assert!(RateLimiter::admit(&mut window, 0, limits).is_allowed());
        // exactly window_ms later is still the same window
        assert_eq!(RateLimiter::admit(&mut window, 1000, limits), Admission::Throttled);
        assert!(RateLimiter::admit(&mut window, 1001, limits).is_allowed());
    }

    #[test]
    fn test_throttled_frames_still_count() {
        let limits = params(1, 60_000);
        let mut window = RateLimitWindow::new(0);
        for t in 0..5 {
            RateLimiter::admit(&mut window, t, limits);
        }
        assert_eq!(window.count(), 5);
    }

    #[test]
    fn test_hot_apply_affects_next_admit_only() {
        let mut window = RateLimitWindow::new(0);
        for t in 0..5 {
            assert!(RateLimiter::admit(&mut window, t, params(100, 60_000)).is_allowed());
        }
        // limit lowered mid-window: the next frame sees the new max
        assert_eq!(
            RateLimiter::admit(&mut window, 6, params(1, 60_000)),
            Admission::Throttled
        );
        // window start is untouched by the change
        assert_eq!(window.window_start_ms(), 0);
    }

    #[test]
    fn test_shortened_window_measured_from_original_start() {
        let mut window = RateLimitWindow::new(0);
        RateLimiter::admit(&mut window, 100, params(1, 60_000));
        assert_eq!(
            RateLimiter::admit(&mut window, 600, params(1, 500)),
            Admission::Allowed
        );
        assert_eq!(window.window_start_ms(), 600);
    }

    #[test]
    fn test_clock_going_backwards_does_not_reset() {
        let limits = params(1, 10);
        let mut window = RateLimitWindow::new(1_000);
        RateLimiter::admit(&mut window, 1_000, limits);
        assert_eq!(RateLimiter::admit(&mut window, 0, limits), Admission::Throttled);
    }
}
