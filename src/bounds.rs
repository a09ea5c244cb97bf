//! Manifest-wide playable-position bounds.
//!
//! One calculator exists per manifest and is consulted by every
//! representation index to clamp timelines and derive the live edge. For
//! dynamic content the maximum position keeps advancing at wall-clock rate
//! between observations; the upper edge reported by any single manifest
//! parse is not authoritative on its own.

use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::debug;

/// Static description of a manifest's bounds, as parsed from its root
/// attributes.
#[derive(Debug, Clone, Copy)]
pub struct ManifestBounds {
    /// Whether the manifest describes live content.
    pub is_dynamic: bool,
    /// `timeShiftBufferDepth`, in seconds. `None` means an unbounded
    /// timeshift window.
    pub time_shift_buffer_depth: Option<f64>,
    /// `availabilityStartTime`. Only meaningful for dynamic content.
    pub availability_start_time: Option<DateTime<Utc>>,
}

impl ManifestBounds {
    pub fn on_demand() -> Self {
        Self {
            is_dynamic: false,
            time_shift_buffer_depth: None,
            availability_start_time: None,
        }
    }

    pub fn live(
        time_shift_buffer_depth: Option<f64>,
        availability_start_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            is_dynamic: true,
            time_shift_buffer_depth,
            availability_start_time,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LastPosition {
    position: f64,
    observed_at: Instant,
}

/// Tracks the minimum and maximum currently-playable presentation position
/// across all tracks of one manifest.
///
/// Both bounds start out unknown; queries made before the first observation
/// return `None`, which availability checks surface as their indeterminate
/// outcome.
#[derive(Debug)]
pub struct ManifestBoundsCalculator {
    bounds: ManifestBounds,
    /// Offset such that `client clock + offset = server clock`, in seconds.
    server_time_offset: Option<f64>,
    last_position: Option<LastPosition>,
}

impl ManifestBoundsCalculator {
    pub fn new(bounds: ManifestBounds) -> Self {
        Self {
            bounds,
            server_time_offset: None,
            last_position: None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.bounds.is_dynamic
    }

    pub fn time_shift_buffer_depth(&self) -> Option<f64> {
        self.bounds.time_shift_buffer_depth
    }

    /// Record the furthest playable position observed in any parsed
    /// timeline, in presentation seconds.
    ///
    /// Observations below the current estimate are ignored: the maximum
    /// never regresses, so a segment reported evicted stays evicted until
    /// [`reset`](Self::reset).
    pub fn set_last_position(&mut self, position: f64) {
        match self.last_position {
            Some(last) if position <= last.position => {
                debug!(
                    "Ignoring non-advancing position observation: {} <= {}",
                    position, last.position
                );
            }
            _ => {
                self.last_position = Some(LastPosition {
                    position,
                    observed_at: Instant::now(),
                });
            }
        }
    }

    pub fn last_position_is_known(&self) -> bool {
        self.last_position.is_some()
    }

    /// Record the drift between the client clock and the server clock, in
    /// seconds, as measured by a UTCTiming exchange.
    pub fn set_server_time_offset(&mut self, offset: f64) {
        self.server_time_offset = Some(offset);
    }

    /// The maximum currently-known playable position, in presentation
    /// seconds. `None` until enough information exists to estimate it.
    ///
    /// For dynamic content the last observation is projected forward at
    /// wall-clock rate; with no observation yet, the position of the live
    /// edge is derived from `availabilityStartTime` and the synced clock.
    pub fn maximum_position(&self) -> Option<f64> {
        if !self.bounds.is_dynamic {
            return self.last_position.map(|last| last.position);
        }
        if let Some(last) = self.last_position {
            return Some(last.position + last.observed_at.elapsed().as_secs_f64());
        }
        let start = self.bounds.availability_start_time?;
        let now = Utc::now()
            + chrono::Duration::milliseconds((self.server_time_offset? * 1000.0) as i64);
        let elapsed = (now - start).num_milliseconds() as f64 / 1000.0;
        (elapsed >= 0.0).then_some(elapsed)
    }

    /// The minimum currently-known playable position, in presentation
    /// seconds. `None` while the maximum is unknown for dynamic content.
    pub fn minimum_position(&self) -> Option<f64> {
        if !self.bounds.is_dynamic {
            return Some(0.0);
        }
        let maximum = self.maximum_position()?;
        match self.bounds.time_shift_buffer_depth {
            Some(depth) => Some((maximum - depth).max(0.0)),
            None => Some(0.0),
        }
    }

    /// Forget all observations. Availability decisions made against the
    /// old window no longer bind after this.
    pub fn reset(&mut self) {
        self.last_position = None;
        self.server_time_offset = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(depth: Option<f64>) -> ManifestBoundsCalculator {
        ManifestBoundsCalculator::new(ManifestBounds::live(depth, None))
    }

    #[test]
    fn bounds_unknown_before_first_observation() {
        let calc = live(Some(30.0));
        assert!(!calc.last_position_is_known());
        assert_eq!(calc.maximum_position(), None);
        assert_eq!(calc.minimum_position(), None);
    }

    #[test]
    fn maximum_tracks_last_observation() {
        let mut calc = live(Some(30.0));
        calc.set_last_position(120.0);

        let max = calc.maximum_position().unwrap();
        assert!(max >= 120.0 && max < 121.0, "max = {max}");
    }

    #[test]
    fn minimum_is_maximum_less_timeshift_depth() {
        let mut calc = live(Some(30.0));
        calc.set_last_position(120.0);

        let min = calc.minimum_position().unwrap();
        assert!(min >= 90.0 && min < 91.0, "min = {min}");
    }

    #[test]
    fn unbounded_window_pins_minimum_to_zero() {
        let mut calc = live(None);
        calc.set_last_position(120.0);
        assert_eq!(calc.minimum_position(), Some(0.0));
    }

    #[test]
    fn minimum_never_negative() {
        let mut calc = live(Some(300.0));
        calc.set_last_position(20.0);
        assert_eq!(calc.minimum_position(), Some(0.0));
    }

    #[test]
    fn position_never_regresses() {
        let mut calc = live(Some(30.0));
        calc.set_last_position(120.0);
        calc.set_last_position(80.0);

        assert!(calc.maximum_position().unwrap() >= 120.0);
    }

    #[test]
    fn static_content_does_not_project_forward() {
        let mut calc = ManifestBoundsCalculator::new(ManifestBounds::on_demand());
        calc.set_last_position(600.0);
        assert_eq!(calc.maximum_position(), Some(600.0));
        assert_eq!(calc.minimum_position(), Some(0.0));
    }

    #[test]
    fn clock_fallback_needs_sync_and_start_time() {
        let start = Utc::now() - chrono::Duration::seconds(90);
        let mut calc =
            ManifestBoundsCalculator::new(ManifestBounds::live(Some(30.0), Some(start)));

        // No synced clock yet: still indeterminate.
        assert_eq!(calc.maximum_position(), None);

        calc.set_server_time_offset(0.0);
        let max = calc.maximum_position().unwrap();
        assert!(max > 89.0 && max < 92.0, "max = {max}");
    }

    #[test]
    fn reset_forgets_observations() {
        let mut calc = live(Some(30.0));
        calc.set_last_position(120.0);
        calc.reset();
        assert_eq!(calc.maximum_position(), None);
    }
}
