//! Zoom state for the ink viewer
//!
//! The effective zoom is the product of a base zoom (fit-to-width for the
//! current page) and a user zoom driven by the wheel. Right after a zoom
//! step the viewer is "settling": cached tiles and previews are shown, but
//! no new tiles are spawned until the zoom has been still for a moment.

use std::time::{Duration, Instant};

/// Zoom factors and settle timing for one viewer
#[derive(Clone, Debug)]
pub struct ZoomState {
    /// Fit-to-width factor for the current page
    base_zoom: f64,
    /// User zoom factor (1.0 = fit)
    user_zoom: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
    /// How fast the wheel changes the user zoom
    pub sensitivity: f64,
    /// Quiet time after a zoom step before tiles are spawned again
    pub settle: Duration,
    last_zoom: Option<Instant>,
    needs_fit: bool,
}

impl Default for ZoomState {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_MIN_ZOOM,
            Self::DEFAULT_MAX_ZOOM,
            Self::DEFAULT_SENSITIVITY,
            Self::DEFAULT_SETTLE,
        )
    }
}

impl ZoomState {
    pub const DEFAULT_MIN_ZOOM: f64 = 0.2;
    pub const DEFAULT_MAX_ZOOM: f64 = 10.0;
    pub const DEFAULT_SENSITIVITY: f64 = 10.0;
    pub const DEFAULT_SETTLE: Duration = Duration::from_millis(200);

    pub fn new(min_zoom: f64, max_zoom: f64, sensitivity: f64, settle: Duration) -> Self {
        let min_zoom = Self::clamp_factor(min_zoom);
        let max_zoom = Self::clamp_factor(max_zoom).max(min_zoom);
        Self {
            base_zoom: 1.0,
            user_zoom: 1.0,
            min_zoom,
            max_zoom,
            sensitivity,
            settle,
            last_zoom: None,
            needs_fit: true,
        }
    }

    /// Effective zoom
    #[must_use]
    pub fn zoom(&self) -> f64 {
        self.base_zoom * self.user_zoom
    }

    #[must_use]
    pub fn base_zoom(&self) -> f64 {
        self.base_zoom
    }

    #[must_use]
    pub fn user_zoom(&self) -> f64 {
        self.user_zoom
    }

    /// Whether the base zoom still has to be fitted to a page
    #[must_use]
    pub fn needs_fit(&self) -> bool {
        self.needs_fit
    }

    /// Fit the base zoom so one frame spans the viewport width
    pub fn fit_to_width(&mut self, viewport_width: f64, frame_width: f64) {
        if viewport_width > 0.0 && frame_width > 0.0 {
            self.set_base_zoom(viewport_width / frame_width);
        }
        self.needs_fit = false;
    }

    pub fn set_base_zoom(&mut self, base_zoom: f64) {
        self.base_zoom = Self::clamp_factor(base_zoom);
        self.needs_fit = false;
    }

    /// Apply one wheel event of `wheel_y` notches over `dt` seconds.
    ///
    /// Returns `zoom_before - zoom_after` (zero when clamped in place).
    pub fn wheel(&mut self, wheel_y: f64, dt: f64, now: Instant) -> f64 {
        let target = self.user_zoom + wheel_y * self.sensitivity * dt;
        self.set_user_zoom(target, now)
    }

    /// Set the user zoom directly; returns `zoom_before - zoom_after`
    pub fn set_user_zoom(&mut self, user_zoom: f64, now: Instant) -> f64 {
        let before = self.zoom();
        let user_zoom = if user_zoom.is_finite() {
            user_zoom
        } else {
            self.user_zoom
        };
        self.user_zoom = user_zoom.clamp(self.min_zoom, self.max_zoom);
        let delta = before - self.zoom();
        if delta != 0.0 {
            self.last_zoom = Some(now);
        }
        delta
    }

    /// True once the zoom has been still for longer than the settle delay
    #[must_use]
    pub fn is_settled(&self, now: Instant) -> bool {
        self.last_zoom
            .is_none_or(|last| now.saturating_duration_since(last) > self.settle)
    }

    /// Back to fit-to-width at user zoom 1, e.g. on page change
    pub fn reset(&mut self) {
        self.base_zoom = 1.0;
        self.user_zoom = 1.0;
        self.last_zoom = None;
        self.needs_fit = true;
    }

    /// Clamp a factor to something usable, handling NaN/Inf
    pub fn clamp_factor(factor: f64) -> f64 {
        if !factor.is_finite() || factor <= 0.0 {
            1.0
        } else {
            factor
        }
    }
}

/// Pan correction that keeps the point under `pointer` fixed while zooming.
///
/// `offset` is the per-unit zoom scaling offset and `reference` the frame's
/// on-screen size before the zoom step, both per axis.
#[must_use]
pub fn anchored_pan(
    pan: (f64, f64),
    pointer: (f64, f64),
    center: (f64, f64),
    reference: (f64, f64),
    offset: (f64, f64),
    zoom_delta: f64,
) -> (f64, f64) {
    let axis = |pan: f64, pointer: f64, center: f64, reference: f64, offset: f64| {
        if reference <= 0.0 {
            return pan;
        }
        pan - ((pointer - center) / (reference / 2.0)) * offset * zoom_delta
    };
    (
        axis(pan.0, pointer.0, center.0, reference.0, offset.0),
        axis(pan.1, pointer.1, center.1, reference.1, offset.1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wheel_is_clamped_to_limits() {
        let mut zoom = ZoomState::default();
        let now = Instant::now();

        zoom.wheel(100.0, 1.0, now);
        assert_eq!(zoom.user_zoom(), ZoomState::DEFAULT_MAX_ZOOM);

        zoom.wheel(-100.0, 1.0, now);
        assert_eq!(zoom.user_zoom(), ZoomState::DEFAULT_MIN_ZOOM);
    }

    #[test]
    fn wheel_step_scales_with_sensitivity_and_time() {
        let mut zoom = ZoomState::default();
        let delta = zoom.wheel(1.0, 0.01, Instant::now());
        assert!((zoom.user_zoom() - 1.1).abs() < 1e-9);
        assert!((delta + 0.1).abs() < 1e-9);
    }

    #[test]
    fn effective_zoom_multiplies_base() {
        let mut zoom = ZoomState::default();
        zoom.fit_to_width(702.0, 1404.0);
        assert!(!zoom.needs_fit());
        zoom.set_user_zoom(2.0, Instant::now());
        assert!((zoom.zoom() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn settles_after_delay() {
        let mut zoom = ZoomState::default();
        let start = Instant::now();
        assert!(zoom.is_settled(start));

        zoom.wheel(1.0, 0.01, start);
        assert!(!zoom.is_settled(start + Duration::from_millis(100)));
        assert!(zoom.is_settled(start + Duration::from_millis(250)));
    }

    #[test]
    fn clamped_step_does_not_unsettle() {
        let mut zoom = ZoomState::default();
        let now = Instant::now();
        zoom.set_user_zoom(ZoomState::DEFAULT_MAX_ZOOM, now);
        let later = now + Duration::from_secs(1);
        assert_eq!(zoom.wheel(5.0, 1.0, later), 0.0);
        assert!(zoom.is_settled(later));
    }

    #[test]
    fn reset_returns_to_fit() {
        let mut zoom = ZoomState::default();
        zoom.fit_to_width(500.0, 1000.0);
        zoom.set_user_zoom(3.0, Instant::now());
        zoom.reset();
        assert_eq!(zoom.zoom(), 1.0);
        assert!(zoom.needs_fit());
    }

    #[test]
    fn pointer_at_center_keeps_pan() {
        let pan = anchored_pan(
            (10.0, -4.0),
            (500.0, 400.0),
            (500.0, 400.0),
            (1000.0, 1333.0),
            (-500.0, -666.5),
            -0.1,
        );
        assert_eq!(pan, (10.0, -4.0));
    }

    #[test]
    fn pointer_off_center_shifts_pan() {
        // Zooming in (negative delta) with the pointer at the right edge
        // moves content left so the pointer stays over the same ink.
        let pan = anchored_pan(
            (0.0, 0.0),
            (1000.0, 400.0),
            (500.0, 400.0),
            (1000.0, 1333.0),
            (-500.0, -666.5),
            -0.1,
        );
        assert!((pan.0 + 50.0).abs() < 1e-9);
        assert_eq!(pan.1, 0.0);
    }
}
