//! Document bounding-box accumulation

use super::types::{BoundingBox, FrameId};

/// Folds per-layer bounding boxes into one document-level box.
///
/// The box only ever widens while layers are folded in; call [`reset`]
/// with the full layer set when a layer's geometry shrinks.
///
/// [`reset`]: SizeTracker::reset
#[derive(Clone, Debug, Default)]
pub struct SizeTracker {
    bbox: Option<BoundingBox>,
}

impl SizeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tracker from a complete layer set
    pub fn from_layers<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = BoundingBox>,
    {
        let mut tracker = Self::new();
        tracker.reset(layers);
        tracker
    }

    pub fn fold_layer(&mut self, layer: BoundingBox) {
        let layer = BoundingBox::new(layer.top, layer.left, layer.bottom, layer.right);
        self.bbox = Some(match self.bbox {
            Some(current) => current.union(&layer),
            None => layer,
        });
    }

    /// Re-derive the box from the full set of current layers
    pub fn reset<I>(&mut self, layers: I)
    where
        I: IntoIterator<Item = BoundingBox>,
    {
        self.bbox = None;
        for layer in layers {
            self.fold_layer(layer);
        }
    }

    /// Current document box; zero-sized when no layer has been folded
    #[must_use]
    pub fn bbox(&self) -> BoundingBox {
        self.bbox.unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bbox.is_none()
    }

    /// Inclusive range of frames the document touches, frame `(0, 0)` always included
    #[must_use]
    pub fn frame_span(&self, frame_width: f64, frame_height: f64) -> (FrameId, FrameId) {
        let bbox = self.bbox();
        if frame_width <= 0.0 || frame_height <= 0.0 {
            return (FrameId::default(), FrameId::default());
        }

        let first = |start: f64, size: f64| ((start / size).floor() as i32).min(0);
        let last = |end: f64, size: f64| ((end / size).ceil() as i32 - 1).max(0);

        (
            FrameId::new(
                first(bbox.left, frame_width),
                first(bbox.top, frame_height),
            ),
            FrameId::new(
                last(bbox.right, frame_width),
                last(bbox.bottom, frame_height),
            ),
        )
    }

    /// Zoom at which the document's horizontal extent fills `viewport_width`.
    ///
    /// The extent never shrinks below one frame, so an empty page fits its frame.
    #[must_use]
    pub fn fit_zoom(&self, viewport_width: f64, frame_width: f64) -> f64 {
        let bbox = self.bbox();
        let extent = bbox
            .right
            .max(frame_width)
            - bbox.left.min(0.0);
        if extent <= 0.0 || viewport_width <= 0.0 {
            1.0
        } else {
            viewport_width / extent
        }
    }
}
