//! Core geometry and raster types for ink rendering

use std::sync::Arc;

use image::RgbaImage;

/// Axis-aligned rectangle in document ("rm") units
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DocRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl DocRect {
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// Integer rectangle in device pixels, relative to the owning frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    #[must_use]
    pub const fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Rectangle in screen pixels (floating point, may be partially off-screen)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScreenRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ScreenRect {
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Strict overlap test: rectangles that only share an edge do not intersect.
    #[must_use]
    pub fn intersects(&self, other: &ScreenRect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    #[must_use]
    pub fn intersection(&self, other: &ScreenRect) -> Option<ScreenRect> {
        if !self.intersects(other) {
            return None;
        }
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Some(ScreenRect::new(x, y, right - x, bottom - y))
    }

    #[must_use]
    pub fn translate(&self, dx: f64, dy: f64) -> ScreenRect {
        ScreenRect::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

/// Document-level bounding box, `{top, left, bottom, right}` in document units
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub top: f64,
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
}

impl BoundingBox {
    /// Build a box from `{top, left, bottom, right}`, reordering inverted edges.
    #[must_use]
    pub fn new(top: f64, left: f64, bottom: f64, right: f64) -> Self {
        Self {
            top: top.min(bottom),
            left: left.min(right),
            bottom: top.max(bottom),
            right: left.max(right),
        }
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    /// No extent in either direction, as reported for a layer without ink
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 && self.height() <= 0.0
    }

    #[must_use]
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            top: self.top.min(other.top),
            left: self.left.min(other.left),
            bottom: self.bottom.max(other.bottom),
            right: self.right.max(other.right),
        }
    }
}

/// Identifies one logical frame of the rendering surface
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId {
    pub x: i32,
    pub y: i32,
}

impl FrameId {
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Decoded, displayable RGBA raster shared between the cache and the UI
pub type Raster = Arc<RgbaImage>;
