//! JSON scene provider and software stroke rasterizer
//!
//! A document is a directory; page `<id>` lives in `<id>.json`:
//!
//! ```json
//! {
//!   "page_size": [1404, 1872],
//!   "layers": [
//!     { "strokes": [
//!       { "pen": 2, "color": 0, "width": 2.0,
//!         "points": [ { "x": 10, "y": 10, "speed": 0, "direction": 0, "width": 8, "pressure": 200 } ] }
//!     ] }
//!   ]
//! }
//! ```
//!
//! Pens are built through the pen model when the page loads, so an unknown
//! pen or color fails the build. Regions are rasterized row by row in
//! parallel onto white paper.

use std::fs;
use std::io;
use std::path::PathBuf;

use image::Rgba;
use log::debug;
use rayon::prelude::*;
use serde::Deserialize;

use super::error::SceneError;
use super::pen::{LineCap, Pen, Segment, StrokeSample};
use super::scene::{Document, LayerId, SceneHandle, SceneProvider};
use super::types::BoundingBox;

const PAPER: [u8; 4] = [255, 255, 255, 255];

#[derive(Debug, Deserialize)]
struct PageFile {
    page_size: (f64, f64),
    #[serde(default)]
    layers: Vec<LayerFile>,
}

#[derive(Debug, Deserialize)]
struct LayerFile {
    #[serde(default)]
    strokes: Vec<StrokeFile>,
}

#[derive(Debug, Deserialize)]
struct StrokeFile {
    pen: u32,
    color: u32,
    width: f32,
    #[serde(default)]
    points: Vec<PointFile>,
}

#[derive(Debug, Deserialize)]
struct PointFile {
    x: f64,
    y: f64,
    #[serde(default)]
    speed: f32,
    #[serde(default)]
    direction: f32,
    #[serde(default)]
    width: f32,
    #[serde(default)]
    pressure: f32,
}

/// One straight piece of a stroke with its derived appearance
#[derive(Clone, Copy, Debug, PartialEq)]
struct Span {
    from: (f64, f64),
    to: (f64, f64),
    half_width: f64,
    color: Rgba<u8>,
    opacity: f32,
    cap: LineCap,
}

impl Span {
    fn bounds(&self) -> BoundingBox {
        let pad = self.half_width;
        BoundingBox::new(
            self.from.1.min(self.to.1) - pad,
            self.from.0.min(self.to.0) - pad,
            self.from.1.max(self.to.1) + pad,
            self.from.0.max(self.to.0) + pad,
        )
    }

    /// Whether document point `p` is covered, with the half width floored at `min_half`
    fn covers(&self, p: (f64, f64), min_half: f64) -> bool {
        let half = self.half_width.max(min_half);
        let (dx, dy) = (self.to.0 - self.from.0, self.to.1 - self.from.1);
        let (px, py) = (p.0 - self.from.0, p.1 - self.from.1);
        let len_sq = dx * dx + dy * dy;

        if len_sq == 0.0 {
            return match self.cap {
                LineCap::Round => px * px + py * py <= half * half,
                LineCap::Square => px.abs() <= half && py.abs() <= half,
            };
        }

        let t = (px * dx + py * dy) / len_sq;
        match self.cap {
            LineCap::Round => {
                let t = t.clamp(0.0, 1.0);
                let (ex, ey) = (px - t * dx, py - t * dy);
                ex * ex + ey * ey <= half * half
            }
            LineCap::Square => {
                let len = len_sq.sqrt();
                let along = t * len;
                let across = (px * dy - py * dx).abs() / len;
                along >= -half && along <= len + half && across <= half
            }
        }
    }
}

/// Derive the spans of one stroke, recomputing the appearance every
/// `segment_length` points.
fn stroke_spans(pen: &mut Pen, points: &[PointFile]) -> Vec<Span> {
    let cap = pen.line_cap();
    let every = pen.segment_length.max(1) as usize;
    let mut segment: Option<Segment> = None;
    let mut last_width = 0.0;
    let mut spans = Vec::with_capacity(points.len());

    for (index, pair) in points.windows(2).enumerate() {
        let [from, to] = pair else { continue };
        if index % every == 0 || segment.is_none() {
            let sample = StrokeSample {
                speed: to.speed,
                direction: to.direction,
                width: to.width,
                pressure: to.pressure,
            };
            let next = pen.derive_segment(&sample, last_width);
            last_width = next.width;
            segment = Some(next);
        }
        let Some(segment) = segment else { continue };
        if segment.opacity <= 0.0 {
            continue;
        }
        spans.push(Span {
            from: (from.x, from.y),
            to: (to.x, to.y),
            half_width: f64::from(segment.width) / 2.0,
            color: segment.color,
            opacity: segment.opacity,
            cap,
        });
    }
    spans
}

/// A parsed page ready to rasterize
#[derive(Debug)]
pub struct JsonScene {
    page_size: (f64, f64),
    layers: Vec<Vec<Span>>,
    bounds: Vec<BoundingBox>,
}

impl JsonScene {
    /// Parse a page document and derive every stroke's segments
    pub fn from_json(text: &str) -> Result<Self, SceneError> {
        let page: PageFile = serde_json::from_str(text).map_err(|e| SceneError::failed(e.to_string()))?;
        let (width, height) = page.page_size;
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(SceneError::failed(format!(
                "invalid page size {width}x{height}"
            )));
        }

        let mut layers = Vec::with_capacity(page.layers.len());
        for layer in &page.layers {
            let mut spans = Vec::new();
            for stroke in &layer.strokes {
                let mut pen = Pen::from_tag(stroke.pen, stroke.color, stroke.width)?;
                spans.extend(stroke_spans(&mut pen, &stroke.points));
            }
            layers.push(spans);
        }

        let bounds = layers
            .iter()
            .map(|spans| {
                spans
                    .iter()
                    .map(Span::bounds)
                    .reduce(|a, b| a.union(&b))
                    .unwrap_or_default()
            })
            .collect();

        Ok(Self {
            page_size: page.page_size,
            layers,
            bounds,
        })
    }

    /// Number of drawable spans across all layers
    #[must_use]
    pub fn span_count(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }
}

impl SceneHandle for JsonScene {
    fn layer_ids(&self) -> Vec<LayerId> {
        (0..self.layers.len() as LayerId).collect()
    }

    fn bounding_box_for_layer(&self, layer: LayerId) -> BoundingBox {
        self.bounds.get(layer as usize).copied().unwrap_or_default()
    }

    fn render_region(&mut self, x: f64, y: f64, w: f64, h: f64, out_w: u32, out_h: u32) -> Vec<u8> {
        let row_len = out_w as usize * 4;
        let mut pixels: Vec<u8> = PAPER
            .iter()
            .copied()
            .cycle()
            .take(row_len * out_h as usize)
            .collect();
        if out_w == 0 || out_h == 0 || w <= 0.0 || h <= 0.0 {
            return pixels;
        }

        let sx = f64::from(out_w) / w;
        let sy = f64::from(out_h) / h;
        // Keep hairlines at least one device pixel wide.
        let min_half = 0.5 / sx.min(sy);

        let region = BoundingBox::new(y, x, y + h, x + w);
        let spans: Vec<(Span, BoundingBox)> = self
            .layers
            .iter()
            .flatten()
            .map(|span| (*span, span.bounds()))
            .filter(|(span, b)| {
                let pad = (min_half - span.half_width).max(0.0);
                b.right + pad >= region.left
                    && b.left - pad <= region.right
                    && b.bottom + pad >= region.top
                    && b.top - pad <= region.bottom
            })
            .collect();

        pixels
            .par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(row, line)| {
                let doc_y = y + (row as f64 + 0.5) / sy;
                for (span, b) in &spans {
                    let pad = (min_half - span.half_width).max(0.0);
                    if doc_y < b.top - pad || doc_y > b.bottom + pad {
                        continue;
                    }
                    let first = (((b.left - pad - x) * sx).floor().max(0.0)) as usize;
                    let last = (((b.right + pad - x) * sx).ceil().max(0.0) as usize).min(out_w as usize);
                    for col in first..last {
                        let doc_x = x + (col as f64 + 0.5) / sx;
                        if span.covers((doc_x, doc_y), min_half) {
                            blend(&mut line[col * 4..col * 4 + 4], span.color, span.opacity);
                        }
                    }
                }
            });

        pixels
    }

    fn native_page_size(&self) -> (f64, f64) {
        self.page_size
    }
}

/// Source-over blend of an opaque color at `opacity` onto an opaque pixel
fn blend(dst: &mut [u8], color: Rgba<u8>, opacity: f32) {
    let a = opacity.clamp(0.0, 1.0);
    for (d, s) in dst.iter_mut().zip(color.0).take(3) {
        *d = (f32::from(s) * a + f32::from(*d) * (1.0 - a)).round() as u8;
    }
    dst[3] = 255;
}

/// Scene provider reading `<document root>/<page id>.json`
#[derive(Debug, Default, Clone)]
pub struct JsonSceneProvider;

impl JsonSceneProvider {
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn page_path(document: &Document, page_id: &str) -> PathBuf {
        document.root.join(format!("{page_id}.json"))
    }
}

impl SceneProvider for JsonSceneProvider {
    fn build(&self, document: &Document, page_id: &str) -> Result<Box<dyn SceneHandle>, SceneError> {
        let path = Self::page_path(document, page_id);
        let text = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SceneError::NotFound {
                page_id: page_id.to_string(),
            },
            _ => SceneError::failed(format!("{}: {e}", path.display())),
        })?;

        let scene = JsonScene::from_json(&text)?;
        debug!(
            "Loaded {} with {} layers, {} spans",
            path.display(),
            scene.layers.len(),
            scene.span_count()
        );
        Ok(Box::new(scene))
    }
}
