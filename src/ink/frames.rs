//! Viewport to frame mapping
//!
//! A page is laid out as a grid of frames, each the size of the page at
//! scale 1, extending in every direction the ink reaches. Frame (0, 0) is
//! the page itself and sits centered on screen at zero pan.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;

use super::cache::{ChunkCache, FrameView, VisibleChunk};
use super::chunk::RenderAgent;
use super::config::RenderConfig;
use super::pool::RenderPool;
use super::preview::{PreviewEntry, PreviewProvider};
use super::scene::SharedScene;
use super::size_tracker::SizeTracker;
use super::types::{BoundingBox, DocRect, FrameId, ScreenRect};

/// What the host UI is looking at
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    /// Screen area the page is drawn into
    pub screen: ScreenRect,
    /// Pan offset of frame (0, 0)'s center from the screen center
    pub pan: (f64, f64),
}

impl Viewport {
    #[must_use]
    pub fn new(screen: ScreenRect, pan: (f64, f64)) -> Self {
        Self { screen, pan }
    }

    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            self.screen.x + self.screen.width / 2.0,
            self.screen.y + self.screen.height / 2.0,
        )
    }
}

/// Frame dimensions and the zoom-independent part of the display scale
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameLayout {
    pub frame_width: f64,
    pub frame_height: f64,
    /// Screen pixels per document unit at zoom 1
    pub display_scale: f64,
}

impl FrameLayout {
    #[must_use]
    pub fn new(page_size: (f64, f64), reference_width: f64, ui_scale: f64) -> Self {
        let (frame_width, frame_height) = page_size;
        let display_scale = if frame_width > 0.0 {
            ui_scale * reference_width / frame_width
        } else {
            ui_scale
        };
        Self {
            frame_width,
            frame_height,
            display_scale,
        }
    }

    /// Screen pixels per document unit at `zoom`
    #[must_use]
    pub fn scale(&self, zoom: f64) -> f64 {
        zoom * self.display_scale
    }

    #[must_use]
    pub fn frame_screen_size(&self, zoom: f64) -> (f64, f64) {
        let scale = self.scale(zoom);
        (self.frame_width * scale, self.frame_height * scale)
    }

    /// Half the change in frame size for one unit of zoom
    #[must_use]
    pub fn zoom_scaling_offset(&self, zoom: f64) -> (f64, f64) {
        let now = self.frame_screen_size(zoom);
        let next = self.frame_screen_size(zoom + 1.0);
        ((now.0 - next.0) / 2.0, (now.1 - next.1) / 2.0)
    }

    /// Frame size the zoom scaling offset is relative to
    #[must_use]
    pub fn zoom_reference_size(&self, zoom: f64) -> (f64, f64) {
        self.frame_screen_size(zoom)
    }

    #[must_use]
    pub fn frame_doc_rect(&self, frame: FrameId) -> DocRect {
        DocRect::new(
            f64::from(frame.x) * self.frame_width,
            f64::from(frame.y) * self.frame_height,
            self.frame_width,
            self.frame_height,
        )
    }

    #[must_use]
    pub fn frame_screen_rect(&self, frame: FrameId, viewport: &Viewport, zoom: f64) -> ScreenRect {
        let (width, height) = self.frame_screen_size(zoom);
        let (cx, cy) = viewport.center();
        let origin_x = cx + viewport.pan.0 - width / 2.0;
        let origin_y = cy + viewport.pan.1 - height / 2.0;
        ScreenRect::new(
            origin_x + f64::from(frame.x) * width,
            origin_y + f64::from(frame.y) * height,
            width,
            height,
        )
    }
}

/// One visible frame's tiles and placeholder
#[derive(Clone, Debug)]
pub struct FrameChunks {
    pub frame: FrameId,
    pub view: FrameView,
    pub chunks: Vec<VisibleChunk>,
    pub preview: Option<Arc<PreviewEntry>>,
}

/// Owns everything rendered for one loaded page
pub struct FrameOrchestrator {
    config: RenderConfig,
    scene: SharedScene,
    pool: RenderPool,
    layout: FrameLayout,
    tracker: SizeTracker,
    caches: HashMap<FrameId, ChunkCache>,
    previews: PreviewProvider,
    in_flight: Arc<AtomicUsize>,
}

impl FrameOrchestrator {
    pub fn new(scene: SharedScene, config: RenderConfig) -> Self {
        let config = config.sanitized();
        let page_size = scene.native_page_size();
        let tracker = SizeTracker::from_layers(scene.layer_bounding_boxes());
        let layout = FrameLayout::new(page_size, config.reference_width, config.ui_scale);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let previews = PreviewProvider::new(scene.clone(), config.preview_scale, Arc::clone(&in_flight));
        let pool = RenderPool::new(config.workers);

        debug!(
            "Page laid out as {:.0}x{:.0} frames, ink box {:?}",
            layout.frame_width,
            layout.frame_height,
            tracker.bbox()
        );

        Self {
            config,
            scene,
            pool,
            layout,
            tracker,
            caches: HashMap::new(),
            previews,
            in_flight,
        }
    }

    #[must_use]
    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    #[must_use]
    pub fn bounding_box(&self) -> BoundingBox {
        self.tracker.bbox()
    }

    /// Zoom that fits the whole ink extent into `viewport_width`
    #[must_use]
    pub fn fit_zoom(&self, viewport_width: f64) -> f64 {
        if self.layout.display_scale <= 0.0 {
            return 1.0;
        }
        self.tracker.fit_zoom(viewport_width, self.layout.frame_width) / self.layout.display_scale
    }

    /// Re-derive the ink extent from the scene's current layers
    pub fn refresh_bounds(&mut self) {
        let layers = self.scene.layer_bounding_boxes();
        self.tracker.reset(layers);
    }

    /// Frames that overlap the screen, within the ink's frame span
    #[must_use]
    pub fn visible_frames(&self, viewport: &Viewport, zoom: f64) -> Vec<(FrameId, FrameView)> {
        let scale = self.layout.scale(zoom);
        if !(scale.is_finite() && scale > 0.0) || viewport.screen.is_empty() {
            return Vec::new();
        }
        let (first, last) = self
            .tracker
            .frame_span(self.layout.frame_width, self.layout.frame_height);

        let mut frames = Vec::new();
        for y in first.y..=last.y {
            for x in first.x..=last.x {
                let frame = FrameId::new(x, y);
                let frame_screen = self.layout.frame_screen_rect(frame, viewport, zoom);
                if frame_screen.intersects(&viewport.screen) {
                    frames.push((
                        frame,
                        FrameView {
                            frame_screen,
                            screen: viewport.screen,
                            scale,
                        },
                    ));
                }
            }
        }
        frames
    }

    /// Tiles for every visible frame; spawns renders only when `spawn` is set
    pub fn frame_chunks(&mut self, viewport: &Viewport, zoom: f64, spawn: bool) -> Vec<FrameChunks> {
        let frames = self.visible_frames(viewport, zoom);
        let mut result = Vec::with_capacity(frames.len());

        for (frame, view) in frames {
            let doc_rect = self.layout.frame_doc_rect(frame);
            let preview = self.previews.request(frame, doc_rect, &self.pool);

            let cache = self.caches.entry(frame).or_insert_with(|| {
                let agent = Arc::new(RenderAgent::new(view.scale, Arc::clone(&self.in_flight)));
                ChunkCache::new(frame, doc_rect, self.config.clone(), agent, self.scene.clone())
            });
            let chunks = if spawn {
                cache.get_chunks(&view, &self.pool)
            } else {
                cache.peek_chunks(&view)
            };

            result.push(FrameChunks {
                frame,
                view,
                chunks,
                preview,
            });
        }
        result
    }

    /// Whether any tile or preview of this page is still being rendered
    #[must_use]
    pub fn is_rendering(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Frames that have a chunk cache
    #[must_use]
    pub fn cached_frames(&self) -> usize {
        self.caches.len()
    }

    #[must_use]
    pub fn previews(&self) -> &PreviewProvider {
        &self.previews
    }

    /// Drop every cache and preview; in-flight work discards its results
    pub fn clear(&mut self) {
        for cache in self.caches.values() {
            cache.close();
        }
        self.caches.clear();
        self.previews.close();
    }

    /// Release everything and stop the workers
    pub fn close(&mut self) {
        self.clear();
        self.pool.shutdown();
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        self.clear();
    }
}
