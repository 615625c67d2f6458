//! Page-level rendering interface for the host UI
//!
//! [`PageRenderer`] lives as long as the document list and remembers which
//! pages and documents failed to load. [`PageRenderContext`] is one opened
//! page: it loads in the background and, once ready, turns a viewport into
//! tiles without ever blocking the caller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use log::{debug, error, info, warn};

use super::cache::VisibleChunk;
use super::chunk::InFlightGuard;
use super::config::RenderConfig;
use super::error::SceneError;
use super::frames::{FrameChunks, FrameLayout, FrameOrchestrator, Viewport};
use super::preview::PreviewEntry;
use super::scene::{Document, SceneHandle, SceneProvider, SharedScene};
use super::state::{PageEffect, PageEvent, PageState, UnloadableRegistry};
use super::types::{BoundingBox, FrameId, PixelRect, Raster, ScreenRect};
use super::zoom::ZoomState;

/// What to draw for one tile right now
#[derive(Clone, Debug)]
pub enum TileContent {
    /// The tile's own raster, at exact size
    Raster(Raster),
    /// A region of the frame preview standing in for the tile
    Preview { raster: Raster, source: PixelRect },
    /// Nothing to show yet
    Empty,
}

#[derive(Clone, Debug)]
pub struct TileView {
    pub frame: FrameId,
    pub screen_rect: ScreenRect,
    pub chunk_rect: PixelRect,
    pub content: TileContent,
}

impl TileView {
    fn from_chunk(frame: &FrameChunks, chunk: &VisibleChunk) -> Self {
        let raster = chunk.task.as_ref().and_then(|task| task.raster());
        let content = match (raster, &frame.preview) {
            (Some(raster), _) => TileContent::Raster(raster),
            (None, Some(preview)) => preview_content(preview, chunk),
            (None, None) => TileContent::Empty,
        };
        Self {
            frame: frame.frame,
            screen_rect: chunk.screen_rect,
            chunk_rect: chunk.chunk_rect,
            content,
        }
    }

    /// Whether the tile shows its final raster
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self.content, TileContent::Raster(_))
    }

    /// The tile as an image sized to its screen rect
    #[must_use]
    pub fn to_rgba(&self) -> Option<RgbaImage> {
        let width = self.screen_rect.width.round().max(1.0) as u32;
        let height = self.screen_rect.height.round().max(1.0) as u32;
        match &self.content {
            TileContent::Raster(raster) if raster.dimensions() == (width, height) => {
                Some(RgbaImage::clone(raster))
            }
            TileContent::Raster(raster) => {
                Some(imageops::resize(&**raster, width, height, FilterType::Triangle))
            }
            TileContent::Preview { raster, source } => {
                let crop = imageops::crop_imm(
                    &**raster,
                    source.x.max(0) as u32,
                    source.y.max(0) as u32,
                    source.width,
                    source.height,
                )
                .to_image();
                Some(imageops::resize(&crop, width, height, FilterType::Triangle))
            }
            TileContent::Empty => None,
        }
    }
}

fn preview_content(preview: &PreviewEntry, chunk: &VisibleChunk) -> TileContent {
    match preview.source_rect(&chunk.base_rect) {
        Some(source) => TileContent::Preview {
            raster: Arc::clone(&preview.raster),
            source,
        },
        None => TileContent::Empty,
    }
}

/// Paint `tiles` over a `background` canvas covering `screen`
#[must_use]
pub fn composite(tiles: &[TileView], screen: &ScreenRect, background: Rgba<u8>) -> RgbaImage {
    let width = screen.width.ceil().max(1.0) as u32;
    let height = screen.height.ceil().max(1.0) as u32;
    let mut canvas = RgbaImage::from_pixel(width, height, background);

    // Placeholders first so final rasters always land on top.
    let (finals, placeholders): (Vec<_>, Vec<_>) = tiles.iter().partition(|t| t.is_final());
    for tile in placeholders.into_iter().chain(finals) {
        if let Some(image) = tile.to_rgba() {
            let x = (tile.screen_rect.x - screen.x).round() as i64;
            let y = (tile.screen_rect.y - screen.y).round() as i64;
            imageops::overlay(&mut canvas, &image, x, y);
        }
    }
    canvas
}

#[derive(Default)]
struct PageSlot {
    state: PageState,
    scene: Option<SharedScene>,
}

/// Opens pages of documents and remembers which ones cannot load
pub struct PageRenderer {
    provider: Arc<dyn SceneProvider>,
    config: RenderConfig,
    registry: Arc<Mutex<UnloadableRegistry>>,
    loading: Arc<AtomicUsize>,
}

impl PageRenderer {
    pub fn new(provider: Arc<dyn SceneProvider>, config: RenderConfig) -> Self {
        Self {
            provider,
            config: config.sanitized(),
            registry: Arc::new(Mutex::new(UnloadableRegistry::new())),
            loading: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Page builds currently in progress
    #[must_use]
    pub fn loading(&self) -> usize {
        self.loading.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn unloadable_reason(&self, document: &Document, page_id: &str) -> Option<String> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reason(&document.id, page_id)
            .map(str::to_string)
    }

    /// Start loading `page_id`; the returned context reports progress
    pub fn open_page(&self, document: &Document, page_id: &str) -> PageRenderContext {
        let slot = Arc::new(Mutex::new(PageSlot::default()));

        let effects = {
            let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
            match self.unloadable_reason(document, page_id) {
                Some(reason) => {
                    info!("Not loading page {page_id} of {}: {reason}", document.id);
                    slot.state.apply(PageEvent::KnownUnloadable(reason))
                }
                None => slot.state.apply(PageEvent::BeginLoad),
            }
        };

        if effects.contains(&PageEffect::SpawnBuild) {
            self.spawn_build(document.clone(), page_id.to_string(), Arc::clone(&slot));
        }

        PageRenderContext {
            document: document.clone(),
            page_id: page_id.to_string(),
            config: self.config.clone(),
            slot,
            orchestrator: None,
        }
    }

    fn spawn_build(&self, document: Document, page_id: String, slot: Arc<Mutex<PageSlot>>) {
        let guard = InFlightGuard::new(&self.loading);
        let provider = Arc::clone(&self.provider);
        let registry = Arc::clone(&self.registry);
        let thread_slot = Arc::clone(&slot);
        let thread_page = page_id.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("inkpane-load-{page_id}"))
            .spawn(move || {
                let _guard = guard;
                debug!("Building page {thread_page} of {}", document.id);
                let result = provider.build(&document, &thread_page);
                finish_build(&document, &thread_page, result, &thread_slot, &registry);
            });

        if let Err(e) = spawned {
            warn!("Failed to spawn loader for page {page_id}: {e}");
            let _ = slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .state
                .apply(PageEvent::BuildFailed(format!("could not start loading: {e}")));
        }
    }
}

fn finish_build(
    document: &Document,
    page_id: &str,
    result: Result<Box<dyn SceneHandle>, SceneError>,
    slot: &Mutex<PageSlot>,
    registry: &Mutex<UnloadableRegistry>,
) {
    let (event, mut scene) = match result {
        Ok(scene) => (PageEvent::Built, Some(scene)),
        Err(e) if e.is_document_fatal() => {
            error!("Document {} cannot be opened: {e}", document.id);
            (PageEvent::DocumentFailed(e.to_string()), None)
        }
        Err(e) => {
            warn!("Page {page_id} of {} failed to build: {e}", document.id);
            (PageEvent::BuildFailed(e.to_string()), None)
        }
    };

    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    for effect in slot.state.apply(event) {
        match effect {
            PageEffect::StartTiling => {
                slot.scene = scene.take().map(SharedScene::new);
                debug!("Page {page_id} of {} ready", document.id);
            }
            PageEffect::MarkUnloadable(reason) => {
                registry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .mark_page(&document.id, page_id, reason);
            }
            PageEffect::MarkDocumentUnloadable(reason) => {
                registry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .mark_document(&document.id, reason);
            }
            PageEffect::DiscardScene => {
                debug!("Page {page_id} closed before it finished loading");
            }
            PageEffect::SpawnBuild | PageEffect::ReleaseResources => {}
        }
    }
}

/// One opened page
pub struct PageRenderContext {
    document: Document,
    page_id: String,
    config: RenderConfig,
    slot: Arc<Mutex<PageSlot>>,
    orchestrator: Option<FrameOrchestrator>,
}

impl PageRenderContext {
    #[must_use]
    pub fn document(&self) -> &Document {
        &self.document
    }

    #[must_use]
    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    #[must_use]
    pub fn state(&self) -> PageState {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .clone()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state().is_loading()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Message to show instead of the page, if it failed
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.state().error().map(str::to_string)
    }

    fn orchestrator(&mut self) -> Option<&mut FrameOrchestrator> {
        if self.orchestrator.is_none() {
            let scene = {
                let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
                if !slot.state.is_ready() {
                    return None;
                }
                slot.scene.clone()?
            };
            self.orchestrator = Some(FrameOrchestrator::new(scene, self.config.clone()));
        }
        self.orchestrator.as_mut()
    }

    /// Frame geometry, once the page is ready
    pub fn layout(&mut self) -> Option<FrameLayout> {
        self.orchestrator().map(|o| *o.layout())
    }

    /// Ink extent of the page, once it is ready
    pub fn bounding_box(&mut self) -> Option<BoundingBox> {
        self.orchestrator().map(|o| o.bounding_box())
    }

    /// Zoom that fits all ink into `viewport_width`, once the page is ready
    pub fn fit_zoom(&mut self, viewport_width: f64) -> Option<f64> {
        self.orchestrator().map(|o| o.fit_zoom(viewport_width))
    }

    /// Tiles to draw for `viewport` at the current zoom
    pub fn visible_tiles(&mut self, viewport: &Viewport, zoom: &ZoomState) -> Vec<TileView> {
        self.visible_tiles_at(viewport, zoom, Instant::now())
    }

    /// [`Self::visible_tiles`] with an explicit clock for the settle delay
    pub fn visible_tiles_at(&mut self, viewport: &Viewport, zoom: &ZoomState, now: Instant) -> Vec<TileView> {
        let spawn = zoom.is_settled(now);
        let effective = zoom.zoom();
        let Some(orchestrator) = self.orchestrator() else {
            return Vec::new();
        };

        orchestrator
            .frame_chunks(viewport, effective, spawn)
            .iter()
            .flat_map(|frame| {
                frame
                    .chunks
                    .iter()
                    .map(move |chunk| TileView::from_chunk(frame, chunk))
            })
            .collect()
    }

    /// Whether any tile or preview of this page is still being rendered
    #[must_use]
    pub fn is_rendering(&self) -> bool {
        self.orchestrator
            .as_ref()
            .is_some_and(FrameOrchestrator::is_rendering)
    }

    /// Release caches, previews and workers; safe while renders are in flight
    pub fn close(&mut self) {
        let effects = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.scene = None;
            slot.state.apply(PageEvent::Close)
        };
        if effects.contains(&PageEffect::ReleaseResources) {
            debug!("Closing page {} of {}", self.page_id, self.document.id);
        }
        if let Some(mut orchestrator) = self.orchestrator.take() {
            orchestrator.close();
        }
    }
}

impl Drop for PageRenderContext {
    fn drop(&mut self) {
        self.close();
    }
}
