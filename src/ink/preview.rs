//! Low-resolution whole-frame previews
//!
//! Each frame gets at most one preview raster, rendered on the pool the first
//! time the frame is asked for and kept until the page is dropped. Zooming
//! never invalidates a preview; it only serves as a placeholder for tiles
//! that are still being rendered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};

use super::chunk::{InFlightGuard, decode_raster};
use super::pool::RenderPool;
use super::scene::SharedScene;
use super::types::{DocRect, FrameId, PixelRect, Raster};

/// A rendered preview and the document region it covers
#[derive(Clone, Debug)]
pub struct PreviewEntry {
    pub frame: FrameId,
    pub doc_rect: DocRect,
    pub raster: Raster,
}

impl PreviewEntry {
    /// Pixel region of the preview that shows `base_rect`, clipped to the raster
    #[must_use]
    pub fn source_rect(&self, base_rect: &DocRect) -> Option<PixelRect> {
        let (width, height) = self.raster.dimensions();
        if self.doc_rect.width <= 0.0 || self.doc_rect.height <= 0.0 {
            return None;
        }
        let sx = f64::from(width) / self.doc_rect.width;
        let sy = f64::from(height) / self.doc_rect.height;

        let x0 = ((base_rect.x - self.doc_rect.x) * sx).floor().max(0.0);
        let y0 = ((base_rect.y - self.doc_rect.y) * sy).floor().max(0.0);
        let x1 = ((base_rect.right() - self.doc_rect.x) * sx)
            .ceil()
            .min(f64::from(width));
        let y1 = ((base_rect.bottom() - self.doc_rect.y) * sy)
            .ceil()
            .min(f64::from(height));
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(PixelRect::new(
            x0 as i64,
            y0 as i64,
            (x1 - x0) as u32,
            (y1 - y0) as u32,
        ))
    }
}

#[derive(Clone, Debug)]
pub enum PreviewState {
    Pending,
    Ready(Arc<PreviewEntry>),
    Failed,
}

type PreviewMap = HashMap<FrameId, PreviewState>;

/// Per-page preview store
pub struct PreviewProvider {
    scene: SharedScene,
    preview_scale: f64,
    entries: Arc<Mutex<PreviewMap>>,
    closed: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
}

impl PreviewProvider {
    pub fn new(scene: SharedScene, preview_scale: f64, in_flight: Arc<AtomicUsize>) -> Self {
        Self {
            scene,
            preview_scale,
            entries: Arc::new(Mutex::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
            in_flight,
        }
    }

    /// The preview for `frame`, spawning its render on first request
    pub fn request(&self, frame: FrameId, doc_rect: DocRect, pool: &RenderPool) -> Option<Arc<PreviewEntry>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }

        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            match entries.get(&frame) {
                Some(PreviewState::Ready(entry)) => return Some(Arc::clone(entry)),
                Some(_) => return None,
                None => {
                    entries.insert(frame, PreviewState::Pending);
                }
            }
        }

        let out_width = (doc_rect.width * self.preview_scale).ceil().max(1.0) as u32;
        let out_height = (doc_rect.height * self.preview_scale).ceil().max(1.0) as u32;
        let guard = InFlightGuard::new(&self.in_flight);
        let scene = self.scene.clone();
        let entries = Arc::clone(&self.entries);
        let closed = Arc::clone(&self.closed);

        let queued = pool.spawn(move || {
            let _guard = guard;
            let pixels = scene.with_scene(|scene| {
                if closed.load(Ordering::Acquire) {
                    return None;
                }
                Some(scene.render_region(
                    doc_rect.x,
                    doc_rect.y,
                    doc_rect.width,
                    doc_rect.height,
                    out_width,
                    out_height,
                ))
            });
            let Some(pixels) = pixels else {
                return;
            };

            let state = match decode_raster(out_width, out_height, pixels) {
                Ok(raster) => {
                    debug!("Preview for frame {frame:?} ready ({out_width}x{out_height})");
                    PreviewState::Ready(Arc::new(PreviewEntry {
                        frame,
                        doc_rect,
                        raster,
                    }))
                }
                Err(e) => {
                    warn!("Preview for frame {frame:?} failed to decode: {e}");
                    PreviewState::Failed
                }
            };
            if !closed.load(Ordering::Acquire) {
                entries
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(frame, state);
            }
        });

        if !queued {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&frame);
        }
        None
    }

    #[must_use]
    pub fn state(&self, frame: FrameId) -> Option<PreviewState> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&frame)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every preview; renders still in flight discard their result
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_utils::{FakeScene, wait_until};

    const WAIT: Duration = Duration::from_secs(5);

    fn provider(fake: &FakeScene, scale: f64) -> PreviewProvider {
        PreviewProvider::new(fake.shared(), scale, Arc::new(AtomicUsize::new(0)))
    }

    #[test]
    fn renders_once_per_frame() {
        let fake = FakeScene::new((200.0, 100.0));
        let previews = provider(&fake, 0.5);
        let pool = RenderPool::new(2);
        let rect = DocRect::new(0.0, 0.0, 200.0, 100.0);

        assert!(previews.request(FrameId::default(), rect, &pool).is_none());
        assert!(previews.request(FrameId::default(), rect, &pool).is_none());

        assert!(wait_until(WAIT, || matches!(
            previews.state(FrameId::default()),
            Some(PreviewState::Ready(_))
        )));
        let entry = previews.request(FrameId::default(), rect, &pool).unwrap();
        assert_eq!(entry.raster.dimensions(), (100, 50));
        assert_eq!(fake.render_calls(), 1);
    }

    #[test]
    fn bad_buffer_marks_failed() {
        let fake = FakeScene::new((100.0, 100.0));
        fake.truncate_output(true);
        let previews = provider(&fake, 1.0);
        let pool = RenderPool::new(1);

        previews.request(FrameId::default(), DocRect::new(0.0, 0.0, 100.0, 100.0), &pool);
        assert!(wait_until(WAIT, || matches!(
            previews.state(FrameId::default()),
            Some(PreviewState::Failed)
        )));
    }

    #[test]
    fn close_discards_late_results() {
        let fake = FakeScene::new((100.0, 100.0));
        let previews = provider(&fake, 1.0);
        let pool = RenderPool::new(1);

        let gate = fake.hold_next_render();
        previews.request(FrameId::default(), DocRect::new(0.0, 0.0, 100.0, 100.0), &pool);
        assert!(gate.wait_entered(WAIT));
        previews.close();
        gate.release();

        assert!(wait_until(WAIT, || previews.in_flight.load(Ordering::Acquire) == 0));
        assert!(previews.is_empty());
    }

    #[test]
    fn source_rect_maps_doc_units_to_preview_pixels() {
        let entry = PreviewEntry {
            frame: FrameId::default(),
            doc_rect: DocRect::new(100.0, 0.0, 200.0, 200.0),
            raster: Arc::new(image::RgbaImage::new(100, 100)),
        };
        assert_eq!(
            entry.source_rect(&DocRect::new(150.0, 50.0, 50.0, 50.0)),
            Some(PixelRect::new(25, 25, 25, 25))
        );
        assert_eq!(
            entry.source_rect(&DocRect::new(280.0, 180.0, 50.0, 50.0)),
            Some(PixelRect::new(90, 90, 10, 10))
        );
        assert_eq!(entry.source_rect(&DocRect::new(0.0, 0.0, 50.0, 50.0)), None);
    }
}
