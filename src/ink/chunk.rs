//! Tile render tasks
//!
//! A [`ChunkTask`] is one tile of one frame at one scale. It is created
//! pending, runs once on the render pool, and ends up loaded, failed, or
//! stale. A task goes stale when the scale of its [`RenderAgent`] moved on
//! (or the page closed) before its raster could be used; stale results are
//! dropped, never cached.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use image::RgbaImage;
use log::{debug, warn};

use super::cache::CacheKey;
use super::error::TileError;
use super::scene::SharedScene;
use super::types::{DocRect, PixelRect, Raster};

/// Quantize a scale for hashing and staleness comparison (millionths)
#[must_use]
pub fn scale_key(scale: f64) -> u64 {
    (scale * 1_000_000.0).round().max(0.0) as u64
}

/// Per-frame render state that in-flight tasks check themselves against
#[derive(Debug)]
pub struct RenderAgent {
    scale_bits: AtomicU64,
    closed: AtomicBool,
    in_flight: Arc<AtomicUsize>,
}

impl RenderAgent {
    /// `in_flight` is shared by every agent of a page
    pub fn new(scale: f64, in_flight: Arc<AtomicUsize>) -> Self {
        Self {
            scale_bits: AtomicU64::new(scale.to_bits()),
            closed: AtomicBool::new(false),
            in_flight,
        }
    }

    #[must_use]
    pub fn scale(&self) -> f64 {
        f64::from_bits(self.scale_bits.load(Ordering::Acquire))
    }

    /// Returns true if the scale actually changed
    pub fn set_scale(&self, scale: f64) -> bool {
        let previous = f64::from_bits(self.scale_bits.swap(scale.to_bits(), Ordering::AcqRel));
        scale_key(previous) != scale_key(scale)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether work spawned at `scale` is still wanted
    #[must_use]
    pub fn is_current(&self, scale: f64) -> bool {
        !self.is_closed() && scale_key(self.scale()) == scale_key(scale)
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn in_flight_counter(&self) -> &Arc<AtomicUsize> {
        &self.in_flight
    }
}

/// Counts one unit of background work for as long as it is alive
#[derive(Debug)]
pub struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    pub fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Clone, Debug)]
pub enum TileState {
    Pending,
    Loaded(Raster),
    /// Decoding failed; the tile is never retried
    Failed(TileError),
    Stale,
}

/// One tile render request and its eventual raster
#[derive(Debug)]
pub struct ChunkTask {
    key: CacheKey,
    pub base_rect: DocRect,
    pub chunk_rect: PixelRect,
    pub scale: f64,
    state: Mutex<TileState>,
}

impl ChunkTask {
    pub fn new(key: CacheKey, base_rect: DocRect, chunk_rect: PixelRect, scale: f64) -> Self {
        Self {
            key,
            base_rect,
            chunk_rect,
            scale,
            state: Mutex::new(TileState::Pending),
        }
    }

    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    #[must_use]
    pub fn state(&self) -> TileState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn raster(&self) -> Option<Raster> {
        match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            TileState::Loaded(raster) => Some(Arc::clone(raster)),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.state(), TileState::Pending)
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(self.state(), TileState::Loaded(_))
    }

    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self.state(), TileState::Stale)
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.state(), TileState::Failed(_))
    }

    pub fn mark_stale(&self) {
        self.finish(TileState::Stale);
    }

    /// Only a pending task may change state.
    fn finish(&self, next: TileState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, TileState::Pending) {
            *state = next;
        }
    }

    /// Render this tile through the page's scene.
    ///
    /// Blocks on the page lock. The scale is checked once the lock is held,
    /// right before calling the rasterizer, and again after it returns.
    pub fn run(&self, agent: &RenderAgent, scene: &SharedScene) {
        let pixels = scene.with_scene(|scene| {
            if !agent.is_current(self.scale) {
                return None;
            }
            Some(scene.render_region(
                self.base_rect.x,
                self.base_rect.y,
                self.base_rect.width,
                self.base_rect.height,
                self.chunk_rect.width,
                self.chunk_rect.height,
            ))
        });

        let Some(pixels) = pixels.filter(|_| agent.is_current(self.scale)) else {
            debug!(
                "Dropping stale tile {:?} at scale {:.3}",
                self.chunk_rect, self.scale
            );
            self.mark_stale();
            return;
        };

        match decode_raster(self.chunk_rect.width, self.chunk_rect.height, pixels) {
            Ok(raster) => self.finish(TileState::Loaded(raster)),
            Err(e) => {
                warn!("Tile {:?} failed to decode: {e}", self.chunk_rect);
                self.finish(TileState::Failed(e));
            }
        }
    }
}

/// Turn a provider RGBA8 buffer into a shareable raster
pub fn decode_raster(width: u32, height: u32, pixels: Vec<u8>) -> Result<Raster, TileError> {
    let expected = width as usize * height as usize * 4;
    if pixels.len() != expected {
        return Err(TileError::Decode {
            expected,
            actual: pixels.len(),
        });
    }
    RgbaImage::from_raw(width, height, pixels)
        .map(Arc::new)
        .ok_or(TileError::Decode {
            expected,
            actual: 0,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeScene;

    fn task(scale: f64) -> ChunkTask {
        let base = DocRect::new(0.0, 0.0, 10.0, 10.0);
        let chunk = PixelRect::new(0, 0, 10, 10);
        ChunkTask::new(CacheKey::new(&base, scale, chunk), base, chunk, scale)
    }

    fn agent(scale: f64) -> RenderAgent {
        RenderAgent::new(scale, Arc::new(AtomicUsize::new(0)))
    }

    #[test]
    fn current_task_loads() {
        let fake = FakeScene::new((100.0, 100.0));
        let scene = fake.shared();
        let task = task(1.0);

        task.run(&agent(1.0), &scene);

        assert!(task.is_loaded());
        let raster = task.raster().unwrap();
        assert_eq!(raster.dimensions(), (10, 10));
        assert_eq!(fake.render_calls(), 1);
    }

    #[test]
    fn scale_change_before_lock_makes_task_stale() {
        let fake = FakeScene::new((100.0, 100.0));
        let scene = fake.shared();
        let task = task(1.0);
        let agent = agent(1.0);

        agent.set_scale(2.0);
        task.run(&agent, &scene);

        assert!(task.is_stale());
        assert!(task.raster().is_none());
        assert_eq!(fake.render_calls(), 0);
    }

    #[test]
    fn closed_agent_makes_task_stale() {
        let fake = FakeScene::new((100.0, 100.0));
        let task = task(1.0);
        let agent = agent(1.0);
        agent.close();

        task.run(&agent, &fake.shared());

        assert!(task.is_stale());
        assert_eq!(fake.render_calls(), 0);
    }

    #[test]
    fn short_buffer_fails_permanently() {
        let fake = FakeScene::new((100.0, 100.0));
        fake.truncate_output(true);
        let task = task(1.0);
        let agent = agent(1.0);

        task.run(&agent, &fake.shared());
        assert!(task.is_failed());

        // A failed task never moves again.
        task.mark_stale();
        assert!(task.is_failed());
    }

    #[test]
    fn stale_never_transitions_back() {
        let task = task(1.0);
        task.mark_stale();
        task.finish(TileState::Pending);
        assert!(task.is_stale());
    }

    #[test]
    fn in_flight_guard_counts_while_alive() {
        let counter = Arc::new(AtomicUsize::new(0));
        let first = InFlightGuard::new(&counter);
        let second = InFlightGuard::new(&counter);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        drop(first);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        drop(second);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn set_scale_reports_changes() {
        let agent = agent(1.0);
        assert!(!agent.set_scale(1.0));
        assert!(agent.set_scale(1.5));
        assert!(agent.is_current(1.5));
        assert!(!agent.is_current(1.0));
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(matches!(
            decode_raster(2, 2, vec![0; 15]),
            Err(TileError::Decode {
                expected: 16,
                actual: 15
            })
        ));
        assert!(decode_raster(2, 2, vec![0; 16]).is_ok());
    }
}
