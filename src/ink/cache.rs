//! Tiled chunk cache for one frame
//!
//! Splits the visible part of a frame into tiles, maps each tile to a cached
//! or freshly spawned [`ChunkTask`], and hands tiles back in shuffled order so
//! no screen region is systematically rendered last.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use log::debug;
use lru::LruCache;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::chunk::{ChunkTask, InFlightGuard, RenderAgent, scale_key};
use super::config::{EvictionPolicy, RenderConfig};
use super::pool::RenderPool;
use super::scene::SharedScene;
use super::types::{DocRect, FrameId, PixelRect, ScreenRect};

/// Cache key for one tile
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Document-unit rect as millionths for stable hashing
    pub base_rect_millionths: [i64; 4],
    /// Scale factor (stored as millionths for stable hashing)
    pub scale_millionths: u64,
    pub chunk_rect: PixelRect,
}

impl CacheKey {
    #[must_use]
    pub fn new(base_rect: &DocRect, scale: f64, chunk_rect: PixelRect) -> Self {
        let millionths = |v: f64| (v * 1_000_000.0).round() as i64;
        Self {
            base_rect_millionths: [
                millionths(base_rect.x),
                millionths(base_rect.y),
                millionths(base_rect.width),
                millionths(base_rect.height),
            ],
            scale_millionths: scale_key(scale),
            chunk_rect,
        }
    }
}

/// Where one frame sits on screen for the current UI frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameView {
    /// The whole frame's on-screen rect at `scale`
    pub frame_screen: ScreenRect,
    /// The actual screen (viewport) rect
    pub screen: ScreenRect,
    /// Screen pixels per document unit
    pub scale: f64,
}

/// Geometry of one tile before it is bound to a task
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TilePlan {
    pub chunk_rect: PixelRect,
    pub base_rect: DocRect,
    pub screen_rect: ScreenRect,
}

/// A visible tile and its task, if one exists yet
#[derive(Clone, Debug)]
pub struct VisibleChunk {
    pub screen_rect: ScreenRect,
    pub chunk_rect: PixelRect,
    pub base_rect: DocRect,
    pub task: Option<Arc<ChunkTask>>,
}

type TaskMap = LruCache<CacheKey, Arc<ChunkTask>>;

/// Grid cells of `edge` pixels covering `visible`, aligned to the frame origin
#[must_use]
pub fn tile_grid(visible: &ScreenRect, edge: i64) -> Vec<PixelRect> {
    let Some((cols, rows)) = grid_span(visible, edge) else {
        return Vec::new();
    };
    let edge_u32 = edge as u32;
    rows.flat_map(|row| {
        cols.clone()
            .map(move |col| PixelRect::new(col * edge, row * edge, edge_u32, edge_u32))
    })
    .collect()
}

fn grid_span(
    visible: &ScreenRect,
    edge: i64,
) -> Option<(std::ops::Range<i64>, std::ops::Range<i64>)> {
    let finite = [visible.x, visible.y, visible.width, visible.height]
        .iter()
        .all(|v| v.is_finite());
    if !finite || visible.is_empty() || edge <= 0 {
        return None;
    }
    let edge = edge as f64;
    let cols = (visible.x / edge).floor() as i64..(visible.right() / edge).ceil() as i64;
    let rows = (visible.y / edge).floor() as i64..(visible.bottom() / edge).ceil() as i64;
    Some((cols, rows))
}

fn grid_count(visible: &ScreenRect, edge: i64) -> usize {
    grid_span(visible, edge).map_or(0, |(cols, rows)| {
        let cols = usize::try_from(cols.end - cols.start).unwrap_or(usize::MAX);
        let rows = usize::try_from(rows.end - rows.start).unwrap_or(usize::MAX);
        cols.saturating_mul(rows)
    })
}

/// Tile cache and task spawner for one frame of one page
pub struct ChunkCache {
    frame: FrameId,
    /// The frame's extent in document units
    frame_doc: DocRect,
    config: RenderConfig,
    agent: Arc<RenderAgent>,
    scene: SharedScene,
    tasks: Arc<Mutex<TaskMap>>,
    rng: StdRng,
}

impl ChunkCache {
    pub fn new(
        frame: FrameId,
        frame_doc: DocRect,
        config: RenderConfig,
        agent: Arc<RenderAgent>,
        scene: SharedScene,
    ) -> Self {
        let config = config.sanitized();
        let tasks = match config.eviction {
            EvictionPolicy::Unbounded => LruCache::unbounded(),
            EvictionPolicy::Lru { capacity } => LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            ),
        };
        let rng = match config.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ frame_seed(frame)),
            None => StdRng::from_entropy(),
        };

        Self {
            frame,
            frame_doc,
            config,
            agent,
            scene,
            tasks: Arc::new(Mutex::new(tasks)),
            rng,
        }
    }

    #[must_use]
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    #[must_use]
    pub fn agent(&self) -> &Arc<RenderAgent> {
        &self.agent
    }

    /// Plan the tiles of `view`, growing the tile edge until the count fits
    /// under the configured ceiling.
    #[must_use]
    pub fn plan_tiles(&self, view: &FrameView, size_multiplier: f64) -> Vec<TilePlan> {
        if !(view.scale.is_finite() && view.scale > 0.0) {
            return Vec::new();
        }
        let Some(visible) = view.frame_screen.intersection(&view.screen) else {
            return Vec::new();
        };
        let local = visible.translate(-view.frame_screen.x, -view.frame_screen.y);
        self.plan_local(&local, view, size_multiplier.max(1.0))
    }

    fn plan_local(&self, local: &ScreenRect, view: &FrameView, size_multiplier: f64) -> Vec<TilePlan> {
        let edge = (f64::from(self.config.base_chunk_size) * size_multiplier)
            .ceil()
            .max(1.0) as i64;
        if grid_count(local, edge) > self.config.max_chunks {
            return self.plan_local(local, view, size_multiplier * self.config.chunk_growth);
        }

        let frame_width_px = (self.frame_doc.width * view.scale).ceil() as i64;
        let frame_height_px = (self.frame_doc.height * view.scale).ceil() as i64;

        tile_grid(local, edge)
            .into_iter()
            .filter_map(|cell| {
                let x0 = cell.x.max(0);
                let y0 = cell.y.max(0);
                let x1 = (cell.x + edge).min(frame_width_px);
                let y1 = (cell.y + edge).min(frame_height_px);
                if x1 <= x0 || y1 <= y0 {
                    return None;
                }

                let chunk_rect = PixelRect::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32);
                let screen_rect = ScreenRect::new(
                    view.frame_screen.x + x0 as f64,
                    view.frame_screen.y + y0 as f64,
                    (x1 - x0) as f64,
                    (y1 - y0) as f64,
                );
                if !screen_rect.intersects(&view.screen) {
                    return None;
                }

                let base_rect = DocRect::new(
                    self.frame_doc.x + x0 as f64 / view.scale,
                    self.frame_doc.y + y0 as f64 / view.scale,
                    (x1 - x0) as f64 / view.scale,
                    (y1 - y0) as f64 / view.scale,
                );
                Some(TilePlan {
                    chunk_rect,
                    base_rect,
                    screen_rect,
                })
            })
            .collect()
    }

    /// Visible tiles of `view`, spawning a render task for every tile that
    /// has no live cache entry. Tiles come back in shuffled order.
    pub fn get_chunks(&mut self, view: &FrameView, pool: &RenderPool) -> Vec<VisibleChunk> {
        let plans = self.plan_tiles(view, 1.0);
        if self.agent.set_scale(view.scale) {
            debug!("Frame {:?} scale -> {:.4}", self.frame, view.scale);
        }

        let mut chunks: Vec<(VisibleChunk, bool)> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            plans
                .into_iter()
                .map(|plan| {
                    let key = CacheKey::new(&plan.base_rect, view.scale, plan.chunk_rect);
                    let (task, fresh) = match tasks.get(&key) {
                        Some(task) if !task.is_stale() => (Arc::clone(task), false),
                        _ => {
                            let task = Arc::new(ChunkTask::new(
                                key.clone(),
                                plan.base_rect,
                                plan.chunk_rect,
                                view.scale,
                            ));
                            if let Some((evicted, _)) = tasks.push(key.clone(), Arc::clone(&task)) {
                                if evicted != key {
                                    debug!("Evicted tile {:?} from frame {:?}", evicted.chunk_rect, self.frame);
                                }
                            }
                            (task, true)
                        }
                    };
                    (
                        VisibleChunk {
                            screen_rect: plan.screen_rect,
                            chunk_rect: plan.chunk_rect,
                            base_rect: plan.base_rect,
                            task: Some(task),
                        },
                        fresh,
                    )
                })
                .collect()
        };

        chunks.shuffle(&mut self.rng);

        chunks
            .into_iter()
            .map(|(chunk, fresh)| {
                if let (true, Some(task)) = (fresh, &chunk.task) {
                    self.spawn(Arc::clone(task), pool);
                }
                chunk
            })
            .collect()
    }

    /// Visible tiles of `view` backed only by what is already cached; spawns nothing
    ///
    /// The scale still moves on, so tiles queued for an older zoom drop themselves.
    pub fn peek_chunks(&self, view: &FrameView) -> Vec<VisibleChunk> {
        let plans = self.plan_tiles(view, 1.0);
        if self.agent.set_scale(view.scale) {
            debug!("Frame {:?} scale -> {:.4} (settling)", self.frame, view.scale);
        }
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        plans
            .into_iter()
            .map(|plan| {
                let key = CacheKey::new(&plan.base_rect, view.scale, plan.chunk_rect);
                let task = tasks.get(&key).filter(|task| !task.is_stale()).cloned();
                VisibleChunk {
                    screen_rect: plan.screen_rect,
                    chunk_rect: plan.chunk_rect,
                    base_rect: plan.base_rect,
                    task,
                }
            })
            .collect()
    }

    fn spawn(&self, task: Arc<ChunkTask>, pool: &RenderPool) {
        let guard = InFlightGuard::new(self.agent.in_flight_counter());
        let agent = Arc::clone(&self.agent);
        let scene = self.scene.clone();
        let tasks: Weak<Mutex<TaskMap>> = Arc::downgrade(&self.tasks);
        let job_task = Arc::clone(&task);

        let queued = pool.spawn(move || {
            let _guard = guard;
            job_task.run(&agent, &scene);
            if job_task.is_stale() {
                if let Some(tasks) = tasks.upgrade() {
                    forget_task(&tasks, &job_task);
                }
            }
        });

        if !queued {
            debug!("Render pool is gone, dropping tile {:?}", task.chunk_rect);
            task.mark_stale();
            forget_task(&self.tasks, &task);
        }
    }

    /// Entry for `key` without touching its recency
    #[must_use]
    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<ChunkTask>> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .peek(key)
            .cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of cached tasks that have not finished yet
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, task)| task.is_pending())
            .count()
    }

    /// Stop accepting results and drop every cached tile
    pub fn close(&self) {
        self.agent.close();
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for ChunkCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCache")
            .field("frame", &self.frame)
            .field("frame_doc", &self.frame_doc)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Remove `task` from the map, but only if its key still points at it
fn forget_task(tasks: &Mutex<TaskMap>, task: &Arc<ChunkTask>) {
    let mut tasks = tasks.lock().unwrap_or_else(PoisonError::into_inner);
    if tasks
        .peek(task.key())
        .is_some_and(|cached| Arc::ptr_eq(cached, task))
    {
        tasks.pop(task.key());
    }
}

fn frame_seed(frame: FrameId) -> u64 {
    (u64::from(frame.x as u32) << 32) | u64::from(frame.y as u32)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use rand::Rng;

    use super::*;
    use crate::test_utils::{FakeScene, wait_until};

    const WAIT: Duration = Duration::from_secs(5);

    fn cache_for(fake: &FakeScene, frame_doc: DocRect, config: RenderConfig) -> ChunkCache {
        let agent = Arc::new(RenderAgent::new(1.0, Arc::new(AtomicUsize::new(0))));
        ChunkCache::new(FrameId::default(), frame_doc, config, agent, fake.shared())
    }

    fn seeded() -> RenderConfig {
        RenderConfig {
            shuffle_seed: Some(7),
            ..RenderConfig::default()
        }
    }

    fn full_view(width: f64, height: f64, scale: f64) -> FrameView {
        FrameView {
            frame_screen: ScreenRect::new(0.0, 0.0, width * scale, height * scale),
            screen: ScreenRect::new(0.0, 0.0, width * scale, height * scale),
            scale,
        }
    }

    #[test]
    fn grid_of_400_square_is_four_by_four() {
        let grid = tile_grid(&ScreenRect::new(0.0, 0.0, 400.0, 400.0), 100);
        assert_eq!(grid.len(), 16);
        assert_eq!(grid[0], PixelRect::new(0, 0, 100, 100));
        assert_eq!(grid[15], PixelRect::new(300, 300, 100, 100));
    }

    #[test]
    fn plan_keeps_sixteen_tiles_when_fully_on_screen() {
        let fake = FakeScene::new((400.0, 400.0));
        let cache = cache_for(&fake, DocRect::new(0.0, 0.0, 400.0, 400.0), seeded());
        let plans = cache.plan_tiles(&full_view(400.0, 400.0, 1.0), 1.0);
        assert_eq!(plans.len(), 16);
    }

    #[test]
    fn plan_drops_tiles_outside_the_screen() {
        let fake = FakeScene::new((400.0, 400.0));
        let cache = cache_for(&fake, DocRect::new(0.0, 0.0, 400.0, 400.0), seeded());
        let view = FrameView {
            frame_screen: ScreenRect::new(-150.0, 0.0, 400.0, 400.0),
            screen: ScreenRect::new(0.0, 0.0, 200.0, 400.0),
            scale: 1.0,
        };
        let plans = cache.plan_tiles(&view, 1.0);
        // Column 0 ends at -50 on screen; columns 1..=3 overlap it.
        assert!(plans.iter().all(|p| p.screen_rect.intersects(&view.screen)));
        assert_eq!(plans.len(), 12);
    }

    #[test]
    fn edge_tiles_are_clipped_to_the_frame() {
        let fake = FakeScene::new((250.0, 130.0));
        let cache = cache_for(&fake, DocRect::new(0.0, 0.0, 250.0, 130.0), seeded());
        let plans = cache.plan_tiles(&full_view(250.0, 130.0, 1.0), 1.0);
        assert_eq!(plans.len(), 6);
        let corner = plans
            .iter()
            .find(|p| p.chunk_rect.x == 200 && p.chunk_rect.y == 100)
            .unwrap();
        assert_eq!(corner.chunk_rect, PixelRect::new(200, 100, 50, 30));
        assert_eq!(corner.base_rect, DocRect::new(200.0, 100.0, 50.0, 30.0));
    }

    #[test]
    fn tile_count_never_exceeds_the_ceiling() {
        let fake = FakeScene::new((1404.0, 1872.0));
        let cache = cache_for(&fake, DocRect::new(0.0, 0.0, 1404.0, 1872.0), seeded());
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..300 {
            let scale = rng.gen_range(0.01..40.0);
            let view = FrameView {
                frame_screen: ScreenRect::new(
                    rng.gen_range(-20_000.0..2_000.0),
                    rng.gen_range(-20_000.0..2_000.0),
                    1404.0 * scale,
                    1872.0 * scale,
                ),
                screen: ScreenRect::new(0.0, 0.0, rng.gen_range(1.0..4000.0), rng.gen_range(1.0..4000.0)),
                scale,
            };
            let plans = cache.plan_tiles(&view, 1.0);
            assert!(plans.len() <= 20, "{} tiles for {view:?}", plans.len());
        }
    }

    #[test]
    fn degenerate_views_plan_nothing() {
        let fake = FakeScene::new((100.0, 100.0));
        let cache = cache_for(&fake, DocRect::new(0.0, 0.0, 100.0, 100.0), seeded());
        let mut view = full_view(100.0, 100.0, 1.0);
        view.scale = 0.0;
        assert!(cache.plan_tiles(&view, 1.0).is_empty());

        let mut view = full_view(100.0, 100.0, 1.0);
        view.screen = ScreenRect::new(500.0, 500.0, 10.0, 10.0);
        assert!(cache.plan_tiles(&view, 1.0).is_empty());
    }

    #[test]
    fn same_seed_same_dispatch_order() {
        let order = || {
            let fake = FakeScene::new((400.0, 400.0));
            let mut cache = cache_for(&fake, DocRect::new(0.0, 0.0, 400.0, 400.0), seeded());
            let pool = RenderPool::new(1);
            cache
                .get_chunks(&full_view(400.0, 400.0, 1.0), &pool)
                .into_iter()
                .map(|c| c.chunk_rect)
                .collect::<Vec<_>>()
        };
        assert_eq!(order(), order());
    }

    #[test]
    fn repeated_requests_reuse_tasks() {
        let fake = FakeScene::new((400.0, 400.0));
        let mut cache = cache_for(&fake, DocRect::new(0.0, 0.0, 400.0, 400.0), seeded());
        let pool = RenderPool::new(2);

        let first = cache.get_chunks(&full_view(400.0, 400.0, 1.0), &pool);
        assert_eq!(first.len(), 16);

        // Overlapping second view: shifted by one tile.
        let shifted = FrameView {
            screen: ScreenRect::new(100.0, 0.0, 300.0, 400.0),
            ..full_view(400.0, 400.0, 1.0)
        };
        let second = cache.get_chunks(&shifted, &pool);
        assert_eq!(second.len(), 12);

        for chunk in &second {
            let task = chunk.task.as_ref().unwrap();
            assert!(
                first
                    .iter()
                    .any(|c| Arc::ptr_eq(c.task.as_ref().unwrap(), task)),
                "tile {:?} was respawned",
                chunk.chunk_rect
            );
        }
        assert_eq!(cache.len(), 16);

        assert!(wait_until(WAIT, || fake.render_calls() == 16 && cache.pending() == 0));
        assert_eq!(fake.render_calls(), 16);
        assert_eq!(fake.max_concurrent_renders(), 1);
    }

    #[test]
    fn distinct_keys_for_distinct_tiles() {
        let fake = FakeScene::new((400.0, 400.0));
        let mut cache = cache_for(&fake, DocRect::new(0.0, 0.0, 400.0, 400.0), seeded());
        let pool = RenderPool::new(1);
        let chunks = cache.get_chunks(&full_view(400.0, 400.0, 1.0), &pool);
        let keys: HashSet<_> = chunks
            .iter()
            .map(|c| c.task.as_ref().unwrap().key().clone())
            .collect();
        assert_eq!(keys.len(), chunks.len());
    }

    #[test]
    fn scale_change_mid_flight_drops_old_results() {
        let fake = FakeScene::new((200.0, 200.0));
        let mut cache = cache_for(&fake, DocRect::new(0.0, 0.0, 200.0, 200.0), seeded());
        let pool = RenderPool::new(1);

        let gate = fake.hold_next_render();
        let old = cache.get_chunks(&full_view(200.0, 200.0, 1.0), &pool);
        assert_eq!(old.len(), 4);
        assert!(gate.wait_entered(WAIT));

        let new = cache.get_chunks(&full_view(200.0, 200.0, 0.5), &pool);
        assert_eq!(new.len(), 1);
        gate.release();

        assert!(wait_until(WAIT, || {
            new.iter().all(|c| c.task.as_ref().unwrap().is_loaded())
                && old.iter().all(|c| c.task.as_ref().unwrap().is_stale())
        }));

        // Only the blocked call and the new scale reached the rasterizer.
        assert_eq!(fake.render_calls(), 2);
        for chunk in &old {
            let task = chunk.task.as_ref().unwrap();
            assert!(task.raster().is_none());
            assert!(!cache.contains(task.key()));
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn stale_entries_are_replaced_on_return() {
        let fake = FakeScene::new((100.0, 100.0));
        let mut cache = cache_for(&fake, DocRect::new(0.0, 0.0, 100.0, 100.0), seeded());
        let pool = RenderPool::new(1);

        let gate = fake.hold_next_render();
        let _blocker = cache.get_chunks(&full_view(100.0, 100.0, 2.0), &pool);
        assert!(gate.wait_entered(WAIT));
        let first = cache.get_chunks(&full_view(100.0, 100.0, 1.0), &pool);
        let _away = cache.get_chunks(&full_view(100.0, 100.0, 2.0), &pool);
        gate.release();

        let task = Arc::clone(first[0].task.as_ref().unwrap());
        assert!(wait_until(WAIT, || task.is_stale()));

        let again = cache.get_chunks(&full_view(100.0, 100.0, 1.0), &pool);
        let replacement = again[0].task.as_ref().unwrap();
        assert!(!Arc::ptr_eq(replacement, &task));
        assert!(wait_until(WAIT, || replacement.is_loaded()));
    }

    #[test]
    fn small_capacity_keeps_visible_tiles() {
        let fake = FakeScene::new((400.0, 400.0));
        let config = RenderConfig {
            eviction: EvictionPolicy::Lru { capacity: 4 },
            ..seeded()
        };
        let mut cache = cache_for(&fake, DocRect::new(0.0, 0.0, 400.0, 400.0), config);
        let pool = RenderPool::new(1);
        let view = full_view(400.0, 400.0, 1.0);

        for _ in 0..3 {
            assert_eq!(cache.get_chunks(&view, &pool).len(), 16);
        }
        assert!(wait_until(WAIT, || cache.agent().in_flight() == 0));
        assert_eq!(fake.render_calls(), 16);
        assert_eq!(cache.len(), 16);
    }

    #[test]
    fn lru_drops_tiles_of_old_scales() {
        let fake = FakeScene::new((400.0, 400.0));
        let config = RenderConfig {
            eviction: EvictionPolicy::Lru { capacity: 1 },
            ..seeded()
        };
        let mut cache = cache_for(&fake, DocRect::new(0.0, 0.0, 400.0, 400.0), config);
        let pool = RenderPool::new(1);

        // Each scale plans 16 tiles; capacity is raised to two full views.
        for scale in [1.0, 1.1, 1.21] {
            assert_eq!(cache.get_chunks(&full_view(400.0, 400.0, scale), &pool).len(), 16);
            assert!(wait_until(WAIT, || cache.agent().in_flight() == 0));
        }
        assert_eq!(fake.render_calls(), 48);
        assert_eq!(cache.len(), 2 * crate::ink::config::DEFAULT_MAX_CHUNKS);
    }

    #[test]
    fn peek_spawns_nothing() {
        let fake = FakeScene::new((200.0, 200.0));
        let mut cache = cache_for(&fake, DocRect::new(0.0, 0.0, 200.0, 200.0), seeded());
        let view = full_view(200.0, 200.0, 1.0);

        let peeked = cache.peek_chunks(&view);
        assert_eq!(peeked.len(), 4);
        assert!(peeked.iter().all(|c| c.task.is_none()));
        assert!(cache.is_empty());

        let pool = RenderPool::new(1);
        cache.get_chunks(&view, &pool);
        assert!(cache.peek_chunks(&view).iter().all(|c| c.task.is_some()));
    }

    #[test]
    fn close_clears_and_stops_results() {
        let fake = FakeScene::new((200.0, 200.0));
        let mut cache = cache_for(&fake, DocRect::new(0.0, 0.0, 200.0, 200.0), seeded());
        let pool = RenderPool::new(1);

        let gate = fake.hold_next_render();
        let chunks = cache.get_chunks(&full_view(200.0, 200.0, 1.0), &pool);
        assert!(gate.wait_entered(WAIT));
        cache.close();
        gate.release();

        assert!(wait_until(WAIT, || chunks
            .iter()
            .all(|c| c.task.as_ref().unwrap().is_stale())));
        assert!(cache.is_empty());
        assert_eq!(fake.render_calls(), 1);
        assert!(wait_until(WAIT, || cache.agent().in_flight() == 0));
    }
}
