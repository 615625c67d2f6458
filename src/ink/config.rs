//! Tuning knobs for the tile engine

/// Tile edge length at size multiplier 1, in device pixels
pub const DEFAULT_CHUNK_SIZE: u32 = 100;
/// Most tiles a single `get_chunks` call may hand out
pub const DEFAULT_MAX_CHUNKS: usize = 20;
/// Size multiplier growth applied while the tile count is over the ceiling
pub const DEFAULT_CHUNK_GROWTH: f64 = 1.1;
pub const DEFAULT_CACHE_CAPACITY: usize = 512;
pub const DEFAULT_WORKERS: usize = 4;
/// Width a frame is normalized to before applying the UI scale
pub const DEFAULT_REFERENCE_WIDTH: f64 = 1000.0;

/// How a chunk cache bounds its memory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Keep every tile until the page closes
    Unbounded,
    /// Drop the tiles that have gone longest without being visible
    Lru { capacity: usize },
}

impl EvictionPolicy {
    /// A capacity of zero means unbounded
    #[must_use]
    pub fn from_capacity(capacity: usize) -> Self {
        if capacity == 0 {
            Self::Unbounded
        } else {
            Self::Lru { capacity }
        }
    }
}

/// Configuration handed to a page renderer
#[derive(Clone, Debug, PartialEq)]
pub struct RenderConfig {
    pub base_chunk_size: u32,
    pub max_chunks: usize,
    pub chunk_growth: f64,
    pub eviction: EvictionPolicy,
    pub workers: usize,
    /// Preview resolution relative to the frame's native size
    pub preview_scale: f64,
    pub reference_width: f64,
    pub ui_scale: f64,
    /// Fixed seed for the tile dispatch shuffle; random when `None`
    pub shuffle_seed: Option<u64>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            base_chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunks: DEFAULT_MAX_CHUNKS,
            chunk_growth: DEFAULT_CHUNK_GROWTH,
            eviction: EvictionPolicy::Lru {
                capacity: DEFAULT_CACHE_CAPACITY,
            },
            workers: DEFAULT_WORKERS,
            preview_scale: 1.0,
            reference_width: DEFAULT_REFERENCE_WIDTH,
            ui_scale: 1.0,
            shuffle_seed: None,
        }
    }
}

impl RenderConfig {
    /// Clamp values that would stall or break tiling
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.base_chunk_size = self.base_chunk_size.max(1);
        // A rect no larger than one tile spans at most 2×2 tiles.
        self.max_chunks = self.max_chunks.max(4);
        if !(self.chunk_growth.is_finite() && self.chunk_growth > 1.0) {
            self.chunk_growth = DEFAULT_CHUNK_GROWTH;
        }
        // Tiles visible in one UI frame must never evict each other.
        if let EvictionPolicy::Lru { capacity } = self.eviction {
            self.eviction = EvictionPolicy::Lru {
                capacity: capacity.max(self.max_chunks.saturating_mul(2)),
            };
        }
        self.workers = self.workers.max(1);
        if !(self.preview_scale.is_finite() && self.preview_scale > 0.0) {
            self.preview_scale = 1.0;
        }
        if !(self.reference_width.is_finite() && self.reference_width > 0.0) {
            self.reference_width = DEFAULT_REFERENCE_WIDTH;
        }
        if !(self.ui_scale.is_finite() && self.ui_scale > 0.0) {
            self.ui_scale = 1.0;
        }
        self
    }
}
