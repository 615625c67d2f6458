//! Handwritten ink rendering infrastructure

mod cache;
mod chunk;
mod config;
mod error;
mod frames;
mod page;
mod pen;
mod pool;
mod preview;
mod scene;
mod scene_file;
mod size_tracker;
mod state;
mod types;
mod zoom;

pub use cache::{CacheKey, ChunkCache, FrameView, TilePlan, VisibleChunk, tile_grid};
pub use chunk::{ChunkTask, InFlightGuard, RenderAgent, TileState, decode_raster, scale_key};
pub use config::*;
pub use error::{PenError, SceneError, TileError};
pub use frames::{FrameChunks, FrameLayout, FrameOrchestrator, Viewport};
pub use page::{PageRenderContext, PageRenderer, TileContent, TileView, composite};
pub use pen::*;
pub use pool::RenderPool;
pub use preview::{PreviewEntry, PreviewProvider, PreviewState};
pub use scene::{Document, LayerId, SceneHandle, SceneProvider, SharedScene};
pub use scene_file::{JsonScene, JsonSceneProvider};
pub use size_tracker::SizeTracker;
pub use state::{PageEffect, PageEvent, PageState, UnloadableRegistry};
pub use types::*;
pub use zoom::{ZoomState, anchored_pan};
